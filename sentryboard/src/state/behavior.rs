// src/state/behavior.rs
//
// Per-signature rolling request window (§4.4 `Behavioral` detector input).
// Grounded in the teacher's `state/window.rs::AccountWindow` — a sharded
// `DashMap` of per-entity ring buffers — keyed by signature id instead of
// account id, and trimmed to only the fields the behavioral/drift detectors
// actually need (request timestamps + path classes), since persistent
// payment/infra reverse indexes are out of scope for this domain.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

const MAX_HISTORY: usize = 200;
const WINDOW_SECONDS: i64 = 3600;

struct SignatureWindow {
    timestamps: VecDeque<DateTime<Utc>>,
    path_classes: VecDeque<String>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl SignatureWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            timestamps: VecDeque::new(),
            path_classes: VecDeque::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    fn trim(&mut self, now: DateTime<Utc>) {
        while self.timestamps.len() > MAX_HISTORY {
            self.timestamps.pop_front();
            self.path_classes.pop_front();
        }
        while let Some(front) = self.timestamps.front() {
            if (now - *front).num_seconds() > WINDOW_SECONDS {
                self.timestamps.pop_front();
                self.path_classes.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BehaviorSnapshot {
    pub request_rate: f64,
    pub path_diversity: f64,
    pub path_entropy: f64,
    /// Coefficient of variation of inter-request intervals (§3): low means
    /// regular, scripted timing; high means human-like bursty timing.
    pub timing_cv: f64,
    /// Normalized Shannon entropy of the inter-arrival power spectrum (§4.3).
    /// Low entropy means energy concentrated in a few bins — a periodic,
    /// scripted cadence; high entropy means a flat spectrum — human jitter.
    pub spectral_entropy: f64,
    /// Share of spectral energy sitting at integer multiples of the
    /// dominant bin. High for strictly periodic polling.
    pub harmonic_ratio: f64,
    /// Dominant bin's power over the mean bin power, normalized to [0, 1].
    pub peak_to_average: f64,
    /// Dominant bin position as a fraction of the usable spectrum, i.e. a
    /// normalized "requests per cycle" frequency.
    pub dominant_frequency: f64,
}

/// Computes a small set of spectral features from an inter-arrival time
/// series via a direct (non-FFT) discrete Fourier transform. The series is
/// short enough (bounded by `MAX_HISTORY`) that the O(n^2) direct form is
/// cheap and avoids pulling in an FFT crate for a handful of bins.
fn spectral_features(series: &[f64]) -> (f64, f64, f64, f64) {
    let n = series.len();
    if n < 4 {
        return (0.0, 0.0, 0.0, 0.0);
    }

    let mean = series.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = series.iter().map(|x| x - mean).collect();

    let n_bins = n / 2;
    let mut power = vec![0.0_f64; n_bins];
    for (k, slot) in power.iter_mut().enumerate() {
        let mut re = 0.0;
        let mut im = 0.0;
        for (t, x) in centered.iter().enumerate() {
            let angle = -2.0 * std::f64::consts::PI * (k as f64) * (t as f64) / (n as f64);
            re += x * angle.cos();
            im += x * angle.sin();
        }
        *slot = re * re + im * im;
    }

    let total_power: f64 = power.iter().sum();
    if total_power <= 0.0 || n_bins < 2 {
        return (0.0, 0.0, 0.0, 0.0);
    }

    let (peak_bin, &peak_power) = power
        .iter()
        .enumerate()
        .skip(1) // bin 0 is the DC component, not a cadence
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or((0, &0.0));

    let avg_power = total_power / n_bins as f64;
    let peak_to_average = if avg_power > 0.0 { (peak_power / avg_power / 10.0).clamp(0.0, 1.0) } else { 0.0 };

    let entropy: f64 = power
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| {
            let pr = p / total_power;
            -pr * pr.log2()
        })
        .sum();
    let max_entropy = (n_bins as f64).log2().max(1.0);
    let spectral_entropy = (entropy / max_entropy).clamp(0.0, 1.0);

    let harmonics_power: f64 = (2..=4).filter_map(|h| power.get(peak_bin * h)).sum();
    let harmonic_ratio = (harmonics_power / total_power).clamp(0.0, 1.0);

    let dominant_frequency = (peak_bin as f64 / n_bins as f64).clamp(0.0, 1.0);

    (spectral_entropy, harmonic_ratio, peak_to_average, dominant_frequency)
}

pub struct BehaviorTracker {
    windows: DashMap<String, RwLock<SignatureWindow>>,
}

impl BehaviorTracker {
    pub fn new() -> Self {
        Self { windows: DashMap::new() }
    }

    pub fn record(&self, signature_id: &str, path_class: &str, timestamp: DateTime<Utc>) {
        let lock = self
            .windows
            .entry(signature_id.to_string())
            .or_insert_with(|| RwLock::new(SignatureWindow::new(timestamp)));
        let mut w = lock.write();
        w.timestamps.push_back(timestamp);
        w.path_classes.push_back(path_class.to_string());
        w.last_seen = timestamp;
        w.trim(timestamp);
    }

    pub fn snapshot(&self, signature_id: &str) -> BehaviorSnapshot {
        let Some(lock) = self.windows.get(signature_id) else {
            return BehaviorSnapshot::default();
        };
        let w = lock.read();
        let n = w.timestamps.len();
        if n < 2 {
            return BehaviorSnapshot::default();
        }

        let span_secs = (*w.timestamps.back().unwrap() - *w.timestamps.front().unwrap())
            .num_milliseconds() as f64
            / 1000.0;
        let request_rate = if span_secs > 0.0 { n as f64 / span_secs * 3600.0 } else { 0.0 };

        let interarrivals: Vec<f64> = w
            .timestamps
            .iter()
            .zip(w.timestamps.iter().skip(1))
            .map(|(a, b)| (*b - *a).num_milliseconds() as f64 / 1000.0)
            .collect();
        let timing_cv = if interarrivals.len() >= 2 {
            let mean = interarrivals.iter().sum::<f64>() / interarrivals.len() as f64;
            if mean > 0.0 {
                let variance = interarrivals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / interarrivals.len() as f64;
                variance.sqrt() / mean
            } else {
                0.0
            }
        } else {
            0.0
        };
        let (spectral_entropy, harmonic_ratio, peak_to_average, dominant_frequency) = spectral_features(&interarrivals);

        let distinct: std::collections::HashSet<&String> = w.path_classes.iter().collect();
        let path_diversity = distinct.len() as f64 / n as f64;

        let mut counts = std::collections::HashMap::new();
        for p in &w.path_classes {
            *counts.entry(p.as_str()).or_insert(0usize) += 1;
        }
        let path_entropy: f64 = counts
            .values()
            .map(|&c| {
                let p = c as f64 / n as f64;
                -p * p.log2()
            })
            .sum();

        BehaviorSnapshot {
            request_rate,
            path_diversity,
            path_entropy,
            timing_cv,
            spectral_entropy,
            harmonic_ratio,
            peak_to_average,
            dominant_frequency,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn regular_timing_scores_low_cv() {
        let tracker = BehaviorTracker::new();
        let t0 = Utc::now();
        for i in 0..10 {
            tracker.record("sig", "home", t0 + Duration::seconds(i * 5));
        }
        let snap = tracker.snapshot("sig");
        assert!(snap.timing_cv < 0.2);
    }

    #[test]
    fn regular_timing_has_concentrated_spectrum() {
        let tracker = BehaviorTracker::new();
        let t0 = Utc::now();
        for i in 0..20 {
            tracker.record("sig", "home", t0 + Duration::seconds(i * 5));
        }
        let snap = tracker.snapshot("sig");
        // a perfectly periodic cadence concentrates energy in one bin: low
        // entropy, high peak-to-average.
        assert!(snap.spectral_entropy < 0.5, "entropy={}", snap.spectral_entropy);
        assert!(snap.peak_to_average > 0.1, "p2a={}", snap.peak_to_average);
    }

    #[test]
    fn short_history_spectral_features_are_zero() {
        let tracker = BehaviorTracker::new();
        let t0 = Utc::now();
        tracker.record("sig", "home", t0);
        tracker.record("sig", "home", t0 + Duration::seconds(5));
        let snap = tracker.snapshot("sig");
        assert_eq!(snap.spectral_entropy, 0.0);
        assert_eq!(snap.dominant_frequency, 0.0);
    }

    #[test]
    fn unknown_signature_returns_default() {
        let tracker = BehaviorTracker::new();
        let snap = tracker.snapshot("ghost");
        assert_eq!(snap.request_rate, 0.0);
    }
}
