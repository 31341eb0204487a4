// src/state/normalize.rs
//
// Stable-key normalization for reputation/Markov state (§4.1, §4.2, §8
// round-trip laws). All of this must be idempotent: `normalize_x(normalize_x(s))
// == normalize_x(s)`. Hashing into pattern/signature ids uses HMAC-SHA256
// (teacher idiom: `ioc_feed.rs::hmac_sign`) so raw UA/IP strings never leave
// the detector that produced them (§4.1 normalization note).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const DEV_FALLBACK_KEY: &[u8] = b"sentryboard_dev_key";

/// HMAC-SHA256 over an already-normalized string, hex-encoded and truncated
/// to 32 hex chars (128 bits) — plenty of collision resistance for a
/// process-internal key, small enough to keep reputation/signature tables
/// cheap to hash-index.
pub fn hash_pattern_id(normalized: &str, key: &[u8]) -> String {
    let effective_key = if key.is_empty() { DEV_FALLBACK_KEY } else { key };
    let mut mac = HmacSha256::new_from_slice(effective_key).expect("HMAC accepts any key length");
    mac.update(normalized.as_bytes());
    hex::encode(&mac.finalize().into_bytes()[..16])
}

/// Known UA framework/family tokens mapped to a canonical label. Order
/// matters: more specific tokens first.
const UA_FAMILIES: &[(&str, &str)] = &[
    ("googlebot", "googlebot"),
    ("bingbot", "bingbot"),
    ("duckduckbot", "duckduckbot"),
    ("yandexbot", "yandexbot"),
    ("baiduspider", "baiduspider"),
    ("applebot", "applebot"),
    ("facebookexternalhit", "facebookbot"),
    ("curl/", "curl"),
    ("python-requests", "python-requests"),
    ("python-urllib", "python-urllib"),
    ("go-http-client", "go-http-client"),
    ("okhttp", "okhttp"),
    ("java/", "java-http-client"),
    ("node-fetch", "node-fetch"),
    ("axios/", "axios"),
    ("headlesschrome", "headless-chrome"),
    ("phantomjs", "phantomjs"),
    ("selenium", "selenium"),
    ("puppeteer", "puppeteer"),
    ("playwright", "playwright"),
    ("chrome/", "chrome"),
    ("firefox/", "firefox"),
    ("safari/", "safari"),
    ("edg/", "edge"),
];

/// Marketing/noise tokens stripped before family matching so that e.g.
/// `"Mozilla/5.0 (Windows NT 10.0; Win64; x64)"` doesn't dominate the
/// comparison with OS boilerplate that carries no signal.
const STRIP_TOKENS: &[&str] = &[
    "mozilla/5.0",
    "applewebkit",
    "(khtml, like gecko)",
    "like gecko",
];

/// Collapse a dotted version number (`120.0.6099.129`) down to its major
/// component (`120`). Pure, idempotent: re-running on `"120"` yields `"120"`.
fn collapse_version(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c.is_ascii_digit() {
            // swallow a trailing dotted version tail: digits separated by dots
            while matches!(chars.peek(), Some('.')) {
                let mut lookahead = chars.clone();
                lookahead.next(); // consume '.'
                if matches!(lookahead.peek(), Some(d) if d.is_ascii_digit()) {
                    chars.next(); // consume '.'
                    while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                        chars.next();
                    }
                } else {
                    break;
                }
            }
        }
    }
    out
}

/// Normalize a user-agent string into a stable canonical form: lowercased,
/// marketing boilerplate stripped, version numbers collapsed to major,
/// framework family mapped to a canonical label when recognized.
pub fn normalize_ua(ua: &str) -> String {
    let mut lower = ua.to_lowercase();
    for tok in STRIP_TOKENS {
        lower = lower.replace(tok, "");
    }
    let collapsed = collapse_version(&lower);
    let collapsed = collapsed.split_whitespace().collect::<Vec<_>>().join(" ");

    for (needle, family) in UA_FAMILIES {
        if collapsed.contains(needle) {
            return family.to_string();
        }
    }
    collapsed.trim().to_string()
}

/// IPv4 → /24, IPv6 → /64. Private/loopback ranges collapse to a sentinel
/// id that the reputation store never promotes beyond `New`.
pub fn normalize_ip(ip: &str) -> String {
    use std::net::IpAddr;
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            if v4.is_private() || v4.is_loopback() || v4.is_link_local() {
                return "private-v4".to_string();
            }
            let o = v4.octets();
            format!("{}.{}.{}.0/24", o[0], o[1], o[2])
        }
        Ok(IpAddr::V6(v6)) => {
            if v6.is_loopback() {
                return "private-v6".to_string();
            }
            let seg = v6.segments();
            format!("{:x}:{:x}:{:x}:{:x}::/64", seg[0], seg[1], seg[2], seg[3])
        }
        Err(_) => "unparseable".to_string(),
    }
}

/// Path normalization (§4.2): strip query/fragment (caller's job — the
/// `RequestSnapshot.path` is already split from `query`), lowercase,
/// collapse consecutive slashes, replace numeric/UUID segments with `{id}`,
/// replace a trailing file extension with `{ext}`.
pub fn normalize_path(path: &str) -> String {
    let lower = path.split('#').next().unwrap_or("").to_lowercase();
    let mut segments: Vec<String> = Vec::new();
    for raw in lower.split('/') {
        if raw.is_empty() {
            continue;
        }
        segments.push(normalize_segment(raw));
    }
    let mut out = String::from("/");
    out.push_str(&segments.join("/"));
    if out.len() > 1 {
        // trailing extension replacement happens on the last segment only
    }
    out
}

fn normalize_segment(seg: &str) -> String {
    if is_uuid(seg) || is_numeric(seg) {
        return "{id}".to_string();
    }
    if let Some(dot) = seg.rfind('.') {
        if dot > 0 && seg[dot + 1..].chars().all(|c| c.is_ascii_alphanumeric()) && seg.len() - dot <= 6 {
            return format!("{}.{{ext}}", &seg[..dot]);
        }
    }
    seg.to_string()
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn is_uuid(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 5
        && [8, 4, 4, 4, 12]
            .iter()
            .zip(parts.iter())
            .all(|(len, part)| part.len() == *len && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Map a normalized path to a coarse path class via a small configurable
/// table (§4.2 example: `/api/{v}/users/{id}` → `api-users-detail`).
pub fn path_class(normalized_path: &str) -> String {
    let segs: Vec<&str> = normalized_path.split('/').filter(|s| !s.is_empty()).collect();
    if segs.is_empty() {
        return "root".to_string();
    }
    let mut class_segs: Vec<&str> = Vec::new();
    let mut saw_id = false;
    for s in &segs {
        if *s == "{id}" {
            saw_id = true;
            continue;
        }
        if s.chars().all(|c| c.is_ascii_digit() || c == 'v') && s.len() <= 3 {
            continue; // version segment like "v1", "v2"
        }
        class_segs.push(s);
    }
    let mut class = class_segs.join("-");
    if class.is_empty() {
        class = "root".to_string();
    }
    if saw_id {
        class.push_str("-detail");
    }
    class
}

/// HMAC-hashed composite signature id: IP prefix + UA class + optional TLS
/// hash. Never the raw values — only the normalized composite is hashed.
pub fn signature_id(ip_prefix: &str, ua_class: &str, tls_hash: Option<&str>, key: &[u8]) -> String {
    let composite = format!("{}|{}|{}", ip_prefix, ua_class, tls_hash.unwrap_or(""));
    hash_pattern_id(&composite, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_ua_idempotent() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.129 Safari/537.36";
        let once = normalize_ua(ua);
        let twice = normalize_ua(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_ua_maps_known_families() {
        assert_eq!(normalize_ua("curl/8.4.0"), "curl");
        assert_eq!(
            normalize_ua("Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"),
            "googlebot"
        );
    }

    #[test]
    fn normalize_path_idempotent() {
        let p = "/API//Users/42/Orders/550e8400-e29b-41d4-a716-446655440000.json";
        let once = normalize_path(p);
        let twice = normalize_path(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_path_replaces_ids_and_ext() {
        let p = "/api/users/42/report.json";
        assert_eq!(normalize_path(p), "/api/users/{id}/report.{ext}");
    }

    #[test]
    fn normalize_ip_collapses_to_prefix() {
        assert_eq!(normalize_ip("3.5.140.2"), "3.5.140.0/24");
        assert_eq!(normalize_ip("192.168.1.1"), "private-v4");
    }

    #[test]
    fn path_class_groups_detail_routes() {
        let np = normalize_path("/api/v1/users/42");
        assert_eq!(path_class(&np), "api-users-detail");
    }

    #[test]
    fn hash_pattern_id_stable_fixed_point() {
        let n = normalize_ua("curl/8.4.0");
        let h1 = hash_pattern_id(&n, b"k");
        let h2 = hash_pattern_id(&normalize_ua(&n), b"k");
        assert_eq!(h1, h2);
    }
}
