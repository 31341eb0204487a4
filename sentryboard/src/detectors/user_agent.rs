// src/detectors/user_agent.rs
//
// Grounded in the teacher's `workers/fingerprint.rs` UA-claims-browser checks
// and `workers/asn_classifier.rs`'s known-bot-org pattern, generalized into a
// standalone first-wave detector (§4.4 table row `UserAgent`).

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{BotType, Category, SignalKey, SignalValue};
use crate::state::normalize::normalize_ua;

use super::{contribution, Detector, DetectorContext, DetectorOutput};

/// (needle in normalized UA, canonical bot name, is verified/whitelisted).
const KNOWN_BOTS: &[(&str, &str, bool)] = &[
    ("googlebot", "Google Search", true),
    ("bingbot", "Bing", true),
    ("duckduckbot", "DuckDuckGo", true),
    ("yandexbot", "Yandex", true),
    ("baiduspider", "Baidu", true),
    ("applebot", "Apple", true),
    ("facebookbot", "Meta Crawler", true),
    ("curl", "curl", false),
    ("python-requests", "python-requests", false),
    ("python-urllib", "python-urllib", false),
    ("go-http-client", "Go net/http", false),
    ("okhttp", "okhttp", false),
    ("java-http-client", "Java HttpClient", false),
    ("node-fetch", "node-fetch", false),
    ("axios", "axios", false),
    ("headless-chrome", "Headless Chrome", false),
    ("phantomjs", "PhantomJS", false),
    ("selenium", "Selenium", false),
    ("puppeteer", "Puppeteer", false),
    ("playwright", "Playwright", false),
];

pub struct UserAgentDetector;

#[async_trait]
impl Detector for UserAgentDetector {
    fn name(&self) -> &'static str {
        "user_agent"
    }

    fn priority(&self) -> i32 {
        1
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let raw = &ctx.request.user_agent;
        let normalized = normalize_ua(raw);
        let mut out = DetectorOutput::empty();

        let hit = KNOWN_BOTS.iter().find(|(needle, _, _)| normalized == *needle || normalized.contains(needle));

        if let Some((_, bot_name, verified)) = hit {
            out = out
                .with_signal(SignalKey::UaIsBot, SignalValue::Bool(true))
                .with_signal(SignalKey::UaIsKnownBot, SignalValue::Bool(*verified))
                .with_signal(SignalKey::UaBotName, SignalValue::Text((*bot_name).to_string()));

            let mut c = contribution(
                self.name(),
                Category::UserAgent,
                if *verified { -1.0 } else { 0.7 },
                1.0,
                format!("ua_family:{}", normalized),
                self.priority(),
            );
            c.bot_name = Some((*bot_name).to_string());
            c.bot_type = Some(if *verified { BotType::VerifiedBot } else { BotType::Automation });
            c.whitelisted = *verified;
            out = out.with_contribution(c);
            return Ok(out);
        }

        let headless = normalized.contains("headless") || raw.to_lowercase().contains("headlesschrome");
        out = out.with_signal(SignalKey::UaHeadless, SignalValue::Bool(headless));

        if raw.trim().is_empty() {
            out = out.with_contribution(contribution(
                self.name(),
                Category::UserAgent,
                0.6,
                0.8,
                "empty_user_agent",
                self.priority(),
            ));
        } else if headless {
            out = out.with_contribution(contribution(
                self.name(),
                Category::UserAgent,
                0.5,
                0.8,
                "headless_browser_ua",
                self.priority(),
            ));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{Blackboard, RequestSnapshot};
    use crate::state::SharedState;
    use std::collections::HashMap;

    fn snapshot(ua: &str) -> RequestSnapshot {
        RequestSnapshot {
            method: "GET".into(),
            path: "/".into(),
            query: "".into(),
            headers: vec![],
            remote_ip: "198.51.100.1".into(),
            user_agent: ua.into(),
            tls_ja3: None,
            tls_ja3s: None,
            cookies: HashMap::new(),
            body_excerpt: String::new(),
            referer: None,
            client_fingerprint: None,
        }
    }

    #[tokio::test]
    async fn googlebot_is_verified_and_whitelisted() {
        let config = Config::default();
        let state = SharedState::new(&config);
        let req = snapshot("Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)");
        let board = Blackboard::new("r1".into());
        let ctx = DetectorContext {
            request: &req,
            board: &board,
            state: &state,
            config: &config,
        };
        let out = UserAgentDetector.contribute(&ctx).await.unwrap();
        let c = &out.contributions[0];
        assert!(c.whitelisted);
        assert_eq!(c.bot_type, Some(BotType::VerifiedBot));
    }

    #[tokio::test]
    async fn curl_is_flagged_not_whitelisted() {
        let config = Config::default();
        let state = SharedState::new(&config);
        let req = snapshot("curl/8.4.0");
        let board = Blackboard::new("r2".into());
        let ctx = DetectorContext {
            request: &req,
            board: &board,
            state: &state,
            config: &config,
        };
        let out = UserAgentDetector.contribute(&ctx).await.unwrap();
        let c = &out.contributions[0];
        assert!(!c.whitelisted);
        assert!(c.confidence_delta > 0.0);
    }
}
