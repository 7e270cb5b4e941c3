//! # engine::classifier
//!
//! Turns a channel post into a [`TradeDirective`] by asking the oracle.
//!
//! Transport failures are retried under [`RetryPolicy`]; a reply that arrives
//! but cannot be parsed is not retried, since the same prompt tends to get
//! the same broken answer.  Nothing here returns an error: every failure
//! degrades to `Action::None` (or `None` for the update stage).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::ai::Oracle;
use crate::models::{SlTpUpdate, TradeDirective};
use crate::prompt;

/// How often a failed oracle call is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; never below 1
    pub max_attempts: u32,
    pub delay:        Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_secs(5) }
    }
}

pub struct SignalClassifier {
    oracle: Arc<dyn Oracle>,
    retry:  RetryPolicy,
}

impl SignalClassifier {
    pub fn new(oracle: Arc<dyn Oracle>, retry: RetryPolicy) -> Self {
        Self { oracle, retry }
    }

    /// First stage: what does this post ask for?
    pub async fn classify(&self, text: &str) -> TradeDirective {
        let Some(raw) = self.ask(&prompt::classification_prompt(text)).await else {
            return TradeDirective::none();
        };

        match parse_relaxed(&raw) {
            Some(value) => {
                let directive = TradeDirective::from_json(&value);
                info!(
                    action    = %directive.action,
                    symbol    = ?directive.symbol,
                    direction = ?directive.direction,
                    "🧠 Message classified"
                );
                directive
            }
            None => {
                error!(raw = %raw, "Failed to parse classifier reply as JSON");
                TradeDirective::none()
            }
        }
    }

    /// Second stage for `update_trade`: which SL / TP levels to apply.
    pub async fn classify_update(&self, text: &str, directive: &TradeDirective) -> Option<SlTpUpdate> {
        let raw = self.ask(&prompt::update_prompt(text, directive)).await?;

        let Some(value) = parse_relaxed(&raw) else {
            error!(raw = %raw, "Failed to parse update reply as JSON");
            return None;
        };

        let update = SlTpUpdate::from_json(&value);
        if update.is_none() {
            warn!(raw = %raw, "Update reply carries no stop loss or take profit");
        }
        update
    }

    async fn ask(&self, prompt: &str) -> Option<String> {
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.oracle.complete(prompt).await {
                Ok(raw) => return Some(raw),
                Err(e) if attempt < attempts => {
                    warn!(attempt, max = attempts, "Oracle call failed: {e}. Retrying in {:?}", self.retry.delay);
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => {
                    error!(attempts, "Oracle call failed, giving up: {e}");
                }
            }
        }
        None
    }
}

// ─── Reply parsing ────────────────────────────────────────────────────────────

/// Removes a surrounding markdown code fence (with or without a language tag).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);

    // Drop a language tag such as ```json on the opening line
    match inner.split_once('\n') {
        Some((tag, body)) if !tag.contains('{') && !tag.contains('[') => body.trim(),
        _ => inner.trim(),
    }
}

/// Parses an oracle reply leniently: code fences, trailing commas, single
/// quotes and comments are tolerated, and prose around a single JSON object
/// is skipped.
pub fn parse_relaxed(raw: &str) -> Option<Value> {
    let body = strip_code_fences(raw);
    if let Ok(value) = json5::from_str::<Value>(body) {
        return Some(value);
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    json5::from_str::<Value>(&body[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::scripted::ScriptedOracle;
    use crate::ai::OracleError;
    use crate::models::Action;

    fn classifier(oracle: Arc<ScriptedOracle>) -> SignalClassifier {
        SignalClassifier::new(oracle, RetryPolicy::default())
    }

    #[test]
    fn fences_and_language_tags_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```{\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn relaxed_json_is_accepted() {
        let value = parse_relaxed("{action: 'close_trade', symbol: null,}").unwrap();
        assert_eq!(value["action"], "close_trade");

        let value = parse_relaxed("Sure! Here is the JSON:\n{\"action\": \"breakeven\"}\nHope that helps.").unwrap();
        assert_eq!(value["action"], "breakeven");

        assert!(parse_relaxed("I cannot help with that").is_none());
    }

    #[tokio::test]
    async fn fenced_reply_becomes_a_directive() {
        let oracle = ScriptedOracle::new(vec![Ok(
            "```json\n{\"action\":\"open_trade\",\"symbol\":\"XAUUSD\",\"direction\":\"buy\",\"stop_loss\":1990,\"take_profit\":[2010,2020]}\n```".into(),
        )]);
        let directive = classifier(oracle.clone()).classify("GOLD BUY NOW").await;

        assert_eq!(directive.action, Action::OpenTrade);
        assert_eq!(directive.symbol.as_deref(), Some("XAUUSD"));
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried_until_success() {
        let oracle = ScriptedOracle::new(vec![
            Err(OracleError::Transport("timeout".into())),
            Err(OracleError::Http { status: 503, body: String::new() }),
            Ok("{\"action\":\"close_trade\"}".into()),
        ]);
        let started = tokio::time::Instant::now();
        let directive = classifier(oracle.clone()).classify("close all").await;

        assert_eq!(directive.action, Action::CloseTrade);
        assert_eq!(oracle.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_yield_none() {
        let oracle = ScriptedOracle::new(vec![]);
        let directive = classifier(oracle.clone()).classify("anything").await;

        assert_eq!(directive.action, Action::None);
        assert_eq!(oracle.calls(), 3);
    }

    #[tokio::test]
    async fn unparseable_reply_is_not_retried() {
        let oracle = ScriptedOracle::new(vec![Ok("definitely not json".into())]);
        let directive = classifier(oracle.clone()).classify("hello").await;

        assert_eq!(directive.action, Action::None);
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn update_stage_extracts_levels() {
        let oracle = ScriptedOracle::new(vec![
            Ok("{\"stop_loss\": \"1995.5\", \"take_profit\": [2030, 2050]}".into()),
            Ok("{\"stop_loss\": null, \"take_profit\": null}".into()),
        ]);
        let classifier = classifier(oracle);
        let first = TradeDirective::none();

        let update = classifier.classify_update("move sl", &first).await.unwrap();
        assert_eq!(update.stop_loss, Some(1995.5));
        assert_eq!(update.tp_tiers(), (Some(2030.0), Some(2050.0)));

        assert!(classifier.classify_update("nothing new", &first).await.is_none());
    }
}
