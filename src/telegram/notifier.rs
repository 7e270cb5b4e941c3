//! # telegram::notifier
//!
//! Sends a short line to `TELEGRAM_NOTIFY_CHAT_ID` for every execution that
//! changed broker state.  Subscribes to the monitor broadcast, so a slow or
//! failing Telegram never blocks the pipeline.

use serde_json::Value;
use teloxide::prelude::*;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub struct OutcomeNotifier {
    bot:     Bot,
    chat_id: ChatId,
}

impl OutcomeNotifier {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self { bot, chat_id: ChatId(chat_id) }
    }

    pub async fn start(self, mut rx: broadcast::Receiver<String>) {
        info!(chat = self.chat_id.0, "Starting Telegram outcome notifier");

        loop {
            match rx.recv().await {
                Ok(json) => {
                    let Some(text) = notification_text(&json) else {
                        continue;
                    };
                    if let Err(e) = self.bot.send_message(self.chat_id, text).await {
                        error!("Failed to send Telegram notification: {e}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Notifier lagged behind, missed {n} events");
                }
                Err(_) => {
                    info!("Event channel closed, stopping notifier");
                    break;
                }
            }
        }
    }
}

/// Text to send for a broadcast event, if it is worth a notification.
fn notification_text(json: &str) -> Option<String> {
    let event: Value = serde_json::from_str(json).ok()?;
    match event["event"].as_str()? {
        "TRADE_EXECUTED" if event["changed_broker_state"].as_bool() == Some(true) => {
            Some(format!("📈 {}", event["summary"].as_str()?))
        }
        "LISTENER_RESTARTING" => Some(format!(
            "⚠️ Channel listener restarting: {}",
            event["reason"].as_str().unwrap_or("unknown")
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::ExecutionOutcome;
    use crate::events::WsEvent;
    use uuid::Uuid;

    fn executed(outcome: ExecutionOutcome) -> String {
        WsEvent::TradeExecuted {
            message_id:           Uuid::new_v4(),
            summary:              outcome.summary(),
            changed_broker_state: outcome.changed_broker_state(),
            outcome:              Box::new(outcome),
        }
        .to_json()
    }

    #[test]
    fn only_state_changing_outcomes_are_sent() {
        let text = notification_text(&executed(ExecutionOutcome::Closed { closed: vec![1, 2], failed: vec![] }));
        assert_eq!(text.as_deref(), Some("📈 Closed 2 trades (0 failed)"));

        assert!(notification_text(&executed(ExecutionOutcome::Ignored)).is_none());
        assert!(notification_text(&WsEvent::TrackedChanged { symbol: None, tickets: vec![] }.to_json()).is_none());
        assert!(notification_text("not json").is_none());
    }

    #[test]
    fn listener_restarts_are_reported() {
        let json = WsEvent::ListenerRestarting { reason: "getUpdates failed".into(), retry_in_secs: 60 }.to_json();
        let text = notification_text(&json).unwrap();
        assert!(text.contains("getUpdates failed"));
    }
}
