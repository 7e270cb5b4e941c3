//! # events
//!
//! Defines [`WsEvent`] — ทุก Event ที่ระบบ Broadcast ออกไปผ่าน WebSocket
//! และไปยัง Telegram notifier
//!
//! ใช้ `tokio::sync::broadcast::Sender<String>` โดยแปลง WsEvent เป็น JSON
//! String ก่อนส่ง เพื่อหลีกเลี่ยง Clone constraints ที่ซับซ้อน

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::executor::ExecutionOutcome;
use crate::models::{AccountInfo, TradeDirective};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsEvent {
    /// Channel post เข้ามาแล้ว กำลังส่งให้ AI
    SignalReceived {
        message_id:  Uuid,
        text:        String,
        received_at: DateTime<Utc>,
    },

    /// AI จัดประเภทเสร็จแล้ว
    DirectiveClassified {
        message_id: Uuid,
        directive:  Box<TradeDirective>,
    },

    /// Executor ทำงานเสร็จ
    TradeExecuted {
        message_id:           Uuid,
        summary:              String,
        changed_broker_state: bool,
        outcome:              Box<ExecutionOutcome>,
    },

    /// Batch ที่ track อยู่เปลี่ยนไป
    TrackedChanged {
        symbol:  Option<String>,
        tickets: Vec<u64>,
    },

    /// Account poller อ่านค่าใหม่
    AccountUpdated {
        account:   AccountInfo,
        positions: usize,
    },

    /// Telegram listener หลุด จะต่อใหม่
    ListenerRestarting {
        reason:        String,
        retry_in_secs: u64,
    },
}

impl WsEvent {
    /// แปลงเป็น JSON String สำหรับส่งผ่าน WebSocket
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn events_are_tagged_in_screaming_snake_case() {
        let event = WsEvent::TrackedChanged { symbol: Some("XAUUSD".into()), tickets: vec![1, 2] };
        let json: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["event"], "TRACKED_CHANGED");
        assert_eq!(json["tickets"][1], 2);
    }

    #[test]
    fn executed_event_nests_the_outcome() {
        let outcome = ExecutionOutcome::Closed { closed: vec![7], failed: vec![] };
        let event = WsEvent::TradeExecuted {
            message_id:           Uuid::new_v4(),
            summary:              outcome.summary(),
            changed_broker_state: outcome.changed_broker_state(),
            outcome:              Box::new(outcome),
        };
        let json: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["event"], "TRADE_EXECUTED");
        assert_eq!(json["outcome"]["outcome"], "CLOSED");
        assert_eq!(json["changed_broker_state"], true);
    }
}
