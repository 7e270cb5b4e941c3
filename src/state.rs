//! # state
//!
//! Monitor state shared by the pipeline (writes), the account poller
//! (writes) and the axum handlers (reads).  Nothing here drives trading:
//! the authoritative tracker lives inside the pipeline task and this only
//! holds a copy for display.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::engine::executor::ExecutionOutcome;
use crate::engine::tracker::PositionTracker;
use crate::events::WsEvent;
use crate::models::{AccountInfo, Position, TradeDirective};

/// จำนวน Execution record ที่เก็บไว้แสดงบน Dashboard
const HISTORY_SIZE: usize = 100;

/// One processed channel post.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub message_id:  Uuid,
    pub received_at: DateTime<Utc>,
    pub text:        String,
    pub directive:   TradeDirective,
    pub outcome:     ExecutionOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub account:   AccountInfo,
    pub positions: Vec<Position>,
    pub polled_at: DateTime<Utc>,
}

// ─── AppState ─────────────────────────────────────────────────────────────────

pub struct AppState {
    /// Gateway name shown by /api/health ("mt5-bridge" | "paper")
    pub gateway_name: String,
    /// None = dev mode, every request allowed
    pub api_key:      Option<String>,
    pub started_at:   DateTime<Utc>,

    // ── Snapshots ─────────────────────────────────────────────────────────────
    pub account:      RwLock<Option<AccountSnapshot>>,
    pub tracked:      RwLock<PositionTracker>,
    pub history:      RwLock<VecDeque<ExecutionRecord>>,

    // ── Monitor / WebSocket ───────────────────────────────────────────────────
    /// Pre-serialized JSON events for WebSocket clients and the notifier
    pub broadcast_tx: broadcast::Sender<String>,

    // ── Metrics ───────────────────────────────────────────────────────────────
    pub message_count:  AtomicU64,
    pub actioned_count: AtomicU64,
}

impl AppState {
    pub fn new(gateway_name: impl Into<String>, api_key: Option<String>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);

        Self {
            gateway_name:   gateway_name.into(),
            api_key,
            started_at:     Utc::now(),
            account:        RwLock::new(None),
            tracked:        RwLock::new(PositionTracker::new()),
            history:        RwLock::new(VecDeque::with_capacity(HISTORY_SIZE)),
            broadcast_tx,
            message_count:  AtomicU64::new(0),
            actioned_count: AtomicU64::new(0),
        }
    }

    // ── Helper Methods ────────────────────────────────────────────────────────

    /// Broadcast WsEvent ไปยัง subscriber ทั้งหมด
    /// ไม่มี receiver ก็ไม่เป็นไร (headless mode)
    pub fn broadcast(&self, event: &WsEvent) {
        let _ = self.broadcast_tx.send(event.to_json());
    }

    pub async fn push_record(&self, record: ExecutionRecord) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        if record.outcome.changed_broker_state() {
            self.actioned_count.fetch_add(1, Ordering::Relaxed);
        }

        let mut history = self.history.write().await;
        if history.len() >= HISTORY_SIZE {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Replaces the tracker copy and broadcasts if it changed.
    pub async fn set_tracked(&self, tracker: &PositionTracker) {
        let mut guard = self.tracked.write().await;
        if *guard == *tracker {
            return;
        }
        *guard = tracker.clone();
        drop(guard);

        self.broadcast(&WsEvent::TrackedChanged {
            symbol:  tracker.symbol().map(str::to_string),
            tickets: tracker.all(),
        });
    }

    pub async fn set_account(&self, snapshot: AccountSnapshot) {
        let event = WsEvent::AccountUpdated {
            account:   snapshot.account,
            positions: snapshot.positions.len(),
        };
        *self.account.write().await = Some(snapshot);
        self.broadcast(&event);
    }
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: ExecutionOutcome) -> ExecutionRecord {
        ExecutionRecord {
            message_id:  Uuid::new_v4(),
            received_at: Utc::now(),
            text:        "msg".into(),
            directive:   TradeDirective::none(),
            outcome,
        }
    }

    #[tokio::test]
    async fn history_is_bounded_and_counts_actions() {
        let state = AppState::new("paper", None);
        for _ in 0..HISTORY_SIZE + 5 {
            state.push_record(record(ExecutionOutcome::Ignored)).await;
        }
        state
            .push_record(record(ExecutionOutcome::Closed { closed: vec![1], failed: vec![] }))
            .await;

        assert_eq!(state.history.read().await.len(), HISTORY_SIZE);
        assert_eq!(state.message_count.load(Ordering::Relaxed), HISTORY_SIZE as u64 + 6);
        assert_eq!(state.actioned_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn tracked_changes_are_broadcast_once() {
        let state = AppState::new("paper", None);
        let mut rx = state.broadcast_tx.subscribe();

        let mut tracker = PositionTracker::new();
        tracker.track(5);
        state.set_tracked(&tracker).await;
        state.set_tracked(&tracker).await;

        let first = rx.try_recv().unwrap();
        assert!(first.contains("TRACKED_CHANGED"));
        assert!(rx.try_recv().is_err());
    }
}
