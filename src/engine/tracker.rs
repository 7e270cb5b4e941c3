//! # engine::tracker
//!
//! [`PositionTracker`] — ticket ของ batch ที่ระบบเปิดเอง.
//!
//! The tracker is owned by the pipeline and lent to the executor as
//! `&mut`, so every mutation happens on the single consumer task.  It is
//! in-memory only: a restart forgets which broker positions were ours.
//!
//! State machine:
//!
//! ```text
//!   NO_POSITION ──open_trade (≥1 fill)──▶ POSITIONS_OPEN
//!        ▲                                   │
//!        └──── close_trade / breakeven ≤2 ───┤
//!        └──── synchronize finds none open ──┘
//! ```

use serde::Serialize;
use tracing::{debug, info};

use crate::broker::{BrokerGateway, GatewayResult};

/// One tracked ticket plus its slot in the batch that opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackedTrade {
    pub ticket:  u64,
    /// 0-based position in the opening batch, independent of fills
    pub ordinal: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PositionTracker {
    /// Broker-side symbol name of the tracked batch
    symbol: Option<String>,
    trades: Vec<TrackedTrade>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn set_symbol(&mut self, symbol: impl Into<String>) {
        self.symbol = Some(symbol.into());
    }

    /// Tracks `ticket` in the next batch slot.  Returns `false` if it is
    /// already tracked.
    pub fn track(&mut self, ticket: u64) -> bool {
        let ordinal = self.trades.iter().map(|t| t.ordinal + 1).max().unwrap_or(0);
        self.track_at(ticket, ordinal)
    }

    /// Tracks `ticket` in an explicit batch slot.
    pub fn track_at(&mut self, ticket: u64, ordinal: usize) -> bool {
        if self.contains(ticket) {
            return false;
        }
        self.trades.push(TrackedTrade { ticket, ordinal });
        true
    }

    pub fn untrack(&mut self, ticket: u64) -> bool {
        let before = self.trades.len();
        self.trades.retain(|t| t.ticket != ticket);
        let removed = self.trades.len() != before;
        if self.trades.is_empty() {
            self.symbol = None;
        }
        removed
    }

    pub fn contains(&self, ticket: u64) -> bool {
        self.trades.iter().any(|t| t.ticket == ticket)
    }

    /// Tracked tickets in opening order.
    pub fn all(&self) -> Vec<u64> {
        self.trades.iter().map(|t| t.ticket).collect()
    }

    pub fn trades(&self) -> &[TrackedTrade] {
        &self.trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Intersects the tracked set with what MT5 still holds for `symbol`.
    ///
    /// Returns the tickets that were dropped.  On a gateway error the set is
    /// left untouched: an unreachable terminal says nothing about which
    /// positions are still open.
    pub async fn synchronize(
        &mut self,
        gateway: &dyn BrokerGateway,
        symbol: &str,
    ) -> GatewayResult<Vec<u64>> {
        let open = gateway.open_tickets(symbol).await?;

        let (kept, dropped): (Vec<TrackedTrade>, Vec<TrackedTrade>) = self
            .trades
            .drain(..)
            .partition(|t| open.contains(&t.ticket));
        self.trades = kept;

        let dropped: Vec<u64> = dropped.into_iter().map(|t| t.ticket).collect();
        if self.trades.is_empty() {
            self.symbol = None;
        }

        if dropped.is_empty() {
            debug!(symbol, tracked = self.trades.len(), "Tracker in sync");
        } else {
            info!(symbol, ?dropped, tracked = self.trades.len(), "🔄 Dropped tickets no longer open");
        }
        Ok(dropped)
    }
}
