//! # engine::executor
//!
//! The **Trade Executor** turns a classified directive into MT5 requests
//! against the tracked batch.
//!
//! | Action         | Effect                                                    |
//! |----------------|-----------------------------------------------------------|
//! | `open_trade`   | resolve symbol, synchronize, open `batch_size` market orders |
//! | `update_trade` | SL to every trade, TP tier by batch slot                  |
//! | `breakeven`    | ≤2 trades: close all; else close first half, SL → VWAP ∓ buffer |
//! | `close_trade`  | close every tracked trade                                 |
//!
//! Every operation reports what happened as an [`ExecutionOutcome`]; no
//! broker failure escapes as an error.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::broker::{BrokerGateway, GatewayResult};
use crate::engine::tracker::{PositionTracker, TrackedTrade};
use crate::models::{Action, OrderRequest, OrderType, Position, SlTpUpdate, SymbolInfo, TradeDirective};

// ─── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorSettings {
    pub lot_size:                 f64,
    /// Market orders per `open_trade`
    pub batch_size:               usize,
    /// Breakeven buffer in symbol points
    pub breakeven_buffer_points:  f64,
    pub magic:                    u64,
    pub deviation:                u32,
    /// Re-protect the open batch when a duplicate `open_trade` arrives
    pub adjust_on_duplicate_open: bool,
    pub reprotect_sl_points:      f64,
    pub reprotect_tp_points:      f64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            lot_size:                 0.02,
            batch_size:               4,
            breakeven_buffer_points:  5.0,
            magic:                    234000,
            deviation:                20,
            adjust_on_duplicate_open: false,
            reprotect_sl_points:      3000.0,
            reprotect_tp_points:      11000.0,
        }
    }
}

// ─── Outcome ──────────────────────────────────────────────────────────────────

/// What one directive did to the broker and the tracked batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    /// `Action::None`
    Ignored,
    /// Update / breakeven / close with an empty tracker
    NothingTracked { action: Action },
    SymbolUnresolved { symbol: String, tried: Vec<String> },
    GatewayUnavailable { reason: String },
    Opened {
        symbol:    String,
        attempted: usize,
        tickets:   Vec<u64>,
    },
    AlreadyOpen { symbol: String, tracked: usize },
    Reprotected { modified: Vec<u64>, failed: Vec<u64> },
    /// The update stage produced no usable levels
    UpdateUnparsed,
    Updated { modified: Vec<u64>, failed: Vec<u64> },
    BreakevenClosedAll { closed: Vec<u64>, failed: Vec<u64> },
    BreakevenSplit {
        closed:           Vec<u64>,
        failed_close:     Vec<u64>,
        protected:        Vec<u64>,
        failed_protect:   Vec<u64>,
        breakeven_price:  Option<f64>,
    },
    Closed { closed: Vec<u64>, failed: Vec<u64> },
}

impl ExecutionOutcome {
    /// True when at least one broker request went through.
    pub fn changed_broker_state(&self) -> bool {
        match self {
            ExecutionOutcome::Opened { tickets, .. } => !tickets.is_empty(),
            ExecutionOutcome::Reprotected { modified, .. }
            | ExecutionOutcome::Updated { modified, .. } => !modified.is_empty(),
            ExecutionOutcome::BreakevenClosedAll { closed, .. }
            | ExecutionOutcome::Closed { closed, .. } => !closed.is_empty(),
            ExecutionOutcome::BreakevenSplit { closed, protected, .. } => {
                !closed.is_empty() || !protected.is_empty()
            }
            _ => false,
        }
    }

    /// One-line human summary for logs and notifications.
    pub fn summary(&self) -> String {
        match self {
            ExecutionOutcome::Ignored => "Not a trade instruction".into(),
            ExecutionOutcome::NothingTracked { action } => format!("{action}: nothing tracked"),
            ExecutionOutcome::SymbolUnresolved { symbol, tried } => {
                format!("Symbol {symbol} not found (tried {})", tried.join(", "))
            }
            ExecutionOutcome::GatewayUnavailable { reason } => format!("MT5 unavailable: {reason}"),
            ExecutionOutcome::Opened { symbol, attempted, tickets } => {
                format!("Opened {}/{attempted} trades on {symbol}: {tickets:?}", tickets.len())
            }
            ExecutionOutcome::AlreadyOpen { symbol, tracked } => {
                format!("{tracked} trades already open on {symbol}")
            }
            ExecutionOutcome::Reprotected { modified, failed } => {
                format!("Re-protected {} trades ({} failed)", modified.len(), failed.len())
            }
            ExecutionOutcome::UpdateUnparsed => "Update carried no SL/TP".into(),
            ExecutionOutcome::Updated { modified, failed } => {
                format!("Updated SL/TP on {} trades ({} failed)", modified.len(), failed.len())
            }
            ExecutionOutcome::BreakevenClosedAll { closed, failed } => {
                format!("Breakeven: closed {} trades ({} failed)", closed.len(), failed.len())
            }
            ExecutionOutcome::BreakevenSplit { closed, protected, breakeven_price, .. } => match breakeven_price {
                Some(price) => format!(
                    "Breakeven: closed {} trades, SL {price} on {} remaining",
                    closed.len(),
                    protected.len()
                ),
                None => format!("Breakeven: closed {} trades, none left to protect", closed.len()),
            },
            ExecutionOutcome::Closed { closed, failed } => {
                format!("Closed {} trades ({} failed)", closed.len(), failed.len())
            }
        }
    }
}

// ─── Executor ─────────────────────────────────────────────────────────────────

pub struct TradeExecutor {
    gateway:  Arc<dyn BrokerGateway>,
    settings: ExecutorSettings,
}

impl TradeExecutor {
    pub fn new(gateway: Arc<dyn BrokerGateway>, settings: ExecutorSettings) -> Self {
        Self { gateway, settings }
    }

    /// Candidate broker names for a signal symbol: as given, the `.sml`
    /// micro-account suffix, then upper-cased.  Duplicates removed.
    pub fn symbol_aliases(symbol: &str) -> Vec<String> {
        let mut aliases = Vec::with_capacity(3);
        for candidate in [symbol.to_string(), format!("{symbol}.sml"), symbol.to_uppercase()] {
            if !aliases.contains(&candidate) {
                aliases.push(candidate);
            }
        }
        aliases
    }

    /// First alias the terminal knows.
    pub async fn resolve_symbol(&self, symbol: &str) -> GatewayResult<Result<SymbolInfo, Vec<String>>> {
        let aliases = Self::symbol_aliases(symbol);
        for alias in &aliases {
            if let Some(info) = self.gateway.symbol_info(alias).await? {
                if alias != symbol {
                    info!(requested = symbol, resolved = %info.name, "Symbol resolved via alias");
                }
                return Ok(Ok(info));
            }
        }
        Ok(Err(aliases))
    }

    // ─── open_trade ───────────────────────────────────────────────────────────

    pub async fn open_or_adjust(
        &self,
        directive: &TradeDirective,
        tracker: &mut PositionTracker,
    ) -> ExecutionOutcome {
        let (Some(symbol), Some(direction)) = (directive.symbol.as_deref(), directive.direction) else {
            warn!("open_trade without symbol or direction");
            return ExecutionOutcome::Ignored;
        };

        let info = match self.resolve_symbol(symbol).await {
            Ok(Ok(info)) => info,
            Ok(Err(tried)) => {
                error!(symbol, ?tried, "Symbol not found under any alias");
                return ExecutionOutcome::SymbolUnresolved { symbol: symbol.to_string(), tried };
            }
            Err(e) => return unavailable(e),
        };

        // A live batch stays scoped to the symbol it was opened on, whatever
        // the new signal names.
        let scope = tracker.symbol().map(str::to_string).unwrap_or_else(|| info.name.clone());
        if let Err(e) = tracker.synchronize(self.gateway.as_ref(), &scope).await {
            error!(symbol = %scope, "Could not synchronize tracker before open: {e}");
            return unavailable(e);
        }

        if !tracker.is_empty() {
            if self.settings.adjust_on_duplicate_open {
                return self.reprotect(tracker).await;
            }
            info!(
                symbol    = %scope,
                requested = %info.name,
                tracked   = tracker.len(),
                "Positions already open, skipping new batch"
            );
            return ExecutionOutcome::AlreadyOpen { symbol: scope, tracked: tracker.len() };
        }

        let order_type = direction.order_type();
        let price = match order_type {
            OrderType::Buy  => info.ask,
            OrderType::Sell => info.bid,
        };

        let mut tickets = Vec::with_capacity(self.settings.batch_size);
        for slot in 0..self.settings.batch_size {
            let request = OrderRequest {
                deviation: Some(self.settings.deviation),
                ..OrderRequest::market_open(
                    &info.name,
                    order_type,
                    self.settings.lot_size,
                    price,
                    self.settings.magic,
                    format!("Auto trade: {direction}"),
                )
            };

            match self.gateway.send_order(&request).await {
                Ok(result) if result.is_done() => match result.order {
                    Some(ticket) => {
                        tracker.track_at(ticket, slot);
                        tickets.push(ticket);
                    }
                    None => warn!(slot, "Order done but no ticket returned"),
                },
                Ok(result) => {
                    warn!(slot, retcode = result.retcode, comment = result.comment_or_default(), "Order not filled");
                }
                Err(e) => error!(slot, "Order send failed: {e}"),
            }
        }

        if !tickets.is_empty() {
            tracker.set_symbol(info.name.clone());
        }
        info!(
            symbol    = %info.name,
            direction = %direction,
            opened    = tickets.len(),
            attempted = self.settings.batch_size,
            "✅ Batch opened"
        );

        ExecutionOutcome::Opened {
            symbol:    info.name,
            attempted: self.settings.batch_size,
            tickets,
        }
    }

    /// Re-applies a wide SL / TP around the current price to every tracked trade.
    async fn reprotect(&self, tracker: &PositionTracker) -> ExecutionOutcome {
        let mut modified = Vec::new();
        let mut failed = Vec::new();

        for trade in tracker.trades() {
            match self.reprotect_one(trade.ticket).await {
                Ok(true) => modified.push(trade.ticket),
                Ok(false) => failed.push(trade.ticket),
                Err(e) => {
                    error!(ticket = trade.ticket, "Re-protect failed: {e}");
                    failed.push(trade.ticket);
                }
            }
        }

        info!(modified = modified.len(), failed = failed.len(), "🛡️ Duplicate open: batch re-protected");
        ExecutionOutcome::Reprotected { modified, failed }
    }

    async fn reprotect_one(&self, ticket: u64) -> GatewayResult<bool> {
        let Some(position) = self.gateway.open_position(ticket).await? else {
            warn!(ticket, "Position not found for re-protect");
            return Ok(false);
        };
        let Some(info) = self.gateway.symbol_info(&position.symbol).await? else {
            return Ok(false);
        };
        let Some(tick) = self.gateway.tick(&position.symbol).await? else {
            return Ok(false);
        };

        let sl_distance = self.settings.reprotect_sl_points * info.point;
        let tp_distance = self.settings.reprotect_tp_points * info.point;
        let (sl, tp) = match position.order_type {
            OrderType::Buy  => (tick.ask - sl_distance, tick.ask + tp_distance),
            OrderType::Sell => (tick.bid + sl_distance, tick.bid - tp_distance),
        };

        let result = self
            .gateway
            .modify_position(ticket, Some(info.round(sl)), Some(info.round(tp)))
            .await?;
        Ok(result.is_done())
    }

    // ─── update_trade ─────────────────────────────────────────────────────────

    /// SL goes to every trade; the first TP tier to the first half of the
    /// batch slots, the second tier to the rest.
    pub async fn update(&self, update: &SlTpUpdate, tracker: &mut PositionTracker) -> ExecutionOutcome {
        if tracker.is_empty() {
            return ExecutionOutcome::NothingTracked { action: Action::UpdateTrade };
        }

        let (tp1, tp2) = update.tp_tiers();
        let first_tier_slots = self.settings.batch_size.div_ceil(2);
        let mut modified = Vec::new();
        let mut failed = Vec::new();

        for trade in tracker.trades() {
            let tp = if trade.ordinal < first_tier_slots { tp1 } else { tp2 };
            if update.stop_loss.is_none() && tp.is_none() {
                continue;
            }

            match self.gateway.modify_position(trade.ticket, update.stop_loss, tp).await {
                Ok(result) if result.is_done() => {
                    info!(ticket = trade.ticket, sl = ?update.stop_loss, tp = ?tp, "SL/TP updated");
                    modified.push(trade.ticket);
                }
                Ok(result) => {
                    warn!(ticket = trade.ticket, retcode = result.retcode, comment = result.comment_or_default(), "SL/TP update rejected");
                    failed.push(trade.ticket);
                }
                Err(e) => {
                    error!(ticket = trade.ticket, "SL/TP update failed: {e}");
                    failed.push(trade.ticket);
                }
            }
        }

        ExecutionOutcome::Updated { modified, failed }
    }

    // ─── breakeven ────────────────────────────────────────────────────────────

    pub async fn breakeven(&self, tracker: &mut PositionTracker) -> ExecutionOutcome {
        if tracker.is_empty() {
            return ExecutionOutcome::NothingTracked { action: Action::Breakeven };
        }

        let trades: Vec<TrackedTrade> = tracker.trades().to_vec();
        if trades.len() <= 2 {
            let (closed, failed) = self.close_each(&trades, tracker).await;
            info!(closed = closed.len(), failed = failed.len(), "Breakeven with ≤2 trades: closed all");
            return ExecutionOutcome::BreakevenClosedAll { closed, failed };
        }

        let (to_close, to_protect) = trades.split_at(trades.len() / 2);
        let (closed, failed_close) = self.close_each(to_close, tracker).await;

        let mut remaining: Vec<Position> = Vec::with_capacity(to_protect.len());
        for trade in to_protect {
            match self.gateway.open_position(trade.ticket).await {
                Ok(Some(position)) => remaining.push(position),
                Ok(None) => warn!(ticket = trade.ticket, "Position vanished before breakeven"),
                Err(e) => error!(ticket = trade.ticket, "Failed to fetch position: {e}"),
            }
        }

        let Some(vwap) = volume_weighted_open(&remaining) else {
            error!("No remaining trades to set breakeven");
            return ExecutionOutcome::BreakevenSplit {
                closed,
                failed_close,
                protected: Vec::new(),
                failed_protect: to_protect.iter().map(|t| t.ticket).collect(),
                breakeven_price: None,
            };
        };

        let mut protected = Vec::new();
        let mut failed_protect = Vec::new();
        let mut breakeven_price = None;

        for position in &remaining {
            match self.protect_at_breakeven(position, vwap).await {
                Ok(Some(sl)) => {
                    breakeven_price = Some(sl);
                    protected.push(position.ticket);
                }
                Ok(None) => failed_protect.push(position.ticket),
                Err(e) => {
                    error!(ticket = position.ticket, "Breakeven SL failed: {e}");
                    failed_protect.push(position.ticket);
                }
            }
        }

        info!(
            vwap,
            closed    = closed.len(),
            protected = protected.len(),
            "⚖️ Breakeven applied"
        );
        ExecutionOutcome::BreakevenSplit { closed, failed_close, protected, failed_protect, breakeven_price }
    }

    /// Moves SL to `vwap` offset by the buffer, just inside profit.
    async fn protect_at_breakeven(&self, position: &Position, vwap: f64) -> GatewayResult<Option<f64>> {
        let Some(info) = self.gateway.symbol_info(&position.symbol).await? else {
            warn!(symbol = %position.symbol, "Symbol info unavailable for breakeven");
            return Ok(None);
        };

        let buffer = self.settings.breakeven_buffer_points * info.point;
        let sl = info.round(match position.order_type {
            OrderType::Buy  => vwap - buffer,
            OrderType::Sell => vwap + buffer,
        });

        let result = self.gateway.modify_position(position.ticket, Some(sl), None).await?;
        if result.is_done() {
            Ok(Some(sl))
        } else {
            warn!(ticket = position.ticket, retcode = result.retcode, comment = result.comment_or_default(), "Breakeven SL rejected");
            Ok(None)
        }
    }

    // ─── close_trade ──────────────────────────────────────────────────────────

    pub async fn close_all(&self, tracker: &mut PositionTracker) -> ExecutionOutcome {
        if tracker.is_empty() {
            return ExecutionOutcome::NothingTracked { action: Action::CloseTrade };
        }

        let trades: Vec<TrackedTrade> = tracker.trades().to_vec();
        let (closed, failed) = self.close_each(&trades, tracker).await;
        info!(closed = closed.len(), failed = failed.len(), "Close directive processed");
        ExecutionOutcome::Closed { closed, failed }
    }

    /// Closes each trade in full; successes are untracked.
    async fn close_each(&self, trades: &[TrackedTrade], tracker: &mut PositionTracker) -> (Vec<u64>, Vec<u64>) {
        let mut closed = Vec::new();
        let mut failed = Vec::new();

        for trade in trades {
            match self.close_one(trade.ticket).await {
                Ok(true) => {
                    tracker.untrack(trade.ticket);
                    closed.push(trade.ticket);
                }
                Ok(false) => failed.push(trade.ticket),
                Err(e) => {
                    error!(ticket = trade.ticket, "Close failed: {e}");
                    failed.push(trade.ticket);
                }
            }
        }
        (closed, failed)
    }

    async fn close_one(&self, ticket: u64) -> GatewayResult<bool> {
        let Some(position) = self.gateway.open_position(ticket).await? else {
            warn!(ticket, "Position not found, cannot close");
            return Ok(false);
        };

        let result = self.gateway.close_position(ticket, position.volume).await?;
        if result.is_done() {
            info!(ticket, volume = position.volume, "Position closed");
            Ok(true)
        } else {
            warn!(ticket, retcode = result.retcode, comment = result.comment_or_default(), "Close rejected");
            Ok(false)
        }
    }
}

fn unavailable(e: crate::broker::GatewayError) -> ExecutionOutcome {
    error!("MT5 gateway unavailable: {e}");
    ExecutionOutcome::GatewayUnavailable { reason: e.to_string() }
}

/// `Σ(price_open × volume) / Σ volume`, or `None` with no volume.
pub fn volume_weighted_open(positions: &[Position]) -> Option<f64> {
    let volume: f64 = positions.iter().map(|p| p.volume).sum();
    if volume <= 0.0 {
        return None;
    }
    Some(positions.iter().map(|p| p.price_open * p.volume).sum::<f64>() / volume)
}
