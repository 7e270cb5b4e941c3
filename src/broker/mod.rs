//! # broker
//!
//! The [`BrokerGateway`] seam between the trade pipeline and MetaTrader 5.
//!
//! Two implementations:
//! - [`mt5::Mt5Bridge`]     — HTTP client for the MT5 bridge EA
//! - [`paper::PaperGateway`] — in-process simulated terminal (`MT5_BASE_URL=mock`, tests)
//!
//! Ordinary outcomes ("symbol not found", "order rejected") are values, not
//! errors: lookups return `Option`, orders return an [`OrderResult`] whose
//! retcode the caller inspects.  `Err` is reserved for the gateway itself
//! being unusable (not initialized, unreachable or returning bad JSON).

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::models::{AccountInfo, OrderRequest, OrderResult, OrderType, Position, SymbolInfo, Tick};

pub mod mt5;
pub mod paper;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The terminal never came up; every call short-circuits with this.
    #[error("MT5 is not initialized")]
    NotInitialized,

    #[error("MT5 bridge unreachable: {0}")]
    Transport(String),

    #[error("MT5 bridge HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("MT5 bridge response parse error: {0}")]
    Decode(String),

    #[error("position {0} not found")]
    PositionNotFound(u64),
}

/// Magic number and slippage stamped on every request the gateway builds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderStamp {
    pub magic:     u64,
    pub deviation: u32,
}

impl Default for OrderStamp {
    fn default() -> Self {
        Self { magic: 234000, deviation: 20 }
    }
}

// ─── Trait ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Human-friendly name used in logs.
    fn name(&self) -> &str;

    fn stamp(&self) -> OrderStamp;

    async fn symbol_info(&self, symbol: &str) -> GatewayResult<Option<SymbolInfo>>;

    async fn tick(&self, symbol: &str) -> GatewayResult<Option<Tick>>;

    async fn send_order(&self, request: &OrderRequest) -> GatewayResult<OrderResult>;

    async fn open_position(&self, ticket: u64) -> GatewayResult<Option<Position>>;

    /// Open positions, optionally restricted to one symbol.
    async fn positions(&self, symbol: Option<&str>) -> GatewayResult<Vec<Position>>;

    async fn account_info(&self) -> GatewayResult<AccountInfo>;

    // ─── Provided ─────────────────────────────────────────────────────────────

    /// Tickets of every position MT5 currently holds for `symbol`.
    async fn open_tickets(&self, symbol: &str) -> GatewayResult<Vec<u64>> {
        Ok(self
            .positions(Some(symbol))
            .await?
            .into_iter()
            .map(|p| p.ticket)
            .collect())
    }

    /// Mid price `(bid + ask) / 2`.
    async fn current_price(&self, symbol: &str) -> GatewayResult<Option<f64>> {
        Ok(self.tick(symbol).await?.map(|t| t.mid()))
    }

    /// Closes `volume` of position `ticket` with an opposite-direction deal
    /// at the side of the book that fills it (bid for longs, ask for shorts).
    async fn close_position(&self, ticket: u64, volume: f64) -> GatewayResult<OrderResult> {
        let position = self
            .open_position(ticket)
            .await?
            .ok_or(GatewayError::PositionNotFound(ticket))?;

        let price = self.tick(&position.symbol).await?.map(|t| match position.order_type {
            OrderType::Buy  => t.bid,
            OrderType::Sell => t.ask,
        });

        let stamp = self.stamp();
        let request = OrderRequest::market_close(&position, volume, price, stamp.deviation, stamp.magic);
        debug!(ticket, volume, price = ?price, "Closing position");
        self.send_order(&request).await
    }

    /// Sets SL and/or TP on position `ticket`; `None` keeps the current level.
    async fn modify_position(
        &self,
        ticket: u64,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> GatewayResult<OrderResult> {
        let position = self
            .open_position(ticket)
            .await?
            .ok_or(GatewayError::PositionNotFound(ticket))?;

        let request = OrderRequest::modify(
            &position,
            sl.unwrap_or(position.sl),
            tp.unwrap_or(position.tp),
            self.stamp().magic,
        );
        debug!(ticket, sl = ?request.sl, tp = ?request.tp, "Modifying position");
        self.send_order(&request).await
    }
}
