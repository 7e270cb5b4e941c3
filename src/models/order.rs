//! # models::order
//!
//! MT5 trade request / result, mirroring `MqlTradeRequest` and
//! `MqlTradeResult` as the bridge EA expects them on `POST /order/send`.

use serde::{Deserialize, Serialize};

/// `TRADE_RETCODE_DONE` — the only retcode we treat as success.
pub const TRADE_RETCODE_DONE: u32 = 10009;

// ─── Enums ────────────────────────────────────────────────────────────────────

/// `TRADE_ACTION_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestAction {
    /// Market deal: open, or close when `position` is set.
    Deal,
    /// Modify SL/TP of an open position.
    Sltp,
}

/// `ORDER_TYPE_BUY` / `ORDER_TYPE_SELL`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Buy,
    Sell,
}

impl OrderType {
    /// The order type that offsets a position of this type.
    pub fn opposite(self) -> Self {
        match self {
            OrderType::Buy  => OrderType::Sell,
            OrderType::Sell => OrderType::Buy,
        }
    }
}

/// `ORDER_TIME_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderTime {
    Gtc,
}

// ─── OrderRequest ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub action:    RequestAction,
    pub symbol:    String,
    pub volume:    f64,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price:     Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sl:        Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tp:        Option<f64>,
    /// Ticket of the position this request refers to (close / modify).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position:  Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation: Option<u32>,
    pub magic:     u64,
    pub comment:   String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_time: Option<OrderTime>,
}

impl OrderRequest {
    /// Market order opening a new position.
    pub fn market_open(
        symbol: &str,
        order_type: OrderType,
        volume: f64,
        price: f64,
        magic: u64,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            action:    RequestAction::Deal,
            symbol:    symbol.to_string(),
            volume,
            order_type,
            price:     Some(price),
            sl:        None,
            tp:        None,
            position:  None,
            deviation: None,
            magic,
            comment:   comment.into(),
            type_time: Some(OrderTime::Gtc),
        }
    }

    /// Opposite-direction market deal against an existing position.
    pub fn market_close(
        position: &crate::models::Position,
        volume: f64,
        price: Option<f64>,
        deviation: u32,
        magic: u64,
    ) -> Self {
        Self {
            action:    RequestAction::Deal,
            symbol:    position.symbol.clone(),
            volume,
            order_type: position.order_type.opposite(),
            price,
            sl:        None,
            tp:        None,
            position:  Some(position.ticket),
            deviation: Some(deviation),
            magic,
            comment:   "Close position".to_string(),
            type_time: Some(OrderTime::Gtc),
        }
    }

    /// SL/TP modification of an existing position.
    pub fn modify(position: &crate::models::Position, sl: f64, tp: f64, magic: u64) -> Self {
        Self {
            action:    RequestAction::Sltp,
            symbol:    position.symbol.clone(),
            volume:    position.volume,
            order_type: position.order_type,
            price:     None,
            sl:        Some(sl),
            tp:        Some(tp),
            position:  Some(position.ticket),
            deviation: None,
            magic,
            comment:   "Update SL/TP".to_string(),
            type_time: None,
        }
    }
}

// ─── OrderResult ──────────────────────────────────────────────────────────────

/// Response from the bridge EA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    /// MT5 Return Code — 10009 = SUCCESS
    pub retcode: u32,
    /// Ticket assigned by MT5 (present when retcode = 10009)
    #[serde(default)]
    pub order:   Option<u64>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl OrderResult {
    pub fn is_done(&self) -> bool {
        self.retcode == TRADE_RETCODE_DONE
    }

    pub fn comment_or_default(&self) -> &str {
        self.comment.as_deref().unwrap_or("unknown")
    }
}
