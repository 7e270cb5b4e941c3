//! # models::position
//!
//! Broker-side views: symbol quotes, open positions and account figures.
//!
//! These are *fetched*, never cached by the pipeline.  The executor re-reads
//! price, volume, SL and TP from the gateway every time it needs them.

use serde::{Deserialize, Serialize};

use crate::models::order::OrderType;

// ─── SymbolInfo ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Broker name of the symbol, e.g. `"XAUUSD.sml"`.
    pub name:   String,
    pub bid:    f64,
    pub ask:    f64,
    /// Smallest price increment.
    pub point:  f64,
    /// Price precision.
    pub digits: u32,
}

impl SymbolInfo {
    /// Rounds a price to the symbol's precision.
    pub fn round(&self, price: f64) -> f64 {
        round_to_digits(price, self.digits)
    }
}

// ─── Tick ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
}

impl Tick {
    #[inline]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

// ─── Position ─────────────────────────────────────────────────────────────────

/// An open position as reported by MT5.  `sl`/`tp` of `0.0` mean "not set".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket:     u64,
    pub symbol:     String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub volume:     f64,
    pub price_open: f64,
    #[serde(default)]
    pub sl:         f64,
    #[serde(default)]
    pub tp:         f64,
    #[serde(default)]
    pub profit:     f64,
}

// ─── AccountInfo ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance:     f64,
    pub equity:      f64,
    pub margin:      f64,
    pub free_margin: f64,
}

pub fn round_to_digits(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_follows_symbol_digits() {
        let info = SymbolInfo { name: "XAUUSD".into(), bid: 0.0, ask: 0.0, point: 0.01, digits: 2 };
        assert_eq!(info.round(2012.34567), 2012.35);
        assert_eq!(round_to_digits(1.234567, 5), 1.23457);
    }

    #[test]
    fn tick_mid_is_average_of_bid_and_ask() {
        assert_eq!(Tick { bid: 1999.0, ask: 2001.0 }.mid(), 2000.0);
    }
}
