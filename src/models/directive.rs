//! # models::directive
//!
//! Defines [`TradeDirective`], the structured reading of one channel post,
//! produced by the classifier and consumed by the executor.
//!
//! The LLM is not a reliable JSON writer: numbers arrive as strings, actions
//! arrive with spaces or mixed case, take-profits arrive as a number, a list
//! or a `{tp1, tp2}` object.  Conversion from the raw JSON value is therefore
//! lenient field-by-field, and anything that cannot be made sense of degrades
//! to [`Action::None`] instead of an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::order::OrderType;

// ─── Action ───────────────────────────────────────────────────────────────────

/// What the channel post asks us to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    OpenTrade,
    UpdateTrade,
    Breakeven,
    CloseTrade,
    /// Chatter, commentary, or anything the classifier could not read.
    None,
}

impl Action {
    fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "open_trade" | "open"           => Action::OpenTrade,
            "update_trade" | "update"       => Action::UpdateTrade,
            "breakeven" | "break_even"      => Action::Breakeven,
            "close_trade" | "close"         => Action::CloseTrade,
            _ => Action::None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Action::OpenTrade   => "open_trade",
            Action::UpdateTrade => "update_trade",
            Action::Breakeven   => "breakeven",
            Action::CloseTrade  => "close_trade",
            Action::None        => "none",
        };
        f.write_str(label)
    }
}

// ─── Direction ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "buy" | "long"   => Some(Direction::Buy),
            "sell" | "short" => Some(Direction::Sell),
            _ => None,
        }
    }

    /// The MT5 order type that opens a position in this direction.
    pub fn order_type(self) -> OrderType {
        match self {
            Direction::Buy  => OrderType::Buy,
            Direction::Sell => OrderType::Sell,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy  => f.write_str("buy"),
            Direction::Sell => f.write_str("sell"),
        }
    }
}

// ─── Entry ────────────────────────────────────────────────────────────────────

/// Entry is either a single price or a zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    Price(f64),
    Range { min: f64, max: f64 },
}

impl Entry {
    fn from_value(value: &Value) -> Option<Self> {
        if let Some(price) = price_from_value(value) {
            return Some(Entry::Price(price));
        }
        let obj = value.as_object()?;
        let min = obj.get("min").and_then(price_from_value);
        let max = obj.get("max").and_then(price_from_value);
        match (min, max) {
            (Some(min), Some(max)) => Some(Entry::Range {
                min: min.min(max),
                max: min.max(max),
            }),
            (Some(p), None) | (None, Some(p)) => Some(Entry::Price(p)),
            (None, None) => None,
        }
    }
}

// ─── TakeProfit ───────────────────────────────────────────────────────────────

/// Take-profit in any of the shapes signal channels use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TakeProfit {
    Single(f64),
    Levels(Vec<f64>),
    Named(BTreeMap<String, f64>),
}

impl TakeProfit {
    fn from_value(value: &Value) -> Option<Self> {
        if let Some(price) = price_from_value(value) {
            return Some(TakeProfit::Single(price));
        }
        match value {
            Value::Array(items) => {
                let levels: Vec<f64> = items.iter().filter_map(price_from_value).collect();
                (!levels.is_empty()).then_some(TakeProfit::Levels(levels))
            }
            Value::Object(obj) => {
                let named: BTreeMap<String, f64> = obj
                    .iter()
                    .filter_map(|(k, v)| price_from_value(v).map(|p| (k.to_lowercase(), p)))
                    .collect();
                (!named.is_empty()).then_some(TakeProfit::Named(named))
            }
            _ => None,
        }
    }

    /// All levels in ladder order (`tp1`, `tp2`, … sorted numerically).
    pub fn levels(&self) -> Vec<f64> {
        match self {
            TakeProfit::Single(p) => vec![*p],
            TakeProfit::Levels(levels) => levels.clone(),
            TakeProfit::Named(named) => {
                let mut keyed: Vec<(u32, &String, f64)> = named
                    .iter()
                    .map(|(k, v)| {
                        let rank = k
                            .trim_start_matches(|c: char| !c.is_ascii_digit())
                            .parse()
                            .unwrap_or(u32::MAX);
                        (rank, k, *v)
                    })
                    .collect();
                keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
                keyed.into_iter().map(|(_, _, v)| v).collect()
            }
        }
    }

    /// `(first tier, second tier)`.  The second tier falls back to the first
    /// when the signal carries a single target.
    pub fn tiers(&self) -> (Option<f64>, Option<f64>) {
        let levels = self.levels();
        let first = levels.first().copied();
        let second = levels.get(1).copied().or(first);
        (first, second)
    }
}

// ─── TradeDirective ───────────────────────────────────────────────────────────

/// Parsed output of classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDirective {
    pub action: Action,
    pub symbol: Option<String>,
    pub direction: Option<Direction>,
    pub entry: Option<Entry>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<TakeProfit>,
    pub comment: String,
}

impl TradeDirective {
    /// The non-actionable directive.
    pub fn none() -> Self {
        Self {
            action: Action::None,
            symbol: None,
            direction: None,
            entry: None,
            stop_loss: None,
            take_profit: None,
            comment: String::new(),
        }
    }

    /// Builds a directive from whatever JSON the oracle produced.
    ///
    /// A missing or unknown `action` yields [`Action::None`], and so does an
    /// `open_trade` without a symbol or a direction.
    pub fn from_json(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::none();
        };

        let mut action = obj
            .get("action")
            .and_then(Value::as_str)
            .map(Action::from_label)
            .unwrap_or(Action::None);

        let symbol = obj
            .get("symbol")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
            .map(str::to_string);

        let direction = obj
            .get("direction")
            .and_then(Value::as_str)
            .and_then(Direction::from_label);

        if action == Action::OpenTrade && (symbol.is_none() || direction.is_none()) {
            action = Action::None;
        }

        Self {
            action,
            symbol,
            direction,
            entry:       obj.get("entry").and_then(Entry::from_value),
            stop_loss:   obj.get("stop_loss").and_then(price_from_value),
            take_profit: obj.get("take_profit").and_then(TakeProfit::from_value),
            comment: obj
                .get("comment")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

// ─── SlTpUpdate ───────────────────────────────────────────────────────────────

/// Result of the second-stage prompt used by `update_trade`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlTpUpdate {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<TakeProfit>,
}

impl SlTpUpdate {
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let update = Self {
            stop_loss:   obj.get("stop_loss").and_then(price_from_value),
            take_profit: obj.get("take_profit").and_then(TakeProfit::from_value),
        };
        update.has_changes().then_some(update)
    }

    pub fn has_changes(&self) -> bool {
        self.stop_loss.is_some() || self.take_profit.is_some()
    }

    pub fn tp_tiers(&self) -> (Option<f64>, Option<f64>) {
        self.take_profit
            .as_ref()
            .map(TakeProfit::tiers)
            .unwrap_or((None, None))
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Accepts `2350.5`, `"2350.5"` and `"2,350.5"`.  Non-positive prices and
/// anything else are treated as absent.
fn price_from_value(value: &Value) -> Option<f64> {
    let price = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok()?,
        _ => return None,
    };
    (price.is_finite() && price > 0.0).then_some(price)
}
