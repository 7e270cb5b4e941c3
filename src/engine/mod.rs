//! # engine
//!
//! Signal handling core: classification, tracking and execution.
//!
//! - [`classifier`] — channel post → `TradeDirective` via the oracle
//! - [`tracker`]    — tickets of the batch we opened
//! - [`executor`]   — directive → MT5 requests
//! - [`pipeline`]   — single consumer tying the three together

pub mod classifier;
pub mod executor;
pub mod pipeline;
pub mod tracker;
