//! Domain models shared across the whole signal pipeline.

pub mod directive;
pub mod message;
pub mod order;
pub mod position;

pub use directive::{Action, Direction, SlTpUpdate, TakeProfit, TradeDirective};
pub use message::ChannelMessage;
pub use order::{OrderRequest, OrderResult, OrderType, RequestAction};
pub use position::{AccountInfo, Position, SymbolInfo, Tick};
