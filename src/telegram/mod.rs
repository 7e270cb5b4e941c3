//! # telegram
//!
//! - [`listener`] — long-polls the Bot API for posts in the source channel
//! - [`notifier`] — reports execution outcomes to an optional chat

pub mod listener;
pub mod notifier;

pub use listener::ChannelListener;
pub use notifier::OutcomeNotifier;
