//! # telegram::listener
//!
//! Reads the source channel through `getUpdates` long polling and forwards
//! each text post (or media caption) to the pipeline queue.  The bot must be
//! a member of the channel to receive `channel_post` updates.
//!
//! Any fault ends the session; [`ChannelListener::run_forever`] waits
//! `restart_delay` and starts a new one.  Posts published while the session
//! is down are picked up from Telegram's update queue on reconnect.  The
//! `getUpdates` offset belongs to the listener, not the session, so a post
//! already queued is never handed to the pipeline a second time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{bail, Context};
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, UpdateKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::events::WsEvent;
use crate::models::ChannelMessage;
use crate::state::SharedState;

/// Long-poll window passed to `getUpdates`
const LONG_POLL_SECS: u32 = 10;

pub struct ChannelListener {
    bot:           Bot,
    channel_id:    i64,
    restart_delay: Duration,
    tx:            mpsc::Sender<ChannelMessage>,
    state:         SharedState,
    /// Next `getUpdates` offset (0 = nothing seen yet)
    next_offset:   AtomicI64,
}

impl ChannelListener {
    pub fn new(
        bot: Bot,
        channel_id: i64,
        restart_delay: Duration,
        tx: mpsc::Sender<ChannelMessage>,
        state: SharedState,
    ) -> Self {
        Self {
            bot,
            channel_id,
            restart_delay,
            tx,
            state,
            next_offset: AtomicI64::new(0),
        }
    }

    /// Supervisor loop.  Returns only once the pipeline queue is closed.
    pub async fn run_forever(self) {
        loop {
            let reason = match self.run_session().await {
                Ok(()) => "session ended".to_string(),
                Err(e) => format!("{e:#}"),
            };

            if self.tx.is_closed() {
                warn!("Signal pipeline is gone, stopping Telegram listener");
                return;
            }

            error!("Telegram listener stopped: {reason}. Restarting in {:?}", self.restart_delay);
            self.state.broadcast(&WsEvent::ListenerRestarting {
                reason,
                retry_in_secs: self.restart_delay.as_secs(),
            });
            tokio::time::sleep(self.restart_delay).await;
            info!("🔄 Restarting Telegram listener...");
        }
    }

    async fn run_session(&self) -> anyhow::Result<()> {
        let me = self.bot.get_me().await.context("Telegram getMe failed")?;
        info!(
            bot     = me.user.username.as_deref().unwrap_or("?"),
            channel = self.channel_id,
            "✅ Telegram listener connected"
        );

        loop {
            let mut request = self
                .bot
                .get_updates()
                .timeout(LONG_POLL_SECS)
                .allowed_updates([AllowedUpdate::ChannelPost, AllowedUpdate::Message]);
            let offset = self.next_offset.load(Ordering::SeqCst);
            if offset > 0 {
                request = request.offset(offset as i32);
            }

            let updates = request.await.context("Telegram getUpdates failed")?;
            for update in updates {
                self.next_offset.store(update.id.0 as i64 + 1, Ordering::SeqCst);

                let Some(message) = channel_message(&update.kind, self.channel_id) else {
                    continue;
                };
                debug!(message_id = message.message_id, "Channel post queued");
                if self.tx.send(message).await.is_err() {
                    bail!("signal pipeline queue closed");
                }
            }
        }
    }
}

fn channel_message(kind: &UpdateKind, channel_id: i64) -> Option<ChannelMessage> {
    let message = match kind {
        UpdateKind::ChannelPost(message) | UpdateKind::Message(message) => message,
        _ => return None,
    };
    accept_post(
        message.chat.id.0,
        message.id.0,
        message.text().or_else(|| message.caption()),
        channel_id,
    )
}

/// Keeps non-empty posts from the configured channel only.
fn accept_post(chat_id: i64, message_id: i32, text: Option<&str>, channel_id: i64) -> Option<ChannelMessage> {
    if chat_id != channel_id {
        return None;
    }
    let text = text.map(str::trim).filter(|t| !t.is_empty())?;
    Some(ChannelMessage::new(chat_id, message_id, text))
}
