//! # SignalCopier — Telegram signal channel → MetaTrader 5
//!
//! ```text
//!  ┌─────────────┐ getUpdates  ┌──────────┐ mpsc ┌──────────────────────────┐
//!  │  Telegram   │ ──────────▶ │ Listener │ ───▶ │ Pipeline                 │
//!  │  channel    │             └──────────┘      │ ├─ classifier ──▶ LLM    │
//!  └─────────────┘                               │ ├─ tracker               │
//!                                                │ └─ executor ──▶ MT5 EA   │
//!                                                └────────────┬─────────────┘
//!  ┌─────────────┐  ws://host/ws/monitor                      │ broadcast_tx
//!  │  Dashboard  │ ◀──────────────────────────────────────────┤
//!  └─────────────┘  GET /api/monitor/*                        └──▶ notifier
//! ```
//!
//! ## Environment Variables
//!
//! | Variable                     | Default                  |
//! |------------------------------|--------------------------|
//! | `TELEGRAM_BOT_TOKEN`         | required                 |
//! | `TELEGRAM_SOURCE_CHANNEL_ID` | required                 |
//! | `AI_API_KEY`                 | required                 |
//! | `MT5_LOGIN` / `MT5_PASSWORD` / `MT5_SERVER` | required  |
//! | `AI_PROVIDER`                | `together`               |
//! | `MT5_BASE_URL`               | `http://localhost:8081` (`mock` = paper) |
//! | `MONITOR_BIND_ADDR`          | `0.0.0.0:3000`           |
//! | `RUST_LOG`                   | `signalcopier=debug`     |

use std::sync::Arc;

use teloxide::Bot;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod ai;
mod auth;
mod broker;
mod config;
mod engine;
mod error;
mod events;
mod models;
mod poller;
mod prompt;
mod routes;
mod state;
mod telegram;

use ai::ChatOracle;
use broker::{mt5::Mt5Bridge, paper::PaperGateway, BrokerGateway, OrderStamp};
use config::Config;
use engine::{classifier::SignalClassifier, executor::TradeExecutor, pipeline::SignalPipeline};
use state::AppState;
use telegram::{ChannelListener, OutcomeNotifier};

/// Posts waiting for the pipeline while a classification is in flight
const MESSAGE_QUEUE_SIZE: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("signalcopier=debug".parse()?)
                .add_directive("reqwest=warn".parse()?)
                .add_directive("teloxide=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║             SIGNALCOPIER — Telegram → MT5             ║
  ║      Listener · Classifier · Tracker · Executor       ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Config ─────────────────────────────────────────────────────────────
    let config = Config::from_env()?;
    info!(
        provider = %config.ai.provider,
        model    = %config.ai.model,
        channel  = config.telegram.source_channel_id,
        batch    = config.executor.batch_size,
        lot      = config.executor.lot_size,
        "Configuration loaded"
    );

    // ── 4. Broker gateway ─────────────────────────────────────────────────────
    let http = reqwest::Client::new();
    let stamp = OrderStamp {
        magic:     config.executor.magic,
        deviation: config.executor.deviation,
    };

    let gateway: Arc<dyn BrokerGateway> = if config.mt5.is_mock() {
        warn!("🎭 MT5_BASE_URL=mock — orders go to the in-process paper terminal");
        Arc::new(PaperGateway::seeded(stamp))
    } else {
        let bridge = Mt5Bridge::new(
            http.clone(),
            config.mt5.base_url.clone(),
            config.mt5.credentials.clone(),
            stamp,
        );
        if !bridge.initialize().await {
            error!("MT5 not initialized, trade operations are refused until restart");
        }
        Arc::new(bridge)
    };

    // ── 5. Shared monitor state ───────────────────────────────────────────────
    let state = Arc::new(AppState::new(gateway.name(), config.monitor.api_key.clone()));

    // ── 6. Pipeline ───────────────────────────────────────────────────────────
    let oracle = Arc::new(ChatOracle::new(http, config.ai.clone()));
    let pipeline = SignalPipeline::new(
        SignalClassifier::new(oracle, config.retry),
        TradeExecutor::new(gateway.clone(), config.executor),
        state.clone(),
    );
    let (tx, rx) = mpsc::channel(MESSAGE_QUEUE_SIZE);
    tokio::spawn(pipeline.run(rx));

    // ── 7. Background tasks ───────────────────────────────────────────────────
    tokio::spawn(poller::run_account_poller(
        gateway.clone(),
        state.clone(),
        config.monitor.poll_interval,
    ));

    let bot = Bot::new(&config.telegram.bot_token);
    if let Some(chat_id) = config.telegram.notify_chat_id {
        let notifier = OutcomeNotifier::new(bot.clone(), chat_id);
        tokio::spawn(notifier.start(state.broadcast_tx.subscribe()));
    }

    // ── 8. Monitor server ─────────────────────────────────────────────────────
    let app = routes::router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.monitor.bind_addr).await?;
    info!(addr = ?config.monitor.bind_addr, "🚀 Monitor server starting");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Monitor server stopped: {e}");
        }
    });

    // ── 9. Telegram listener (runs until the pipeline is gone) ────────────────
    ChannelListener::new(
        bot,
        config.telegram.source_channel_id,
        config.listener_restart_delay,
        tx,
        state,
    )
    .run_forever()
    .await;

    Ok(())
}
