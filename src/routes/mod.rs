//! # routes
//!
//! Read-only monitor surface.
//!
//! | Method    | Path                     | Auth |
//! |-----------|--------------------------|------|
//! | GET       | `/api/health`            | no   |
//! | GET       | `/api/monitor/account`   | yes  |
//! | GET       | `/api/monitor/positions` | yes  |
//! | GET       | `/api/monitor/tracked`   | yes  |
//! | GET       | `/api/monitor/history`   | yes  |
//! | GET       | `/api/monitor/stats`     | yes  |
//! | GET (WS)  | `/ws/monitor`            | yes  |

use axum::{middleware, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{require_api_key, HEALTH_PATH};
use crate::state::SharedState;

pub mod monitor;

use monitor::{get_account, get_history, get_positions, get_stats, get_tracked, health, ws_monitor};

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(HEALTH_PATH,              get(health))
        // ── Monitor ───────────────────────────────────────────────────────────
        .route("/api/monitor/account",   get(get_account))
        .route("/api/monitor/positions", get(get_positions))
        .route("/api/monitor/tracked",   get(get_tracked))
        .route("/api/monitor/history",   get(get_history))
        .route("/api/monitor/stats",     get(get_stats))
        .route("/ws/monitor",            get(ws_monitor))
        // ── Middleware (outermost first) ──────────────────────────────────────
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(middleware::from_fn_with_state(state.clone(), require_api_key)),
        )
        .with_state(state)
}
