//! # routes::monitor
//!
//! Handlers for the dashboard: REST snapshots plus a WebSocket stream of
//! every [`WsEvent`](crate::events::WsEvent).

use std::sync::atomic::Ordering;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info};

use crate::error::AppError;
use crate::state::SharedState;

// ─── WebSocket Handler ────────────────────────────────────────────────────────

/// Upgrade HTTP → WebSocket แล้ว subscribe broadcast channel
pub async fn ws_monitor(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.broadcast_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    // ── ส่ง Snapshot ปัจจุบันทันทีที่ต่อ ─────────────────────────────────────
    let snapshot = {
        let tracked = state.tracked.read().await.clone();
        let account = state.account.read().await.clone();

        json!({
            "event":          "SNAPSHOT",
            "gateway":        state.gateway_name,
            "tracked":        tracked,
            "account":        account,
            "message_count":  state.message_count.load(Ordering::Relaxed),
            "actioned_count": state.actioned_count.load(Ordering::Relaxed),
        })
        .to_string()
    };

    if sender.send(Message::Text(snapshot)).await.is_err() {
        return;
    }

    // ── Event Loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("WS client lagged, skipped {n} events");
                    }
                    Err(_) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 WebSocket client disconnected");
}

// ─── REST Endpoints ───────────────────────────────────────────────────────────

/// GET /api/health
pub async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":          true,
        "gateway":     state.gateway_name,
        "started_at":  state.started_at,
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

/// GET /api/monitor/account — ยอดเงินล่าสุดจาก poller
pub async fn get_account(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let snapshot = state.account.read().await;
    let snapshot = snapshot
        .as_ref()
        .ok_or_else(|| AppError::NotFound("No account snapshot yet".into()))?;

    Ok(Json(json!({
        "ok":        true,
        "account":   snapshot.account,
        "polled_at": snapshot.polled_at,
    })))
}

/// GET /api/monitor/positions — ทุก Position ใน MT5 (ไม่ใช่แค่ที่ track)
pub async fn get_positions(State(state): State<SharedState>) -> impl IntoResponse {
    let snapshot = state.account.read().await;
    let positions = snapshot.as_ref().map(|s| s.positions.clone()).unwrap_or_default();
    Json(json!({
        "ok":        true,
        "count":     positions.len(),
        "positions": positions,
    }))
}

/// GET /api/monitor/tracked — batch ที่ระบบเปิดเอง
pub async fn get_tracked(State(state): State<SharedState>) -> impl IntoResponse {
    let tracked = state.tracked.read().await;
    Json(json!({
        "ok":      true,
        "symbol":  tracked.symbol(),
        "trades":  tracked.trades(),
    }))
}

/// GET /api/monitor/history — ข้อความล่าสุดและผลลัพธ์
pub async fn get_history(State(state): State<SharedState>) -> impl IntoResponse {
    let history = state.history.read().await;
    let records: Vec<_> = history.iter().rev().collect();
    Json(json!({
        "ok":      true,
        "count":   records.len(),
        "records": records,
    }))
}

/// GET /api/monitor/stats
pub async fn get_stats(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":             true,
        "message_count":  state.message_count.load(Ordering::Relaxed),
        "actioned_count": state.actioned_count.load(Ordering::Relaxed),
        "tracked":        state.tracked.read().await.len(),
        "ws_clients":     state.broadcast_tx.receiver_count(),
    }))
}
