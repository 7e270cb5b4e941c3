//! # auth — API Key Middleware
//!
//! ป้องกัน Monitor endpoints ด้วย `X-API-Key` header
//!
//! ## Mode
//! - `MONITOR_API_KEY` ไม่ได้ตั้ง → **Allow All** (Dev Mode)
//! - `MONITOR_API_KEY` ตั้งค่า → ต้องส่ง `X-API-Key: <key>` ทุก Request
//!
//! ## ยกเว้น
//! `/api/health` ไม่ต้อง Auth

use axum::{
    extract::{Query, Request, State},
    http::Uri,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use crate::error::AppError;
use crate::state::SharedState;

pub const HEALTH_PATH: &str = "/api/health";

/// Axum middleware — ตรวจสอบ X-API-Key header
pub async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    // ── Dev Mode: ไม่มี key → ยอมให้ผ่านหมด ───────────────────────────────────
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let path = request.uri().path();
    if path == HEALTH_PATH {
        return next.run(request).await;
    }

    // ── ตรวจสอบ Header ────────────────────────────────────────────────────────
    // WebSocket clients in browsers cannot set headers, so `?api_key=` is accepted too
    let provided = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query_api_key(request.uri()));

    if provided.as_deref() == Some(expected) {
        next.run(request).await
    } else {
        warn!(path, "❌ Unauthorized request — invalid or missing X-API-Key");
        AppError::Unauthorized.into_response()
    }
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    api_key: Option<String>,
}

fn query_api_key(uri: &Uri) -> Option<String> {
    Query::<KeyQuery>::try_from_uri(uri).ok()?.0.api_key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(uri: &str) -> Option<String> {
        query_api_key(&uri.parse::<Uri>().unwrap())
    }

    #[test]
    fn api_key_is_read_from_the_query_string() {
        assert_eq!(key("/ws/monitor?a=1&api_key=s3cret"), Some("s3cret".into()));
        assert_eq!(key("/ws/monitor?a=1"), None);
        assert_eq!(key("/ws/monitor"), None);
    }

    #[test]
    fn query_key_is_percent_decoded() {
        assert_eq!(key("/ws/monitor?api_key=a%2Bb%26c%25d"), Some("a+b&c%d".into()));
        assert_eq!(key("/ws/monitor?api_key=two+words"), Some("two words".into()));
    }
}
