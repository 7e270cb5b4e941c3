//! # broker::mt5
//!
//! **MT5 Bridge** — talks to the MetaTrader 5 bridge EA over HTTP.
//!
//! ## Bridge API Contract (EA side)
//! | Method | Path                   | Body / Response                              |
//! |--------|------------------------|----------------------------------------------|
//! | POST   | `/initialize`          | `{login,password,server}` → `{ok,message}`   |
//! | GET    | `/symbol/{symbol}`     | `SymbolInfo` (404 = unknown symbol)          |
//! | GET    | `/tick/{symbol}`       | `{bid,ask}`  (404 = no quote)                |
//! | POST   | `/order/send`          | `OrderRequest` → `{retcode,order,comment}`   |
//! | GET    | `/positions?symbol=`   | `[Position]`                                 |
//! | GET    | `/positions/{ticket}`  | `Position` (404 = not open)                  |
//! | GET    | `/account`             | `AccountInfo`                                |
//!
//! retcode 10009 = `TRADE_RETCODE_DONE` (success)

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::broker::{BrokerGateway, GatewayError, GatewayResult, OrderStamp};
use crate::config::Mt5Credentials;
use crate::models::{AccountInfo, OrderRequest, OrderResult, Position, SymbolInfo, Tick};

/// Never wait on the terminal longer than this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    ok: bool,
    #[serde(default)]
    message: Option<String>,
}

pub struct Mt5Bridge {
    client:      reqwest::Client,
    base_url:    String,
    credentials: Mt5Credentials,
    stamp:       OrderStamp,
    initialized: AtomicBool,
}

impl Mt5Bridge {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Mt5Credentials,
        stamp: OrderStamp,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            stamp,
            initialized: AtomicBool::new(false),
        }
    }

    /// Logs the terminal in.  Returns whether it succeeded; on failure the
    /// bridge stays usable as a value but every call short-circuits.
    pub async fn initialize(&self) -> bool {
        let url = match self.endpoint(&["initialize"]) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Failed to initialize MT5");
                return false;
            }
        };

        let outcome = self
            .client
            .post(url.clone())
            .json(&self.credentials)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;

        let ok = match outcome {
            Ok(resp) if resp.status().is_success() => match resp.json::<InitializeResponse>().await {
                Ok(body) if body.ok => true,
                Ok(body) => {
                    error!(message = ?body.message, "Failed to initialize MT5");
                    false
                }
                Err(e) => {
                    error!(error = %e, "MT5 initialize response parse failed");
                    false
                }
            },
            Ok(resp) => {
                error!(http_status = %resp.status(), "Failed to initialize MT5");
                false
            }
            Err(e) => {
                error!(error = %e, url = %url, "MT5 bridge unreachable during initialize");
                false
            }
        };

        self.initialized.store(ok, Ordering::SeqCst);
        if ok {
            info!(login = self.credentials.login, server = %self.credentials.server, "MT5 initialized successfully");
        }
        ok
    }

    fn ensure_initialized(&self, operation: &str) -> GatewayResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            error!(operation, "Cannot reach MT5: terminal is not initialized");
            Err(GatewayError::NotInitialized)
        }
    }

    /// `base_url` extended by `segments`, each percent-encoded
    /// (broker symbols such as `US30+` or `XAU/USD` are legal).
    fn endpoint(&self, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| GatewayError::Transport(format!("invalid MT5_BASE_URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Transport(format!("MT5_BASE_URL {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET returning `None` on 404.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> GatewayResult<Option<T>> {
        let url = self.endpoint(segments)?;

        let response = self
            .client
            .get(url.clone())
            .query(query)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url = %url, "MT5 unreachable");
                GatewayError::Transport(e.to_string())
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        decode(response).await.map(Some)
    }

    async fn get_required<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> GatewayResult<T> {
        self.get_optional(segments, query).await?.ok_or_else(|| GatewayError::Http {
            status: StatusCode::NOT_FOUND.as_u16(),
            body:   format!("/{} not found", segments.join("/")),
        })
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> GatewayResult<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(http_status = %status, body = %body, "MT5 returned HTTP error");
        return Err(GatewayError::Http { status: status.as_u16(), body });
    }

    response.json().await.map_err(|e| {
        error!(error = %e, "MT5 response parse failed");
        GatewayError::Decode(e.to_string())
    })
}

#[async_trait]
impl BrokerGateway for Mt5Bridge {
    fn name(&self) -> &str {
        "mt5-bridge"
    }

    fn stamp(&self) -> OrderStamp {
        self.stamp
    }

    async fn symbol_info(&self, symbol: &str) -> GatewayResult<Option<SymbolInfo>> {
        self.ensure_initialized("symbol_info")?;
        self.get_optional(&["symbol", symbol], &[]).await
    }

    async fn tick(&self, symbol: &str) -> GatewayResult<Option<Tick>> {
        self.ensure_initialized("tick")?;
        self.get_optional(&["tick", symbol], &[]).await
    }

    async fn send_order(&self, request: &OrderRequest) -> GatewayResult<OrderResult> {
        self.ensure_initialized("send_order")?;
        let url = self.endpoint(&["order", "send"])?;

        info!(
            symbol   = %request.symbol,
            action   = ?request.action,
            order_type = ?request.order_type,
            volume   = request.volume,
            price    = ?request.price,
            sl       = ?request.sl,
            tp       = ?request.tp,
            position = ?request.position,
            "🚀 Sending order to MT5"
        );

        let response = self
            .client
            .post(url)
            .json(request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "MT5 unreachable");
                GatewayError::Transport(e.to_string())
            })?;

        let result: OrderResult = decode(response).await?;
        if !result.is_done() {
            warn!(retcode = result.retcode, comment = %result.comment_or_default(), "MT5 rejected order");
        }
        Ok(result)
    }

    async fn open_position(&self, ticket: u64) -> GatewayResult<Option<Position>> {
        self.ensure_initialized("open_position")?;
        let ticket = ticket.to_string();
        self.get_optional(&["positions", &ticket], &[]).await
    }

    async fn positions(&self, symbol: Option<&str>) -> GatewayResult<Vec<Position>> {
        self.ensure_initialized("positions")?;
        match symbol {
            Some(symbol) => self.get_required(&["positions"], &[("symbol", symbol)]).await,
            None => self.get_required(&["positions"], &[]).await,
        }
    }

    async fn account_info(&self) -> GatewayResult<AccountInfo> {
        self.ensure_initialized("account_info")?;
        self.get_required(&["account"], &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderType;
    use std::collections::HashMap;

    use axum::{
        extract::{Path, Query},
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};

    fn credentials() -> Mt5Credentials {
        Mt5Credentials {
            login:    12345,
            password: "secret".into(),
            server:   "Demo-Server".into(),
        }
    }

    /// A throwaway bridge EA on an ephemeral port.
    async fn spawn_fake_bridge(init_ok: bool) -> String {
        let app = Router::new()
            .route("/initialize", post(move |Json(body): Json<Value>| async move {
                assert_eq!(body["login"], 12345);
                Json(json!({ "ok": init_ok, "message": "fake" }))
            }))
            .route("/symbol/:symbol", get(|Path(symbol): Path<String>| async move {
                if symbol == "XAUUSD.sml" || symbol == "US30+" {
                    Ok(Json(json!({ "name": symbol, "bid": 1999.7, "ask": 2000.0, "point": 0.01, "digits": 2 })))
                } else {
                    Err(AxumStatus::NOT_FOUND)
                }
            }))
            .route("/tick/:symbol", get(|| async { Json(json!({ "bid": 1999.0, "ask": 2001.0 })) }))
            .route("/order/send", post(|Json(req): Json<Value>| async move {
                if req["type"] == "SELL" {
                    Json(json!({ "retcode": 10019, "comment": "No money" }))
                } else {
                    Json(json!({ "retcode": 10009, "order": 777, "comment": "Request completed" }))
                }
            }))
            .route("/positions", get(|Query(params): Query<HashMap<String, String>>| async move {
                let all = [
                    json!({ "ticket": 777, "symbol": "XAUUSD.sml", "type": "BUY", "volume": 0.02, "price_open": 2000.0 }),
                    json!({ "ticket": 900, "symbol": "US30+", "type": "SELL", "volume": 0.02, "price_open": 39000.0 }),
                ];
                let positions: Vec<Value> = all
                    .into_iter()
                    .filter(|p| params.get("symbol").map_or(true, |s| p["symbol"] == s.as_str()))
                    .collect();
                Json(Value::Array(positions))
            }))
            .route("/positions/:ticket", get(|Path(ticket): Path<u64>| async move {
                if ticket == 777 {
                    Ok(Json(json!({ "ticket": 777, "symbol": "XAUUSD.sml", "type": "BUY", "volume": 0.02, "price_open": 2000.0, "sl": 1990.0 })))
                } else {
                    Err(AxumStatus::NOT_FOUND)
                }
            }))
            .route("/account", get(|| async {
                Json(json!({ "balance": 1000.0, "equity": 1010.0, "margin": 20.0, "free_margin": 990.0 }))
            }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn uninitialized_bridge_short_circuits_every_call() {
        // Nothing listens on this port; a real request would fail differently.
        let bridge = Mt5Bridge::new(reqwest::Client::new(), "http://127.0.0.1:1", credentials(), OrderStamp::default());

        assert!(matches!(bridge.symbol_info("XAUUSD").await, Err(GatewayError::NotInitialized)));
        assert!(matches!(bridge.open_tickets("XAUUSD").await, Err(GatewayError::NotInitialized)));
        assert!(matches!(bridge.close_position(1, 0.02).await, Err(GatewayError::NotInitialized)));
        assert!(matches!(bridge.account_info().await, Err(GatewayError::NotInitialized)));
    }

    #[tokio::test]
    async fn failed_initialize_keeps_bridge_disabled() {
        let url = spawn_fake_bridge(false).await;
        let bridge = Mt5Bridge::new(reqwest::Client::new(), url, credentials(), OrderStamp::default());

        assert!(!bridge.initialize().await);
        assert!(matches!(bridge.tick("XAUUSD").await, Err(GatewayError::NotInitialized)));
    }

    #[tokio::test]
    async fn bridge_round_trip_against_fake_ea() {
        let url = spawn_fake_bridge(true).await;
        let bridge = Mt5Bridge::new(reqwest::Client::new(), format!("{url}/"), credentials(), OrderStamp::default());
        assert!(bridge.initialize().await);

        assert!(bridge.symbol_info("XAUUSD").await.unwrap().is_none());
        let info = bridge.symbol_info("XAUUSD.sml").await.unwrap().unwrap();
        assert_eq!(info.ask, 2000.0);

        assert_eq!(bridge.current_price("XAUUSD.sml").await.unwrap(), Some(2000.0));
        assert_eq!(bridge.open_tickets("XAUUSD.sml").await.unwrap(), vec![777]);
        assert!(bridge.open_position(1).await.unwrap().is_none());

        let buy = OrderRequest::market_open("XAUUSD.sml", OrderType::Buy, 0.02, 2000.0, 234000, "t");
        let done = bridge.send_order(&buy).await.unwrap();
        assert!(done.is_done());
        assert_eq!(done.order, Some(777));

        let sell = OrderRequest::market_open("XAUUSD.sml", OrderType::Sell, 0.02, 1999.7, 234000, "t");
        let rejected = bridge.send_order(&sell).await.unwrap();
        assert_eq!(rejected.retcode, 10019);

        // Closing a long is a SELL deal, which the fake EA rejects.
        let close = bridge.close_position(777, 0.02).await.unwrap();
        assert!(!close.is_done());

        let modify = bridge.modify_position(777, None, Some(2050.0)).await.unwrap();
        assert!(modify.is_done());

        assert!(matches!(bridge.close_position(5, 0.02).await, Err(GatewayError::PositionNotFound(5))));

        let account = bridge.account_info().await.unwrap();
        assert_eq!(account.free_margin, 990.0);
    }

    #[tokio::test]
    async fn symbols_with_reserved_characters_reach_the_bridge_intact() {
        let url = spawn_fake_bridge(true).await;
        let bridge = Mt5Bridge::new(reqwest::Client::new(), url, credentials(), OrderStamp::default());
        assert!(bridge.initialize().await);

        let info = bridge.symbol_info("US30+").await.unwrap().unwrap();
        assert_eq!(info.name, "US30+");
        assert_eq!(bridge.open_tickets("US30+").await.unwrap(), vec![900]);
        assert_eq!(bridge.positions(None).await.unwrap().len(), 2);

        let mut tracker = crate::engine::tracker::PositionTracker::new();
        tracker.set_symbol("US30+");
        tracker.track(900);
        assert!(tracker.synchronize(&bridge, "US30+").await.unwrap().is_empty());
        assert_eq!(tracker.all(), vec![900]);
    }
}
