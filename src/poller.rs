//! # poller
//!
//! Periodic account / positions snapshot for the monitor surface.  Read-only:
//! it never touches the tracker or sends orders.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::broker::{BrokerGateway, GatewayResult};
use crate::state::{AccountSnapshot, AppState, SharedState};

pub async fn poll_once(gateway: &dyn BrokerGateway, state: &AppState) -> GatewayResult<()> {
    let account = gateway.account_info().await?;
    let positions = gateway.positions(None).await?;

    debug!(
        balance   = account.balance,
        equity    = account.equity,
        positions = positions.len(),
        "Account polled"
    );
    state
        .set_account(AccountSnapshot { account, positions, polled_at: Utc::now() })
        .await;
    Ok(())
}

pub async fn run_account_poller(gateway: Arc<dyn BrokerGateway>, state: SharedState, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if let Err(e) = poll_once(gateway.as_ref(), &state).await {
            warn!("Account poll failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::paper::PaperGateway;
    use crate::broker::OrderStamp;
    use crate::models::{OrderType, Position};

    #[tokio::test]
    async fn snapshot_is_stored_and_broadcast() {
        let paper = PaperGateway::seeded(OrderStamp::default());
        paper.insert_position(Position {
            ticket:     77,
            symbol:     "XAUUSD".into(),
            order_type: OrderType::Buy,
            volume:     0.02,
            price_open: 1990.0,
            sl:         0.0,
            tp:         0.0,
            profit:     0.0,
        });
        let state = AppState::new("paper", None);
        let mut rx = state.broadcast_tx.subscribe();

        poll_once(&paper, &state).await.unwrap();

        let snapshot = state.account.read().await.clone().unwrap();
        assert_eq!(snapshot.positions.len(), 1);
        assert_eq!(snapshot.account.balance, 10_000.0);
        assert!(rx.try_recv().unwrap().contains("ACCOUNT_UPDATED"));
    }

    #[tokio::test]
    async fn failures_leave_the_previous_snapshot() {
        let paper = PaperGateway::uninitialized(OrderStamp::default());
        let state = AppState::new("paper", None);

        assert!(poll_once(&paper, &state).await.is_err());
        assert!(state.account.read().await.is_none());
    }
}
