//! # engine::pipeline
//!
//! The single consumer of channel posts.  It owns the [`PositionTracker`],
//! so posts are classified and executed strictly one after another.
//!
//! ```text
//!  mpsc<ChannelMessage> ──▶ classify ──▶ dispatch on action ──▶ executor
//!                                                    │
//!                                   broadcast + monitor snapshot
//! ```

use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::engine::classifier::SignalClassifier;
use crate::engine::executor::{ExecutionOutcome, TradeExecutor};
use crate::engine::tracker::PositionTracker;
use crate::events::WsEvent;
use crate::models::{Action, ChannelMessage, TradeDirective};
use crate::state::{ExecutionRecord, SharedState};

pub struct SignalPipeline {
    classifier: SignalClassifier,
    executor:   TradeExecutor,
    tracker:    PositionTracker,
    state:      SharedState,
}

impl SignalPipeline {
    pub fn new(classifier: SignalClassifier, executor: TradeExecutor, state: SharedState) -> Self {
        Self {
            classifier,
            executor,
            tracker: PositionTracker::new(),
            state,
        }
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    /// Consumes posts until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ChannelMessage>) {
        info!("🧠 Signal pipeline ready");
        while let Some(message) = rx.recv().await {
            self.handle_message(&message).await;
        }
        warn!("Message channel closed, signal pipeline stopping");
    }

    /// Classifies and executes one post.  Never fails: problems end up in
    /// the returned outcome and the log.
    pub async fn handle_message(&mut self, message: &ChannelMessage) -> ExecutionOutcome {
        let message_id = Uuid::new_v4();
        let span = info_span!("signal", %message_id, tg_message = message.message_id);
        self.process(message_id, message).instrument(span).await
    }

    async fn process(&mut self, message_id: Uuid, message: &ChannelMessage) -> ExecutionOutcome {
        info!(text = %message.preview(), "📨 New channel message");
        self.state.broadcast(&WsEvent::SignalReceived {
            message_id,
            text:        message.text.clone(),
            received_at: message.received_at,
        });

        let directive = self.classifier.classify(&message.text).await;
        self.state.broadcast(&WsEvent::DirectiveClassified {
            message_id,
            directive: Box::new(directive.clone()),
        });

        let outcome = self.dispatch(&directive, &message.text).await;
        match &outcome {
            ExecutionOutcome::Ignored => info!("Not a trade instruction, ignoring"),
            ExecutionOutcome::NothingTracked { action } => info!(%action, "No tracked positions, nothing to do"),
            other => info!(outcome = %other.summary(), "Directive processed"),
        }

        self.state.broadcast(&WsEvent::TradeExecuted {
            message_id,
            summary:              outcome.summary(),
            changed_broker_state: outcome.changed_broker_state(),
            outcome:              Box::new(outcome.clone()),
        });
        self.state.set_tracked(&self.tracker).await;
        self.state
            .push_record(ExecutionRecord {
                message_id,
                received_at: message.received_at,
                text:        message.text.clone(),
                directive,
                outcome:     outcome.clone(),
            })
            .await;

        outcome
    }

    async fn dispatch(&mut self, directive: &TradeDirective, text: &str) -> ExecutionOutcome {
        match directive.action {
            Action::None => ExecutionOutcome::Ignored,
            Action::OpenTrade => self.executor.open_or_adjust(directive, &mut self.tracker).await,
            Action::UpdateTrade => {
                if self.tracker.is_empty() {
                    return ExecutionOutcome::NothingTracked { action: Action::UpdateTrade };
                }
                match self.classifier.classify_update(text, directive).await {
                    Some(update) => self.executor.update(&update, &mut self.tracker).await,
                    None => ExecutionOutcome::UpdateUnparsed,
                }
            }
            Action::Breakeven => self.executor.breakeven(&mut self.tracker).await,
            Action::CloseTrade => self.executor.close_all(&mut self.tracker).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::ai::scripted::ScriptedOracle;
    use crate::broker::paper::PaperGateway;
    use crate::broker::OrderStamp;
    use crate::engine::classifier::RetryPolicy;
    use crate::engine::executor::ExecutorSettings;
    use crate::state::AppState;

    const OPEN: &str = r#"{"action":"open_trade","symbol":"XAUUSD","direction":"buy","entry":2000,"stop_loss":1990,"take_profit":[2010,2020]}"#;

    fn pipeline(oracle: Arc<ScriptedOracle>) -> (Arc<PaperGateway>, SignalPipeline, SharedState) {
        let paper = Arc::new(PaperGateway::seeded(OrderStamp::default()));
        let state = Arc::new(AppState::new("paper", None));
        let pipeline = SignalPipeline::new(
            SignalClassifier::new(oracle, RetryPolicy::default()),
            TradeExecutor::new(paper.clone(), ExecutorSettings::default()),
            state.clone(),
        );
        (paper, pipeline, state)
    }

    fn post(text: &str) -> ChannelMessage {
        ChannelMessage::new(-100123, 1, text)
    }

    #[tokio::test]
    async fn chatter_sends_no_orders() {
        let oracle = ScriptedOracle::replying(&[r#"{"action":"none","comment":"market recap"}"#]);
        let (paper, mut pipeline, state) = pipeline(oracle);

        let outcome = pipeline.handle_message(&post("Great week everyone!")).await;
        assert_eq!(outcome, ExecutionOutcome::Ignored);
        assert!(paper.sent_orders().is_empty());
        assert_eq!(state.history.read().await.len(), 1);
    }

    #[tokio::test]
    async fn update_without_positions_skips_the_second_stage() {
        let oracle = ScriptedOracle::replying(&[r#"{"action":"update_trade"}"#]);
        let (paper, mut pipeline, _state) = pipeline(oracle.clone());

        let outcome = pipeline.handle_message(&post("move SL to 1995")).await;
        assert_eq!(outcome, ExecutionOutcome::NothingTracked { action: Action::UpdateTrade });
        assert_eq!(oracle.calls(), 1);
        assert!(paper.sent_orders().is_empty());
    }

    #[tokio::test]
    async fn full_signal_lifecycle() {
        let oracle = ScriptedOracle::replying(&[
            OPEN,
            r#"{"action":"update_trade"}"#,
            r#"{"stop_loss":1995,"take_profit":[2015,2030]}"#,
            r#"{"action":"breakeven"}"#,
            r#"{"action":"close_trade"}"#,
        ]);
        let (paper, mut pipeline, state) = pipeline(oracle);
        let mut events = state.broadcast_tx.subscribe();

        // open
        let outcome = pipeline.handle_message(&post("GOLD BUY NOW")).await;
        assert!(matches!(outcome, ExecutionOutcome::Opened { ref tickets, .. } if tickets.len() == 4));
        let tickets = pipeline.tracker().all();
        assert_eq!(state.tracked.read().await.all(), tickets);

        // update
        let outcome = pipeline.handle_message(&post("SL 1995 TP1 2015 TP2 2030")).await;
        assert!(matches!(outcome, ExecutionOutcome::Updated { ref modified, .. } if modified.len() == 4));
        assert_eq!(paper.position(tickets[0]).unwrap().tp, 2015.0);
        assert_eq!(paper.position(tickets[3]).unwrap().tp, 2030.0);

        // breakeven: 2 closed, 2 protected at the 2000.30 entry minus 5 points
        let outcome = pipeline.handle_message(&post("Move to breakeven")).await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::BreakevenSplit { breakeven_price: Some(price), .. } if price == 2000.25
        ));
        assert_eq!(pipeline.tracker().all(), tickets[2..].to_vec());
        assert_eq!(paper.position(tickets[2]).unwrap().sl, 2000.25);

        // close
        let outcome = pipeline.handle_message(&post("Close all now")).await;
        assert!(matches!(outcome, ExecutionOutcome::Closed { ref closed, .. } if closed.len() == 2));
        assert!(pipeline.tracker().is_empty());
        assert!(paper.positions_snapshot().is_empty());

        let mut kinds = Vec::new();
        while let Ok(json) = events.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            kinds.push(value["event"].as_str().unwrap_or_default().to_string());
        }
        assert_eq!(kinds.iter().filter(|k| *k == "TRADE_EXECUTED").count(), 4);
        assert!(kinds.contains(&"TRACKED_CHANGED".to_string()));
    }

    #[tokio::test]
    async fn run_drains_the_channel() {
        let oracle = ScriptedOracle::replying(&[OPEN, OPEN]);
        let (paper, pipeline, state) = pipeline(oracle);
        let (tx, rx) = mpsc::channel(8);

        tx.send(post("GOLD BUY")).await.unwrap();
        tx.send(post("GOLD BUY again")).await.unwrap();
        drop(tx);
        pipeline.run(rx).await;

        assert_eq!(paper.sent_orders().len(), 4);
        assert_eq!(state.history.read().await.len(), 2);
    }
}
