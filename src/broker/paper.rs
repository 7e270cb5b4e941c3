//! # broker::paper
//!
//! In-process simulated terminal.  Selected with `MT5_BASE_URL=mock`, and
//! the workhorse of the test suite: it records the most recent requests it
//! receives and can be told to reject specific `send_order` calls.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::broker::{BrokerGateway, GatewayError, GatewayResult, OrderStamp};
use crate::models::order::TRADE_RETCODE_DONE;
use crate::models::{
    AccountInfo, OrderRequest, OrderResult, OrderType, Position, RequestAction, SymbolInfo, Tick,
};

const RETCODE_REJECT: u32 = 10006;
const RETCODE_INVALID: u32 = 10013;
const RETCODE_POSITION_CLOSED: u32 = 10036;

/// Units per lot used for the simulated P&L.
const CONTRACT_SIZE: f64 = 100.0;
const LEVERAGE: f64 = 100.0;
const STARTING_BALANCE: f64 = 10_000.0;
/// Requests kept for [`PaperGateway::sent_orders`]
const SENT_LOG_SIZE: usize = 256;

#[derive(Debug)]
struct PaperBook {
    symbols:        HashMap<String, SymbolInfo>,
    positions:      BTreeMap<u64, Position>,
    next_ticket:    u64,
    balance:        f64,
    sent:           VecDeque<OrderRequest>,
    send_calls:     usize,
    reject_calls:   HashSet<usize>,
    positions_down: bool,
}

impl PaperBook {
    fn mark(&self, position: &Position) -> Option<f64> {
        self.symbols.get(&position.symbol).map(|s| match position.order_type {
            OrderType::Buy  => s.bid,
            OrderType::Sell => s.ask,
        })
    }

    fn refresh_profit(&mut self) {
        let marks: Vec<(u64, Option<f64>)> = self
            .positions
            .values()
            .map(|p| (p.ticket, self.mark(p)))
            .collect();
        for (ticket, mark) in marks {
            if let (Some(position), Some(mark)) = (self.positions.get_mut(&ticket), mark) {
                let sign = match position.order_type {
                    OrderType::Buy  => 1.0,
                    OrderType::Sell => -1.0,
                };
                position.profit = sign * (mark - position.price_open) * position.volume * CONTRACT_SIZE;
            }
        }
    }

    fn issue_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }
}

pub struct PaperGateway {
    book:        Mutex<PaperBook>,
    stamp:       OrderStamp,
    initialized: AtomicBool,
}

impl PaperGateway {
    pub fn new(stamp: OrderStamp) -> Self {
        Self {
            book: Mutex::new(PaperBook {
                symbols:        HashMap::new(),
                positions:      BTreeMap::new(),
                next_ticket:    1_000_001,
                balance:        STARTING_BALANCE,
                sent:           VecDeque::with_capacity(SENT_LOG_SIZE),
                send_calls:     0,
                reject_calls:   HashSet::new(),
                positions_down: false,
            }),
            stamp,
            initialized: AtomicBool::new(true),
        }
    }

    /// Paper terminal preloaded with a couple of liquid symbols.
    pub fn seeded(stamp: OrderStamp) -> Self {
        let gateway = Self::new(stamp);
        gateway.add_symbol(SymbolInfo { name: "XAUUSD".into(), bid: 2000.00, ask: 2000.30, point: 0.01, digits: 2 });
        gateway.add_symbol(SymbolInfo { name: "EURUSD".into(), bid: 1.08500, ask: 1.08510, point: 0.00001, digits: 5 });
        gateway
    }

    /// Simulates a terminal that failed to start.
    pub fn uninitialized(stamp: OrderStamp) -> Self {
        let gateway = Self::new(stamp);
        gateway.initialized.store(false, Ordering::SeqCst);
        gateway
    }

    fn book(&self) -> std::sync::MutexGuard<'_, PaperBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_initialized(&self) -> GatewayResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            tracing::error!("Cannot reach paper terminal: not initialized");
            Err(GatewayError::NotInitialized)
        }
    }

    pub fn add_symbol(&self, info: SymbolInfo) {
        self.book().symbols.insert(info.name.clone(), info);
    }

    pub fn set_quote(&self, symbol: &str, bid: f64, ask: f64) {
        let mut book = self.book();
        if let Some(info) = book.symbols.get_mut(symbol) {
            info.bid = bid;
            info.ask = ask;
        }
        book.refresh_profit();
    }

    /// Places a position directly, as if opened outside this process.
    pub fn insert_position(&self, position: Position) {
        let mut book = self.book();
        book.next_ticket = book.next_ticket.max(position.ticket + 1);
        book.positions.insert(position.ticket, position);
    }

    /// Removes a position without an order, as a stop-out or manual close would.
    pub fn drop_position(&self, ticket: u64) {
        self.book().positions.remove(&ticket);
    }

    /// Rejects the `send_order` calls with these zero-based call indices.
    pub fn reject_send_calls(&self, calls: impl IntoIterator<Item = usize>) {
        self.book().reject_calls.extend(calls);
    }

    /// Makes position queries fail with a transport error, as a bridge
    /// whose terminal stopped answering would.
    pub fn fail_position_queries(&self, fail: bool) {
        self.book().positions_down = fail;
    }

    /// The last [`SENT_LOG_SIZE`] requests received by `send_order`, in
    /// arrival order.
    pub fn sent_orders(&self) -> Vec<OrderRequest> {
        self.book().sent.iter().cloned().collect()
    }

    pub fn position(&self, ticket: u64) -> Option<Position> {
        self.book().positions.get(&ticket).cloned()
    }

    pub fn positions_snapshot(&self) -> Vec<Position> {
        self.book().positions.values().cloned().collect()
    }

    fn execute(book: &mut PaperBook, request: &OrderRequest) -> OrderResult {
        match (request.action, request.position) {
            // ── Close (full or partial) ───────────────────────────────────────
            (RequestAction::Deal, Some(ticket)) => {
                let Some(position) = book.positions.get(&ticket).cloned() else {
                    return rejected(RETCODE_POSITION_CLOSED, "Position doesn't exist");
                };
                if request.order_type != position.order_type.opposite() {
                    return rejected(RETCODE_INVALID, "Invalid request");
                }
                let closing = request.volume.min(position.volume);
                let share = closing / position.volume;
                book.balance += position.profit * share;

                let remaining = position.volume - closing;
                if remaining <= 1e-9 {
                    book.positions.remove(&ticket);
                } else if let Some(open) = book.positions.get_mut(&ticket) {
                    open.volume = remaining;
                    open.profit -= position.profit * share;
                }
                done(book.issue_ticket())
            }

            // ── Open ──────────────────────────────────────────────────────────
            (RequestAction::Deal, None) => {
                let Some(info) = book.symbols.get(&request.symbol).cloned() else {
                    return rejected(RETCODE_INVALID, "Invalid request");
                };
                let fill = request.price.unwrap_or(match request.order_type {
                    OrderType::Buy  => info.ask,
                    OrderType::Sell => info.bid,
                });
                let ticket = book.issue_ticket();
                book.positions.insert(ticket, Position {
                    ticket,
                    symbol:     info.name,
                    order_type: request.order_type,
                    volume:     request.volume,
                    price_open: fill,
                    sl:         request.sl.unwrap_or(0.0),
                    tp:         request.tp.unwrap_or(0.0),
                    profit:     0.0,
                });
                book.refresh_profit();
                done(ticket)
            }

            // ── SL / TP ───────────────────────────────────────────────────────
            (RequestAction::Sltp, ticket) => {
                let position = match ticket {
                    Some(ticket) => book.positions.get_mut(&ticket),
                    None => None,
                };
                let Some(position) = position else {
                    return rejected(RETCODE_POSITION_CLOSED, "Position doesn't exist");
                };
                if let Some(sl) = request.sl {
                    position.sl = sl;
                }
                if let Some(tp) = request.tp {
                    position.tp = tp;
                }
                OrderResult {
                    retcode: TRADE_RETCODE_DONE,
                    order:   None,
                    comment: Some("Request completed".into()),
                }
            }
        }
    }
}

fn done(ticket: u64) -> OrderResult {
    OrderResult {
        retcode: TRADE_RETCODE_DONE,
        order:   Some(ticket),
        comment: Some("Request completed".into()),
    }
}

fn rejected(retcode: u32, comment: &str) -> OrderResult {
    OrderResult {
        retcode,
        order:   None,
        comment: Some(comment.to_string()),
    }
}

#[async_trait]
impl BrokerGateway for PaperGateway {
    fn name(&self) -> &str {
        "paper"
    }

    fn stamp(&self) -> OrderStamp {
        self.stamp
    }

    async fn symbol_info(&self, symbol: &str) -> GatewayResult<Option<SymbolInfo>> {
        self.ensure_initialized()?;
        Ok(self.book().symbols.get(symbol).cloned())
    }

    async fn tick(&self, symbol: &str) -> GatewayResult<Option<Tick>> {
        self.ensure_initialized()?;
        Ok(self
            .book()
            .symbols
            .get(symbol)
            .map(|s| Tick { bid: s.bid, ask: s.ask }))
    }

    async fn send_order(&self, request: &OrderRequest) -> GatewayResult<OrderResult> {
        self.ensure_initialized()?;
        let mut book = self.book();
        let call = book.send_calls;
        book.send_calls += 1;
        if book.sent.len() == SENT_LOG_SIZE {
            book.sent.pop_front();
        }
        book.sent.push_back(request.clone());

        let result = if book.reject_calls.contains(&call) {
            rejected(RETCODE_REJECT, "Request rejected")
        } else {
            Self::execute(&mut book, request)
        };

        info!(
            call,
            symbol  = %request.symbol,
            retcode = result.retcode,
            order   = ?result.order,
            "🎭 [PAPER] order processed"
        );
        Ok(result)
    }

    async fn open_position(&self, ticket: u64) -> GatewayResult<Option<Position>> {
        self.ensure_initialized()?;
        Ok(self.book().positions.get(&ticket).cloned())
    }

    async fn positions(&self, symbol: Option<&str>) -> GatewayResult<Vec<Position>> {
        self.ensure_initialized()?;
        let book = self.book();
        if book.positions_down {
            return Err(GatewayError::Transport("paper terminal not answering".into()));
        }
        Ok(book
            .positions
            .values()
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .cloned()
            .collect())
    }

    async fn account_info(&self) -> GatewayResult<AccountInfo> {
        self.ensure_initialized()?;
        let book = self.book();
        let floating: f64 = book.positions.values().map(|p| p.profit).sum();
        let margin: f64 = book
            .positions
            .values()
            .map(|p| p.volume * CONTRACT_SIZE * p.price_open / LEVERAGE)
            .sum();
        let equity = book.balance + floating;

        Ok(AccountInfo {
            balance:     book.balance,
            equity,
            margin,
            free_margin: equity - margin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold() -> SymbolInfo {
        SymbolInfo { name: "XAUUSD".into(), bid: 2000.0, ask: 2000.5, point: 0.01, digits: 2 }
    }

    #[tokio::test]
    async fn open_modify_and_close_lifecycle() {
        let paper = PaperGateway::new(OrderStamp::default());
        paper.add_symbol(gold());

        let open = OrderRequest::market_open("XAUUSD", OrderType::Buy, 0.02, 2000.5, 1, "t");
        let ticket = paper.send_order(&open).await.unwrap().order.unwrap();
        assert_eq!(paper.open_tickets("XAUUSD").await.unwrap(), vec![ticket]);

        assert!(paper.modify_position(ticket, Some(1990.0), None).await.unwrap().is_done());
        let position = paper.position(ticket).unwrap();
        assert_eq!((position.sl, position.tp), (1990.0, 0.0));

        paper.set_quote("XAUUSD", 2010.5, 2011.0);
        assert!(paper.account_info().await.unwrap().equity > STARTING_BALANCE);

        let close = paper.close_position(ticket, 0.02).await.unwrap();
        assert!(close.is_done());
        assert!(paper.open_tickets("XAUUSD").await.unwrap().is_empty());

        let sent = paper.sent_orders();
        assert_eq!(sent.last().unwrap().order_type, OrderType::Sell);
        assert_eq!(sent.last().unwrap().price, Some(2010.5));
        assert!((paper.account_info().await.unwrap().balance - (STARTING_BALANCE + 20.0)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn scripted_rejections_hit_only_listed_calls() {
        let paper = PaperGateway::new(OrderStamp::default());
        paper.add_symbol(gold());
        paper.reject_send_calls([1]);

        let open = OrderRequest::market_open("XAUUSD", OrderType::Sell, 0.02, 2000.0, 1, "t");
        assert!(paper.send_order(&open).await.unwrap().is_done());
        assert_eq!(paper.send_order(&open).await.unwrap().retcode, RETCODE_REJECT);
        assert!(paper.send_order(&open).await.unwrap().is_done());
        assert_eq!(paper.positions(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn request_log_is_bounded_while_call_numbers_keep_counting() {
        let paper = PaperGateway::new(OrderStamp::default());
        paper.add_symbol(gold());
        let last = SENT_LOG_SIZE + 40;
        paper.reject_send_calls([last]);

        let open = OrderRequest::market_open("XAUUSD", OrderType::Buy, 0.01, 2000.5, 1, "t");
        for _ in 0..last {
            assert!(paper.send_order(&open).await.unwrap().is_done());
        }
        assert_eq!(paper.send_order(&open).await.unwrap().retcode, RETCODE_REJECT);
        assert_eq!(paper.sent_orders().len(), SENT_LOG_SIZE);
    }

    #[tokio::test]
    async fn unknown_symbol_is_an_invalid_request() {
        let paper = PaperGateway::new(OrderStamp::default());
        let open = OrderRequest::market_open("NOPE", OrderType::Buy, 0.02, 1.0, 1, "t");
        assert_eq!(paper.send_order(&open).await.unwrap().retcode, RETCODE_INVALID);
    }

    #[tokio::test]
    async fn uninitialized_paper_refuses_everything() {
        let paper = PaperGateway::uninitialized(OrderStamp::default());
        assert!(matches!(paper.positions(None).await, Err(GatewayError::NotInitialized)));
        assert!(paper.sent_orders().is_empty());
    }
}
