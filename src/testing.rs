// =============================================================================
// In-memory doubles used by the unit tests
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::ExchangeError;
use crate::exchange::{ExchangeAdapter, ExchangeResult};
use crate::trading::order::Order;
use crate::trading::trader::Trader;
use crate::types::{AssetBalance, Candle, ExchangeOrder, OrderBook, RecentTrade, Ticker, TimeFrame};

/// Queue of batches served one per request. Once drained, the last batch is
/// served again, or `FeedEnded` once the feed is closed.
struct Feed<T> {
    pending: VecDeque<T>,
    last: Option<T>,
}

impl<T: Clone> Feed<T> {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            last: None,
        }
    }

    fn next(&mut self, symbol: &str, ended: bool) -> ExchangeResult<T> {
        if let Some(batch) = self.pending.pop_front() {
            self.last = Some(batch.clone());
            return Ok(batch);
        }
        if ended {
            return Err(ExchangeError::FeedEnded {
                symbol: symbol.to_string(),
            });
        }
        self.last
            .clone()
            .ok_or_else(|| ExchangeError::Unavailable(format!("no data for {symbol}")))
    }
}

pub struct MockExchange {
    name: String,
    candles: Mutex<HashMap<(String, TimeFrame), Feed<Vec<Candle>>>>,
    trades: Mutex<HashMap<String, Feed<Vec<RecentTrade>>>>,
    tickers: RwLock<HashMap<String, Ticker>>,
    balances: RwLock<Vec<AssetBalance>>,
    open_orders: RwLock<HashMap<String, Vec<ExchangeOrder>>>,
    ended: RwLock<HashSet<String>>,
    candle_requests: AtomicUsize,
    latency: RwLock<Duration>,
}

impl MockExchange {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            candles: Mutex::new(HashMap::new()),
            trades: Mutex::new(HashMap::new()),
            tickers: RwLock::new(HashMap::new()),
            balances: RwLock::new(Vec::new()),
            open_orders: RwLock::new(HashMap::new()),
            ended: RwLock::new(HashSet::new()),
            candle_requests: AtomicUsize::new(0),
            latency: RwLock::new(Duration::ZERO),
        }
    }

    pub fn push_candles(&self, symbol: &str, time_frame: TimeFrame, candles: Vec<Candle>) {
        self.candles
            .lock()
            .entry((symbol.to_string(), time_frame))
            .or_insert_with(Feed::new)
            .pending
            .push_back(candles);
    }

    pub fn push_trades(&self, symbol: &str, trades: Vec<RecentTrade>) {
        self.trades
            .lock()
            .entry(symbol.to_string())
            .or_insert_with(Feed::new)
            .pending
            .push_back(trades);
    }

    pub fn set_ticker(&self, symbol: &str, last: f64) {
        self.tickers.write().insert(
            symbol.to_string(),
            Ticker {
                symbol: symbol.to_string(),
                bid: last,
                ask: last,
                last,
                timestamp: 0,
            },
        );
    }

    pub fn set_balances(&self, balances: Vec<AssetBalance>) {
        *self.balances.write() = balances;
    }

    pub fn set_open_orders(&self, symbol: &str, orders: Vec<ExchangeOrder>) {
        self.open_orders.write().insert(symbol.to_string(), orders);
    }

    /// Queued batches are still served; afterwards requests fail with
    /// `FeedEnded`.
    pub fn end_feed(&self, symbol: &str) {
        self.ended.write().insert(symbol.to_string());
    }

    /// Delay applied to every candle request.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    pub fn candle_requests(&self) -> usize {
        self.candle_requests.load(Ordering::SeqCst)
    }

    fn is_ended(&self, symbol: &str) -> bool {
        self.ended.read().contains(symbol)
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_symbol_prices(
        &self,
        symbol: &str,
        time_frame: TimeFrame,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>> {
        self.candle_requests.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let ended = self.is_ended(symbol);
        let mut candles = self.candles.lock();
        let feed = candles
            .entry((symbol.to_string(), time_frame))
            .or_insert_with(Feed::new);
        let batch = feed.next(symbol, ended)?;
        let start = batch.len().saturating_sub(limit);
        Ok(batch[start..].to_vec())
    }

    async fn get_order_book(&self, _symbol: &str) -> ExchangeResult<OrderBook> {
        Ok(OrderBook::default())
    }

    async fn get_recent_trades(&self, symbol: &str, limit: usize) -> ExchangeResult<Vec<RecentTrade>> {
        let ended = self.is_ended(symbol);
        let mut trades = self.trades.lock();
        let feed = trades.entry(symbol.to_string()).or_insert_with(Feed::new);
        let batch = feed.next(symbol, ended)?;
        let start = batch.len().saturating_sub(limit);
        Ok(batch[start..].to_vec())
    }

    async fn get_price_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        self.tickers
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::Unavailable(format!("no ticker for {symbol}")))
    }

    async fn get_balance(&self) -> ExchangeResult<Vec<AssetBalance>> {
        Ok(self.balances.read().clone())
    }

    async fn get_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<ExchangeOrder>> {
        Ok(self.open_orders.read().get(symbol).cloned().unwrap_or_default())
    }
}

// -----------------------------------------------------------------------------
// RecordingTrader
// -----------------------------------------------------------------------------

/// Trader that records fill and cancel callbacks and refresh requests.
pub struct RecordingTrader {
    name: String,
    fills: Mutex<Vec<Order>>,
    cancels: Mutex<Vec<String>>,
    refreshes: AtomicUsize,
    exchange_orders: RwLock<HashSet<String>>,
}

impl RecordingTrader {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fills: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            refreshes: AtomicUsize::new(0),
            exchange_orders: RwLock::new(HashSet::new()),
        }
    }

    pub fn know(&self, exchange_order_id: &str) {
        self.exchange_orders.write().insert(exchange_order_id.to_string());
    }

    pub fn fills(&self) -> Vec<Order> {
        self.fills.lock().clone()
    }

    /// Ids of the orders canceled through the trader, in call order.
    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().clone()
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Trader for RecordingTrader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_order_filled(&self, order: &Order) {
        self.fills.lock().push(order.clone());
    }

    async fn on_order_canceled(&self, order: &Order) {
        self.cancels.lock().push(order.id.clone());
    }

    async fn force_refresh_orders_and_portfolio(&self) -> anyhow::Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn knows_exchange_order(&self, exchange_order_id: &str) -> bool {
        self.exchange_orders.read().contains(exchange_order_id)
    }
}

pub fn candle(time: i64, close: f64) -> Candle {
    Candle {
        time,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1.0,
    }
}

pub fn trade(price: f64, timestamp: i64) -> RecentTrade {
    RecentTrade {
        price,
        quantity: 1.0,
        timestamp,
    }
}
