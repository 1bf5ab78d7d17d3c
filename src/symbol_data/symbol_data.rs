// =============================================================================
// SymbolData — per-symbol market state written by the updaters
// =============================================================================
//
// Each field group has a single writer class (its updater); readers take
// short read locks and receive owned copies.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::symbol_data::candle_data::{CandleData, CandleSnapshot};
use crate::types::{Candle, OrderBook, RecentTrade, Ticker, TimeFrame};

/// Tolerated delay between two candle refreshes, as a multiple of the period.
const STALENESS_ALLOWANCE: f64 = 1.2;

pub struct SymbolData {
    symbol: String,
    max_candles: usize,
    max_recent_trades: usize,
    candles: RwLock<HashMap<TimeFrame, CandleData>>,
    last_candle_update: RwLock<HashMap<TimeFrame, Instant>>,
    recent_trades: RwLock<VecDeque<RecentTrade>>,
    ticker: RwLock<Option<Ticker>>,
    order_book: RwLock<Option<OrderBook>>,
}

impl SymbolData {
    pub fn new(symbol: impl Into<String>, max_candles: usize, max_recent_trades: usize) -> Self {
        Self {
            symbol: symbol.into(),
            max_candles,
            max_recent_trades: max_recent_trades.max(1),
            candles: RwLock::new(HashMap::new()),
            last_candle_update: RwLock::new(HashMap::new()),
            recent_trades: RwLock::new(VecDeque::new()),
            ticker: RwLock::new(None),
            order_book: RwLock::new(None),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    // -------------------------------------------------------------------------
    // Candles
    // -------------------------------------------------------------------------

    /// Merge freshly fetched candles (oldest first) into the time frame's
    /// history. The staleness clock restarts whenever a new candle opens or
    /// the series is created.
    pub fn update_candles(&self, time_frame: TimeFrame, candles: &[Candle]) {
        if candles.is_empty() {
            return;
        }
        let opened_new = {
            let mut map = self.candles.write();
            let data = map
                .entry(time_frame)
                .or_insert_with(|| CandleData::new(self.max_candles));
            let was_empty = data.is_empty();
            let mut opened = false;
            for candle in candles {
                opened |= data.update(candle);
            }
            was_empty || opened
        };
        if opened_new {
            self.last_candle_update.write().insert(time_frame, Instant::now());
        }
    }

    pub fn candles_initialized(&self, time_frame: TimeFrame) -> bool {
        self.candles
            .read()
            .get(&time_frame)
            .is_some_and(|d| !d.is_empty())
    }

    pub fn candle_count(&self, time_frame: TimeFrame) -> usize {
        self.candles.read().get(&time_frame).map_or(0, CandleData::len)
    }

    pub fn last_candle(&self, time_frame: TimeFrame) -> Option<Candle> {
        self.candles.read().get(&time_frame).and_then(CandleData::last)
    }

    pub fn candle_snapshot(&self, time_frame: TimeFrame, limit: Option<usize>) -> Option<CandleSnapshot> {
        self.candles
            .read()
            .get(&time_frame)
            .map(|d| d.snapshot(limit))
    }

    pub fn available_time_frames(&self) -> Vec<TimeFrame> {
        let mut tfs: Vec<_> = self.candles.read().keys().copied().collect();
        tfs.sort();
        tfs
    }

    /// `false` when the time frame's last new candle is older than 1.2 times
    /// its period. A series never refreshed is considered valid.
    pub fn ensure_data_validity(&self, time_frame: TimeFrame) -> bool {
        let Some(last) = self.last_candle_update.read().get(&time_frame).copied() else {
            return true;
        };
        let allowed = Duration::from_secs_f64(time_frame.duration().as_secs_f64() * STALENESS_ALLOWANCE);
        let valid = last.elapsed() <= allowed;
        if !valid {
            warn!(symbol = %self.symbol, time_frame = %time_frame, "candle data is stale");
        }
        valid
    }

    #[cfg(test)]
    pub(crate) fn set_last_candle_update(&self, time_frame: TimeFrame, at: Instant) {
        self.last_candle_update.write().insert(time_frame, at);
    }

    // -------------------------------------------------------------------------
    // Recent trades
    // -------------------------------------------------------------------------

    /// Replace the trade history with the latest exchange window, keeping the
    /// newest `max_recent_trades` entries.
    pub fn update_recent_trades(&self, trades: &[RecentTrade]) {
        let start = trades.len().saturating_sub(self.max_recent_trades);
        let mut history = self.recent_trades.write();
        history.clear();
        history.extend(trades[start..].iter().copied());
        debug!(symbol = %self.symbol, count = history.len(), "recent trades updated");
    }

    /// The newest `limit` trades, oldest first.
    pub fn recent_trades(&self, limit: usize) -> Vec<RecentTrade> {
        let history = self.recent_trades.read();
        let start = history.len().saturating_sub(limit);
        history.range(start..).copied().collect()
    }

    pub fn recent_trades_initialized(&self) -> bool {
        !self.recent_trades.read().is_empty()
    }

    // -------------------------------------------------------------------------
    // Ticker / order book
    // -------------------------------------------------------------------------

    pub fn update_ticker(&self, ticker: Ticker) {
        *self.ticker.write() = Some(ticker);
    }

    pub fn ticker(&self) -> Option<Ticker> {
        self.ticker.read().clone()
    }

    pub fn update_order_book(&self, book: OrderBook) {
        *self.order_book.write() = Some(book);
    }

    pub fn order_book(&self) -> Option<OrderBook> {
        self.order_book.read().clone()
    }

    pub fn order_book_initialized(&self) -> bool {
        self.order_book.read().is_some()
    }
}

// -----------------------------------------------------------------------------
// SymbolDataStore
// -----------------------------------------------------------------------------

/// All `SymbolData` of one exchange, created on first access.
pub struct SymbolDataStore {
    max_candles: usize,
    max_recent_trades: usize,
    symbols: RwLock<HashMap<String, Arc<SymbolData>>>,
}

impl SymbolDataStore {
    pub fn new(max_candles: usize, max_recent_trades: usize) -> Self {
        Self {
            max_candles,
            max_recent_trades,
            symbols: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, symbol: &str) -> Arc<SymbolData> {
        if let Some(data) = self.symbols.read().get(symbol) {
            return Arc::clone(data);
        }
        let mut symbols = self.symbols.write();
        Arc::clone(symbols.entry(symbol.to_string()).or_insert_with(|| {
            Arc::new(SymbolData::new(symbol, self.max_candles, self.max_recent_trades))
        }))
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<SymbolData>> {
        self.symbols.read().get(symbol).cloned()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut names: Vec<_> = self.symbols.read().keys().cloned().collect();
        names.sort();
        names
    }
}
