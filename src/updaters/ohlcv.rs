// =============================================================================
// OHLCV Updater — time-frame aware candle refresh loop
// =============================================================================
//
// Each tick collects every (symbol, time frame) whose period has elapsed
// (every pair when backtesting), refreshes them together and waits for all
// of them before post-processing. A refresh stores the candles, bumps the
// pair's refresh counter and then publishes the latest candle.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::channels::producer::Producer;
use crate::channels::routing::RoutingKey;
use crate::channels::topics::{OhlcvTopic, OhlcvUpdate};
use crate::error::ExchangeError;
use crate::exchange::{ExchangeAdapter, ExchangeResult};
use crate::symbol_data::SymbolDataStore;
use crate::trading::matching::OrdersMatcher;
use crate::types::{Candle, TimeFrame};

// ---------------------------------------------------------------------------
// RefreshTracker
// ---------------------------------------------------------------------------

/// How many times each (symbol, time frame) candle series was refreshed.
#[derive(Default)]
pub struct RefreshTracker {
    counts: RwLock<HashMap<(String, TimeFrame), u64>>,
}

impl RefreshTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, symbol: &str, time_frame: TimeFrame) -> u64 {
        let mut counts = self.counts.write();
        let count = counts.entry((symbol.to_string(), time_frame)).or_insert(0);
        *count += 1;
        *count
    }

    pub fn refreshed_times(&self, symbol: &str, time_frame: TimeFrame) -> u64 {
        self.counts
            .read()
            .get(&(symbol.to_string(), time_frame))
            .copied()
            .unwrap_or(0)
    }

    pub fn all_refreshed(&self, symbol: &str, time_frames: &[TimeFrame]) -> bool {
        time_frames
            .iter()
            .all(|tf| self.refreshed_times(symbol, *tf) > 0)
    }
}

// ---------------------------------------------------------------------------
// OhlcvUpdater
// ---------------------------------------------------------------------------

pub struct OhlcvUpdater {
    adapter: Arc<dyn ExchangeAdapter>,
    store: Arc<SymbolDataStore>,
    producer: Producer<OhlcvTopic>,
    tracker: Arc<RefreshTracker>,
    symbols: Vec<String>,
    time_frames: Vec<TimeFrame>,
    candle_limit: usize,
    backtesting: bool,
    max_sleep: Duration,
    last_refresh: Mutex<HashMap<(String, TimeFrame), Instant>>,
    ended: Mutex<HashSet<String>>,
    matcher: RwLock<Option<Arc<OrdersMatcher>>>,
}

impl OhlcvUpdater {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        store: Arc<SymbolDataStore>,
        producer: Producer<OhlcvTopic>,
        tracker: Arc<RefreshTracker>,
        symbols: Vec<String>,
        time_frames: Vec<TimeFrame>,
        candle_limit: usize,
        backtesting: bool,
        max_sleep: Duration,
    ) -> Self {
        Self {
            adapter,
            store,
            producer,
            tracker,
            symbols,
            time_frames,
            candle_limit,
            backtesting,
            max_sleep,
            last_refresh: Mutex::new(HashMap::new()),
            ended: Mutex::new(HashSet::new()),
            matcher: RwLock::new(None),
        }
    }

    /// Matcher force-updated after every backtesting tick.
    pub fn set_matcher(&self, matcher: Arc<OrdersMatcher>) {
        *self.matcher.write() = Some(matcher);
    }

    pub fn tracker(&self) -> &Arc<RefreshTracker> {
        &self.tracker
    }

    fn is_due(&self, symbol: &str, time_frame: TimeFrame) -> bool {
        if self.backtesting {
            return true;
        }
        self.last_refresh
            .lock()
            .get(&(symbol.to_string(), time_frame))
            .map_or(true, |at| at.elapsed() >= time_frame.duration())
    }

    fn due_pairs(&self) -> Vec<(String, TimeFrame)> {
        let ended = self.ended.lock().clone();
        let mut due = Vec::new();
        for symbol in self.symbols.iter().filter(|s| !ended.contains(*s)) {
            for tf in &self.time_frames {
                if self.is_due(symbol, *tf) {
                    due.push((symbol.clone(), *tf));
                }
            }
        }
        due
    }

    /// Fetch, store and count one candle series without publishing it.
    /// Returns the latest candle.
    ///
    /// Evaluation tasks refreshing their own series call this: their consumer
    /// must not wait on the OHLCV channel, whose consumer waits on theirs.
    pub async fn refresh_candles(&self, time_frame: TimeFrame, symbol: &str) -> ExchangeResult<Option<Candle>> {
        let candles = self
            .adapter
            .get_symbol_prices(symbol, time_frame, self.candle_limit)
            .await?;
        self.store.get_or_create(symbol).update_candles(time_frame, &candles);
        self.last_refresh
            .lock()
            .insert((symbol.to_string(), time_frame), Instant::now());
        let refreshed = self.tracker.record(symbol, time_frame);
        debug!(symbol, time_frame = %time_frame, refreshed, count = candles.len(), "candles refreshed");
        Ok(candles.last().copied())
    }

    /// Fetch, store, count, then publish one candle series.
    pub async fn force_refresh_data(&self, time_frame: TimeFrame, symbol: &str) -> ExchangeResult<()> {
        if let Some(candle) = self.refresh_candles(time_frame, symbol).await? {
            self.producer
                .send(
                    OhlcvUpdate { time_frame, candle },
                    RoutingKey::with_time_frame(symbol, time_frame),
                )
                .await;
        }
        Ok(())
    }

    /// One update cycle. Returns the number of refreshed series.
    pub async fn tick(&self) -> usize {
        let due = self.due_pairs();
        let results = join_all(
            due.iter()
                .map(|(symbol, tf)| self.force_refresh_data(*tf, symbol)),
        )
        .await;

        let mut refreshed = 0;
        for ((symbol, tf), result) in due.iter().zip(results) {
            match result {
                Ok(()) => refreshed += 1,
                Err(ExchangeError::FeedEnded { .. }) => {
                    if self.ended.lock().insert(symbol.clone()) {
                        info!(symbol = %symbol, "candle feed ended");
                    }
                }
                Err(e) => error!(symbol = %symbol, time_frame = %tf, error = %e, "candle refresh failed"),
            }
        }

        if self.backtesting {
            let matcher = self.matcher.read().clone();
            if let Some(matcher) = matcher {
                matcher.force_update_order_status(true).await;
            }
        }
        refreshed
    }

    pub fn finished(&self) -> bool {
        let ended = self.ended.lock();
        self.symbols.iter().all(|s| ended.contains(s))
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let cancel = self.producer.cancellation_token();
            info!(
                symbols = self.symbols.len(),
                time_frames = self.time_frames.len(),
                backtesting = self.backtesting,
                "OHLCV updater started"
            );
            loop {
                let started = Instant::now();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("OHLCV updater cancelled");
                        break;
                    }
                    _ = self.tick() => {}
                }
                if self.finished() {
                    info!("all candle feeds ended, OHLCV updater exiting");
                    break;
                }
                let pause = if self.backtesting {
                    Duration::ZERO
                } else {
                    self.max_sleep.saturating_sub(started.elapsed())
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("OHLCV updater cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        })
    }
}
