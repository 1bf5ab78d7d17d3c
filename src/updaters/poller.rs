// =============================================================================
// Polling updaters — ticker, order book, recent trades, balance, open orders
// =============================================================================
//
// One generic loop per data kind. Each tick fetches every symbol together,
// records the result in SymbolData (the updater is the only writer of that
// field group) and publishes it on the kind's channel.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::channels::producer::Producer;
use crate::channels::routing::RoutingKey;
use crate::channels::topics::{
    BalanceTopic, OrderBookTopic, OrdersTopic, RecentTradeTopic, TickerTopic, Topic,
};
use crate::error::ExchangeError;
use crate::exchange::{ExchangeAdapter, ExchangeResult};
use crate::symbol_data::SymbolDataStore;
use crate::types::WILDCARD;

type Payload<S> = <<S as PollSource>::Topic as Topic>::Payload;

/// What a polling updater fetches and where it stores it.
#[async_trait]
pub trait PollSource: Send + Sync + 'static {
    type Topic: Topic;

    /// `false` for exchange-wide data fetched once per tick.
    const PER_SYMBOL: bool = true;

    async fn fetch(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: &str,
    ) -> ExchangeResult<<Self::Topic as Topic>::Payload>;

    fn record(&self, _store: &SymbolDataStore, _symbol: &str, _payload: &<Self::Topic as Topic>::Payload) {}
}

pub struct TickerSource;

#[async_trait]
impl PollSource for TickerSource {
    type Topic = TickerTopic;

    async fn fetch(&self, adapter: &dyn ExchangeAdapter, symbol: &str) -> ExchangeResult<Payload<Self>> {
        adapter.get_price_ticker(symbol).await
    }

    fn record(&self, store: &SymbolDataStore, symbol: &str, payload: &Payload<Self>) {
        store.get_or_create(symbol).update_ticker(payload.clone());
    }
}

pub struct OrderBookSource;

#[async_trait]
impl PollSource for OrderBookSource {
    type Topic = OrderBookTopic;

    async fn fetch(&self, adapter: &dyn ExchangeAdapter, symbol: &str) -> ExchangeResult<Payload<Self>> {
        adapter.get_order_book(symbol).await
    }

    fn record(&self, store: &SymbolDataStore, symbol: &str, payload: &Payload<Self>) {
        store.get_or_create(symbol).update_order_book(payload.clone());
    }
}

pub struct RecentTradeSource {
    pub limit: usize,
}

#[async_trait]
impl PollSource for RecentTradeSource {
    type Topic = RecentTradeTopic;

    async fn fetch(&self, adapter: &dyn ExchangeAdapter, symbol: &str) -> ExchangeResult<Payload<Self>> {
        adapter.get_recent_trades(symbol, self.limit).await
    }

    fn record(&self, store: &SymbolDataStore, symbol: &str, payload: &Payload<Self>) {
        store.get_or_create(symbol).update_recent_trades(payload);
    }
}

pub struct BalanceSource;

#[async_trait]
impl PollSource for BalanceSource {
    type Topic = BalanceTopic;
    const PER_SYMBOL: bool = false;

    async fn fetch(&self, adapter: &dyn ExchangeAdapter, _symbol: &str) -> ExchangeResult<Payload<Self>> {
        adapter.get_balance().await
    }
}

pub struct OpenOrdersSource;

#[async_trait]
impl PollSource for OpenOrdersSource {
    type Topic = OrdersTopic;

    async fn fetch(&self, adapter: &dyn ExchangeAdapter, symbol: &str) -> ExchangeResult<Payload<Self>> {
        adapter.get_open_orders(symbol).await
    }
}

// -----------------------------------------------------------------------------
// PollingUpdater
// -----------------------------------------------------------------------------

pub struct PollingUpdater<S: PollSource> {
    source: S,
    adapter: Arc<dyn ExchangeAdapter>,
    store: Arc<SymbolDataStore>,
    producer: Producer<S::Topic>,
    symbols: Vec<String>,
    period: Duration,
    ended: Mutex<HashSet<String>>,
}

impl<S: PollSource> PollingUpdater<S> {
    pub fn new(
        source: S,
        adapter: Arc<dyn ExchangeAdapter>,
        store: Arc<SymbolDataStore>,
        producer: Producer<S::Topic>,
        symbols: Vec<String>,
        period: Duration,
    ) -> Self {
        Self {
            source,
            adapter,
            store,
            producer,
            symbols,
            period,
            ended: Mutex::new(HashSet::new()),
        }
    }

    fn channel_name() -> &'static str {
        <S::Topic as Topic>::NAME
    }

    fn targets(&self) -> Vec<String> {
        if !S::PER_SYMBOL {
            return vec![WILDCARD.to_string()];
        }
        let ended = self.ended.lock();
        self.symbols
            .iter()
            .filter(|s| !ended.contains(*s))
            .cloned()
            .collect()
    }

    /// Fetch every target together, then record and publish the successes.
    /// Returns the number of payloads published.
    pub async fn refresh(&self) -> usize {
        let targets = self.targets();
        let adapter = self.adapter.as_ref();
        let results = join_all(targets.iter().map(|t| self.source.fetch(adapter, t))).await;

        let mut published = 0;
        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(payload) => {
                    self.source.record(&self.store, target, &payload);
                    self.producer.send(payload, RoutingKey::symbol(target.clone())).await;
                    published += 1;
                }
                Err(ExchangeError::FeedEnded { .. }) => {
                    info!(channel = Self::channel_name(), symbol = %target, "feed ended");
                    self.ended.lock().insert(target.clone());
                }
                Err(e) => {
                    error!(channel = Self::channel_name(), symbol = %target, error = %e, "refresh failed");
                }
            }
        }
        published
    }

    fn finished(&self) -> bool {
        S::PER_SYMBOL && self.targets().is_empty()
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let cancel = self.producer.cancellation_token();
            let mut interval = tokio::time::interval(self.period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(channel = Self::channel_name(), "updater cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let published = self.refresh().await;
                        debug!(channel = Self::channel_name(), published, "poll tick");
                        if self.finished() {
                            info!(channel = Self::channel_name(), "all feeds ended, updater exiting");
                            break;
                        }
                    }
                }
            }
        })
    }
}
