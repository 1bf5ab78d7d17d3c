// =============================================================================
// Channel — symbol-bucketed fan-out with a counting send filter
// =============================================================================
//
// One channel per (exchange, topic). Consumers are bucketed by the symbol
// they subscribed to; the `*` bucket receives every symbol. A single
// producer handle may be issued. Stopping the channel cancels every consumer
// loop and every task holding the producer's cancellation token.
// =============================================================================

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channels::consumer::{Consumer, ConsumerCallback};
use crate::channels::producer::Producer;
use crate::channels::routing::{RoutingKey, SendFilter, Subscription};
use crate::channels::topics::{Message, Topic};
use crate::error::EngineError;
use crate::types::WILDCARD;

pub struct Channel<T: Topic> {
    exchange: String,
    queue_size: usize,
    consumers: RwLock<HashMap<String, Vec<Arc<Consumer<T::Payload>>>>>,
    filter: Mutex<SendFilter>,
    producer_issued: AtomicBool,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    _topic: PhantomData<fn() -> T>,
}

impl<T: Topic> Channel<T> {
    pub fn new(exchange: impl Into<String>, queue_size: usize, filter_size: u32) -> Arc<Self> {
        Arc::new(Self {
            exchange: exchange.into(),
            queue_size,
            consumers: RwLock::new(HashMap::new()),
            filter: Mutex::new(SendFilter::new(filter_size)),
            producer_issued: AtomicBool::new(false),
            running: AtomicBool::new(true),
            cancel: Mutex::new(CancellationToken::new()),
            _topic: PhantomData,
        })
    }

    pub fn name(&self) -> &'static str {
        T::NAME
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    // -------------------------------------------------------------------------
    // Consumers
    // -------------------------------------------------------------------------

    /// Create a consumer for `subscription` and start its loop.
    pub fn new_consumer(
        &self,
        callback: ConsumerCallback<T::Payload>,
        subscription: Subscription,
    ) -> Arc<Consumer<T::Payload>> {
        let label = format!("{}:{}:{}", self.exchange, T::NAME, subscription.symbol);
        let bucket = subscription.symbol.clone();
        let consumer = Arc::new(Consumer::new(
            label,
            subscription,
            callback,
            self.queue_size,
            self.cancel.lock().child_token(),
        ));
        consumer.run();

        self.consumers
            .write()
            .entry(bucket)
            .or_default()
            .push(Arc::clone(&consumer));

        debug!(exchange = %self.exchange, channel = T::NAME, "consumer registered");
        consumer
    }

    /// Stop a consumer and drop it from its bucket.
    pub fn remove_consumer(&self, consumer: &Arc<Consumer<T::Payload>>) {
        consumer.stop();
        let bucket = consumer.subscription().symbol.clone();
        if let Some(list) = self.consumers.write().get_mut(&bucket) {
            list.retain(|c| !Arc::ptr_eq(c, consumer));
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.read().values().map(Vec::len).sum()
    }

    /// Resolve the consumers a delivery to `key` must reach.
    ///
    /// This is part of delivery, not a plain accessor: the symbol bucket is
    /// created when missing and the send filter flag is latched for the
    /// delivery in progress. Rate-limited consumers are only returned while
    /// the flag is set.
    pub fn get_consumers(&self, key: &RoutingKey) -> Vec<Arc<Consumer<T::Payload>>> {
        let flagged = self.filter.lock().evaluate();

        let mut consumers = self.consumers.write();
        consumers.entry(key.symbol.clone()).or_default();

        let mut selected = Vec::new();
        let mut buckets = vec![key.symbol.as_str()];
        if key.symbol != WILDCARD {
            buckets.push(WILDCARD);
        }
        for bucket in buckets {
            let Some(list) = consumers.get(bucket) else {
                continue;
            };
            selected.extend(
                list.iter()
                    .filter(|c| c.subscription().accepts_time_frame(key.time_frame))
                    .filter(|c| flagged || !c.is_rate_limited())
                    .cloned(),
            );
        }
        selected
    }

    // -------------------------------------------------------------------------
    // Producer side
    // -------------------------------------------------------------------------

    /// Issue the channel's producer handle. A channel has at most one.
    pub fn new_producer(self: &Arc<Self>) -> Result<Producer<T>, EngineError> {
        if self.producer_issued.swap(true, Ordering::SeqCst) {
            return Err(EngineError::ProducerAlreadyRegistered(format!(
                "{}:{}",
                self.exchange,
                T::NAME
            )));
        }
        Ok(Producer::new(Arc::clone(self)))
    }

    pub(crate) async fn deliver(&self, key: RoutingKey, payload: T::Payload) {
        if !self.is_running() {
            debug!(channel = T::NAME, key = %key, "channel stopped, dropping payload");
            return;
        }

        self.filter.lock().will_send();
        let consumers = self.get_consumers(&key);
        for consumer in &consumers {
            let message = Message {
                key: key.clone(),
                payload: payload.clone(),
            };
            if !consumer.push(message).await {
                debug!(channel = T::NAME, key = %key, "consumer gone, payload skipped");
            }
        }
        self.filter.lock().has_send();
    }

    /// Token observed by producer tasks; cancelled when the channel stops.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().child_token()
    }

    // -------------------------------------------------------------------------
    // Lifetime
    // -------------------------------------------------------------------------

    /// Restart a stopped channel. Consumers removed by `stop` are not
    /// revived; subscribers register again.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            *self.cancel.lock() = CancellationToken::new();
            info!(exchange = %self.exchange, channel = T::NAME, "channel started");
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.cancel.lock().cancel();
            self.consumers.write().clear();
            info!(exchange = %self.exchange, channel = T::NAME, "channel stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::consumer::callback;
    use crate::channels::topics::{Message, OhlcvTopic, OhlcvUpdate, TickerTopic};
    use crate::types::{Candle, Ticker, TimeFrame};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting(counter: &Arc<AtomicUsize>) -> ConsumerCallback<Ticker> {
        let counter = Arc::clone(counter);
        callback(move |_m: Message<Ticker>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn ticker(symbol: &str) -> Ticker {
        Ticker {
            symbol: symbol.into(),
            bid: 99.0,
            ask: 101.0,
            last: 100.0,
            timestamp: 0,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn filter_counter_is_shared_across_symbols() {
        let channel = Channel::<TickerTopic>::new("sim", 16, 2);
        let producer = channel.new_producer().unwrap();
        let btc = Arc::new(AtomicUsize::new(0));
        let eth = Arc::new(AtomicUsize::new(0));
        let any = Arc::new(AtomicUsize::new(0));
        channel.new_consumer(counting(&btc), Subscription::symbol("BTC/USDT").rate_limited());
        channel.new_consumer(counting(&eth), Subscription::symbol("ETH/USDT").rate_limited());
        channel.new_consumer(counting(&any), Subscription::all().rate_limited());

        for _ in 0..3 {
            producer.send(ticker("BTC/USDT"), RoutingKey::symbol("BTC/USDT")).await;
            producer.send(ticker("ETH/USDT"), RoutingKey::symbol("ETH/USDT")).await;
        }
        settle().await;

        // Every second send is flagged, and every second send is ETH.
        assert_eq!(btc.load(Ordering::SeqCst), 0);
        assert_eq!(eth.load(Ordering::SeqCst), 3);
        assert_eq!(any.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limited_consumer_sees_one_in_filter_size() {
        let channel = Channel::<TickerTopic>::new("sim", 16, 3);
        let producer = channel.new_producer().unwrap();
        let limited = Arc::new(AtomicUsize::new(0));
        let unrestricted = Arc::new(AtomicUsize::new(0));
        channel.new_consumer(counting(&limited), Subscription::symbol("BTC/USDT").rate_limited());
        channel.new_consumer(counting(&unrestricted), Subscription::symbol("BTC/USDT"));

        for _ in 0..9 {
            producer.send(ticker("BTC/USDT"), RoutingKey::symbol("BTC/USDT")).await;
        }
        settle().await;

        assert_eq!(limited.load(Ordering::SeqCst), 3);
        assert_eq!(unrestricted.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn wildcard_consumer_receives_every_symbol() {
        let channel = Channel::<TickerTopic>::new("sim", 16, 1);
        let producer = channel.new_producer().unwrap();
        let all = Arc::new(AtomicUsize::new(0));
        let btc = Arc::new(AtomicUsize::new(0));
        channel.new_consumer(counting(&all), Subscription::all());
        channel.new_consumer(counting(&btc), Subscription::symbol("BTC/USDT"));

        producer.send(ticker("BTC/USDT"), RoutingKey::symbol("BTC/USDT")).await;
        producer.send(ticker("ETH/USDT"), RoutingKey::symbol("ETH/USDT")).await;
        settle().await;

        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(btc.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn time_frame_filter_on_candle_channel() {
        let channel = Channel::<OhlcvTopic>::new("sim", 16, 1);
        let producer = channel.new_producer().unwrap();
        let hourly = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hourly);
        channel.new_consumer(
            callback(move |m: Message<OhlcvUpdate>| {
                let counter = Arc::clone(&counter);
                async move {
                    assert_eq!(m.payload.time_frame, TimeFrame::OneHour);
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            Subscription::symbol("BTC/USDT").time_frame(TimeFrame::OneHour),
        );

        let candle = Candle { time: 0, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0 };
        for tf in [TimeFrame::OneHour, TimeFrame::FourHours, TimeFrame::OneHour] {
            producer
                .send(
                    OhlcvUpdate { time_frame: tf, candle },
                    RoutingKey::with_time_frame("BTC/USDT", tf),
                )
                .await;
        }
        settle().await;
        assert_eq!(hourly.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_producer_is_rejected() {
        let channel = Channel::<TickerTopic>::new("sim", 4, 1);
        assert!(channel.new_producer().is_ok());
        assert!(matches!(
            channel.new_producer(),
            Err(EngineError::ProducerAlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn get_consumers_creates_missing_bucket() {
        let channel = Channel::<TickerTopic>::new("sim", 4, 1);
        assert!(channel.get_consumers(&RoutingKey::symbol("XRP/USDT")).is_empty());
        assert!(channel.consumers.read().contains_key("XRP/USDT"));
    }

    #[tokio::test]
    async fn stop_cancels_consumers_and_drops_payloads() {
        let channel = Channel::<TickerTopic>::new("sim", 4, 1);
        let producer = channel.new_producer().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let consumer = channel.new_consumer(counting(&seen), Subscription::all());
        let token = producer.cancellation_token();

        channel.stop();
        consumer.join().await;
        assert!(!consumer.is_running());
        assert!(token.is_cancelled());
        assert_eq!(channel.consumer_count(), 0);

        producer.send(ticker("BTC/USDT"), RoutingKey::symbol("BTC/USDT")).await;
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remove_consumer_detaches_it() {
        let channel = Channel::<TickerTopic>::new("sim", 4, 1);
        let seen = Arc::new(AtomicUsize::new(0));
        let consumer = channel.new_consumer(counting(&seen), Subscription::all());
        assert_eq!(channel.consumer_count(), 1);
        channel.remove_consumer(&consumer);
        assert_eq!(channel.consumer_count(), 0);
    }
}
