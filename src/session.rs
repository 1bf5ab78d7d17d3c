// =============================================================================
// Exchange Session — wiring and lifetime of one exchange's pipeline
// =============================================================================
//
// Building a session validates the config, creates every channel in a fresh
// registry, the symbol data store, the simulated trading stack and one
// evaluation task per (symbol, time frame). `start` spawns the updaters;
// `stop` stops every channel (which cancels consumers and updaters) and
// waits for the updater tasks.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channels::registry::ChannelRegistry;
use crate::channels::topics::{
    BalanceTopic, EvaluationTopic, OhlcvTopic, OrderBookTopic, OrdersTopic, RecentTradeTopic,
    StrategyTopic, TickerTopic, TradingModeTopic,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::evaluation::{
    shared, EvaluatorTaskManager, MatrixExporter, Notifier, RsiEvaluator, SharedEvaluator,
    StrategyEvaluator, SymbolEvaluator, WeightedAverageStrategy,
};
use crate::exchange::ExchangeAdapter;
use crate::symbol_data::SymbolDataStore;
use crate::trading::{
    FeeSchedule, Order, OrderKind, OrdersManager, OrdersMatcher, Portfolio, SharedOrder,
    SimulatedTrader,
};
use crate::types::TimeFrame;
use crate::updaters::{
    BalanceSource, OhlcvUpdater, OpenOrdersSource, OrderBookSource, PollingUpdater,
    RecentTradeSource, RefreshTracker, TickerSource,
};

type TaEvaluatorFactory = Box<dyn Fn(&str, TimeFrame) -> Vec<SharedEvaluator> + Send + Sync>;
type SymbolEvaluatorFactory = Box<dyn Fn(&str, Notifier) -> Vec<SharedEvaluator> + Send + Sync>;
type StrategyFactory = Box<dyn Fn(&str) -> Vec<Box<dyn StrategyEvaluator>> + Send + Sync>;

/// Trader name owning the session's simulated orders.
pub const SIMULATOR_TRADER: &str = "simulator";

// -----------------------------------------------------------------------------
// Builder
// -----------------------------------------------------------------------------

pub struct SessionBuilder {
    config: EngineConfig,
    adapter: Arc<dyn ExchangeAdapter>,
    ta_evaluators: TaEvaluatorFactory,
    symbol_evaluators: SymbolEvaluatorFactory,
    strategies: StrategyFactory,
}

impl SessionBuilder {
    /// TA evaluators instantiated per (symbol, time frame).
    pub fn ta_evaluators<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str, TimeFrame) -> Vec<SharedEvaluator> + Send + Sync + 'static,
    {
        self.ta_evaluators = Box::new(factory);
        self
    }

    /// Social and real-time evaluators, shared by every time frame of a
    /// symbol. The factory receives the notifier that wakes the tasks of
    /// every time frame of that symbol.
    pub fn symbol_evaluators<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str, Notifier) -> Vec<SharedEvaluator> + Send + Sync + 'static,
    {
        self.symbol_evaluators = Box::new(factory);
        self
    }

    pub fn strategies<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Vec<Box<dyn StrategyEvaluator>> + Send + Sync + 'static,
    {
        self.strategies = Box::new(factory);
        self
    }

    pub fn build(self) -> Result<ExchangeSession> {
        ExchangeSession::build(self)
    }
}

// -----------------------------------------------------------------------------
// Pollers waiting for `start`
// -----------------------------------------------------------------------------

struct Pollers {
    ticker: Arc<PollingUpdater<TickerSource>>,
    order_book: Arc<PollingUpdater<OrderBookSource>>,
    recent_trades: Arc<PollingUpdater<RecentTradeSource>>,
    balance: Arc<PollingUpdater<BalanceSource>>,
    open_orders: Arc<PollingUpdater<OpenOrdersSource>>,
}

impl Pollers {
    fn spawn(self) -> Vec<JoinHandle<()>> {
        vec![
            self.ticker.spawn(),
            self.order_book.spawn(),
            self.recent_trades.spawn(),
            self.balance.spawn(),
            self.open_orders.spawn(),
        ]
    }
}

// -----------------------------------------------------------------------------
// ExchangeSession
// -----------------------------------------------------------------------------

pub struct ExchangeSession {
    config: EngineConfig,
    registry: Arc<ChannelRegistry>,
    store: Arc<SymbolDataStore>,
    orders: Arc<OrdersManager>,
    portfolio: Arc<Portfolio>,
    trader: Arc<SimulatedTrader>,
    matcher: Arc<OrdersMatcher>,
    ohlcv: Arc<OhlcvUpdater>,
    symbol_evaluators: HashMap<String, Arc<SymbolEvaluator>>,
    tasks: Vec<Arc<EvaluatorTaskManager>>,
    pollers: Mutex<Option<Pollers>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ExchangeSession {
    pub fn builder(config: EngineConfig, adapter: Arc<dyn ExchangeAdapter>) -> SessionBuilder {
        SessionBuilder {
            config,
            adapter,
            ta_evaluators: Box::new(|_, _| vec![shared(RsiEvaluator::default())]),
            symbol_evaluators: Box::new(|_, _| Vec::new()),
            strategies: Box::new(|_| vec![Box::new(WeightedAverageStrategy::new())]),
        }
    }

    fn build(builder: SessionBuilder) -> Result<Self> {
        let SessionBuilder {
            config,
            adapter,
            ta_evaluators,
            symbol_evaluators: shared_evaluators,
            strategies,
        } = builder;

        config.validate().context("invalid engine configuration")?;
        let exchange = config.exchange_name.clone();
        let queue = config.consumer_queue_size;

        // --- Channels --------------------------------------------------------
        let registry = Arc::new(ChannelRegistry::new());
        let ticker = registry.create::<TickerTopic>(&exchange, queue, 1)?;
        let order_book = registry.create::<OrderBookTopic>(&exchange, queue, 1)?;
        let recent_trades =
            registry.create::<RecentTradeTopic>(&exchange, queue, config.recent_trade_filter_size)?;
        let balance = registry.create::<BalanceTopic>(&exchange, queue, 1)?;
        let open_orders = registry.create::<OrdersTopic>(&exchange, queue, 1)?;
        let ohlcv_channel = registry.create::<OhlcvTopic>(&exchange, queue, 1)?;
        let evaluation = registry.create::<EvaluationTopic>(&exchange, queue, 1)?;
        let strategy = registry.create::<StrategyTopic>(&exchange, queue, 1)?;
        let trading_mode = registry.create::<TradingModeTopic>(&exchange, queue, 1)?;

        // --- Market data -------------------------------------------------------
        let store = Arc::new(SymbolDataStore::new(config.max_candles, config.max_recent_trades));
        for symbol in &config.symbols {
            store.get_or_create(symbol);
        }
        let tracker = Arc::new(RefreshTracker::new());
        let secs = Duration::from_secs;
        let pollers = Pollers {
            ticker: Arc::new(PollingUpdater::new(
                TickerSource,
                Arc::clone(&adapter),
                Arc::clone(&store),
                ticker.new_producer()?,
                config.symbols.clone(),
                secs(config.ticker_refresh_secs),
            )),
            order_book: Arc::new(PollingUpdater::new(
                OrderBookSource,
                Arc::clone(&adapter),
                Arc::clone(&store),
                order_book.new_producer()?,
                config.symbols.clone(),
                secs(config.order_book_refresh_secs),
            )),
            recent_trades: Arc::new(PollingUpdater::new(
                RecentTradeSource {
                    limit: config.max_recent_trades,
                },
                Arc::clone(&adapter),
                Arc::clone(&store),
                recent_trades.new_producer()?,
                config.symbols.clone(),
                secs(config.recent_trades_refresh_secs),
            )),
            balance: Arc::new(PollingUpdater::new(
                BalanceSource,
                Arc::clone(&adapter),
                Arc::clone(&store),
                balance.new_producer()?,
                config.symbols.clone(),
                secs(config.balance_refresh_secs),
            )),
            open_orders: Arc::new(PollingUpdater::new(
                OpenOrdersSource,
                Arc::clone(&adapter),
                Arc::clone(&store),
                open_orders.new_producer()?,
                config.symbols.clone(),
                secs(config.orders_refresh_secs),
            )),
        };

        // --- Simulated trading -------------------------------------------------
        let orders = Arc::new(OrdersManager::new(config.max_orders));
        let portfolio = Arc::new(Portfolio::new(config.starting_balances.clone()));
        let trader = Arc::new(SimulatedTrader::new(
            SIMULATOR_TRADER,
            Arc::clone(&adapter),
            Arc::clone(&portfolio),
            config.symbols.clone(),
        ));
        let matcher = Arc::new(OrdersMatcher::new(
            exchange.clone(),
            Arc::clone(&store),
            Arc::clone(&orders),
            Arc::clone(&portfolio),
            config.simulator_last_prices_to_check,
            FeeSchedule {
                maker: config.maker_fee,
                taker: config.taker_fee,
            },
        ));
        matcher.register_trader(trader.clone());
        matcher.subscribe(&recent_trades);
        trader.subscribe(&open_orders, &balance);

        let ohlcv = Arc::new(OhlcvUpdater::new(
            Arc::clone(&adapter),
            Arc::clone(&store),
            ohlcv_channel.new_producer()?,
            Arc::clone(&tracker),
            config.symbols.clone(),
            config.time_frames.clone(),
            config.candle_fetch_limit,
            config.backtesting,
            secs(config.updater_max_sleeping_secs),
        ));
        ohlcv.set_matcher(Arc::clone(&matcher));

        // --- Evaluation --------------------------------------------------------
        let evaluation_producer = evaluation.new_producer()?;
        let strategy_producer = strategy.new_producer()?;
        let trading_mode_producer = trading_mode.new_producer()?;
        let exporter = config
            .save_evaluations
            .then(|| Arc::new(MatrixExporter::new(config.evaluation_export_dir.clone())));

        let mut symbol_evaluators = HashMap::new();
        let mut tasks = Vec::new();
        for symbol in &config.symbols {
            let symbol_evaluator = strategies(symbol).into_iter().fold(
                SymbolEvaluator::new(
                    symbol.clone(),
                    exchange.clone(),
                    config.time_frames.clone(),
                    Arc::clone(&tracker),
                )
                .with_producers(strategy_producer.clone(), trading_mode_producer.clone()),
                SymbolEvaluator::with_boxed_strategy,
            );
            let symbol_evaluator = Arc::new(symbol_evaluator);
            let symbol_wide = shared_evaluators(
                symbol,
                Notifier::for_time_frames(
                    evaluation_producer.clone(),
                    symbol.clone(),
                    config.time_frames.clone(),
                ),
            );
            let data = store.get_or_create(symbol);

            for tf in &config.time_frames {
                let mut evaluators = ta_evaluators(symbol, *tf);
                evaluators.extend(symbol_wide.iter().cloned());
                let mut task = EvaluatorTaskManager::new(
                    exchange.clone(),
                    *tf,
                    Arc::clone(&data),
                    Arc::clone(&symbol_evaluator),
                    evaluators,
                    Notifier::new(evaluation_producer.clone(), symbol.clone(), *tf),
                )
                .with_ohlcv_updater(Arc::clone(&ohlcv))
                .with_candle_limit(config.candle_fetch_limit);
                if let Some(exporter) = &exporter {
                    task = task.with_exporter(Arc::clone(exporter));
                }
                let task = Arc::new(task);
                task.subscribe(&evaluation, &ohlcv_channel);
                tasks.push(task);
            }
            symbol_evaluators.insert(symbol.clone(), symbol_evaluator);
        }

        info!(
            exchange = %exchange,
            symbols = config.symbols.len(),
            time_frames = config.time_frames.len(),
            tasks = tasks.len(),
            channels = registry.len(),
            "exchange session built"
        );

        Ok(Self {
            config,
            registry,
            store,
            orders,
            portfolio,
            trader,
            matcher,
            ohlcv,
            symbol_evaluators,
            tasks,
            pollers: Mutex::new(Some(pollers)),
            handles: Mutex::new(Vec::new()),
        })
    }

    // -------------------------------------------------------------------------
    // Lifetime
    // -------------------------------------------------------------------------

    /// Spawn the OHLCV and polling updaters. A session starts once.
    pub fn start(&self) {
        let Some(pollers) = self.pollers.lock().take() else {
            warn!(exchange = %self.config.exchange_name, "session already started");
            return;
        };
        let mut handles = self.handles.lock();
        handles.push(Arc::clone(&self.ohlcv).spawn());
        handles.extend(pollers.spawn());
        info!(exchange = %self.config.exchange_name, updaters = handles.len(), "exchange session started");
    }

    /// Stop every channel and wait for the updater loops to exit.
    pub async fn stop(&self) {
        self.registry.stop_all();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "updater task ended abnormally");
            }
        }
        info!(exchange = %self.config.exchange_name, "exchange session stopped");
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Register a simulated order owned by the session's trader.
    pub fn create_order(
        &self,
        symbol: &str,
        kind: OrderKind,
        price: f64,
        quantity: f64,
    ) -> Result<SharedOrder, EngineError> {
        self.add_order(Order::new(symbol, kind, price, quantity, SIMULATOR_TRADER))
    }

    /// Register a prepared order. Only configured symbols are traded.
    pub fn add_order(&self, order: Order) -> Result<SharedOrder, EngineError> {
        if !self.config.symbols.contains(&order.symbol) {
            return Err(EngineError::UnknownSymbol(order.symbol));
        }
        info!(
            symbol = %order.symbol,
            kind = %order.kind,
            price = order.origin_price,
            quantity = order.quantity,
            "simulated order created"
        );
        self.orders.add(order)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn symbol_data(&self) -> &Arc<SymbolDataStore> {
        &self.store
    }

    pub fn orders(&self) -> &Arc<OrdersManager> {
        &self.orders
    }

    pub fn portfolio(&self) -> &Arc<Portfolio> {
        &self.portfolio
    }

    pub fn trader(&self) -> &Arc<SimulatedTrader> {
        &self.trader
    }

    pub fn matcher(&self) -> &Arc<OrdersMatcher> {
        &self.matcher
    }

    pub fn symbol_evaluator(&self, symbol: &str) -> Option<&Arc<SymbolEvaluator>> {
        self.symbol_evaluators.get(symbol)
    }

    pub fn tasks(&self) -> &[Arc<EvaluatorTaskManager>] {
        &self.tasks
    }
}
