// =============================================================================
// Symbol Evaluator — matrix owner for one (symbol, exchange)
// =============================================================================
//
// Holds the symbol's evaluation matrix and strategies. After every accepted
// evaluation cycle it recomputes the strategies, pushes the matrix to the
// strategy layer and, when asked to finalize, hands the strategy verdicts to
// the trading-mode layer once every time frame has been initialised.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::channels::producer::Producer;
use crate::channels::routing::RoutingKey;
use crate::channels::topics::{FinalizeRequest, MatrixUpdate, StrategyTopic, TradingModeTopic};
use crate::evaluation::matrix::{EvalNote, EvaluationMatrix, EvaluatorKind};
use crate::evaluation::strategy::StrategyEvaluator;
use crate::types::TimeFrame;
use crate::updaters::RefreshTracker;

pub struct SymbolEvaluator {
    symbol: String,
    exchange: String,
    time_frames: Vec<TimeFrame>,
    matrix: Arc<EvaluationMatrix>,
    strategies: Mutex<Vec<Box<dyn StrategyEvaluator>>>,
    tracker: Arc<RefreshTracker>,
    initialized: AtomicBool,
    strategy_producer: Option<Producer<StrategyTopic>>,
    trading_mode_producer: Option<Producer<TradingModeTopic>>,
}

impl SymbolEvaluator {
    pub fn new(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        time_frames: Vec<TimeFrame>,
        tracker: Arc<RefreshTracker>,
    ) -> Self {
        let symbol = symbol.into();
        let exchange = exchange.into();
        Self {
            matrix: Arc::new(EvaluationMatrix::new(symbol.clone(), exchange.clone())),
            symbol,
            exchange,
            time_frames,
            strategies: Mutex::new(Vec::new()),
            tracker,
            initialized: AtomicBool::new(false),
            strategy_producer: None,
            trading_mode_producer: None,
        }
    }

    pub fn with_strategy(self, strategy: impl StrategyEvaluator + 'static) -> Self {
        self.with_boxed_strategy(Box::new(strategy))
    }

    pub fn with_boxed_strategy(self, strategy: Box<dyn StrategyEvaluator>) -> Self {
        self.strategies.lock().push(strategy);
        self
    }

    pub fn with_producers(
        mut self,
        strategy: Producer<StrategyTopic>,
        trading_mode: Producer<TradingModeTopic>,
    ) -> Self {
        self.strategy_producer = Some(strategy);
        self.trading_mode_producer = Some(trading_mode);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn matrix(&self) -> &Arc<EvaluationMatrix> {
        &self.matrix
    }

    pub fn time_frames(&self) -> &[TimeFrame] {
        &self.time_frames
    }

    /// Whether every evaluated time frame of the symbol has been refreshed at
    /// least once. Latches once true.
    pub fn are_all_timeframes_initialized(&self) -> bool {
        if self.initialized.load(Ordering::SeqCst) {
            return true;
        }
        let ready = self.tracker.all_refreshed(&self.symbol, &self.time_frames);
        if ready {
            self.initialized.store(true, Ordering::SeqCst);
            debug!(symbol = %self.symbol, exchange = %self.exchange, "all time frames initialised");
        }
        ready
    }

    /// Recompute every strategy from the current matrix, store their notes
    /// and push the result to the strategy layer.
    pub async fn update_strategies(&self) {
        let snapshot = self.matrix.snapshot();
        let notes: Vec<(String, EvalNote, &'static str)> = {
            let mut strategies = self.strategies.lock();
            strategies
                .iter_mut()
                .map(|s| {
                    let note = s.evaluate(&snapshot).unwrap_or_else(|e| {
                        error!(symbol = %self.symbol, strategy = s.name(), error = %e, "strategy failed");
                        EvalNote::Pending
                    });
                    (s.name().to_string(), note, s.eval_type())
                })
                .collect()
        };
        for (name, note, eval_type) in &notes {
            self.matrix.set_eval(EvaluatorKind::Strategies, name, *note, None);
            self.matrix.set_evaluator_eval_type(name, eval_type);
        }

        if let Some(producer) = &self.strategy_producer {
            let update = MatrixUpdate {
                exchange: self.exchange.clone(),
                symbol: self.symbol.clone(),
                matrix: self.matrix.snapshot(),
            };
            producer.send(update, RoutingKey::symbol(self.symbol.clone())).await;
        }
    }

    /// Hand the strategy verdicts to the trading-mode layer. Returns `false`
    /// (and does nothing) until every time frame is initialised.
    pub async fn finalize(&self) -> bool {
        if !self.are_all_timeframes_initialized() {
            debug!(symbol = %self.symbol, "finalize skipped, time frames not initialised");
            return false;
        }
        let strategy_notes: Vec<(String, f64)> = self
            .matrix
            .valid_notes(EvaluatorKind::Strategies)
            .into_iter()
            .map(|(name, _, value)| (name, value))
            .collect();
        if let Some(producer) = &self.trading_mode_producer {
            let request = FinalizeRequest {
                exchange: self.exchange.clone(),
                symbol: self.symbol.clone(),
                strategy_notes,
            };
            producer.send(request, RoutingKey::symbol(self.symbol.clone())).await;
        }
        true
    }
}
