// =============================================================================
// Channel topics — one marker type per channel name, with its payload shape
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::channels::routing::RoutingKey;
use crate::evaluation::matrix::MatrixSnapshot;
use crate::types::{AssetBalance, Candle, ExchangeOrder, OrderBook, RecentTrade, Ticker, TimeFrame};

/// Binds a channel name to the payload its consumers receive.
pub trait Topic: Send + Sync + 'static {
    type Payload: Clone + Send + Sync + 'static;

    /// Channel name, unique per exchange.
    const NAME: &'static str;
}

/// A payload as it sits in a consumer queue.
#[derive(Debug, Clone)]
pub struct Message<P> {
    pub key: RoutingKey,
    pub payload: P,
}

// -----------------------------------------------------------------------------
// Exchange data topics
// -----------------------------------------------------------------------------

pub struct TickerTopic;
impl Topic for TickerTopic {
    type Payload = Ticker;
    const NAME: &'static str = "Ticker";
}

pub struct OrderBookTopic;
impl Topic for OrderBookTopic {
    type Payload = OrderBook;
    const NAME: &'static str = "OrderBook";
}

pub struct RecentTradeTopic;
impl Topic for RecentTradeTopic {
    type Payload = Vec<RecentTrade>;
    const NAME: &'static str = "RecentTrade";
}

pub struct BalanceTopic;
impl Topic for BalanceTopic {
    type Payload = Vec<AssetBalance>;
    const NAME: &'static str = "Balance";
}

pub struct OrdersTopic;
impl Topic for OrdersTopic {
    type Payload = Vec<ExchangeOrder>;
    const NAME: &'static str = "Orders";
}

/// Latest candle of one (symbol, time frame) series after a refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvUpdate {
    pub time_frame: TimeFrame,
    pub candle: Candle,
}

pub struct OhlcvTopic;
impl Topic for OhlcvTopic {
    type Payload = OhlcvUpdate;
    const NAME: &'static str = "OHLCV";
}

// -----------------------------------------------------------------------------
// Evaluation topics
// -----------------------------------------------------------------------------

/// A request to re-run the evaluation cycle of one (symbol, time frame).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationTrigger {
    /// Name of the evaluator (or updater) that caused the notification; an
    /// evaluator of that name is not recomputed.
    pub source: String,
    pub force_refresh: bool,
    pub finalize: bool,
    /// Emitted by real-time evaluators; only accepted once every time frame
    /// of the symbol has been initialised.
    pub interruption: bool,
}

impl EvaluationTrigger {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            force_refresh: false,
            finalize: false,
            interruption: false,
        }
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn finalize(mut self) -> Self {
        self.finalize = true;
        self
    }

    pub fn interruption(mut self) -> Self {
        self.interruption = true;
        self
    }
}

pub struct EvaluationTopic;
impl Topic for EvaluationTopic {
    type Payload = EvaluationTrigger;
    const NAME: &'static str = "Evaluation";
}

/// Matrix state pushed to the strategy layer after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixUpdate {
    pub exchange: String,
    pub symbol: String,
    pub matrix: MatrixSnapshot,
}

pub struct StrategyTopic;
impl Topic for StrategyTopic {
    type Payload = MatrixUpdate;
    const NAME: &'static str = "Strategy";
}

/// Strategy verdicts handed to the trading-mode layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizeRequest {
    pub exchange: String,
    pub symbol: String,
    pub strategy_notes: Vec<(String, f64)>,
}

pub struct TradingModeTopic;
impl Topic for TradingModeTopic {
    type Payload = FinalizeRequest;
    const NAME: &'static str = "TradingMode";
}
