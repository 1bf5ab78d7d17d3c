// =============================================================================
// Error types
// =============================================================================
//
// Two families:
//   - `ExchangeError` is what the exchange adapter may return. `FeedEnded`
//     is not a failure: it ends one symbol's update loop in backtesting.
//   - `EngineError` covers contract violations (fatal at construction) and
//     the recoverable data-integrity / financial conditions the matching
//     engine handles in place.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Backtesting data for this symbol is exhausted.
    #[error("feed ended for {symbol}")]
    FeedEnded { symbol: String },
    #[error("exchange unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("channel {name} already exists on {exchange}")]
    DuplicateChannel { exchange: String, name: String },
    #[error("channel {name} not found on {exchange}")]
    ChannelNotFound { exchange: String, name: String },
    #[error("channel {0} already has a producer")]
    ProducerAlreadyRegistered(String),
    #[error("order {0} is already stored")]
    DuplicateOrder(String),
    #[error("order store full: {max_orders} open orders")]
    OrdersFull { max_orders: usize },
    #[error("missing exchange order {order_id}")]
    MissingOrder { order_id: String },
    #[error("not enough {currency}: required {required}, available {available}")]
    InsufficientFunds {
        currency: String,
        required: f64,
        available: f64,
    },
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
    #[error("unknown time frame {0}")]
    UnknownTimeFrame(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
