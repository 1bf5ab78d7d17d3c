// =============================================================================
// Aurora Pipeline — event distribution and decision aggregation
// =============================================================================
//
// Exchange data flows from the updaters through typed per-exchange channels
// into the symbol data store, the evaluation tasks and the simulated order
// matcher. Evaluation results accumulate in one matrix per symbol, which the
// strategies read before handing their verdicts to the trading-mode layer.
// =============================================================================

pub mod channels;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod exchange;
pub mod session;
pub mod symbol_data;
pub mod telemetry;
pub mod trading;
pub mod types;
pub mod updaters;

#[cfg(test)]
mod testing;

pub use channels::{Channel, ChannelRegistry, Producer, RoutingKey, Subscription};
pub use config::EngineConfig;
pub use error::{EngineError, ExchangeError};
pub use session::{ExchangeSession, SessionBuilder, SIMULATOR_TRADER};
