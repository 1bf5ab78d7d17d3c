pub mod candle_data;
#[allow(clippy::module_inception)]
pub mod symbol_data;

pub use candle_data::{CandleData, CandleSnapshot};
pub use symbol_data::{SymbolData, SymbolDataStore};
