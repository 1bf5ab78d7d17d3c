pub mod adapter;

pub use adapter::{ExchangeAdapter, ExchangeResult};
