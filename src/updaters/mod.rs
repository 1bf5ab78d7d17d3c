pub mod ohlcv;
pub mod poller;

pub use ohlcv::{OhlcvUpdater, RefreshTracker};
pub use poller::{
    BalanceSource, OpenOrdersSource, OrderBookSource, PollSource, PollingUpdater,
    RecentTradeSource, TickerSource,
};
