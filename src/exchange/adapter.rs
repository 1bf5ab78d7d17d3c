// =============================================================================
// Exchange adapter contract
// =============================================================================
//
// The query surface the updaters and the order matcher need from an
// exchange. Real REST/WebSocket connectors and backtesting feeds implement
// it outside this crate; a backtesting feed reports exhaustion with
// `ExchangeError::FeedEnded`.
// =============================================================================

use async_trait::async_trait;

use crate::error::ExchangeError;
use crate::types::{AssetBalance, Candle, ExchangeOrder, OrderBook, RecentTrade, Ticker, TimeFrame};

pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Latest `limit` candles, oldest first. The last one may still be open.
    async fn get_symbol_prices(
        &self,
        symbol: &str,
        time_frame: TimeFrame,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>>;

    async fn get_order_book(&self, symbol: &str) -> ExchangeResult<OrderBook>;

    /// Latest `limit` trades, oldest first.
    async fn get_recent_trades(&self, symbol: &str, limit: usize) -> ExchangeResult<Vec<RecentTrade>>;

    async fn get_price_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    async fn get_balance(&self) -> ExchangeResult<Vec<AssetBalance>>;

    async fn get_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<ExchangeOrder>>;
}
