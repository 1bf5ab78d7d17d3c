// =============================================================================
// Trader — owner of simulated orders, notified on fills
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::channels::{callback, BalanceTopic, Channel, Consumer, Message, OrdersTopic, Subscription};
use crate::exchange::ExchangeAdapter;
use crate::trading::order::Order;
use crate::trading::portfolio::Portfolio;
use crate::types::{AssetBalance, ExchangeOrder, WILDCARD};

#[async_trait]
pub trait Trader: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per filled order, after the order lock is released.
    async fn on_order_filled(&self, order: &Order);

    /// Called when an order is canceled because a linked order filled.
    async fn on_order_canceled(&self, _order: &Order) {}

    /// Re-read open orders and balances from the exchange after a
    /// data-integrity problem.
    async fn force_refresh_orders_and_portfolio(&self) -> anyhow::Result<()>;

    /// Whether the exchange still reports this order as open.
    fn knows_exchange_order(&self, exchange_order_id: &str) -> bool;
}

/// Trader of the simulated exchange: records fills and mirrors the
/// exchange's open orders and balances, from the pollers' channels or on
/// demand.
pub struct SimulatedTrader {
    name: String,
    adapter: Arc<dyn ExchangeAdapter>,
    portfolio: Arc<Portfolio>,
    symbols: Vec<String>,
    /// Open exchange order ids, per symbol.
    exchange_orders: RwLock<HashMap<String, HashSet<String>>>,
    fills: RwLock<Vec<Order>>,
    cancels: RwLock<Vec<Order>>,
}

impl SimulatedTrader {
    pub fn new(
        name: impl Into<String>,
        adapter: Arc<dyn ExchangeAdapter>,
        portfolio: Arc<Portfolio>,
        symbols: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            adapter,
            portfolio,
            symbols,
            exchange_orders: RwLock::new(HashMap::new()),
            fills: RwLock::new(Vec::new()),
            cancels: RwLock::new(Vec::new()),
        }
    }

    /// Follow the Orders and Balance channels: every polled open-orders
    /// snapshot replaces the known ids of its symbol, every balance snapshot
    /// is synced into the portfolio.
    pub fn subscribe(
        self: &Arc<Self>,
        orders: &Channel<OrdersTopic>,
        balance: &Channel<BalanceTopic>,
    ) -> (Arc<Consumer<Vec<ExchangeOrder>>>, Arc<Consumer<Vec<AssetBalance>>>) {
        let trader = Arc::clone(self);
        let orders_consumer = orders.new_consumer(
            callback(move |message: Message<Vec<ExchangeOrder>>| {
                let trader = Arc::clone(&trader);
                async move {
                    trader.replace_exchange_orders(&message.key.symbol, &message.payload);
                    Ok(())
                }
            }),
            Subscription::all(),
        );

        let trader = Arc::clone(self);
        let balance_consumer = balance.new_consumer(
            callback(move |message: Message<Vec<AssetBalance>>| {
                let trader = Arc::clone(&trader);
                async move {
                    trader.portfolio.sync_from_exchange(&message.payload);
                    Ok(())
                }
            }),
            Subscription::all(),
        );
        (orders_consumer, balance_consumer)
    }

    fn replace_exchange_orders(&self, symbol: &str, orders: &[ExchangeOrder]) {
        if symbol == WILDCARD {
            return;
        }
        let ids: HashSet<String> = orders.iter().map(|o| o.id.clone()).collect();
        debug!(trader = %self.name, symbol, open_orders = ids.len(), "exchange orders updated");
        self.exchange_orders.write().insert(symbol.to_string(), ids);
    }

    pub fn track_exchange_order(&self, symbol: &str, exchange_order_id: impl Into<String>) {
        self.exchange_orders
            .write()
            .entry(symbol.to_string())
            .or_default()
            .insert(exchange_order_id.into());
    }

    pub fn fills(&self) -> Vec<Order> {
        self.fills.read().clone()
    }

    pub fn cancels(&self) -> Vec<Order> {
        self.cancels.read().clone()
    }
}

#[async_trait]
impl Trader for SimulatedTrader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_order_filled(&self, order: &Order) {
        info!(
            trader = %self.name,
            order_id = %order.id,
            symbol = %order.symbol,
            kind = %order.kind,
            price = ?order.filled_price,
            quantity = order.filled_quantity,
            "order filled"
        );
        self.fills.write().push(order.clone());
    }

    async fn on_order_canceled(&self, order: &Order) {
        info!(trader = %self.name, order_id = %order.id, symbol = %order.symbol, "order canceled");
        self.cancels.write().push(order.clone());
    }

    async fn force_refresh_orders_and_portfolio(&self) -> anyhow::Result<()> {
        let balances = self
            .adapter
            .get_balance()
            .await
            .context("failed to refresh balances")?;
        self.portfolio.sync_from_exchange(&balances);

        let mut count = 0;
        for symbol in &self.symbols {
            let orders = self
                .adapter
                .get_open_orders(symbol)
                .await
                .with_context(|| format!("failed to refresh open orders of {symbol}"))?;
            count += orders.len();
            self.replace_exchange_orders(symbol, &orders);
        }
        info!(trader = %self.name, open_orders = count, "orders and portfolio refreshed");
        Ok(())
    }

    fn knows_exchange_order(&self, exchange_order_id: &str) -> bool {
        self.exchange_orders
            .read()
            .values()
            .any(|ids| ids.contains(exchange_order_id))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::channels::RoutingKey;
    use crate::testing::MockExchange;
    use crate::types::OrderSide;

    fn exchange_order(id: &str, symbol: &str) -> ExchangeOrder {
        ExchangeOrder {
            id: id.to_string(),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            price: 100.0,
            quantity: 1.0,
            filled: 0.0,
            timestamp: 0,
        }
    }

    fn trader(exchange: Arc<MockExchange>) -> Arc<SimulatedTrader> {
        Arc::new(SimulatedTrader::new(
            "simulator",
            exchange,
            Arc::new(Portfolio::new(HashMap::new())),
            vec!["BTC/USDT".into(), "ETH/USDT".into()],
        ))
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn polled_orders_and_balances_reach_the_trader() {
        let trader = trader(Arc::new(MockExchange::new("sim")));
        let orders = Channel::<OrdersTopic>::new("sim", 8, 1);
        let balance = Channel::<BalanceTopic>::new("sim", 8, 1);
        trader.subscribe(&orders, &balance);

        let orders_producer = orders.new_producer().unwrap();
        let balance_producer = balance.new_producer().unwrap();
        orders_producer
            .send(vec![exchange_order("ex-1", "BTC/USDT")], RoutingKey::symbol("BTC/USDT"))
            .await;
        orders_producer
            .send(vec![exchange_order("ex-2", "ETH/USDT")], RoutingKey::symbol("ETH/USDT"))
            .await;
        balance_producer
            .send(
                vec![AssetBalance {
                    asset: "USDT".into(),
                    free: 250.0,
                    locked: 0.0,
                }],
                RoutingKey::exchange_wide(),
            )
            .await;

        wait_until(|| trader.knows_exchange_order("ex-2") && trader.portfolio.balance("USDT") > 0.0).await;
        assert!(trader.knows_exchange_order("ex-1"));
        assert!(trader.knows_exchange_order("ex-2"));
        assert_eq!(trader.portfolio.balance("USDT"), 250.0);

        // A later snapshot of one symbol drops its closed orders only.
        orders_producer.send(Vec::new(), RoutingKey::symbol("BTC/USDT")).await;
        wait_until(|| !trader.knows_exchange_order("ex-1")).await;
        assert!(!trader.knows_exchange_order("ex-1"));
        assert!(trader.knows_exchange_order("ex-2"));
    }

    #[tokio::test]
    async fn forced_refresh_replaces_known_orders() {
        let exchange = Arc::new(MockExchange::new("sim"));
        exchange.set_open_orders("ETH/USDT", vec![exchange_order("ex-9", "ETH/USDT")]);
        let trader = trader(Arc::clone(&exchange));
        trader.track_exchange_order("BTC/USDT", "stale");

        trader.force_refresh_orders_and_portfolio().await.unwrap();
        assert!(!trader.knows_exchange_order("stale"));
        assert!(trader.knows_exchange_order("ex-9"));
    }
}
