// =============================================================================
// Orders Matcher — simulated fills driven by recent trades
// =============================================================================
//
// Per delivery for a symbol:
//   1. freeze the last N trades of that symbol
//   2. copy the list of its open orders
//   3. for each order, under its lock: recheck it is still open, check its
//      exchange counterpart, evaluate the fill predicate on the frozen
//      window, charge the portfolio and transition to Filled
//   4. after the lock is released, notify the owning trader and cancel
//      the filled order's linked siblings
// Orders whose exchange counterpart vanished trigger one forced refresh of
// their trader once the symbol is done.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::channels::channel::Channel;
use crate::channels::consumer::{callback, Consumer};
use crate::channels::routing::Subscription;
use crate::channels::topics::{Message, RecentTradeTopic};
use crate::error::EngineError;
use crate::symbol_data::SymbolDataStore;
use crate::trading::order::{Fee, Order};
use crate::trading::orders_manager::OrdersManager;
use crate::trading::portfolio::Portfolio;
use crate::trading::trader::Trader;
use crate::types::{split_symbol, RecentTrade, WILDCARD};

#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    pub maker: f64,
    pub taker: f64,
}

impl FeeSchedule {
    pub fn rate(&self, taker: bool) -> f64 {
        if taker {
            self.taker
        } else {
            self.maker
        }
    }
}

/// Outcome of one matching pass over a symbol.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MatchReport {
    pub filled: Vec<String>,
    pub canceled: Vec<String>,
    pub missing: Vec<String>,
}

pub struct OrdersMatcher {
    exchange: String,
    store: Arc<SymbolDataStore>,
    orders: Arc<OrdersManager>,
    portfolio: Arc<Portfolio>,
    traders: RwLock<HashMap<String, Arc<dyn Trader>>>,
    last_prices_to_check: usize,
    fees: FeeSchedule,
}

impl OrdersMatcher {
    pub fn new(
        exchange: impl Into<String>,
        store: Arc<SymbolDataStore>,
        orders: Arc<OrdersManager>,
        portfolio: Arc<Portfolio>,
        last_prices_to_check: usize,
        fees: FeeSchedule,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            store,
            orders,
            portfolio,
            traders: RwLock::new(HashMap::new()),
            last_prices_to_check,
            fees,
        }
    }

    pub fn register_trader(&self, trader: Arc<dyn Trader>) {
        self.traders.write().insert(trader.name().to_string(), trader);
    }

    fn trader(&self, name: &str) -> Option<Arc<dyn Trader>> {
        self.traders.read().get(name).cloned()
    }

    /// Subscribe to every symbol's recent trades as a rate-limited consumer.
    pub fn subscribe(
        self: &Arc<Self>,
        channel: &Channel<RecentTradeTopic>,
    ) -> Arc<Consumer<Vec<RecentTrade>>> {
        let matcher = Arc::clone(self);
        channel.new_consumer(
            callback(move |message: Message<Vec<RecentTrade>>| {
                let matcher = Arc::clone(&matcher);
                async move {
                    matcher.handle_recent_trade(&message.key.symbol, false).await;
                    Ok(())
                }
            }),
            Subscription::all().rate_limited(),
        )
    }

    /// Match every open order of `symbol` against its recent trades.
    ///
    /// `simulated_time` disables the creation-time filter, for replayed
    /// history whose trade timestamps predate the orders.
    pub async fn handle_recent_trade(&self, symbol: &str, simulated_time: bool) -> MatchReport {
        let mut report = MatchReport::default();
        if symbol == WILDCARD {
            return report;
        }
        let window = self
            .store
            .get(symbol)
            .map(|data| data.recent_trades(self.last_prices_to_check))
            .unwrap_or_default();
        if window.is_empty() {
            return report;
        }

        let mut to_refresh: Vec<String> = Vec::new();
        for handle in self.orders.open_orders(symbol).await {
            let filled = {
                let mut order = handle.lock().await;
                if !order.is_open() {
                    continue;
                }
                if let Err(e) = self.check_exchange_counterpart(&order) {
                    warn!(exchange = %self.exchange, symbol, error = %e, "order lost on exchange");
                    report.missing.push(order.id.clone());
                    if !to_refresh.contains(&order.trader) {
                        to_refresh.push(order.trader.clone());
                    }
                    continue;
                }
                match self.try_fill(&mut order, &window, simulated_time) {
                    Ok(true) => order.clone(),
                    Ok(false) => continue,
                    Err(e) => {
                        error!(
                            exchange = %self.exchange,
                            order_id = %order.id,
                            error = %e,
                            "fill rejected, order stays open"
                        );
                        continue;
                    }
                }
            };

            report.filled.push(filled.id.clone());
            match self.trader(&filled.trader) {
                Some(trader) => trader.on_order_filled(&filled).await,
                None => warn!(order_id = %filled.id, trader = %filled.trader, "no trader for filled order"),
            }
            self.cancel_linked_orders(&filled, &mut report).await;
        }

        for name in to_refresh {
            let Some(trader) = self.trader(&name) else {
                continue;
            };
            if let Err(e) = trader.force_refresh_orders_and_portfolio().await {
                error!(trader = %name, error = %e, "forced refresh failed");
            }
        }

        if !report.filled.is_empty() {
            info!(exchange = %self.exchange, symbol, filled = report.filled.len(), "orders filled");
        }
        report
    }

    /// Re-run matching on every symbol with stored orders. Used after each
    /// backtesting tick.
    pub async fn force_update_order_status(&self, simulated_time: bool) -> Vec<MatchReport> {
        let mut reports = Vec::new();
        for symbol in self.orders.symbols() {
            reports.push(self.handle_recent_trade(&symbol, simulated_time).await);
        }
        reports
    }

    /// Cancel the siblings of a filled order, each under its own lock.
    async fn cancel_linked_orders(&self, filled: &Order, report: &mut MatchReport) {
        for linked_id in &filled.linked_order_ids {
            let Some(handle) = self.orders.get(linked_id) else {
                warn!(order_id = %filled.id, linked_id = %linked_id, "linked order not stored");
                continue;
            };
            let canceled = {
                let mut order = handle.lock().await;
                if order.cancel() {
                    Some(order.clone())
                } else {
                    None
                }
            };
            let Some(canceled) = canceled else {
                continue;
            };
            info!(
                exchange = %self.exchange,
                order_id = %canceled.id,
                filled_by = %filled.id,
                "linked order canceled"
            );
            report.canceled.push(canceled.id.clone());
            if let Some(trader) = self.trader(&canceled.trader) {
                trader.on_order_canceled(&canceled).await;
            }
        }
    }

    fn check_exchange_counterpart(&self, order: &Order) -> Result<(), EngineError> {
        let Some(exchange_id) = &order.linked_exchange_order_id else {
            return Ok(());
        };
        let known = self
            .trader(&order.trader)
            .is_some_and(|t| t.knows_exchange_order(exchange_id));
        if known {
            Ok(())
        } else {
            Err(EngineError::MissingOrder {
                order_id: exchange_id.clone(),
            })
        }
    }

    /// Evaluate the predicate and, when triggered, charge the portfolio and
    /// mark the order filled. Called with the order lock held.
    fn try_fill(
        &self,
        order: &mut Order,
        window: &[RecentTrade],
        simulated_time: bool,
    ) -> Result<bool, EngineError> {
        let prices: Vec<f64> = window
            .iter()
            .filter(|t| !t.price.is_nan())
            .filter(|t| simulated_time || t.timestamp >= order.creation_time)
            .map(|t| t.price)
            .collect();
        let Some(price) = order.fill_trigger(&prices) else {
            return Ok(false);
        };

        let (_, quote) = split_symbol(&order.symbol);
        let fee = Fee {
            cost: order.quantity * price * self.fees.rate(order.kind.is_taker()),
            currency: quote.to_string(),
        };
        self.portfolio
            .apply_fill(&order.symbol, order.side(), price, order.quantity, fee.cost)?;
        order.mark_filled(price, fee);
        debug!(order_id = %order.id, kind = %order.kind, price, "order filled in simulation");
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{trade, RecordingTrader};
    use crate::trading::order::{OrderKind, OrderStatus};
    use std::time::Duration;

    struct Fixture {
        store: Arc<SymbolDataStore>,
        orders: Arc<OrdersManager>,
        portfolio: Arc<Portfolio>,
        trader: Arc<RecordingTrader>,
        matcher: Arc<OrdersMatcher>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SymbolDataStore::new(100, 100));
        let orders = Arc::new(OrdersManager::new(100));
        let portfolio = Arc::new(Portfolio::new(HashMap::from([
            ("USDT".to_string(), 1_000.0),
            ("BTC".to_string(), 5.0),
        ])));
        let trader = Arc::new(RecordingTrader::new("sim"));
        let matcher = Arc::new(OrdersMatcher::new(
            "sim",
            Arc::clone(&store),
            Arc::clone(&orders),
            Arc::clone(&portfolio),
            50,
            FeeSchedule { maker: 0.001, taker: 0.002 },
        ));
        matcher.register_trader(trader.clone());
        Fixture { store, orders, portfolio, trader, matcher }
    }

    fn prices(f: &Fixture, values: &[f64]) {
        let trades: Vec<_> = values.iter().map(|p| trade(*p, 1_000)).collect();
        f.store.get_or_create("BTC/USDT").update_recent_trades(&trades);
    }

    fn limit_buy(price: f64) -> Order {
        Order::new("BTC/USDT", OrderKind::BuyLimit, price, 1.0, "sim").with_creation_time(0)
    }

    #[tokio::test]
    async fn buy_limit_fills_when_window_crosses() {
        let f = fixture();
        let handle = f.orders.add(limit_buy(100.0)).unwrap();
        prices(&f, &[105.0, 102.0, 99.0, 103.0]);

        let report = f.matcher.handle_recent_trade("BTC/USDT", false).await;
        assert_eq!(report.filled.len(), 1);

        let order = handle.lock().await.clone();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_price, Some(100.0));
        assert_eq!(order.filled_quantity, 1.0);
        let fee = order.fee.unwrap();
        assert!(fee.cost > 0.0);
        assert_eq!(fee.currency, "USDT");
        assert!((f.portfolio.balance("USDT") - (1_000.0 - 100.0 - fee.cost)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn buy_limit_stays_open_without_cross() {
        let f = fixture();
        let handle = f.orders.add(limit_buy(100.0)).unwrap();
        prices(&f, &[105.0, 102.0, 103.0]);

        let report = f.matcher.handle_recent_trade("BTC/USDT", false).await;
        assert!(report.filled.is_empty());
        assert_eq!(handle.lock().await.status, OrderStatus::Open);
        assert_eq!(f.portfolio.balance("USDT"), 1_000.0);
    }

    #[tokio::test]
    async fn redelivery_fills_each_order_once() {
        let f = fixture();
        f.orders.add(limit_buy(100.0)).unwrap();
        f.orders
            .add(Order::new("BTC/USDT", OrderKind::SellLimit, 104.0, 1.0, "sim").with_creation_time(0))
            .unwrap();
        prices(&f, &[105.0, 99.0]);

        let first = f.matcher.handle_recent_trade("BTC/USDT", false);
        let second = f.matcher.handle_recent_trade("BTC/USDT", false);
        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.filled.len() + b.filled.len(), 2);

        f.matcher.handle_recent_trade("BTC/USDT", false).await;
        assert_eq!(f.trader.fills().len(), 2);

        // Buy 100 + maker fee, sell 104 - maker fee: each charged once.
        let expected = 1_000.0 - 100.0 - 0.1 + 104.0 - 0.104;
        assert!((f.portfolio.balance("USDT") - expected).abs() < 1e-9);
        assert_eq!(f.portfolio.balance("BTC"), 5.0);
    }

    #[tokio::test]
    async fn trades_before_creation_are_ignored_unless_simulated() {
        let f = fixture();
        let handle = f.orders.add(limit_buy(100.0).with_creation_time(5_000)).unwrap();
        prices(&f, &[99.0]);

        assert!(f.matcher.handle_recent_trade("BTC/USDT", false).await.filled.is_empty());
        assert_eq!(handle.lock().await.status, OrderStatus::Open);

        let reports = f.matcher.force_update_order_status(true).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(handle.lock().await.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn nan_prices_never_trigger() {
        let f = fixture();
        let handle = f
            .orders
            .add(Order::new("BTC/USDT", OrderKind::BuyMarket, 0.0, 1.0, "sim").with_creation_time(0))
            .unwrap();
        prices(&f, &[f64::NAN]);
        f.matcher.handle_recent_trade("BTC/USDT", false).await;
        assert!(handle.lock().await.is_open());
    }

    #[tokio::test]
    async fn insufficient_funds_leave_order_open() {
        let f = fixture();
        let handle = f
            .orders
            .add(Order::new("BTC/USDT", OrderKind::BuyLimit, 100.0, 50.0, "sim").with_creation_time(0))
            .unwrap();
        prices(&f, &[90.0]);
        let report = f.matcher.handle_recent_trade("BTC/USDT", false).await;
        assert!(report.filled.is_empty());
        assert!(handle.lock().await.is_open());
        assert!(f.trader.fills().is_empty());
    }

    #[tokio::test]
    async fn missing_exchange_order_triggers_one_refresh() {
        let f = fixture();
        f.trader.know("known-1");
        f.orders.add(limit_buy(100.0).with_linked_exchange_order("known-1")).unwrap();
        f.orders.add(limit_buy(100.0).with_linked_exchange_order("gone-1")).unwrap();
        f.orders.add(limit_buy(100.0).with_linked_exchange_order("gone-2")).unwrap();
        prices(&f, &[99.0]);

        let report = f.matcher.handle_recent_trade("BTC/USDT", false).await;
        assert_eq!(report.filled.len(), 1);
        assert_eq!(report.missing.len(), 2);
        assert_eq!(f.trader.refreshes(), 1);
    }

    #[tokio::test]
    async fn subscribes_as_rate_limited_consumer() {
        let f = fixture();
        let channel = Channel::<RecentTradeTopic>::new("sim", 8, 1);
        let producer = channel.new_producer().unwrap();
        let consumer = f.matcher.subscribe(&channel);
        assert!(consumer.is_rate_limited());

        f.orders.add(limit_buy(100.0)).unwrap();
        prices(&f, &[99.0]);
        producer
            .send(vec![trade(99.0, 1_000)], crate::channels::RoutingKey::symbol("BTC/USDT"))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.trader.fills().len(), 1);
    }

    #[tokio::test]
    async fn filling_one_leg_cancels_its_sibling() {
        let f = fixture();
        let stop = f
            .orders
            .add(Order::new("BTC/USDT", OrderKind::StopLoss, 95.0, 1.0, "sim").with_creation_time(0))
            .unwrap();
        let take = f
            .orders
            .add(Order::new("BTC/USDT", OrderKind::TakeProfit, 110.0, 1.0, "sim").with_creation_time(0))
            .unwrap();
        let stop_id = stop.lock().await.id.clone();
        let take_id = take.lock().await.id.clone();
        f.orders.link(&stop_id, &take_id).await.unwrap();

        // Both legs would trigger on this window; the first one filled wins.
        prices(&f, &[94.0, 111.0]);
        let report = f.matcher.handle_recent_trade("BTC/USDT", false).await;

        assert_eq!(report.filled, vec![stop_id]);
        assert_eq!(report.canceled, vec![take_id.clone()]);
        assert_eq!(stop.lock().await.status, OrderStatus::Filled);
        assert_eq!(take.lock().await.status, OrderStatus::Canceled);
        assert_eq!(f.trader.fills().len(), 1);
        assert_eq!(f.trader.cancels(), vec![take_id]);
        // Only the stop-loss sold.
        assert_eq!(f.portfolio.balance("BTC"), 4.0);
    }
}
