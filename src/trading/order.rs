// =============================================================================
// Simulated orders
// =============================================================================

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{now_ms, OrderSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    BuyMarket,
    BuyLimit,
    SellMarket,
    SellLimit,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
}

impl OrderKind {
    pub fn side(self) -> OrderSide {
        match self {
            Self::BuyMarket | Self::BuyLimit => OrderSide::Buy,
            Self::SellMarket
            | Self::SellLimit
            | Self::StopLoss
            | Self::StopLossLimit
            | Self::TakeProfit
            | Self::TakeProfitLimit => OrderSide::Sell,
        }
    }

    /// Market and stop-loss orders take liquidity and pay the taker rate.
    pub fn is_taker(self) -> bool {
        matches!(
            self,
            Self::BuyMarket | Self::SellMarket | Self::StopLoss | Self::StopLossLimit
        )
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BuyMarket => "BUY_MARKET",
            Self::BuyLimit => "BUY_LIMIT",
            Self::SellMarket => "SELL_MARKET",
            Self::SellLimit => "SELL_LIMIT",
            Self::StopLoss => "STOP_LOSS",
            Self::StopLossLimit => "STOP_LOSS_LIMIT",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
        };
        f.write_str(s)
    }
}

/// `Filled` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub cost: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Id of the matching order on the exchange, for orders mirrored there.
    pub linked_exchange_order_id: Option<String>,
    /// Sibling orders canceled when this one fills.
    #[serde(default)]
    pub linked_order_ids: Vec<String>,
    pub symbol: String,
    pub kind: OrderKind,
    pub origin_price: f64,
    pub stop_price: Option<f64>,
    pub quantity: f64,
    pub status: OrderStatus,
    pub filled_price: Option<f64>,
    pub filled_quantity: f64,
    pub fee: Option<Fee>,
    /// Creation time (ms since epoch). Trades older than this never fill it.
    pub creation_time: i64,
    pub trader: String,
}

impl Order {
    pub fn new(
        symbol: impl Into<String>,
        kind: OrderKind,
        price: f64,
        quantity: f64,
        trader: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            linked_exchange_order_id: None,
            linked_order_ids: Vec::new(),
            symbol: symbol.into(),
            kind,
            origin_price: price,
            stop_price: None,
            quantity,
            status: OrderStatus::Open,
            filled_price: None,
            filled_quantity: 0.0,
            fee: None,
            creation_time: now_ms(),
            trader: trader.into(),
        }
    }

    pub fn with_stop_price(mut self, stop_price: f64) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    pub fn with_linked_exchange_order(mut self, exchange_order_id: impl Into<String>) -> Self {
        self.linked_exchange_order_id = Some(exchange_order_id.into());
        self
    }

    pub fn add_linked_order(&mut self, order_id: impl Into<String>) {
        let order_id = order_id.into();
        if order_id != self.id && !self.linked_order_ids.contains(&order_id) {
            self.linked_order_ids.push(order_id);
        }
    }

    pub fn with_creation_time(mut self, creation_time: i64) -> Self {
        self.creation_time = creation_time;
        self
    }

    pub fn side(&self) -> OrderSide {
        self.kind.side()
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    /// The fill price if any of `prices` (oldest first) triggers this order.
    pub fn fill_trigger(&self, prices: &[f64]) -> Option<f64> {
        let price = self.origin_price;
        let stop = self.stop_price.unwrap_or(price);
        let any = |pred: &dyn Fn(f64) -> bool| prices.iter().any(|p| pred(*p));
        match self.kind {
            OrderKind::BuyMarket | OrderKind::SellMarket => prices.last().copied(),
            OrderKind::BuyLimit => any(&|p| p <= price).then_some(price),
            OrderKind::SellLimit => any(&|p| p >= price).then_some(price),
            OrderKind::StopLoss => any(&|p| p <= price).then_some(price),
            OrderKind::StopLossLimit => any(&|p| p <= stop).then_some(price),
            OrderKind::TakeProfit => any(&|p| p >= price).then_some(price),
            OrderKind::TakeProfitLimit => any(&|p| p >= stop).then_some(price),
        }
    }

    /// Open -> Filled. Returns `false` when the order was no longer open.
    pub fn mark_filled(&mut self, price: f64, fee: Fee) -> bool {
        if !self.is_open() {
            return false;
        }
        self.status = OrderStatus::Filled;
        self.filled_price = Some(price);
        self.filled_quantity = self.quantity;
        self.fee = Some(fee);
        true
    }

    pub fn cancel(&mut self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.status = OrderStatus::Canceled;
        true
    }
}

/// An order shared between the manager, the matcher and its trader. Mutated
/// only while the lock is held.
pub type SharedOrder = Arc<tokio::sync::Mutex<Order>>;

pub fn shared_order(order: Order) -> SharedOrder {
    Arc::new(tokio::sync::Mutex::new(order))
}
