// =============================================================================
// Orders Manager — bounded per-exchange order book-keeping
// =============================================================================
//
// Orders are kept in insertion order and never exceed `max_orders`. When the
// store is full the oldest closed order makes room; open orders are never
// evicted, so a store full of open orders refuses new ones.
// =============================================================================

use std::collections::VecDeque;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::trading::order::{shared_order, Order, SharedOrder};

struct Entry {
    id: String,
    symbol: String,
    order: SharedOrder,
}

pub struct OrdersManager {
    max_orders: usize,
    orders: RwLock<VecDeque<Entry>>,
}

impl OrdersManager {
    pub fn new(max_orders: usize) -> Self {
        Self {
            max_orders: max_orders.max(1),
            orders: RwLock::new(VecDeque::new()),
        }
    }

    /// Store a new order and return its shared handle.
    ///
    /// Fails on an id already stored, or when every stored order is still
    /// open and the store is full. Nothing is stored on failure.
    pub fn add(&self, order: Order) -> Result<SharedOrder, EngineError> {
        let mut orders = self.orders.write();
        if orders.iter().any(|e| e.id == order.id) {
            return Err(EngineError::DuplicateOrder(order.id));
        }
        if orders.len() >= self.max_orders {
            match orders.iter().position(|e| is_closed(&e.order)) {
                Some(index) => {
                    if let Some(evicted) = orders.remove(index) {
                        debug!(order_id = %evicted.id, "evicted closed order");
                    }
                }
                None => {
                    warn!(
                        max_orders = self.max_orders,
                        order_id = %order.id,
                        "order store full of open orders, order refused"
                    );
                    return Err(EngineError::OrdersFull {
                        max_orders: self.max_orders,
                    });
                }
            }
        }

        let entry = Entry {
            id: order.id.clone(),
            symbol: order.symbol.clone(),
            order: shared_order(order),
        };
        let handle = entry.order.clone();
        orders.push_back(entry);
        Ok(handle)
    }

    /// Link two stored orders so that filling either cancels the other
    /// (stop-loss / take-profit pairs).
    pub async fn link(&self, first: &str, second: &str) -> Result<(), EngineError> {
        let missing = |id: &str| EngineError::MissingOrder {
            order_id: id.to_string(),
        };
        let a = self.get(first).ok_or_else(|| missing(first))?;
        let b = self.get(second).ok_or_else(|| missing(second))?;
        a.lock().await.add_linked_order(second);
        b.lock().await.add_linked_order(first);
        debug!(first, second, "orders linked");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<SharedOrder> {
        self.orders
            .read()
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.order.clone())
    }

    /// Handles of every order of `symbol`, open or not.
    pub fn orders_for(&self, symbol: &str) -> Vec<SharedOrder> {
        self.orders
            .read()
            .iter()
            .filter(|e| e.symbol == symbol)
            .map(|e| e.order.clone())
            .collect()
    }

    /// Copy of the currently open orders of `symbol`.
    pub async fn open_orders(&self, symbol: &str) -> Vec<SharedOrder> {
        let mut open = Vec::new();
        for order in self.orders_for(symbol) {
            if order.lock().await.is_open() {
                open.push(order);
            }
        }
        open
    }

    /// Symbols with at least one stored order, in first-seen order.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::new();
        for entry in self.orders.read().iter() {
            if !symbols.contains(&entry.symbol) {
                symbols.push(entry.symbol.clone());
            }
        }
        symbols
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An order whose lock is busy is being matched, so it counts as open.
fn is_closed(order: &SharedOrder) -> bool {
    order.try_lock().map(|o| !o.is_open()).unwrap_or(false)
}
