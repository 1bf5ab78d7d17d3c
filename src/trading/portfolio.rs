// =============================================================================
// Portfolio — simulated balances per currency
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::types::{split_symbol, AssetBalance, OrderSide};

pub struct Portfolio {
    balances: RwLock<HashMap<String, f64>>,
}

impl Portfolio {
    pub fn new(starting_balances: HashMap<String, f64>) -> Self {
        Self {
            balances: RwLock::new(starting_balances),
        }
    }

    pub fn balance(&self, currency: &str) -> f64 {
        self.balances.read().get(currency).copied().unwrap_or(0.0)
    }

    pub fn balances(&self) -> HashMap<String, f64> {
        self.balances.read().clone()
    }

    /// Move funds for a fill of `quantity` at `price` on `symbol`, charging
    /// `fee` in the quote currency. Nothing changes when funds are short.
    pub fn apply_fill(
        &self,
        symbol: &str,
        side: OrderSide,
        price: f64,
        quantity: f64,
        fee: f64,
    ) -> Result<(), EngineError> {
        let (base, quote) = split_symbol(symbol);
        let notional = price * quantity;
        let mut balances = self.balances.write();

        match side {
            OrderSide::Buy => {
                let required = notional + fee;
                let available = balances.get(quote).copied().unwrap_or(0.0);
                if available < required {
                    return Err(EngineError::InsufficientFunds {
                        currency: quote.to_string(),
                        required,
                        available,
                    });
                }
                *balances.entry(quote.to_string()).or_default() -= required;
                *balances.entry(base.to_string()).or_default() += quantity;
            }
            OrderSide::Sell => {
                let available = balances.get(base).copied().unwrap_or(0.0);
                if available < quantity {
                    return Err(EngineError::InsufficientFunds {
                        currency: base.to_string(),
                        required: quantity,
                        available,
                    });
                }
                *balances.entry(base.to_string()).or_default() -= quantity;
                *balances.entry(quote.to_string()).or_default() += notional - fee;
            }
        }
        debug!(symbol, side = %side, price, quantity, fee, "portfolio updated");
        Ok(())
    }

    /// Overwrite balances with the exchange's view (free amounts).
    pub fn sync_from_exchange(&self, balances: &[AssetBalance]) {
        let mut current = self.balances.write();
        for b in balances {
            current.insert(b.asset.clone(), b.free);
        }
        info!(assets = balances.len(), "portfolio synced from exchange");
    }
}
