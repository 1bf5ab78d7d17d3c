pub mod matching;
pub mod order;
pub mod orders_manager;
pub mod portfolio;
pub mod trader;

pub use matching::{FeeSchedule, MatchReport, OrdersMatcher};
pub use order::{shared_order, Fee, Order, OrderKind, OrderStatus, SharedOrder};
pub use orders_manager::OrdersManager;
pub use portfolio::Portfolio;
pub use trader::{SimulatedTrader, Trader};
