pub mod channel;
pub mod consumer;
pub mod producer;
pub mod registry;
pub mod routing;
pub mod topics;

pub use channel::Channel;
pub use consumer::{callback, Consumer, ConsumerCallback};
pub use producer::Producer;
pub use registry::ChannelRegistry;
pub use routing::{RoutingKey, SendFilter, Subscription};
pub use topics::*;
