// =============================================================================
// Producer — the single write handle of a channel
// =============================================================================

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::channels::channel::Channel;
use crate::channels::routing::RoutingKey;
use crate::channels::topics::Topic;

/// Cloneable handle that pushes payloads into its channel.
///
/// Delivery awaits each matching consumer queue in turn, so a full queue
/// suspends the sender until the consumer drains it.
pub struct Producer<T: Topic> {
    channel: Arc<Channel<T>>,
}

impl<T: Topic> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<T: Topic> Producer<T> {
    pub(crate) fn new(channel: Arc<Channel<T>>) -> Self {
        Self { channel }
    }

    pub async fn send(&self, payload: T::Payload, key: RoutingKey) {
        self.channel.deliver(key, payload).await;
    }

    pub fn channel(&self) -> &Arc<Channel<T>> {
        &self.channel
    }

    /// Cancelled when the channel stops; producer loops select on it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.channel.cancellation_token()
    }
}
