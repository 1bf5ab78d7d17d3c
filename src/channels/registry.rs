// =============================================================================
// Channel registry — explicit, session-scoped lookup of channels by name
// =============================================================================

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::channels::channel::Channel;
use crate::channels::topics::Topic;
use crate::error::EngineError;

/// Type-erased lifetime controls so the registry can start and stop channels
/// of every topic together.
pub trait ManagedChannel: Send + Sync {
    fn name(&self) -> &'static str;
    fn exchange(&self) -> &str;
    fn start(&self);
    fn stop(&self);
    fn is_running(&self) -> bool;
}

impl<T: Topic> ManagedChannel for Channel<T> {
    fn name(&self) -> &'static str {
        Channel::name(self)
    }

    fn exchange(&self) -> &str {
        Channel::exchange(self)
    }

    fn start(&self) {
        Channel::start(self)
    }

    fn stop(&self) {
        Channel::stop(self)
    }

    fn is_running(&self) -> bool {
        Channel::is_running(self)
    }
}

struct Entry {
    typed: Arc<dyn Any + Send + Sync>,
    managed: Arc<dyn ManagedChannel>,
}

/// All channels of a session, keyed by `(exchange, channel name)`.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<(String, &'static str), Entry>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Topic>(&self, channel: Arc<Channel<T>>) -> Result<(), EngineError> {
        let key = (channel.exchange().to_string(), T::NAME);
        let mut channels = self.channels.write();
        if channels.contains_key(&key) {
            return Err(EngineError::DuplicateChannel {
                exchange: key.0,
                name: T::NAME.to_string(),
            });
        }
        channels.insert(
            key,
            Entry {
                typed: channel.clone(),
                managed: channel,
            },
        );
        Ok(())
    }

    /// Create and register a channel in one step.
    pub fn create<T: Topic>(
        &self,
        exchange: &str,
        queue_size: usize,
        filter_size: u32,
    ) -> Result<Arc<Channel<T>>, EngineError> {
        let channel = Channel::<T>::new(exchange, queue_size, filter_size);
        self.register(Arc::clone(&channel))?;
        Ok(channel)
    }

    pub fn get<T: Topic>(&self, exchange: &str) -> Result<Arc<Channel<T>>, EngineError> {
        let not_found = || EngineError::ChannelNotFound {
            exchange: exchange.to_string(),
            name: T::NAME.to_string(),
        };
        let typed = self
            .channels
            .read()
            .get(&(exchange.to_string(), T::NAME))
            .map(|e| Arc::clone(&e.typed))
            .ok_or_else(not_found)?;
        typed.downcast::<Channel<T>>().map_err(|_| not_found())
    }

    pub fn names(&self, exchange: &str) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .channels
            .read()
            .keys()
            .filter(|(ex, _)| ex == exchange)
            .map(|(_, name)| *name)
            .collect();
        names.sort_unstable();
        names
    }

    pub fn start_all(&self) {
        for entry in self.channels.read().values() {
            entry.managed.start();
        }
    }

    pub fn stop_all(&self) {
        let channels = self.channels.read();
        for entry in channels.values() {
            entry.managed.stop();
        }
        info!(count = channels.len(), "all channels stopped");
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::topics::{BalanceTopic, TickerTopic};

    #[test]
    fn duplicate_registration_is_an_error() {
        let registry = ChannelRegistry::new();
        registry.create::<TickerTopic>("sim", 4, 1).unwrap();
        assert!(matches!(
            registry.create::<TickerTopic>("sim", 4, 1),
            Err(EngineError::DuplicateChannel { .. })
        ));

        // Same name on another exchange is fine.
        assert!(registry.create::<TickerTopic>("other", 4, 1).is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn lookup_returns_the_typed_channel() {
        let registry = ChannelRegistry::new();
        let created = registry.create::<BalanceTopic>("sim", 4, 1).unwrap();
        let found = registry.get::<BalanceTopic>("sim").unwrap();
        assert!(Arc::ptr_eq(&created, &found));
        assert!(matches!(
            registry.get::<TickerTopic>("sim"),
            Err(EngineError::ChannelNotFound { .. })
        ));
        assert_eq!(registry.names("sim"), vec!["Balance"]);
    }

    #[tokio::test]
    async fn stop_all_stops_every_channel() {
        let registry = ChannelRegistry::new();
        let ticker = registry.create::<TickerTopic>("sim", 4, 1).unwrap();
        let balance = registry.create::<BalanceTopic>("sim", 4, 1).unwrap();
        registry.stop_all();
        assert!(!ticker.is_running());
        assert!(!balance.is_running());
        registry.start_all();
        assert!(ticker.is_running());
    }
}
