mod container;
mod errors;
pub mod in_memory;
mod pool;
mod types;

pub use container::{AcknowledgeMode, ConcurrencyRange, ListenerContainerConfig, SubscriptionHandle};
pub use errors::BrokerError;
pub use types::{BrokerOptions, Credentials, DestinationStats};

use ackmq_models::core::{Destination, MessageId, TextMessage};
use ackmq_policy::DeliveryHandler;
use async_trait::async_trait;
use std::sync::Arc;

/// Trait implemented by brokers that route text messages to listeners.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Send a text payload to a queue or topic.
    async fn send(&self, destination: &Destination, payload: String)
        -> Result<MessageId, BrokerError>;

    /// Attach a listener container to a destination. Every delivery is
    /// answered by the handler's decision: acknowledge, recover after a delay
    /// or give up.
    async fn subscribe(
        &self,
        destination: &Destination,
        config: ListenerContainerConfig,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<SubscriptionHandle, BrokerError>;

    /// Messages given up on for the supplied destination.
    async fn dead_letters(&self, destination: &Destination)
        -> Result<Vec<TextMessage>, BrokerError>;

    /// Delivery counters for the supplied destination.
    async fn stats(&self, destination: &Destination) -> Result<DestinationStats, BrokerError>;
}
