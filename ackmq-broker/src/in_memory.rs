use crate::{
    container::{DeliveryLedger, Envelope, ListenerContainer},
    pool::ConnectionPool,
    Broker, BrokerError, BrokerOptions, DestinationStats, ListenerContainerConfig,
    SubscriptionHandle,
};
use ackmq_models::core::{Destination, DestinationKind, MessageId, TextMessage};
use ackmq_policy::DeliveryHandler;
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

struct Consumer {
    id: Uuid,
    sender: mpsc::UnboundedSender<Envelope>,
}

#[derive(Default)]
struct DestinationState {
    backlog: VecDeque<Envelope>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    dead_letters: Vec<TextMessage>,
    stats: DestinationStats,
}

impl DestinationState {
    /// Hands a queue message to the next live consumer, or parks it.
    fn route(&mut self, mut envelope: Envelope, front: bool) {
        while !self.consumers.is_empty() {
            let index = self.next_consumer % self.consumers.len();
            match self.consumers[index].sender.send(envelope) {
                Ok(()) => {
                    self.next_consumer = index + 1;
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    self.consumers.remove(index);
                    envelope = returned;
                }
            }
        }

        if front {
            self.backlog.push_front(envelope);
        } else {
            self.backlog.push_back(envelope);
        }
    }

    /// Gives every topic subscriber its own copy; returns how many got one.
    fn fan_out(&mut self, message: &TextMessage) -> usize {
        self.consumers.retain(|consumer| {
            consumer
                .sender
                .send(Envelope::new(message.clone()))
                .is_ok()
        });
        self.consumers.len()
    }

    fn snapshot(&self) -> DestinationStats {
        DestinationStats {
            pending: self.backlog.len(),
            consumers: self.consumers.len(),
            ..self.stats.clone()
        }
    }
}

struct Shared {
    options: BrokerOptions,
    pool: ConnectionPool,
    destinations: Mutex<HashMap<Destination, DestinationState>>,
}

impl Shared {
    fn with_destination<R>(
        &self,
        destination: &Destination,
        f: impl FnOnce(&mut DestinationState) -> R,
    ) -> R {
        let mut guard = self.destinations.lock();
        f(guard.entry(destination.clone()).or_default())
    }

    fn detach(&self, destination: &Destination, subscription_id: Uuid) {
        self.with_destination(destination, |state| {
            state.consumers.retain(|consumer| consumer.id != subscription_id);
        });
    }
}

impl DeliveryLedger for Shared {
    fn delivered(&self, destination: &Destination) {
        self.with_destination(destination, |state| state.stats.delivered += 1);
    }

    fn acknowledged(&self, destination: &Destination) {
        self.with_destination(destination, |state| state.stats.acknowledged += 1);
    }

    fn redelivered(&self, destination: &Destination) {
        self.with_destination(destination, |state| state.stats.redelivered += 1);
    }

    fn dead_lettered(&self, message: TextMessage) {
        let destination = message.destination.clone();
        self.with_destination(&destination, |state| {
            state.stats.dead_lettered += 1;
            state.dead_letters.push(message);
        });
    }

    fn orphaned(&self, envelope: Envelope) {
        let destination = envelope.message.destination.clone();
        self.with_destination(&destination, |state| match destination.kind {
            DestinationKind::Queue => state.route(envelope, true),
            DestinationKind::Topic => state.stats.dropped += 1,
        });
    }
}

/// Broker living inside the current process; all state is volatile.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn connect(options: BrokerOptions) -> Result<Self, BrokerError> {
        options.validate()?;
        let pool = ConnectionPool::new(options.max_connections)?;

        info!(
            "Connected to {} as {} with up to {} pooled connections",
            options.url,
            options
                .credentials
                .as_ref()
                .map(|credentials| credentials.user.as_str())
                .unwrap_or("anonymous"),
            options.max_connections
        );

        Ok(Self {
            shared: Arc::new(Shared {
                options,
                pool,
                destinations: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Refuses further sends. Running subscriptions are closed by their handles.
    pub fn close(&self) {
        self.shared.pool.close();
        info!("Broker {} closed", self.shared.options.url);
    }
}

fn check_destination(destination: &Destination) -> Result<(), BrokerError> {
    if destination.name.trim().is_empty() {
        return Err(BrokerError::InvalidDestination(destination.to_string()));
    }
    Ok(())
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(
        &self,
        destination: &Destination,
        payload: String,
    ) -> Result<MessageId, BrokerError> {
        check_destination(destination)?;
        let _connection = self.shared.pool.acquire().await?;

        let message = TextMessage::new(destination.clone(), payload);
        let message_id = message.message_id;
        self.shared.with_destination(destination, |state| {
            state.stats.sent += 1;
            match destination.kind {
                DestinationKind::Queue => state.route(Envelope::new(message), false),
                DestinationKind::Topic => {
                    if state.fan_out(&message) == 0 {
                        state.stats.dropped += 1;
                    }
                }
            }
        });

        debug!("Sent message {} to {}", message_id, destination);
        Ok(message_id)
    }

    async fn subscribe(
        &self,
        destination: &Destination,
        config: ListenerContainerConfig,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<SubscriptionHandle, BrokerError> {
        check_destination(destination)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription_id = Uuid::new_v4();
        self.shared.with_destination(destination, |state| {
            if destination.kind == DestinationKind::Queue {
                while let Some(envelope) = state.backlog.pop_front() {
                    if let Err(mpsc::error::SendError(envelope)) = sender.send(envelope) {
                        state.backlog.push_front(envelope);
                        break;
                    }
                }
            }
            state.consumers.push(Consumer {
                id: subscription_id,
                sender: sender.clone(),
            });
        });

        info!(
            "Subscription {} on {} started with concurrency {}",
            subscription_id, destination, config.concurrency
        );

        let ledger: Arc<dyn DeliveryLedger> = self.shared.clone();
        let container = ListenerContainer::start(
            subscription_id,
            destination.clone(),
            config,
            handler,
            ledger,
            sender,
            receiver,
        );

        let shared = Arc::clone(&self.shared);
        let detached = destination.clone();
        Ok(SubscriptionHandle::new(
            subscription_id,
            destination.clone(),
            container,
            Box::new(move || shared.detach(&detached, subscription_id)),
        ))
    }

    async fn dead_letters(
        &self,
        destination: &Destination,
    ) -> Result<Vec<TextMessage>, BrokerError> {
        check_destination(destination)?;
        Ok(self
            .shared
            .with_destination(destination, |state| state.dead_letters.clone()))
    }

    async fn stats(&self, destination: &Destination) -> Result<DestinationStats, BrokerError> {
        check_destination(destination)?;
        Ok(self
            .shared
            .with_destination(destination, |state| state.snapshot()))
    }
}
