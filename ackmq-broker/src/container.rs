use crate::BrokerError;
use ackmq_models::core::{Destination, TextMessage};
use ackmq_policy::{Decision, DeliveryAttempt, DeliveryHandler};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch, Mutex as AsyncMutex},
    task::JoinHandle,
};
use uuid::Uuid;

/// Number of workers a listener container may run, e.g. `1-10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyRange {
    min: usize,
    max: usize,
}

impl ConcurrencyRange {
    pub fn new(min: usize, max: usize) -> Result<Self, BrokerError> {
        if min == 0 {
            return Err(BrokerError::Config(
                "concurrency needs at least one worker".into(),
            ));
        }
        if min > max {
            return Err(BrokerError::Config(format!(
                "concurrency lower bound {min} exceeds upper bound {max}"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

impl Default for ConcurrencyRange {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

impl FromStr for ConcurrencyRange {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim().parse::<usize>().map_err(|err| {
                BrokerError::Config(format!("invalid concurrency '{value}': {err}"))
            })
        };

        match value.split_once('-') {
            Some((min, max)) => Self::new(parse(min)?, parse(max)?),
            None => {
                let fixed = parse(value)?;
                Self::new(fixed, fixed)
            }
        }
    }
}

impl fmt::Display for ConcurrencyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcknowledgeMode {
    /// Acknowledged once the handler returns, whatever it decided.
    Auto,
    /// Every delivery is settled by the handler's decision.
    #[default]
    Individual,
}

#[derive(Debug, Clone)]
pub struct ListenerContainerConfig {
    pub concurrency: ConcurrencyRange,
    pub acknowledge_mode: AcknowledgeMode,
    /// Redelivery delay applied when a handler crashes instead of deciding.
    pub recovery_interval: Duration,
    /// Crashes tolerated per message before it is dead-lettered.
    pub max_redeliveries: u32,
}

impl Default for ListenerContainerConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyRange::default(),
            acknowledge_mode: AcknowledgeMode::Individual,
            recovery_interval: Duration::from_millis(1000),
            max_redeliveries: 10,
        }
    }
}

pub(crate) struct Envelope {
    pub(crate) message: TextMessage,
    pub(crate) attempt: DeliveryAttempt,
}

impl Envelope {
    pub(crate) fn new(message: TextMessage) -> Self {
        let attempt = DeliveryAttempt::new(message.message_id);
        Self { message, attempt }
    }
}

/// Broker-side bookkeeping a container reports delivery outcomes to.
pub(crate) trait DeliveryLedger: Send + Sync + 'static {
    fn delivered(&self, destination: &Destination);
    fn acknowledged(&self, destination: &Destination);
    fn redelivered(&self, destination: &Destination);
    fn dead_lettered(&self, message: TextMessage);
    /// Takes back a message its container can no longer process.
    fn orphaned(&self, envelope: Envelope);
}

struct ContainerShared {
    subscription_id: Uuid,
    destination: Destination,
    config: ListenerContainerConfig,
    handler: Arc<dyn DeliveryHandler>,
    ledger: Arc<dyn DeliveryLedger>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Envelope>>,
    redelivery: mpsc::UnboundedSender<Envelope>,
    shutdown: watch::Receiver<bool>,
    live: AtomicUsize,
    busy: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ContainerShared {
    fn spawn_worker(self: &Arc<Self>) {
        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            worker.run().await;
            worker.live.fetch_sub(1, Ordering::SeqCst);
        });
        self.workers.lock().push(handle);
    }

    /// Adds a worker when every live worker is busy and the range allows it.
    fn grow(self: &Arc<Self>, busy: usize) {
        let live = self.live.load(Ordering::SeqCst);
        if busy < live || live >= self.config.concurrency.max() {
            return;
        }
        if self
            .live
            .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!(
                "Subscription {} growing to {} workers",
                self.subscription_id,
                live + 1
            );
            self.spawn_worker();
        }
    }

    async fn run(self: &Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let envelope = tokio::select! {
                _ = shutdown.changed() => break,
                envelope = self.next_envelope() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
            self.grow(busy);
            self.dispatch(envelope).await;
            self.busy.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn next_envelope(&self) -> Option<Envelope> {
        self.receiver.lock().await.recv().await
    }

    async fn dispatch(&self, envelope: Envelope) {
        self.ledger.delivered(&self.destination);

        let Envelope { message, attempt } = envelope;
        let fallback = (message.clone(), attempt.clone());
        let handler = Arc::clone(&self.handler);
        let outcome = tokio::task::spawn_blocking(move || {
            let decision = handler.on_delivery(&message, &attempt);
            (message, attempt, decision)
        })
        .await;

        let (message, attempt, decision) = match outcome {
            Ok(settled) => settled,
            Err(err) => {
                error!(
                    "Handler for {} crashed on message {}: {}",
                    self.destination, fallback.0.message_id, err
                );
                let (message, attempt) = fallback;
                let decision = self.crash_decision(&attempt);
                (message, attempt, decision)
            }
        };

        let decision = match self.config.acknowledge_mode {
            AcknowledgeMode::Individual => decision,
            AcknowledgeMode::Auto => {
                if decision != Decision::Acknowledge {
                    debug!(
                        "Auto acknowledge ignores {:?} for message {}",
                        decision, message.message_id
                    );
                }
                Decision::Acknowledge
            }
        };

        self.settle(message, attempt, decision);
    }

    /// A crashed delivery is retried like a failed one until its redeliveries
    /// run out.
    fn crash_decision(&self, attempt: &DeliveryAttempt) -> Decision {
        if attempt.attempt_count() >= self.config.max_redeliveries {
            Decision::GiveUp
        } else {
            Decision::Recover(self.config.recovery_interval)
        }
    }

    fn settle(&self, message: TextMessage, mut attempt: DeliveryAttempt, decision: Decision) {
        if let Err(err) = attempt.apply(&decision) {
            error!("Dropping delivery on {}: {}", self.destination, err);
            return;
        }

        match decision {
            Decision::Acknowledge => self.ledger.acknowledged(&self.destination),
            Decision::Recover(delay) => {
                self.ledger.redelivered(&self.destination);
                self.schedule_redelivery(Envelope { message, attempt }, delay);
            }
            Decision::GiveUp => {
                warn!(
                    "Message {} on {} dead-lettered after {} attempts",
                    message.message_id,
                    self.destination,
                    attempt.attempt_count()
                );
                self.ledger.dead_lettered(message);
            }
        }
    }

    fn schedule_redelivery(&self, mut envelope: Envelope, delay: Duration) {
        let sender = self.redelivery.clone();
        let ledger = Arc::clone(&self.ledger);
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let cancelled = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = shutdown.changed() => true,
            };

            if let Err(err) = envelope.attempt.redeliver() {
                error!("Cannot redeliver: {}", err);
                return;
            }

            if cancelled || *shutdown.borrow() {
                ledger.orphaned(envelope);
                return;
            }

            if let Err(mpsc::error::SendError(envelope)) = sender.send(envelope) {
                ledger.orphaned(envelope);
            }
        });
    }
}

/// Worker pool feeding one subscription's deliveries to its handler.
pub(crate) struct ListenerContainer {
    shared: Arc<ContainerShared>,
    shutdown: watch::Sender<bool>,
}

impl ListenerContainer {
    pub(crate) fn start(
        subscription_id: Uuid,
        destination: Destination,
        config: ListenerContainerConfig,
        handler: Arc<dyn DeliveryHandler>,
        ledger: Arc<dyn DeliveryLedger>,
        redelivery: mpsc::UnboundedSender<Envelope>,
        receiver: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let min = config.concurrency.min();
        let shared = Arc::new(ContainerShared {
            subscription_id,
            destination,
            config,
            handler,
            ledger,
            receiver: AsyncMutex::new(receiver),
            redelivery,
            shutdown: shutdown_rx,
            live: AtomicUsize::new(min),
            busy: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
        });

        for _ in 0..min {
            shared.spawn_worker();
        }

        Self { shared, shutdown }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Stops the workers and hands buffered messages back to the broker.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        loop {
            let handles = std::mem::take(&mut *self.shared.workers.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    error!(
                        "Worker for subscription {} failed: {}",
                        self.shared.subscription_id, err
                    );
                }
            }
        }

        let mut receiver = self.shared.receiver.lock().await;
        receiver.close();
        while let Ok(envelope) = receiver.try_recv() {
            self.shared.ledger.orphaned(envelope);
        }
    }
}

/// Handle to a running subscription; `close` detaches it from the broker.
pub struct SubscriptionHandle {
    id: Uuid,
    destination: Destination,
    container: ListenerContainer,
    detach: Box<dyn FnOnce() + Send + Sync>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: Uuid,
        destination: Destination,
        container: ListenerContainer,
        detach: Box<dyn FnOnce() + Send + Sync>,
    ) -> Self {
        Self {
            id,
            destination,
            container,
            detach,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn worker_count(&self) -> usize {
        self.container.worker_count()
    }

    pub async fn close(self) {
        let Self {
            id,
            destination,
            container,
            detach,
        } = self;
        detach();
        container.shutdown().await;
        info!("Subscription {} on {} closed", id, destination);
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("workers", &self.worker_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_concurrency_ranges() {
        let range: ConcurrencyRange = "1-10".parse().unwrap();
        assert_eq!((range.min(), range.max()), (1, 10));
        assert_eq!(range.to_string(), "1-10");

        let fixed: ConcurrencyRange = "4".parse().unwrap();
        assert_eq!((fixed.min(), fixed.max()), (4, 4));

        let spaced: ConcurrencyRange = " 2 - 3 ".parse().unwrap();
        assert_eq!((spaced.min(), spaced.max()), (2, 3));
    }

    #[test]
    fn rejects_bad_concurrency() {
        assert!("0-4".parse::<ConcurrencyRange>().is_err());
        assert!("5-2".parse::<ConcurrencyRange>().is_err());
        assert!("many".parse::<ConcurrencyRange>().is_err());
        assert!("1-".parse::<ConcurrencyRange>().is_err());
    }

    #[test]
    fn default_container_matches_listener_factory() {
        let config = ListenerContainerConfig::default();
        assert_eq!(config.concurrency, ConcurrencyRange::new(1, 10).unwrap());
        assert_eq!(config.acknowledge_mode, AcknowledgeMode::Individual);
        assert_eq!(config.recovery_interval, Duration::from_secs(1));
        assert_eq!(config.max_redeliveries, 10);
    }
}
