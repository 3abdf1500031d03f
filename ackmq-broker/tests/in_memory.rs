use ackmq_broker::{
    in_memory::InMemoryBroker, AcknowledgeMode, Broker, BrokerError, BrokerOptions,
    ConcurrencyRange, DestinationStats, ListenerContainerConfig,
};
use ackmq_models::core::{Destination, TextMessage};
use ackmq_policy::{
    Decision, DeliveryAttempt, DeliveryHandler, HandlerFailure, MaximumDelay,
    RedeliveryController, RedeliveryPolicy,
};
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc, time::Duration};

fn broker() -> InMemoryBroker {
    InMemoryBroker::connect(BrokerOptions::default()).unwrap()
}

fn fast_policy(max_redeliveries: u32) -> RedeliveryPolicy {
    RedeliveryPolicy::new(
        max_redeliveries,
        Duration::from_millis(1),
        2.0,
        true,
        MaximumDelay::Bounded(Duration::from_millis(20)),
    )
    .unwrap()
}

fn fail_first(
    failures: u32,
    seen: Arc<Mutex<Vec<u32>>>,
) -> impl Fn(&TextMessage, &DeliveryAttempt) -> Result<(), HandlerFailure> + Send + Sync + 'static {
    move |_: &TextMessage, attempt: &DeliveryAttempt| {
        seen.lock().push(attempt.attempt_count());
        if attempt.attempt_count() < failures {
            Err(HandlerFailure::new("no acknowledge error"))
        } else {
            Ok(())
        }
    }
}

fn controller<L>(policy: RedeliveryPolicy, listener: L) -> Arc<dyn DeliveryHandler>
where
    L: Fn(&TextMessage, &DeliveryAttempt) -> Result<(), HandlerFailure> + Send + Sync + 'static,
{
    Arc::new(RedeliveryController::new(policy, listener))
}

async fn wait_for<F>(
    broker: &InMemoryBroker,
    destination: &Destination,
    done: F,
) -> DestinationStats
where
    F: Fn(&DestinationStats) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = broker.stats(destination).await.unwrap();
            if done(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("destination never reached the expected state")
}

#[tokio::test]
async fn queue_message_is_redelivered_until_acknowledged() {
    let broker = broker();
    let queue = Destination::queue("orders");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = broker
        .subscribe(
            &queue,
            ListenerContainerConfig::default(),
            controller(fast_policy(10), fail_first(3, Arc::clone(&seen))),
        )
        .await
        .unwrap();

    broker.send(&queue, "hello".into()).await.unwrap();

    let stats = wait_for(&broker, &queue, |stats| stats.acknowledged == 1).await;
    assert_eq!(stats.delivered, 4);
    assert_eq!(stats.redelivered, 3);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);

    subscription.close().await;
}

#[tokio::test]
async fn exhausted_message_is_dead_lettered() {
    let broker = broker();
    let queue = Destination::queue("orders");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = broker
        .subscribe(
            &queue,
            ListenerContainerConfig::default(),
            controller(fast_policy(2), fail_first(u32::MAX, Arc::clone(&seen))),
        )
        .await
        .unwrap();

    let message_id = broker.send(&queue, "poison".into()).await.unwrap();

    let stats = wait_for(&broker, &queue, |stats| stats.dead_lettered == 1).await;
    assert_eq!(stats.acknowledged, 0);
    assert_eq!(stats.redelivered, 3);
    assert_eq!(stats.delivered, 4);
    // the listener is not consulted once redeliveries are exhausted
    assert_eq!(*seen.lock(), vec![0, 1, 2]);

    let dead = broker.dead_letters(&queue).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message_id, message_id);
    assert_eq!(dead[0].payload, "poison");

    subscription.close().await;
}

#[tokio::test]
async fn topic_messages_reach_every_subscriber() {
    let broker = broker();
    let topic = Destination::topic("prices");
    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));

    let a = broker
        .subscribe(
            &topic,
            ListenerContainerConfig::default(),
            controller(fast_policy(10), fail_first(0, Arc::clone(&first))),
        )
        .await
        .unwrap();
    let b = broker
        .subscribe(
            &topic,
            ListenerContainerConfig::default(),
            controller(fast_policy(10), fail_first(0, Arc::clone(&second))),
        )
        .await
        .unwrap();

    for payload in ["a", "b", "c"] {
        broker.send(&topic, payload.into()).await.unwrap();
    }

    let stats = wait_for(&broker, &topic, |stats| stats.acknowledged == 6).await;
    assert_eq!(stats.sent, 3);
    assert_eq!(stats.consumers, 2);
    assert_eq!(first.lock().len(), 3);
    assert_eq!(second.lock().len(), 3);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn topic_without_subscribers_drops_messages() {
    let broker = broker();
    let topic = Destination::topic("prices");
    broker.send(&topic, "lost".into()).await.unwrap();

    let stats = broker.stats(&topic).await.unwrap();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn queue_messages_reach_exactly_one_subscriber() {
    let broker = broker();
    let queue = Destination::queue("orders");
    let received = Arc::new(Mutex::new(Vec::new()));

    let mut subscriptions = Vec::new();
    for _ in 0..2 {
        let received = Arc::clone(&received);
        let listener =
            move |message: &TextMessage, _: &DeliveryAttempt| -> Result<(), HandlerFailure> {
                received.lock().push(message.payload.clone());
                Ok(())
            };
        subscriptions.push(
            broker
                .subscribe(
                    &queue,
                    ListenerContainerConfig::default(),
                    controller(fast_policy(10), listener),
                )
                .await
                .unwrap(),
        );
    }

    for index in 0..10 {
        broker.send(&queue, format!("m{index}")).await.unwrap();
    }

    wait_for(&broker, &queue, |stats| stats.acknowledged == 10).await;
    let received = received.lock().clone();
    assert_eq!(received.len(), 10);
    assert_eq!(received.iter().collect::<HashSet<_>>().len(), 10);

    for subscription in subscriptions {
        subscription.close().await;
    }
}

#[tokio::test]
async fn queue_buffers_messages_until_someone_subscribes() {
    let broker = broker();
    let queue = Destination::queue("orders");
    broker.send(&queue, "early".into()).await.unwrap();
    broker.send(&queue, "earlier".into()).await.unwrap();
    assert_eq!(broker.stats(&queue).await.unwrap().pending, 2);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = broker
        .subscribe(
            &queue,
            ListenerContainerConfig::default(),
            controller(fast_policy(10), fail_first(0, Arc::clone(&seen))),
        )
        .await
        .unwrap();

    let stats = wait_for(&broker, &queue, |stats| stats.acknowledged == 2).await;
    assert_eq!(stats.pending, 0);

    subscription.close().await;
}

#[tokio::test]
async fn auto_acknowledge_never_redelivers() {
    let broker = broker();
    let queue = Destination::queue("orders");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let config = ListenerContainerConfig {
        acknowledge_mode: AcknowledgeMode::Auto,
        ..ListenerContainerConfig::default()
    };
    let subscription = broker
        .subscribe(
            &queue,
            config,
            controller(fast_policy(10), fail_first(u32::MAX, Arc::clone(&seen))),
        )
        .await
        .unwrap();

    broker.send(&queue, "once".into()).await.unwrap();

    let stats = wait_for(&broker, &queue, |stats| stats.acknowledged == 1).await;
    assert_eq!(stats.redelivered, 0);
    assert_eq!(*seen.lock(), vec![0]);

    subscription.close().await;
}

#[tokio::test]
async fn closing_returns_pending_redeliveries_to_the_queue() {
    let broker = broker();
    let queue = Destination::queue("orders");
    let slow = RedeliveryPolicy::new(
        10,
        Duration::from_secs(60),
        1.0,
        false,
        MaximumDelay::Unbounded,
    )
    .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let first = broker
        .subscribe(
            &queue,
            ListenerContainerConfig::default(),
            controller(slow, fail_first(u32::MAX, Arc::clone(&seen))),
        )
        .await
        .unwrap();

    broker.send(&queue, "retry me".into()).await.unwrap();
    wait_for(&broker, &queue, |stats| stats.redelivered == 1).await;

    first.close().await;
    let stats = wait_for(&broker, &queue, |stats| stats.pending == 1).await;
    assert_eq!(stats.consumers, 0);

    let resumed = Arc::new(Mutex::new(Vec::new()));
    let second = broker
        .subscribe(
            &queue,
            ListenerContainerConfig::default(),
            controller(fast_policy(10), fail_first(0, Arc::clone(&resumed))),
        )
        .await
        .unwrap();

    wait_for(&broker, &queue, |stats| stats.acknowledged == 1).await;
    // the redelivery count survives the hand-over
    assert_eq!(*resumed.lock(), vec![1]);

    second.close().await;
}

#[tokio::test]
async fn container_grows_while_workers_are_busy() {
    let broker = broker();
    let queue = Destination::queue("orders");
    let listener = |_: &TextMessage, _: &DeliveryAttempt| -> Result<(), HandlerFailure> {
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    };
    let config = ListenerContainerConfig {
        concurrency: ConcurrencyRange::new(1, 4).unwrap(),
        ..ListenerContainerConfig::default()
    };
    let subscription = broker
        .subscribe(&queue, config, controller(fast_policy(10), listener))
        .await
        .unwrap();
    assert_eq!(subscription.worker_count(), 1);

    for index in 0..8 {
        broker.send(&queue, format!("job {index}")).await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while subscription.worker_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("container never grew");

    wait_for(&broker, &queue, |stats| stats.acknowledged == 8).await;
    assert!(subscription.worker_count() <= 4);

    subscription.close().await;
}

struct CrashOnFirstAttempt;

impl DeliveryHandler for CrashOnFirstAttempt {
    fn on_delivery(&self, _: &TextMessage, attempt: &DeliveryAttempt) -> Decision {
        if attempt.attempt_count() == 0 {
            panic!("handler crashed");
        }
        Decision::Acknowledge
    }
}

#[tokio::test]
async fn crashed_handler_is_redelivered_after_recovery_interval() {
    let broker = broker();
    let queue = Destination::queue("orders");
    let config = ListenerContainerConfig {
        recovery_interval: Duration::from_millis(10),
        ..ListenerContainerConfig::default()
    };
    let subscription = broker
        .subscribe(&queue, config, Arc::new(CrashOnFirstAttempt))
        .await
        .unwrap();

    broker.send(&queue, "fragile".into()).await.unwrap();

    let stats = wait_for(&broker, &queue, |stats| stats.acknowledged == 1).await;
    assert_eq!(stats.redelivered, 1);

    subscription.close().await;
}

struct AlwaysCrash;

impl DeliveryHandler for AlwaysCrash {
    fn on_delivery(&self, _: &TextMessage, _: &DeliveryAttempt) -> Decision {
        panic!("handler crashed");
    }
}

#[tokio::test]
async fn handler_that_keeps_crashing_is_dead_lettered() {
    let broker = broker();
    let queue = Destination::queue("orders");
    let config = ListenerContainerConfig {
        recovery_interval: Duration::from_millis(1),
        max_redeliveries: 3,
        ..ListenerContainerConfig::default()
    };
    let subscription = broker
        .subscribe(&queue, config, Arc::new(AlwaysCrash))
        .await
        .unwrap();

    let message_id = broker.send(&queue, "doomed".into()).await.unwrap();

    let stats = wait_for(&broker, &queue, |stats| stats.dead_lettered == 1).await;
    assert_eq!(stats.delivered, 4);
    assert_eq!(stats.redelivered, 3);
    assert_eq!(stats.acknowledged, 0);

    let dead = broker.dead_letters(&queue).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message_id, message_id);

    // nothing is scheduled once the message is dead-lettered
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.stats(&queue).await.unwrap().delivered, 4);

    subscription.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_messages_keep_separate_redelivery_counts() {
    const MESSAGES: u64 = 50;

    let broker = broker();
    let queue = Destination::queue("orders");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let config = ListenerContainerConfig {
        concurrency: ConcurrencyRange::new(1, 10).unwrap(),
        ..ListenerContainerConfig::default()
    };
    let subscription = broker
        .subscribe(
            &queue,
            config,
            controller(fast_policy(10), fail_first(3, Arc::clone(&seen))),
        )
        .await
        .unwrap();

    for index in 0..MESSAGES {
        broker.send(&queue, format!("m{index}")).await.unwrap();
    }

    let stats = wait_for(&broker, &queue, |stats| stats.acknowledged == MESSAGES).await;
    assert_eq!(stats.redelivered, 3 * MESSAGES);
    assert_eq!(stats.delivered, 4 * MESSAGES);
    assert_eq!(stats.dead_lettered, 0);

    let seen = seen.lock().clone();
    for count in 0..4 {
        let hits = seen.iter().filter(|&&seen| seen == count).count() as u64;
        assert_eq!(hits, MESSAGES, "attempt {count}");
    }

    subscription.close().await;
}

#[tokio::test]
async fn rejects_network_broker_urls() {
    let options = BrokerOptions {
        url: "tcp://127.0.0.1:61616".into(),
        ..BrokerOptions::default()
    };
    assert!(matches!(
        InMemoryBroker::connect(options),
        Err(BrokerError::Connection(_))
    ));
}

#[tokio::test]
async fn closed_broker_refuses_sends() {
    let broker = broker();
    broker.close();
    let result = broker.send(&Destination::queue("orders"), "late".into()).await;
    assert!(matches!(result, Err(BrokerError::Closed)));
}

#[tokio::test]
async fn empty_destination_names_are_rejected() {
    let broker = broker();
    let result = broker.send(&Destination::queue(" "), "x".into()).await;
    assert!(matches!(result, Err(BrokerError::InvalidDestination(_))));
}
