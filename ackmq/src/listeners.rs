use std::sync::Arc;

use ackmq_broker::{Broker, BrokerError, ListenerContainerConfig, SubscriptionHandle};
use ackmq_models::core::{Destination, TextMessage};
use ackmq_policy::{
    DeliveryAttempt, HandlerFailure, MessageListener, RedeliveryController, RedeliveryPolicy,
};
use log::info;

use crate::config::Config;

/// Queue listener that rejects the first `fail_first` attempts of every
/// message to exercise the redelivery policy.
pub struct QueueConsumer {
    fail_first: u32,
}

impl QueueConsumer {
    pub fn new(fail_first: u32) -> Self {
        Self { fail_first }
    }
}

impl MessageListener for QueueConsumer {
    fn on_message(
        &self,
        message: &TextMessage,
        attempt: &DeliveryAttempt,
    ) -> Result<(), HandlerFailure> {
        info!(
            "queue received: {} (attempt {})",
            message.payload,
            attempt.attempt_count()
        );

        if attempt.attempt_count() >= self.fail_first {
            return Ok(());
        }

        info!("Not acknowledging this time; handing message back for redelivery");
        Err(HandlerFailure::new("no acknowledge error"))
    }
}

pub struct TopicConsumer {
    name: String,
}

impl TopicConsumer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl MessageListener for TopicConsumer {
    fn on_message(&self, message: &TextMessage, _: &DeliveryAttempt) -> Result<(), HandlerFailure> {
        info!("{} received: {}", self.name, message.payload);
        Ok(())
    }
}

async fn subscribe<L>(
    broker: &dyn Broker,
    destination: &Destination,
    container: &ListenerContainerConfig,
    policy: &RedeliveryPolicy,
    listener: L,
) -> Result<SubscriptionHandle, BrokerError>
where
    L: MessageListener + 'static,
{
    let controller = RedeliveryController::new(policy.clone(), listener);
    broker
        .subscribe(destination, container.clone(), Arc::new(controller))
        .await
}

/// Attaches the queue consumer and both topic consumers.
pub async fn start_listeners(
    broker: &dyn Broker,
    config: &Config,
) -> Result<Vec<SubscriptionHandle>, BrokerError> {
    let queue = subscribe(
        broker,
        &config.queue,
        &config.container,
        &config.policy,
        QueueConsumer::new(config.fail_first),
    )
    .await?;

    let mut subscriptions = vec![queue];
    for name in ["topic", "topic1"] {
        subscriptions.push(
            subscribe(
                broker,
                &config.topic,
                &config.container,
                &config.policy,
                TopicConsumer::new(name),
            )
            .await?,
        );
    }

    Ok(subscriptions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ackmq_policy::Decision;

    #[test]
    fn queue_consumer_fails_per_message_not_per_process() {
        let controller =
            RedeliveryController::new(RedeliveryPolicy::default(), QueueConsumer::new(3));
        let destination = Destination::queue("ackmq.queue");
        let first = TextMessage::new(destination.clone(), "first");
        let second = TextMessage::new(destination, "second");

        for count in 0..3 {
            let attempt = DeliveryAttempt::resume(first.message_id, count);
            assert!(matches!(
                controller.handle(&first, &attempt),
                Decision::Recover(_)
            ));
        }
        let attempt = DeliveryAttempt::resume(first.message_id, 3);
        assert_eq!(controller.handle(&first, &attempt), Decision::Acknowledge);

        // a fresh message starts its own count
        let attempt = DeliveryAttempt::new(second.message_id);
        assert!(matches!(
            controller.handle(&second, &attempt),
            Decision::Recover(_)
        ));
    }

    #[test]
    fn topic_consumer_always_acknowledges() {
        let controller = RedeliveryController::new(
            RedeliveryPolicy::default(),
            TopicConsumer::new("topic1"),
        );
        let message = TextMessage::new(Destination::topic("ackmq.topic"), "news");
        let attempt = DeliveryAttempt::new(message.message_id);
        assert_eq!(controller.handle(&message, &attempt), Decision::Acknowledge);
    }
}
