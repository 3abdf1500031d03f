use crate::{attempt::DeliveryAttempt, errors::HandlerFailure, policy::RedeliveryPolicy};
use ackmq_models::core::TextMessage;
use log::{debug, error, info, warn};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

/// What the broker should do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Acknowledge,
    Recover(Duration),
    /// Redeliveries are exhausted; the broker dead-letters the message.
    GiveUp,
}

/// Domain logic run for every delivery.
pub trait MessageListener: Send + Sync {
    fn on_message(
        &self,
        message: &TextMessage,
        attempt: &DeliveryAttempt,
    ) -> Result<(), HandlerFailure>;
}

impl<F> MessageListener for F
where
    F: Fn(&TextMessage, &DeliveryAttempt) -> Result<(), HandlerFailure> + Send + Sync,
{
    fn on_message(
        &self,
        message: &TextMessage,
        attempt: &DeliveryAttempt,
    ) -> Result<(), HandlerFailure> {
        self(message, attempt)
    }
}

/// Seam the broker's listener container calls into.
pub trait DeliveryHandler: Send + Sync + 'static {
    fn on_delivery(&self, message: &TextMessage, attempt: &DeliveryAttempt) -> Decision;
}

pub struct RedeliveryController<L> {
    policy: RedeliveryPolicy,
    listener: L,
}

impl<L> RedeliveryController<L>
where
    L: MessageListener,
{
    pub fn new(policy: RedeliveryPolicy, listener: L) -> Self {
        Self { policy, listener }
    }

    pub fn policy(&self) -> &RedeliveryPolicy {
        &self.policy
    }

    pub fn handle(&self, message: &TextMessage, attempt: &DeliveryAttempt) -> Decision {
        let attempt_count = attempt.attempt_count();
        if self.policy.is_exhausted(attempt_count) {
            warn!(
                "Message {} exhausted {} redeliveries; giving up",
                attempt.message_id(),
                self.policy.max_redeliveries()
            );
            return Decision::GiveUp;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.listener.on_message(message, attempt)
        }));

        let failure = match outcome {
            Ok(Ok(())) => {
                debug!(
                    "Acknowledging message {} on attempt {}",
                    attempt.message_id(),
                    attempt_count
                );
                return Decision::Acknowledge;
            }
            Ok(Err(failure)) => failure,
            Err(payload) => {
                error!(
                    "Listener panicked on message {}: {}",
                    attempt.message_id(),
                    panic_reason(payload.as_ref())
                );
                HandlerFailure::new("listener panicked")
            }
        };

        let delay = self.policy.delay_for(attempt_count);
        info!(
            "Message {} failed on attempt {} ({}); recovering in {:?}",
            attempt.message_id(),
            attempt_count,
            failure,
            delay
        );
        Decision::Recover(delay)
    }
}

impl<L> DeliveryHandler for RedeliveryController<L>
where
    L: MessageListener + 'static,
{
    fn on_delivery(&self, message: &TextMessage, attempt: &DeliveryAttempt) -> Decision {
        self.handle(message, attempt)
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason
    } else {
        "unknown panic"
    }
}
