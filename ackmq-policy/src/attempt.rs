use crate::{controller::Decision, errors::TransitionError};
use ackmq_models::core::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    Delivered,
    Acknowledged,
    RecoverRequested,
    Exhausted,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Acknowledged | DeliveryState::Exhausted)
    }
}

/// Delivery bookkeeping for one logical message.
///
/// The attempt count lives here rather than in the listener so that two
/// messages failing at the same time never share a counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    message_id: MessageId,
    attempt_count: u32,
    state: DeliveryState,
}

impl DeliveryAttempt {
    pub fn new(message_id: MessageId) -> Self {
        Self::resume(message_id, 0)
    }

    /// Rebuilds a delivered attempt from a redelivery count the broker kept.
    pub fn resume(message_id: MessageId, attempt_count: u32) -> Self {
        Self {
            message_id,
            attempt_count,
            state: DeliveryState::Delivered,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn acknowledge(&mut self) -> Result<(), TransitionError> {
        self.transition(DeliveryState::Delivered, DeliveryState::Acknowledged)
    }

    pub fn request_recover(&mut self) -> Result<(), TransitionError> {
        self.transition(DeliveryState::Delivered, DeliveryState::RecoverRequested)?;
        self.attempt_count = self.attempt_count.saturating_add(1);
        Ok(())
    }

    pub fn redeliver(&mut self) -> Result<(), TransitionError> {
        self.transition(DeliveryState::RecoverRequested, DeliveryState::Delivered)
    }

    pub fn exhaust(&mut self) -> Result<(), TransitionError> {
        self.transition(DeliveryState::Delivered, DeliveryState::Exhausted)
    }

    /// Moves the attempt to the state implied by a controller decision.
    pub fn apply(&mut self, decision: &Decision) -> Result<(), TransitionError> {
        match decision {
            Decision::Acknowledge => self.acknowledge(),
            Decision::Recover(_) => self.request_recover(),
            Decision::GiveUp => self.exhaust(),
        }
    }

    fn transition(
        &mut self,
        expected: DeliveryState,
        next: DeliveryState,
    ) -> Result<(), TransitionError> {
        if self.state != expected {
            return Err(TransitionError {
                message_id: self.message_id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
