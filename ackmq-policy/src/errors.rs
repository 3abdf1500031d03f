use crate::attempt::DeliveryState;
use ackmq_models::core::MessageId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("backoff multiplier must be a finite number >= 1, got {0}")]
    InvalidMultiplier(f64),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("message {message_id} cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub message_id: MessageId,
    pub from: DeliveryState,
    pub to: DeliveryState,
}

/// Domain failure reported by a listener. Always answered with a recover.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct HandlerFailure {
    reason: String,
}

impl HandlerFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}
