use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type MessageId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// Point-to-point: every message is consumed by exactly one subscriber.
    Queue,
    /// Publish-subscribe: every subscriber gets its own copy.
    Topic,
}

impl DestinationKind {
    fn scheme(&self) -> &'static str {
        match self {
            DestinationKind::Queue => "queue",
            DestinationKind::Topic => "topic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    pub kind: DestinationKind,
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind.scheme(), self.name)
    }
}

/// A text payload travelling through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub message_id: MessageId,
    pub destination: Destination,
    pub payload: String,
    #[serde(default = "utc_now")]
    pub sent_at: DateTime<Utc>,
}

impl TextMessage {
    pub fn new(destination: Destination, payload: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            destination,
            payload: payload.into(),
            sent_at: utc_now(),
        }
    }
}

fn utc_now() -> DateTime<Utc> {
    Utc::now()
}
