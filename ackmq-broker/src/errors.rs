use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    #[error("invalid broker configuration: {0}")]
    Config(String),
    #[error("broker is closed")]
    Closed,
}
