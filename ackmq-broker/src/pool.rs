use crate::BrokerError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded set of producer connections; a send holds one for its duration.
pub(crate) struct ConnectionPool {
    permits: Arc<Semaphore>,
}

impl ConnectionPool {
    pub(crate) fn new(max_connections: usize) -> Result<Self, BrokerError> {
        if max_connections == 0 {
            return Err(BrokerError::Config(
                "max_connections must be at least 1".into(),
            ));
        }

        Ok(Self {
            permits: Arc::new(Semaphore::new(max_connections)),
        })
    }

    pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit, BrokerError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| BrokerError::Closed)
    }

    pub(crate) fn close(&self) {
        self.permits.close();
    }
}
