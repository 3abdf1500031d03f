use crate::BrokerError;
use serde::{Deserialize, Serialize};
use std::fmt;

const IN_PROCESS_SCHEMES: [&str; 2] = ["vm", "memory"];

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Connection settings for a broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOptions {
    pub url: String,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    pub max_connections: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            url: "vm://localhost".into(),
            credentials: None,
            max_connections: 100,
        }
    }
}

impl BrokerOptions {
    /// Checks that the options describe a broker reachable in this process.
    pub fn validate(&self) -> Result<(), BrokerError> {
        let (scheme, host) = self.url.split_once("://").ok_or_else(|| {
            BrokerError::Connection(format!("malformed broker url '{}'", self.url))
        })?;

        if !IN_PROCESS_SCHEMES.contains(&scheme) {
            return Err(BrokerError::Connection(format!(
                "cannot reach '{}': only {} urls are served in process",
                self.url,
                IN_PROCESS_SCHEMES.join("/")
            )));
        }

        if host.trim().is_empty() {
            return Err(BrokerError::Connection(format!(
                "broker url '{}' has no broker name",
                self.url
            )));
        }

        if let Some(credentials) = &self.credentials {
            if credentials.user.trim().is_empty() {
                return Err(BrokerError::Connection("user name is empty".into()));
            }
        }

        if self.max_connections == 0 {
            return Err(BrokerError::Config(
                "max_connections must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Delivery counters for one destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationStats {
    pub sent: u64,
    pub delivered: u64,
    pub acknowledged: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
    /// Topic messages sent while nobody was subscribed.
    pub dropped: u64,
    pub pending: usize,
    pub consumers: usize,
}
