mod group;
mod subscriber;

pub use group::GroupBroker;
pub use subscriber::{Subscriber, SubscriberId};

/// Limits the broker enforces at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Live connections allowed per principal identity, across all of
    /// its devices.
    pub max_connections_per_identity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_connections_per_identity: 8,
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    #[error("connection cap exceeded for identity")]
    ConnectionCapExceeded,
    #[error("unknown subscriber")]
    UnknownSubscriber,
}
