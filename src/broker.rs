//! Broker boundary used by the destination.
//!
//! The destination only ever talks to these traits, which keeps the batched
//! publish path independent of the Kafka client. [`crate::kafka`] provides the
//! production implementation.

use crate::{Config, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Creates broker clients from validated configuration.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connects to the broker. Fails with [`crate::Error::Connection`] when the
    /// broker cannot be reached; never retries.
    async fn connect(&self, config: &Config) -> Result<Box<dyn BrokerClient>>;
}

/// A live connection to the broker.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn create_producer(&self, topic: &str) -> Result<Arc<dyn TopicProducer>>;

    /// Releases the connection. Calling it more than once is a no-op.
    async fn close(&self) -> Result<()>;
}

/// A publisher bound to a single topic, shared by all concurrent sends.
#[async_trait]
pub trait TopicProducer: Send + Sync {
    /// Publishes one message and resolves once the broker acknowledged it.
    ///
    /// Implementations should give up with [`crate::Error::Cancelled`] when
    /// `cancel` fires before the acknowledgement arrives.
    async fn send(&self, key: Bytes, payload: Bytes, cancel: &CancellationToken) -> Result<()>;

    /// Flushes outstanding messages and stops accepting new ones.
    async fn close(&self) -> Result<()>;
}
