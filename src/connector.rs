//! Lifecycle contracts the orchestration host drives.
//!
//! The host calls `configure`, then `open`, then `write` (destination) or
//! `read`/`ack` (source) any number of times, then `teardown`. Teardown may
//! arrive in any state, including before `configure`.

use crate::config::{Parameter, RawConfig};
use crate::destination::WriteOutcome;
use crate::record::{Position, Record};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

#[async_trait]
pub trait Destination: Send + Sync {
    fn parameters(&self) -> BTreeMap<String, Parameter>;

    async fn configure(&mut self, raw: &RawConfig) -> Result<()>;

    async fn open(&mut self) -> Result<()>;

    /// Publishes the batch and reports how many records the broker accepted.
    ///
    /// A non-empty error is always present when fewer than `records.len()`
    /// records were written.
    async fn write(&self, records: &[Record]) -> WriteOutcome;

    async fn teardown(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Source: Send + Sync {
    fn parameters(&self) -> BTreeMap<String, Parameter>;

    async fn configure(&mut self, raw: &RawConfig) -> Result<()>;

    /// Opens the source, skipping records up to and including `position`.
    async fn open(&mut self, position: Option<Position>) -> Result<()>;

    async fn read(&self) -> Result<Record>;

    async fn ack(&self, position: &Position) -> Result<()>;

    async fn teardown(&mut self) -> Result<()>;
}

/// Identifies the connector to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Specification {
    pub name: &'static str,
    pub summary: &'static str,
    pub version: &'static str,
    pub author: &'static str,
}

pub fn specification() -> Specification {
    Specification {
        name: env!("CARGO_PKG_NAME"),
        summary: "Publishes records to and reads records from a Kafka topic.",
        version: env!("CARGO_PKG_VERSION"),
        author: env!("CARGO_PKG_AUTHORS"),
    }
}
