#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use topic_connector::broker::{BrokerClient, BrokerConnector, TopicProducer};
use topic_connector::config::RawConfig;
use topic_connector::record::Position;
use topic_connector::{Config, Error, Record, Result};

/// Counters shared between a mock broker and the test observing it.
#[derive(Default)]
pub struct BrokerStats {
    pub connects: AtomicUsize,
    pub acked: AtomicUsize,
    pub attempts: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub messages: Mutex<Vec<(Bytes, Bytes)>>,
    pub closed: Mutex<Vec<&'static str>>,
}

impl BrokerStats {
    pub fn acked(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn close_order(&self) -> Vec<&'static str> {
        self.closed.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
struct Behavior {
    failing_keys: HashSet<Bytes>,
    delay: Option<Duration>,
    honor_cancel: bool,
    refuse_connections: bool,
    fail_producer_close: bool,
}

/// In-memory broker that fails sends for selected keys.
#[derive(Clone, Default)]
pub struct MockConnector {
    behavior: Behavior,
    stats: Arc<BrokerStats>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_keys(mut self, keys: &[&str]) -> Self {
        self.behavior.failing_keys = keys.iter().map(|k| Bytes::from(k.to_string())).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.behavior.delay = Some(delay);
        self
    }

    pub fn honoring_cancel(mut self) -> Self {
        self.behavior.honor_cancel = true;
        self
    }

    pub fn refusing_connections(mut self) -> Self {
        self.behavior.refuse_connections = true;
        self
    }

    pub fn failing_producer_close(mut self) -> Self {
        self.behavior.fail_producer_close = true;
        self
    }

    pub fn stats(&self) -> Arc<BrokerStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self, config: &Config) -> Result<Box<dyn BrokerClient>> {
        if self.behavior.refuse_connections {
            return Err(Error::Connection(format!(
                "connection refused by {}",
                config.bootstrap_servers()
            )));
        }

        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockClient {
            behavior: self.behavior.clone(),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct MockClient {
    behavior: Behavior,
    stats: Arc<BrokerStats>,
}

#[async_trait]
impl BrokerClient for MockClient {
    async fn create_producer(&self, _topic: &str) -> Result<Arc<dyn TopicProducer>> {
        Ok(Arc::new(MockProducer {
            behavior: self.behavior.clone(),
            stats: Arc::clone(&self.stats),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.stats.closed.lock().unwrap().push("client");
        Ok(())
    }
}

struct MockProducer {
    behavior: Behavior,
    stats: Arc<BrokerStats>,
}

impl MockProducer {
    async fn deliver(&self, key: Bytes, payload: Bytes, cancel: &CancellationToken) -> Result<()> {
        if self.behavior.failing_keys.contains(&key) {
            return Err(Error::Send {
                message: format!("injected failure for {}", String::from_utf8_lossy(&key)),
                retryable: false,
            });
        }

        if let Some(delay) = self.behavior.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled(), if self.behavior.honor_cancel => return Err(Error::Cancelled),
            }
        }

        self.stats.messages.lock().unwrap().push((key, payload));
        self.stats.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TopicProducer for MockProducer {
    async fn send(&self, key: Bytes, payload: Bytes, cancel: &CancellationToken) -> Result<()> {
        self.stats.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.deliver(key, payload, cancel).await;

        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> Result<()> {
        self.stats.closed.lock().unwrap().push("producer");
        if self.behavior.fail_producer_close {
            return Err(Error::Teardown("flush timed out".to_string()));
        }
        Ok(())
    }
}

pub fn raw_config(extra: &[(&str, &str)]) -> RawConfig {
    let mut raw = RawConfig::from([
        ("servers".to_string(), "localhost:9092".to_string()),
        ("topic".to_string(), "test-topic".to_string()),
    ]);
    for (key, value) in extra {
        raw.insert(key.to_string(), value.to_string());
    }
    raw
}

/// Records keyed `record-0`, `record-1`, ... with matching payloads.
pub fn records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::create(
                Position::default(),
                format!("record-{}", i),
                format!("test-payload-{}", i),
            )
        })
        .collect()
}
