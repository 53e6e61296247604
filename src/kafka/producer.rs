use crate::broker::TopicProducer;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A Kafka producer bound to one topic.
pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
    queue_timeout: Duration,
    flush_timeout: Duration,
    closed: AtomicBool,
}

impl KafkaProducer {
    pub fn new(
        producer: FutureProducer,
        topic: &str,
        queue_timeout: Duration,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            producer,
            topic: topic.to_string(),
            queue_timeout,
            flush_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl TopicProducer for KafkaProducer {
    async fn send(&self, key: Bytes, payload: Bytes, cancel: &CancellationToken) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotOpen);
        }
        // Once queued in librdkafka a message cannot be recalled.
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let record = FutureRecord::to(&self.topic)
            .payload(&payload[..])
            .key(&key[..]);

        // Dropping the delivery future on cancellation does not recall a
        // message already queued in librdkafka; it may still be delivered.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            delivery = self.producer.send(record, Timeout::After(self.queue_timeout)) => {
                let (partition, offset) = delivery.map_err(|(e, _)| Error::from_delivery(e))?;
                debug!(topic = %self.topic, partition, offset, "Message delivered");
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let producer = self.producer.clone();
        let timeout = self.flush_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::Teardown(format!("flush aborted: {}", e)))?
            .map_err(|e| {
                warn!(topic = %self.topic, error = %e, "Producer flush failed");
                Error::Teardown(format!("failed to flush producer: {}", e))
            })?;

        info!(topic = %self.topic, "Producer closed");
        Ok(())
    }
}
