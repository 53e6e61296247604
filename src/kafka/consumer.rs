use crate::kafka::client::client_config;
use crate::record::{Position, Record};
use crate::{Config, Error, Result};
use chrono::{TimeZone, Utc};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Where a consumed message sits in its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaPosition {
    pub partition: i32,
    pub offset: i64,
}

impl KafkaPosition {
    pub fn encode(&self) -> Result<Position> {
        Ok(Position::from(serde_json::to_vec(self)?))
    }

    pub fn decode(position: &Position) -> Result<Self> {
        Ok(serde_json::from_slice(position.as_bytes())?)
    }
}

/// Settings for the consumer side on top of [`client_config`].
pub fn consumer_config(config: &Config) -> ClientConfig {
    let mut client = client_config(config);
    client
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "false")
        .set("enable.partition.eof", "false")
        .set(
            "auto.offset.reset",
            if config.read_from_beginning { "earliest" } else { "latest" },
        );
    client
}

pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaConsumer {
    pub fn subscribe(config: &Config) -> Result<Self> {
        let consumer: StreamConsumer = consumer_config(config)
            .create()
            .map_err(|e| Error::Connection(format!("failed to create Kafka consumer: {}", e)))?;

        consumer.subscribe(&[config.topic.as_str()])?;
        info!(topic = %config.topic, group = %config.group_id, "Subscribed to topic");

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }

    /// Waits for the next message and converts it into a record.
    pub async fn recv(&self) -> Result<(KafkaPosition, Record)> {
        let message = self.consumer.recv().await?;
        to_record(&message)
    }

    /// Commits everything up to and including `position`.
    pub fn commit(&self, position: KafkaPosition) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(&self.topic, position.partition, Offset::Offset(position.offset + 1))?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        debug!(partition = position.partition, offset = position.offset, "Committed offset");
        Ok(())
    }

    pub fn unsubscribe(&self) {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Unsubscribed from topic");
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> Result<(KafkaPosition, Record)> {
    let position = KafkaPosition {
        partition: message.partition(),
        offset: message.offset(),
    };

    let mut record = Record::create(
        position.encode()?,
        message.key().map(|k| k.to_vec()).unwrap_or_default(),
        message.payload().map(|p| p.to_vec()).unwrap_or_default(),
    )
    .with_metadata("kafka.topic", message.topic())
    .with_metadata("kafka.partition", position.partition.to_string())
    .with_metadata("kafka.offset", position.offset.to_string());

    if let Some(millis) = message.timestamp().to_millis() {
        if let Some(created) = Utc.timestamp_millis_opt(millis).single() {
            record = record.with_metadata("kafka.timestamp", created.to_rfc3339());
        }
    }

    Ok((position, record))
}
