use crate::config::{self, Parameter, RawConfig};
use crate::connector::Source;
use crate::kafka::{KafkaConsumer, KafkaPosition};
use crate::record::{Position, Record};
use crate::{Config, Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument};

/// Source that reads records from a Kafka topic through a consumer group.
#[derive(Default)]
pub struct TopicSource {
    config: Option<Config>,
    consumer: Option<KafkaConsumer>,
    // Highest offset per partition the host already acknowledged before open.
    resume_after: HashMap<i32, i64>,
    torn_down: bool,
}

impl TopicSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn consumer(&self) -> Result<&KafkaConsumer> {
        self.consumer.as_ref().ok_or(Error::NotOpen)
    }

    fn already_acked(&self, position: &KafkaPosition) -> bool {
        self.resume_after
            .get(&position.partition)
            .is_some_and(|last| position.offset <= *last)
    }
}

#[async_trait]
impl Source for TopicSource {
    fn parameters(&self) -> BTreeMap<String, Parameter> {
        config::parameters()
    }

    #[instrument(skip_all)]
    async fn configure(&mut self, raw: &RawConfig) -> Result<()> {
        if self.consumer.is_some() || self.torn_down {
            return Err(Error::InvalidState(
                "cannot configure a source after open".to_string(),
            ));
        }

        let config = Config::parse(raw)?;
        info!(topic = %config.topic, group = %config.group_id, "Source configured");
        self.config = Some(config);
        Ok(())
    }

    #[instrument(skip_all)]
    async fn open(&mut self, position: Option<Position>) -> Result<()> {
        if self.consumer.is_some() || self.torn_down {
            return Err(Error::InvalidState("source is already open".to_string()));
        }
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| Error::InvalidState("cannot open an unconfigured source".to_string()))?;

        if let Some(position) = position.filter(|p| !p.is_empty()) {
            let position = KafkaPosition::decode(&position)?;
            info!(partition = position.partition, offset = position.offset, "Resuming after position");
            self.resume_after.insert(position.partition, position.offset);
        }

        self.consumer = Some(KafkaConsumer::subscribe(config)?);
        Ok(())
    }

    async fn read(&self) -> Result<Record> {
        let consumer = self.consumer()?;
        loop {
            let (position, record) = consumer.recv().await?;
            if self.already_acked(&position) {
                debug!(partition = position.partition, offset = position.offset, "Skipping acknowledged record");
                continue;
            }
            return Ok(record);
        }
    }

    async fn ack(&self, position: &Position) -> Result<()> {
        let position = KafkaPosition::decode(position)?;
        self.consumer()?.commit(position)
    }

    #[instrument(skip_all)]
    async fn teardown(&mut self) -> Result<()> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
        }
        if !self.torn_down {
            info!("Source torn down");
        }
        self.torn_down = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawConfig {
        RawConfig::from([
            ("servers".to_string(), "localhost:9092".to_string()),
            ("topic".to_string(), "orders".to_string()),
        ])
    }

    #[tokio::test]
    async fn test_teardown_without_open() {
        let mut source = TopicSource::new();
        source.teardown().await.unwrap();
        source.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_before_open() {
        let mut source = TopicSource::new();
        source.configure(&raw()).await.unwrap();

        assert!(matches!(source.read().await, Err(Error::NotOpen)));
    }

    #[tokio::test]
    async fn test_open_without_configure() {
        let mut source = TopicSource::new();
        let err = source.open(None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_configure_after_teardown_is_rejected() {
        let mut source = TopicSource::new();
        source.teardown().await.unwrap();
        assert!(matches!(source.configure(&raw()).await, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_resume_skips_acknowledged_offsets() {
        let mut source = TopicSource::new();
        source.resume_after.insert(0, 10);

        assert!(source.already_acked(&KafkaPosition { partition: 0, offset: 10 }));
        assert!(!source.already_acked(&KafkaPosition { partition: 0, offset: 11 }));
        assert!(!source.already_acked(&KafkaPosition { partition: 1, offset: 0 }));
    }
}
