use crate::broker::{BrokerClient, BrokerConnector, TopicProducer};
use crate::kafka::KafkaProducer;
use crate::{Config, Error, Result};
use async_trait::async_trait;
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientConfig;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Builds the settings shared by every Kafka client the connector creates.
pub fn client_config(config: &Config) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", config.bootstrap_servers());

    if config.tls.enabled() {
        client.set("security.protocol", "ssl");
        if let Some(path) = &config.tls.trust_certs_file_path {
            client.set("ssl.ca.location", path.to_string_lossy());
        }
        if let Some(path) = &config.tls.cert_path {
            client.set("ssl.certificate.location", path.to_string_lossy());
        }
        if let Some(path) = &config.tls.private_key_path {
            client.set("ssl.key.location", path.to_string_lossy());
        }
        if config.tls.allow_insecure {
            client.set("enable.ssl.certificate.verification", "false");
        }
    } else {
        client.set("security.protocol", "plaintext");
    }

    client
}

/// Settings for the producer side on top of [`client_config`].
pub fn producer_config(config: &Config) -> ClientConfig {
    let mut client = client_config(config);
    client
        .set("acks", config.acks.as_str())
        .set("compression.type", config.compression.as_str())
        .set("message.timeout.ms", config.send_timeout.as_millis().to_string());
    client
}

/// Connects to Kafka with `rdkafka`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KafkaConnector;

#[async_trait]
impl BrokerConnector for KafkaConnector {
    #[instrument(skip_all, fields(servers = %config.bootstrap_servers(), topic = %config.topic))]
    async fn connect(&self, config: &Config) -> Result<Box<dyn BrokerClient>> {
        let producer: FutureProducer = producer_config(config)
            .create()
            .map_err(|e| Error::Connection(format!("failed to create Kafka client: {}", e)))?;

        // librdkafka connects lazily; fetching metadata surfaces unreachable
        // brokers and TLS failures here instead of on the first send.
        let probe = producer.clone();
        let topic = config.topic.clone();
        let timeout = config.connect_timeout;
        let metadata = tokio::task::spawn_blocking(move || {
            probe.client().fetch_metadata(Some(&topic), timeout)
        })
        .await
        .map_err(|e| Error::Connection(format!("metadata probe aborted: {}", e)))?
        .map_err(|e| Error::Connection(format!("broker unreachable: {}", e)))?;

        info!(brokers = metadata.brokers().len(), "Connected to Kafka");
        for topic in metadata.topics() {
            if let Some(err) = topic.error() {
                let code = RDKafkaErrorCode::from(err);
                warn!(topic = topic.name(), error = %code, "Topic metadata reported an error");
            }
        }

        Ok(Box::new(KafkaClient {
            producer: Mutex::new(Some(producer)),
            send_timeout: config.send_timeout,
            flush_timeout: config.flush_timeout,
        }))
    }
}

pub struct KafkaClient {
    producer: Mutex<Option<FutureProducer>>,
    send_timeout: std::time::Duration,
    flush_timeout: std::time::Duration,
}

#[async_trait]
impl BrokerClient for KafkaClient {
    async fn create_producer(&self, topic: &str) -> Result<Arc<dyn TopicProducer>> {
        let producer = self
            .producer
            .lock()
            .map_err(|_| Error::Connection("client lock poisoned".to_string()))?
            .clone()
            .ok_or(Error::NotOpen)?;

        debug!(topic, "Creating topic producer");
        Ok(Arc::new(KafkaProducer::new(
            producer,
            topic,
            self.send_timeout,
            self.flush_timeout,
        )))
    }

    async fn close(&self) -> Result<()> {
        let released = self
            .producer
            .lock()
            .map_err(|_| Error::Teardown("client lock poisoned".to_string()))?
            .take();

        if released.is_some() {
            info!("Kafka client closed");
        }
        Ok(())
    }
}
