//! Destination that publishes batches of records to a topic.
//!
//! Every record of a batch is sent by its own task. The tasks share one
//! producer and one cancellation token: the first failed send cancels the
//! token so that siblings still waiting can give up, while sends the broker
//! already acknowledged stay counted. The returned count is exactly the number
//! of acknowledged sends, which gives the host at-least-once delivery when it
//! resubmits a failed batch.
//!
//! # Example
//!
//! ```rust,no_run
//! use topic_connector::{Destination, TopicDestination, Record};
//! use topic_connector::record::Position;
//! use std::collections::HashMap;
//!
//! # async fn example() -> topic_connector::Result<()> {
//! let mut destination = TopicDestination::kafka();
//! let raw = HashMap::from([
//!     ("servers".to_string(), "localhost:9092".to_string()),
//!     ("topic".to_string(), "orders".to_string()),
//! ]);
//!
//! destination.configure(&raw).await?;
//! destination.open().await?;
//!
//! let batch = vec![Record::create(Position::default(), "order-1", "{\"total\":10}")];
//! let written = destination.write(&batch).await.into_result()?;
//! assert_eq!(written, 1);
//!
//! destination.teardown().await?;
//! # Ok(())
//! # }
//! ```

use crate::broker::{BrokerClient, BrokerConnector, TopicProducer};
use crate::config::{self, Parameter, RawConfig};
use crate::connector::Destination;
use crate::kafka::KafkaConnector;
use crate::record::Record;
use crate::{Config, Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unconfigured,
    Configured,
    Opened,
    TornDown,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Unconfigured => "unconfigured",
            State::Configured => "configured",
            State::Opened => "opened",
            State::TornDown => "torn down",
        };
        f.write_str(name)
    }
}

/// Result of one `write` call.
///
/// `written` counts records the broker acknowledged. They are not necessarily
/// the first `written` records of the batch since sends complete in any order.
#[derive(Debug)]
pub struct WriteOutcome {
    pub written: usize,
    pub error: Option<Error>,
}

impl WriteOutcome {
    fn complete(written: usize) -> Self {
        Self {
            written,
            error: None,
        }
    }

    fn failed(written: usize, error: Error) -> Self {
        Self {
            written,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Drops the partial count on failure.
    pub fn into_result(self) -> Result<usize> {
        match self.error {
            None => Ok(self.written),
            Some(err) => Err(err),
        }
    }
}

pub struct TopicDestination {
    connector: Arc<dyn BrokerConnector>,
    state: State,
    config: Option<Config>,
    client: Option<Box<dyn BrokerClient>>,
    producer: Option<Arc<dyn TopicProducer>>,
    shutdown: CancellationToken,
}

impl TopicDestination {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            state: State::Unconfigured,
            config: None,
            client: None,
            producer: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// A destination publishing to Kafka.
    pub fn kafka() -> Self {
        Self::new(Arc::new(KafkaConnector))
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }
}

#[async_trait]
impl Destination for TopicDestination {
    fn parameters(&self) -> BTreeMap<String, Parameter> {
        config::parameters()
    }

    #[instrument(skip_all)]
    async fn configure(&mut self, raw: &RawConfig) -> Result<()> {
        match self.state {
            State::Unconfigured | State::Configured => {}
            state => {
                return Err(Error::InvalidState(format!(
                    "cannot configure a destination that is {}",
                    state
                )))
            }
        }

        info!("Configuring destination");
        let config = Config::parse(raw).map_err(|e| {
            error!(error = %e, "Invalid destination configuration");
            e
        })?;

        info!(
            servers = ?config.servers,
            topic = %config.topic,
            tls = config.tls.enabled(),
            max_in_flight = ?config.max_in_flight,
            "Destination configured"
        );

        self.config = Some(config);
        self.state = State::Configured;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn open(&mut self) -> Result<()> {
        let config = match (self.state, &self.config) {
            (State::Configured, Some(config)) => config,
            (state, _) => {
                return Err(Error::InvalidState(format!(
                    "cannot open a destination that is {}",
                    state
                )))
            }
        };

        let client = self.connector.connect(config).await?;
        let producer = match client.create_producer(&config.topic).await {
            Ok(producer) => producer,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!(error = %close_err, "Failed to close client after producer creation failed");
                }
                return Err(e);
            }
        };

        info!(topic = %config.topic, "Destination opened");
        self.client = Some(client);
        self.producer = Some(producer);
        self.state = State::Opened;
        Ok(())
    }

    #[instrument(skip_all, fields(records = records.len()))]
    async fn write(&self, records: &[Record]) -> WriteOutcome {
        let producer = match (&self.producer, self.state) {
            (Some(producer), State::Opened) => Arc::clone(producer),
            _ => return WriteOutcome::failed(0, Error::NotOpen),
        };

        if records.is_empty() {
            return WriteOutcome::complete(0);
        }

        let written = Arc::new(AtomicUsize::new(0));
        let cancel = self.shutdown.child_token();
        // The in-flight cap applies to this write only.
        let limiter = self
            .config
            .as_ref()
            .and_then(|config| config.max_in_flight)
            .map(|n| Arc::new(Semaphore::new(n)));
        let mut units = JoinSet::new();

        for record in records {
            let producer = Arc::clone(&producer);
            let written = Arc::clone(&written);
            let cancel = cancel.clone();
            let limiter = limiter.clone();
            let key = record.key.clone();
            let payload = record.value();

            units.spawn(async move {
                // Held until the send resolves.
                let _permit = match limiter {
                    Some(limiter) => {
                        let permit = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(Error::Cancelled),
                            permit = limiter.acquire_owned() => {
                                permit.map_err(|_| Error::Cancelled)?
                            }
                        };
                        // A failed sibling may have released this permit.
                        if cancel.is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        Some(permit)
                    }
                    None => None,
                };

                if let Err(err) = producer.send(key, payload, &cancel).await {
                    // Stop siblings before the permit is handed on.
                    if !matches!(err, Error::Cancelled) {
                        cancel.cancel();
                    }
                    return Err(err);
                }
                written.fetch_add(1, Ordering::AcqRel);
                Ok::<(), Error>(())
            });
        }

        let mut first_error: Option<Error> = None;
        while let Some(joined) = units.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(Error::Send {
                    message: format!("send task failed: {}", e),
                    retryable: false,
                })
            });

            if let Err(err) = result {
                // A sibling's cancellation may be joined before the failure
                // that caused it.
                let replaces = match &first_error {
                    None => true,
                    Some(Error::Cancelled) => !matches!(err, Error::Cancelled),
                    Some(_) => false,
                };
                if replaces {
                    warn!(error = %err, "Send failed, cancelling remaining sends");
                    cancel.cancel();
                    first_error = Some(err);
                } else {
                    debug!(error = %err, "Additional send failure");
                }
            }
        }

        let written = written.load(Ordering::Acquire);
        match first_error {
            Some(err) => {
                error!(written, total = records.len(), error = %err, "Batch partially written");
                WriteOutcome::failed(written, err)
            }
            None => {
                debug!(written, "Batch written");
                WriteOutcome::complete(written)
            }
        }
    }

    #[instrument(skip_all)]
    async fn teardown(&mut self) -> Result<()> {
        self.shutdown.cancel();

        let mut failures = Vec::new();

        // Producer first so in-flight messages are flushed over a live connection.
        if let Some(producer) = self.producer.take() {
            if let Err(e) = producer.close().await {
                warn!(error = %e, "Failed to close producer");
                failures.push(format!("producer: {}", e));
            }
        }

        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                warn!(error = %e, "Failed to close client");
                failures.push(format!("client: {}", e));
            }
        }

        if self.state != State::TornDown {
            info!(from = %self.state, "Destination torn down");
        }
        self.state = State::TornDown;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown(failures.join("; ")))
        }
    }
}
