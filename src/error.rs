//! Error types and result handling for topic-connector.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use topic_connector::{Error, Result};
//!
//! fn open_destination() -> Result<()> {
//!     // Simulating a broker that cannot be reached
//!     Err(Error::Connection("broker unreachable".to_string()))
//! }
//!
//! match open_destination() {
//!     Ok(()) => println!("Opened"),
//!     Err(Error::Connection(msg)) => eprintln!("Connection error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

/// The main error type for topic-connector operations.
///
/// The first four variants mirror the connector lifecycle: configuration,
/// connecting, sending and releasing resources. The rest cover misuse of the
/// lifecycle and wrapped library errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The broker could not be reached or the TLS handshake failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single record could not be published.
    #[error("Send error: {message}")]
    Send {
        /// Description of the failed send
        message: String,
        /// Whether the broker reported the failure as transient
        retryable: bool,
    },

    /// A send was abandoned because a sibling send in the same batch failed.
    #[error("Send cancelled")]
    Cancelled,

    /// `write` or `read` was called without an open producer or consumer.
    #[error("Connector is not open")]
    NotOpen,

    /// A lifecycle call arrived in a state that does not allow it.
    #[error("Invalid connector state: {0}")]
    InvalidState(String),

    /// Releasing the producer or the client failed.
    #[error("Teardown error: {0}")]
    Teardown(String),

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// JSON serialization error when encoding positions or records.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from reading record input.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds a [`Error::Send`] from a Kafka delivery failure.
    pub fn from_delivery(err: KafkaError) -> Self {
        let retryable = matches!(
            err.rdkafka_error_code(),
            Some(
                RDKafkaErrorCode::MessageTimedOut
                    | RDKafkaErrorCode::QueueFull
                    | RDKafkaErrorCode::RequestTimedOut
                    | RDKafkaErrorCode::NotLeaderForPartition
                    | RDKafkaErrorCode::LeaderNotAvailable
                    | RDKafkaErrorCode::BrokerTransportFailure
                    | RDKafkaErrorCode::AllBrokersDown
                    | RDKafkaErrorCode::NetworkException
            )
        );

        Error::Send {
            message: err.to_string(),
            retryable,
        }
    }

    /// Whether resubmitting the same batch may succeed.
    ///
    /// Retry policy belongs to the host; this is only a hint.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Send { retryable, .. } => *retryable,
            Error::Connection(_) | Error::Cancelled => true,
            _ => false,
        }
    }
}

/// A convenient Result type alias for topic-connector operations.
///
/// This is equivalent to `std::result::Result<T, topic_connector::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
