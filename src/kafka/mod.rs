pub mod client;
pub mod consumer;
pub mod producer;

pub use client::{KafkaClient, KafkaConnector};
pub use consumer::{KafkaConsumer, KafkaPosition};
pub use producer::KafkaProducer;
