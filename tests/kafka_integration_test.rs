mod common;

use common::{raw_config, records};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use std::collections::HashSet;
use std::env;
use std::time::Duration;
use tokio::time::timeout;
use topic_connector::record::Position;
use topic_connector::{Destination, Error, Record, Source, TopicDestination, TopicSource};

fn brokers() -> String {
    env::var("TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string())
}

fn unique_topic(name: &str) -> String {
    format!("test_{}_{}", name, std::process::id())
}

fn test_config(topic: &str, extra: &[(&str, &str)]) -> topic_connector::config::RawConfig {
    let mut raw = raw_config(extra);
    raw.insert("servers".to_string(), brokers());
    raw.insert("topic".to_string(), topic.to_string());
    raw
}

async fn create_test_consumer(topic: &str) -> StreamConsumer {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers())
        .set("group.id", format!("test-consumer-{}", std::process::id()))
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .create()
        .expect("Failed to create consumer");

    consumer.subscribe(&[topic]).expect("Failed to subscribe");
    consumer
}

#[tokio::test]
#[ignore] // Requires running Kafka
async fn test_destination_writes_to_kafka() {
    tracing_subscriber::fmt()
        .with_env_filter("topic_connector=debug,rdkafka=info")
        .try_init()
        .ok();

    let topic = unique_topic("destination");
    let mut destination = TopicDestination::kafka();
    destination.configure(&test_config(&topic, &[])).await.unwrap();
    destination.open().await.unwrap();

    let batch = records(6);
    let outcome = destination.write(&batch).await;
    assert!(outcome.is_ok(), "write failed: {:?}", outcome.error);
    assert_eq!(outcome.written, batch.len());

    destination.teardown().await.unwrap();
    destination.teardown().await.unwrap();

    let consumer = create_test_consumer(&topic).await;
    let mut received = HashSet::new();
    let start = tokio::time::Instant::now();

    while received.len() < batch.len() && start.elapsed() < Duration::from_secs(15) {
        if let Ok(Ok(message)) = timeout(Duration::from_secs(1), consumer.recv()).await {
            let payload = String::from_utf8_lossy(message.payload().unwrap_or_default()).into_owned();
            received.insert(payload);
        }
    }

    for i in 0..batch.len() {
        assert!(received.contains(&format!("test-payload-{}", i)));
    }
}

#[tokio::test]
#[ignore] // Requires running Kafka
async fn test_open_fails_for_unreachable_broker() {
    let mut destination = TopicDestination::kafka();
    let mut raw = test_config("unreachable", &[("connectTimeoutMs", "1000")]);
    raw.insert("servers".to_string(), "127.0.0.1:1".to_string());
    destination.configure(&raw).await.unwrap();

    let err = destination.open().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));

    destination.teardown().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires running Kafka
async fn test_source_reads_what_destination_wrote() {
    let topic = unique_topic("roundtrip");
    let raw = test_config(
        &topic,
        &[
            ("readFromBeginning", "true"),
            ("groupId", "topic-connector-test"),
        ],
    );

    let mut destination = TopicDestination::kafka();
    destination.configure(&raw).await.unwrap();
    destination.open().await.unwrap();
    let record = Record::create(Position::default(), "order-1", "{\"total\":10}");
    destination.write(&[record]).await.into_result().unwrap();
    destination.teardown().await.unwrap();

    let mut source = TopicSource::new();
    source.configure(&raw).await.unwrap();
    source.open(None).await.unwrap();

    let read = timeout(Duration::from_secs(20), source.read())
        .await
        .expect("timed out waiting for record")
        .unwrap();
    assert_eq!(&read.key[..], b"order-1");
    assert_eq!(read.metadata["kafka.topic"], topic);

    source.ack(&read.position).await.unwrap();
    source.teardown().await.unwrap();
}
