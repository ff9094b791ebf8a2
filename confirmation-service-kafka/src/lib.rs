//! Kafka binding for [`confirmation_service::consumer::MessageSource`]: a single
//! `StreamConsumer` per consumer-group membership, manual offset commit via
//! `CommitMode::Sync` only after the Processor reports a committable outcome.

use confirmation_service::consumer::{MessageSource, RawMessage};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum KafkaSourceError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("message payload was not valid utf-8")]
    InvalidPayload,
}

pub struct KafkaSource {
    consumer: StreamConsumer,
}

impl KafkaSource {
    /// Builds a consumer subscribed to `topic` as a member of `consumer_group`.
    pub fn new(
        brokers: &[String],
        consumer_group: &str,
        topic: &str,
        connection_timeout: Duration,
    ) -> Result<Self, KafkaSourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", connection_timeout.as_millis().to_string())
            .create()?;
        consumer.subscribe(&[topic])?;
        Ok(Self { consumer })
    }
}

#[async_trait::async_trait]
impl MessageSource for KafkaSource {
    type Error = KafkaSourceError;

    async fn fetch(&self, timeout: Duration) -> Result<Option<RawMessage>, Self::Error> {
        let received = tokio::time::timeout(timeout, self.consumer.recv()).await;
        let message = match received {
            Ok(result) => result?,
            Err(_) => return Ok(None), // fetch timeout, not an error
        };

        let payload = message.payload().ok_or(KafkaSourceError::InvalidPayload)?;
        let payload = std::str::from_utf8(payload).map_err(|_| KafkaSourceError::InvalidPayload)?.to_string();

        Ok(Some(RawMessage {
            payload,
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        }))
    }

    async fn commit(&self, message: &RawMessage) -> Result<(), Self::Error> {
        let mut partitions = TopicPartitionList::new();
        partitions.add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))?;
        self.consumer.commit(&partitions, CommitMode::Sync)?;
        Ok(())
    }
}
