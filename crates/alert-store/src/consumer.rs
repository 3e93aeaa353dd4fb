use crate::Error;
use alert_backend::Alert;
use std::collections::BTreeMap;
use std::time::Duration;

/// TopicPartition identifies a partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Record is a consumed log record. Its `alert` is None if the record's
/// value could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub partition: TopicPartition,
    pub offset: i64,
    pub alert: Option<Alert>,
}

impl Record {
    /// Decode a record from its raw value, logging and skipping undecodable values.
    pub fn decode(partition: TopicPartition, offset: i64, value: Option<&[u8]>) -> Self {
        let alert = match value.map(serde_json::from_slice::<Alert>) {
            Some(Ok(alert)) => Some(alert),
            Some(Err(error)) => {
                tracing::warn!(%partition, offset, %error, "skipping record which failed to decode");
                None
            }
            None => {
                tracing::warn!(%partition, offset, "skipping record without a value");
                None
            }
        };
        Self {
            partition,
            offset,
            alert,
        }
    }
}

/// Polled is the outcome of a single consumer poll: partition assignment
/// changes observed since the last poll, and the records which were fetched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Polled {
    pub revoked: Vec<TopicPartition>,
    pub assigned: Vec<TopicPartition>,
    pub records: Vec<Record>,
}

/// LogConsumer is a consumer-group member of the alert log.
#[async_trait::async_trait]
pub trait LogConsumer: Send {
    /// Wait up to `timeout` for records. Dropping the returned future
    /// abandons the poll.
    async fn poll(&mut self, timeout: Duration) -> Result<Polled, Error>;

    /// Commit the given last-processed offsets. The consumer's position
    /// for each partition becomes one past its offset.
    async fn commit(&mut self, offsets: &BTreeMap<TopicPartition, i64>) -> Result<(), Error>;

    /// Leave the consumer group and release the consumer.
    async fn close(&mut self) -> Result<(), Error>;
}
