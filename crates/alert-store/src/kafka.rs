//! LogConsumer of a Kafka topic, built on librdkafka.

use crate::{Error, KafkaConfig, LogConsumer, Polled, Record, TopicPartition};
use futures::FutureExt;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::{ClientConfig, ClientContext, Message, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Maximum number of records returned by a single poll.
pub const MAX_POLL_RECORDS: usize = 500;

/// RebalanceContext records partition assignment changes as they're
/// delivered by librdkafka, until they're taken by the next poll.
#[derive(Default)]
pub struct RebalanceContext {
    changes: Mutex<(Vec<TopicPartition>, Vec<TopicPartition>)>,
}

impl RebalanceContext {
    fn take(&self) -> (Vec<TopicPartition>, Vec<TopicPartition>) {
        std::mem::take(&mut *self.changes.lock().unwrap())
    }
}

fn partitions(list: &TopicPartitionList) -> Vec<TopicPartition> {
    list.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(list) = rebalance {
            let revoked = partitions(list);
            tracing::info!(?revoked, "partitions are being revoked");
            self.changes.lock().unwrap().0.extend(revoked);
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(list) => {
                let assigned = partitions(list);
                tracing::info!(?assigned, "partitions were assigned");
                self.changes.lock().unwrap().1.extend(assigned);
            }
            Rebalance::Error(err) => tracing::warn!(error = %err, "consumer group rebalance failed"),
            Rebalance::Revoke(_) => (),
        }
    }
}

type Inner = StreamConsumer<RebalanceContext>;

/// KafkaConsumer is a LogConsumer subscribed to the alert topic.
pub struct KafkaConsumer {
    consumer: Arc<Inner>,
}

impl KafkaConsumer {
    /// Build a consumer for task `task_id`. Auto-commit is always disabled,
    /// and the client id is made distinct for each task.
    pub fn new(config: &KafkaConfig, task_id: usize) -> Result<Self, Error> {
        let properties = config.consumer_properties();
        let client_id = format!(
            "{}-{task_id}",
            properties
                .get("client.id")
                .map(String::as_str)
                .unwrap_or("alert-store")
        );

        let mut client = ClientConfig::new();
        for (key, value) in properties {
            client.set(key, value);
        }
        client
            .set("enable.auto.commit", "false")
            .set("client.id", client_id.clone());

        let consumer: Inner = client.create_with_context(RebalanceContext::default())?;
        consumer.subscribe(&[config.topic.as_str()])?;

        tracing::info!(%client_id, topic = %config.topic, "subscribed consumer");

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }
}

#[async_trait::async_trait]
impl LogConsumer for KafkaConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Polled, Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut records = Vec::new();

        // Wait for a first record, then take those which are immediately ready.
        if let Ok(message) = tokio::time::timeout_at(deadline, self.consumer.recv()).await {
            let message = message?;
            records.push(decode(&message));

            while records.len() < MAX_POLL_RECORDS {
                match self.consumer.recv().now_or_never() {
                    Some(Ok(message)) => records.push(decode(&message)),
                    Some(Err(err)) => return Err(err.into()),
                    None => break,
                }
            }
        }

        let (revoked, assigned) = self.consumer.context().take();

        // Records fetched ahead of a revocation are not ours to process.
        if !revoked.is_empty() {
            records.retain(|record| {
                !revoked.contains(&record.partition) || assigned.contains(&record.partition)
            });
        }

        Ok(Polled {
            revoked,
            assigned,
            records,
        })
    }

    async fn commit(&mut self, offsets: &BTreeMap<TopicPartition, i64>) -> Result<(), Error> {
        let mut list = TopicPartitionList::new();
        for (TopicPartition { topic, partition }, offset) in offsets {
            list.add_partition_offset(topic, *partition, Offset::Offset(offset + 1))?;
        }

        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&list, CommitMode::Sync))
            .await
            .map_err(|err| Error::Consumer(format!("commit task failed: {err}")))??;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.unsubscribe())
            .await
            .map_err(|err| Error::Consumer(format!("close task failed: {err}")))?;

        Ok(())
    }
}

fn decode<M: Message>(message: &M) -> Record {
    Record::decode(
        TopicPartition::new(message.topic(), message.partition()),
        message.offset(),
        message.payload(),
    )
}
