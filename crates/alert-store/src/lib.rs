//! Consumes alerts from a Kafka topic and stores them through a pluggable
//! backend, committing consumer offsets only after their writes are durable.

mod config;
mod consumer;
mod controller;
mod health;
pub mod kafka;
mod processor;
mod task;

pub use config::{Config, KafkaConfig, QueryConfig};
pub use consumer::{LogConsumer, Polled, Record, TopicPartition};
pub use controller::Controller;
pub use health::{HealthFile, StateListener, UNHEALTHY, HEALTHY};
pub use processor::{Batch, PartitionProcessor};
pub use task::{StoreTask, TaskState};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file {path:?}")]
    ReadConfig {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    ParseConfig(#[from] serde_yaml::Error),
    #[error(transparent)]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error(transparent)]
    Backend(#[from] alert_backend::Error),
    #[error("consumer poll did not return after {wakeups} consecutive wakeups of {timeout:?}")]
    WatchdogExhausted {
        wakeups: u32,
        timeout: std::time::Duration,
    },
    #[error("failed to write batch of {partition} ending at offset {offset}")]
    Write {
        partition: TopicPartition,
        offset: i64,
        #[source]
        source: alert_backend::Error,
    },
    #[error("{0}")]
    Consumer(String),
    #[error("failed to write health status file {path:?}")]
    Health {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
