use crate::Error;
use alert_backend::BackendConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config is the top-level configuration of the alert store, as read from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// File which receives the "healthy" / "unhealthy" status of the store.
    pub health_status_file: PathBuf,
    pub kafka: KafkaConfig,
    /// Backend which consumed alerts are written to.
    pub backend: BackendConfig,
    pub query: QueryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            health_status_file: PathBuf::from("/tmp/alert-store-health"),
            kafka: KafkaConfig::default(),
            backend: BackendConfig {
                name: alert_backend::elasticsearch::NAME.to_string(),
                config: Default::default(),
            },
            query: QueryConfig::default(),
        }
    }
}

impl Config {
    /// Load Config from the YAML file at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Backends read by the query path, which default to the written backend.
    pub fn query_backends(&self) -> Vec<BackendConfig> {
        if self.query.backends.is_empty() {
            vec![self.backend.clone()]
        } else {
            self.query.backends.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaConfig {
    /// Topic of JSON-encoded alerts.
    pub topic: String,
    /// Number of concurrent store tasks, each with its own consumer.
    pub stream_threads: usize,
    /// Maximum number of outstanding backend writes of the process,
    /// divided evenly (rounding up) among its store tasks.
    pub parallel_writes: usize,
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    /// Deadline of a single poll, after which it's abandoned.
    #[serde(with = "humantime_serde")]
    pub wakeup_timeout: Duration,
    /// Number of consecutive abandoned polls which fail the task.
    pub max_wakeups: u32,
    #[serde(with = "humantime_serde")]
    pub commit_interval: Duration,
    pub max_commit_retries: u32,
    #[serde(with = "humantime_serde")]
    pub commit_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub close_timeout: Duration,
    /// Properties passed through to the underlying consumer,
    /// such as `bootstrap.servers` and `group.id`.
    pub consumer: BTreeMap<String, serde_json::Value>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            topic: "alerts".to_string(),
            stream_threads: 2,
            parallel_writes: 8,
            poll_timeout: Duration::from_secs(2),
            wakeup_timeout: Duration::from_secs(3),
            max_wakeups: 10,
            commit_interval: Duration::from_secs(3),
            max_commit_retries: 3,
            commit_backoff: Duration::from_millis(200),
            close_timeout: Duration::from_secs(1),
            consumer: [
                ("bootstrap.servers", "localhost:9092"),
                ("group.id", "alert-store"),
                ("auto.offset.reset", "earliest"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.into()))
            .collect(),
        }
    }
}

impl KafkaConfig {
    /// Number of concurrent writes each store task may have in flight.
    pub fn write_slots_per_task(&self) -> usize {
        self.parallel_writes
            .div_ceil(self.stream_threads.max(1))
            .max(1)
    }

    /// Consumer properties with scalar values rendered as strings.
    pub fn consumer_properties(&self) -> BTreeMap<String, String> {
        self.consumer
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Backends aggregated by queries. Empty means the written backend.
    pub backends: Vec<BackendConfig>,
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
        assert_eq!(Config::parse("{}").unwrap(), Config::default());
    }

    #[test]
    fn test_defaults() {
        insta::assert_json_snapshot!(serde_json::to_value(Config::default()).unwrap(), @r###"
        {
          "backend": {
            "config": {},
            "name": "elasticsearch"
          },
          "health_status_file": "/tmp/alert-store-health",
          "kafka": {
            "close_timeout": "1s",
            "commit_backoff": "200ms",
            "commit_interval": "3s",
            "consumer": {
              "auto.offset.reset": "earliest",
              "bootstrap.servers": "localhost:9092",
              "group.id": "alert-store"
            },
            "max_commit_retries": 3,
            "max_wakeups": 10,
            "parallel_writes": 8,
            "poll_timeout": "2s",
            "stream_threads": 2,
            "topic": "alerts",
            "wakeup_timeout": "3s"
          },
          "query": {
            "backends": []
          }
        }
        "###);
    }

    #[test]
    fn test_parse_overrides() {
        let config = Config::parse(
            r#"
health_status_file: /var/run/alert-store/health
kafka:
  topic: prod-alerts
  stream_threads: 4
  wakeup_timeout: 500ms
  max_wakeups: 3
  commit_interval: 10s
  consumer:
    bootstrap.servers: kafka:9092
    group.id: store
    session.timeout.ms: 6000
backend:
  name: elasticsearch
  config:
    host: http://es:9200
    max.retries: 2
query:
  backends:
    - name: elasticsearch
    - name: memory
"#,
        )
        .unwrap();

        assert_eq!(
            config.health_status_file,
            PathBuf::from("/var/run/alert-store/health")
        );
        assert_eq!(config.kafka.topic, "prod-alerts");
        assert_eq!(config.kafka.stream_threads, 4);
        assert_eq!(config.kafka.wakeup_timeout, Duration::from_millis(500));
        assert_eq!(config.kafka.commit_interval, Duration::from_secs(10));
        // Unset fields keep their defaults.
        assert_eq!(config.kafka.poll_timeout, Duration::from_secs(2));
        assert_eq!(config.kafka.parallel_writes, 8);

        assert_eq!(
            config.kafka.consumer_properties(),
            [
                ("bootstrap.servers", "kafka:9092"),
                ("group.id", "store"),
                ("session.timeout.ms", "6000"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>()
        );

        assert_eq!(config.backend.config["max.retries"], 2);
        let names: Vec<_> = config
            .query_backends()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["elasticsearch", "memory"]);
    }

    #[test]
    fn test_write_slots_are_split_across_tasks() {
        let slots = |parallel_writes, stream_threads| {
            KafkaConfig {
                parallel_writes,
                stream_threads,
                ..Default::default()
            }
            .write_slots_per_task()
        };

        assert_eq!(slots(8, 2), 4);
        assert_eq!(slots(9, 2), 5);
        assert_eq!(slots(8, 1), 8);
        assert_eq!(slots(2, 4), 1);
        assert_eq!(slots(0, 3), 1);
        assert_eq!(slots(5, 0), 5);
    }

    #[test]
    fn test_query_defaults_to_written_backend() {
        let config = Config::parse("backend: {name: memory}").unwrap();
        assert_eq!(config.query_backends(), vec![config.backend.clone()]);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = Config::parse("kafka: {topics: [a]}").unwrap_err();
        assert!(err.to_string().contains("unknown field `topics`"), "{err}");
    }
}
