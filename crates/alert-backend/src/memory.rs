use crate::{Alert, Backend, ConfigMap, Error, IdentifiedAlert, ReadQuery};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub const NAME: &str = "memory";

pub fn factory() -> Box<dyn Backend> {
    Box::new(MemoryBackend::new())
}

/// MemoryBackend keeps alerts in process memory, keyed by id.
/// It's intended for local development and tests.
pub struct MemoryBackend {
    docs: Mutex<BTreeMap<String, Alert>>,
    max_read_size: usize,
}

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(rename = "max.read.size", default = "default_max_read_size")]
    max_read_size: usize,
}

fn default_max_read_size() -> usize {
    10_000
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            docs: Default::default(),
            max_read_size: default_max_read_size(),
        }
    }

    /// Number of distinct alerts held.
    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch an alert by its id.
    pub fn get(&self, id: &str) -> Option<Alert> {
        self.docs.lock().unwrap().get(id).cloned()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn init(&mut self, config: &ConfigMap) -> Result<(), Error> {
        let Config { max_read_size } = serde_json::from_value(config.clone().into())
            .map_err(|source| Error::Config {
                backend: NAME,
                source,
            })?;

        self.max_read_size = max_read_size;
        Ok(())
    }

    async fn write(&self, alerts: Vec<IdentifiedAlert>) -> Result<(), Error> {
        let mut docs = self.docs.lock().unwrap();
        for IdentifiedAlert { id, alert } in alerts {
            docs.insert(id, alert);
        }
        Ok(())
    }

    async fn read(&self, query: &ReadQuery) -> Result<Vec<IdentifiedAlert>, Error> {
        let docs = self.docs.lock().unwrap();

        let mut out: Vec<IdentifiedAlert> = docs
            .iter()
            .filter(|(_id, alert)| query.matches(alert))
            .map(|(id, alert)| IdentifiedAlert {
                id: id.clone(),
                alert: alert.clone(),
            })
            .collect();

        out.sort_by_key(|doc| doc.alert.creation_time);
        out.truncate(query.size(self.max_read_size));

        Ok(out)
    }

    async fn close(&self) {
        tracing::debug!(docs = self.len(), "closing memory backend");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alert::test::alert;

    #[tokio::test]
    async fn test_rewriting_an_id_overwrites() {
        let backend = MemoryBackend::new();
        let doc =
            IdentifiedAlert::from_log("alerts", 0, 7, alert("a1", &[("service", "svc1")], 1000));

        backend.write(vec![doc.clone()]).await.unwrap();
        backend.write(vec![doc.clone()]).await.unwrap();

        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get("alerts-0-7"), Some(doc.alert));
    }

    #[tokio::test]
    async fn test_label_range_read() {
        let backend = MemoryBackend::new();
        backend
            .write(vec![
                IdentifiedAlert {
                    id: "alerts-0-0".to_string(),
                    alert: alert("first", &[("service", "svc1")], 100),
                },
                IdentifiedAlert {
                    id: "alerts-0-1".to_string(),
                    alert: alert("second", &[("service", "svc2")], 200),
                },
            ])
            .await
            .unwrap();

        let query = ReadQuery {
            labels: [("service".to_string(), "svc1".to_string())].into(),
            from: 0,
            to: 150,
            max_results: 0,
        };
        let found = backend.read(&query).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "alerts-0-0");
        assert_eq!(found[0].alert.name, "first");
    }

    #[tokio::test]
    async fn test_read_size_is_capped() {
        let mut backend = MemoryBackend::new();
        backend
            .init(&serde_json::json!({"max.read.size": 2}).as_object().unwrap().clone())
            .await
            .unwrap();

        let docs = (0..5)
            .map(|offset| {
                IdentifiedAlert::from_log("alerts", 0, offset, alert("a", &[], 1000 * (offset + 1)))
            })
            .collect();
        backend.write(docs).await.unwrap();

        let mut query = ReadQuery {
            from: 0,
            to: i64::MAX,
            ..Default::default()
        };
        assert_eq!(backend.read(&query).await.unwrap().len(), 2);

        query.max_results = 1;
        let found = backend.read(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "alerts-0-0");
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let mut backend = MemoryBackend::new();
        let err = backend
            .init(&serde_json::json!({"max.read.size": "lots"}).as_object().unwrap().clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { backend: NAME, .. }));
    }
}
