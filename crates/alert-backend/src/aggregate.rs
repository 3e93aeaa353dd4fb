use crate::{Error, IdentifiedAlert, Mount, ReadQuery};
use futures::stream::{FuturesUnordered, StreamExt};

/// Aggregator fans a query out to every mounted backend and merges
/// their results.
pub struct Aggregator {
    mounts: Vec<Mount>,
}

impl Aggregator {
    pub fn new(mounts: Vec<Mount>) -> Self {
        Self { mounts }
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Read `query` from all backends concurrently.
    ///
    /// Results are concatenated in order of backend completion. The first
    /// backend to fail fails the read, and the reads still in flight are
    /// dropped without being awaited.
    pub async fn read(&self, query: &ReadQuery) -> Result<Vec<IdentifiedAlert>, Error> {
        let mut pending: FuturesUnordered<_> = self
            .mounts
            .iter()
            .map(|mount| async move {
                (mount.name.as_str(), mount.backend.read(query).await)
            })
            .collect();

        let mut merged = Vec::new();

        while let Some((name, result)) = pending.next().await {
            match result {
                Ok(alerts) => {
                    tracing::debug!(backend = name, alerts = alerts.len(), "backend read completed");
                    merged.extend(alerts);
                }
                Err(err) => {
                    tracing::error!(backend = name, error = %err, "backend read failed");
                    return Err(err);
                }
            }
        }
        Ok(merged)
    }

    /// Close every mounted backend.
    pub async fn close(&self) {
        futures::future::join_all(self.mounts.iter().map(|mount| mount.backend.close())).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alert::test::alert;
    use crate::{Backend, ConfigMap};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    struct Delayed {
        delay: Duration,
        fail: bool,
        id: &'static str,
        finished: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Backend for Delayed {
        async fn init(&mut self, _config: &ConfigMap) -> Result<(), Error> {
            Ok(())
        }
        async fn write(&self, _alerts: Vec<IdentifiedAlert>) -> Result<(), Error> {
            Ok(())
        }
        async fn read(&self, _query: &ReadQuery) -> Result<Vec<IdentifiedAlert>, Error> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);

            if self.fail {
                return Err(Error::Backend(format!("{} is unavailable", self.id)));
            }
            Ok(vec![IdentifiedAlert {
                id: self.id.to_string(),
                alert: alert(self.id, &[], 1_000),
            }])
        }
        async fn close(&self) {}
    }

    fn mount(id: &'static str, delay_ms: u64, fail: bool) -> (Mount, Arc<AtomicBool>) {
        let finished = Arc::new(AtomicBool::new(false));
        let backend = Delayed {
            delay: Duration::from_millis(delay_ms),
            fail,
            id,
            finished: finished.clone(),
        };
        let mount = Mount {
            name: id.to_string(),
            config: ConfigMap::new(),
            backend: Arc::new(backend),
        };
        (mount, finished)
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_are_merged() {
        let (a, _) = mount("a", 30, false);
        let (b, _) = mount("b", 10, false);
        let aggregator = Aggregator::new(vec![a, b]);

        let found = aggregator.read(&ReadQuery::default()).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|doc| doc.id.as_str()).collect();

        // Ordered by completion.
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_completes_the_read() {
        let (a, _) = mount("a", 10, false);
        let (b, _) = mount("b", 50, true);
        let (c, _) = mount("c", 10, false);
        let (slow, slow_finished) = mount("slow", 200, false);
        let aggregator = Aggregator::new(vec![a, b, c, slow]);

        let started = Instant::now();
        let err = aggregator.read(&ReadQuery::default()).await.unwrap_err();

        assert_eq!(err.to_string(), "b is unavailable");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(200));
        assert!(!slow_finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_backends() {
        let aggregator = Aggregator::new(Vec::new());
        assert!(aggregator.read(&ReadQuery::default()).await.unwrap().is_empty());
        aggregator.close().await;
    }
}
