use super::transport::Hit;
use super::Transport;
use crate::{Alert, Error, IdentifiedAlert, ReadQuery};
use std::sync::Arc;
use std::time::Duration;

/// Reader runs label and time-range filtered searches over all alert indices.
pub struct Reader {
    transport: Arc<dyn Transport>,
    index_pattern: String,
    timeout: Duration,
    max_read_size: usize,
}

impl Reader {
    pub fn new(
        transport: Arc<dyn Transport>,
        index_prefix: &str,
        timeout: Duration,
        max_read_size: usize,
    ) -> Self {
        Self {
            transport,
            index_pattern: format!("{index_prefix}-*"),
            timeout,
            max_read_size,
        }
    }

    pub async fn read(&self, query: &ReadQuery) -> Result<Vec<IdentifiedAlert>, Error> {
        let body = self.search_body(query);

        let response = self
            .transport
            .search(&self.index_pattern, &body, self.timeout)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "failed to search alerts");
                err
            })?;

        Ok(response
            .hits
            .hits
            .into_iter()
            .filter_map(map_hit)
            .collect())
    }

    /// Build a search which requires an exact match of every label,
    /// and a creation time strictly within the query's range.
    pub fn search_body(&self, query: &ReadQuery) -> serde_json::Value {
        let mut filter: Vec<serde_json::Value> = query
            .labels
            .iter()
            .map(|(key, value)| {
                let mut term = serde_json::Map::new();
                term.insert(format!("labels.{key}"), value.clone().into());
                serde_json::json!({ "term": term })
            })
            .collect();

        filter.push(serde_json::json!({
            "range": {
                "startTime": { "gt": query.from, "lt": query.to }
            }
        }));

        serde_json::json!({
            "query": { "bool": { "filter": filter } },
            "size": query.size(self.max_read_size),
            "timeout": format!("{}ms", self.timeout.as_millis()),
        })
    }
}

// Malformed documents are dropped, rather than failing the whole read.
fn map_hit(Hit { id, source }: Hit) -> Option<IdentifiedAlert> {
    match serde_json::from_value::<Alert>(source) {
        Ok(alert) => Some(IdentifiedAlert { id, alert }),
        Err(error) => {
            tracing::warn!(%id, %error, "dropping alert document which failed to parse");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::test::FakeCluster;
    use super::super::Writer;
    use super::*;
    use crate::alert::test::alert;

    fn svc1_query() -> ReadQuery {
        ReadQuery {
            labels: [("service".to_string(), "svc1".to_string())].into(),
            from: 0,
            to: 150_000,
            max_results: 0,
        }
    }

    #[test]
    fn test_search_body() {
        let reader = Reader::new(
            FakeCluster::new(vec![]),
            "alerts",
            Duration::from_secs(15),
            10_000,
        );

        let mut query = svc1_query();
        query
            .labels
            .insert("env".to_string(), "prod".to_string());

        insta::assert_json_snapshot!(reader.search_body(&query), @r###"
        {
          "query": {
            "bool": {
              "filter": [
                {
                  "term": {
                    "labels.env": "prod"
                  }
                },
                {
                  "term": {
                    "labels.service": "svc1"
                  }
                },
                {
                  "range": {
                    "startTime": {
                      "gt": 0,
                      "lt": 150000
                    }
                  }
                }
              ]
            }
          },
          "size": 10000,
          "timeout": "15000ms"
        }
        "###);

        query.max_results = 20;
        assert_eq!(reader.search_body(&query)["size"], 20);
    }

    #[tokio::test]
    async fn test_label_range_read() {
        let cluster = FakeCluster::new(vec![]);
        let writer = Writer::new(cluster.clone(), "alerts", 0, Duration::ZERO);
        let reader = Reader::new(cluster.clone(), "alerts", Duration::from_secs(1), 100);

        writer
            .write(&[
                IdentifiedAlert::from_log("alerts", 0, 0, alert("first", &[("service", "svc1")], 100_000)),
                IdentifiedAlert::from_log("alerts", 0, 1, alert("second", &[("service", "svc2")], 200_000)),
            ])
            .await
            .unwrap();

        let found = reader.read(&svc1_query()).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "alerts-0-0");
        assert_eq!(found[0].alert.name, "first");
        assert_eq!(cluster.searched_indices(), vec!["alerts-*".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_documents_are_dropped() {
        let cluster = FakeCluster::new(vec![]);
        cluster.insert_raw(
            "alerts-1970-01-01",
            "bad",
            serde_json::json!({"labels": {"service": "svc1"}, "startTime": 100_000}),
        );
        cluster.insert_raw(
            "alerts-1970-01-01",
            "good",
            serde_json::to_value(alert("ok", &[("service", "svc1")], 100_000)).unwrap(),
        );

        let reader = Reader::new(cluster, "alerts", Duration::from_secs(1), 100);
        let found = reader.read(&svc1_query()).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "good");
    }
}
