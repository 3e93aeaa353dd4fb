use super::Signer;
use crate::Error;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// Transport is the slice of the Elasticsearch REST API used by the backend.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Create or replace the named legacy index template.
    async fn put_template(&self, name: &str, template: &serde_json::Value) -> Result<(), Error>;

    /// Submit a `_bulk` request having the given NDJSON body.
    async fn bulk(&self, body: String) -> Result<BulkResponse, Error>;

    /// Run a `_search` of `index` (which may be a wildcard pattern).
    async fn search(
        &self,
        index: &str,
        query: &serde_json::Value,
        timeout: Duration,
    ) -> Result<SearchResponse, Error>;
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    /// Each item maps its operation type (`index`, `create`, ...) to its outcome.
    #[serde(default)]
    pub items: Vec<BTreeMap<String, BulkItem>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkItem {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl BulkResponse {
    /// Map a response having any failed item into an Error describing the failures.
    pub fn check(&self) -> Result<(), Error> {
        let failed: Vec<&BulkItem> = self
            .items
            .iter()
            .flat_map(|item| item.values())
            .filter(|item| item.error.is_some() || !(200..300).contains(&item.status))
            .collect();

        if failed.is_empty() && !self.errors {
            return Ok(());
        }

        let message = failed
            .iter()
            .take(5)
            .map(|item| {
                let reason = item
                    .error
                    .as_ref()
                    .and_then(|err| err.get("reason"))
                    .and_then(|reason| reason.as_str())
                    .unwrap_or("unknown");
                format!("[{}/{}] status {}: {reason}", item.index, item.id, item.status)
            })
            .collect::<Vec<_>>()
            .join("; ");

        Err(Error::PartialWrite {
            failed: failed.len(),
            total: self.items.len(),
            message,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: Hits,
}

#[derive(Debug, Default, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: serde_json::Value,
}

/// HttpTransport is a Transport over the cluster's HTTP endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    host: String,
    signer: Option<Signer>,
}

impl HttpTransport {
    pub fn new(host: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            signer: None,
        })
    }

    /// Sign every request with AWS SigV4, as required by AWS-hosted domains.
    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let mut request = request.build()?;

        if let Some(signer) = &self.signer {
            signer.sign(&mut request, SystemTime::now()).await?;
        }
        let response = self.client.execute(request).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();

        Err(Error::Status {
            url,
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn put_template(&self, name: &str, template: &serde_json::Value) -> Result<(), Error> {
        self.send(
            self.client
                .put(format!("{}/_template/{name}", self.host))
                .json(template),
        )
        .await?;

        Ok(())
    }

    async fn bulk(&self, body: String) -> Result<BulkResponse, Error> {
        let response = self
            .send(
                self.client
                    .post(format!("{}/_bulk", self.host))
                    .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                    .body(body),
            )
            .await?;

        Ok(response.json().await?)
    }

    async fn search(
        &self,
        index: &str,
        query: &serde_json::Value,
        timeout: Duration,
    ) -> Result<SearchResponse, Error> {
        let response = self
            .send(
                self.client
                    .post(format!("{}/{index}/_search", self.host))
                    .timeout(timeout)
                    .json(query),
            )
            .await?;

        Ok(response.json().await?)
    }
}
