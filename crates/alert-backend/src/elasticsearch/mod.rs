//! Backend which stores alerts in daily Elasticsearch indices.
//!
//! Configuration keys:
//!
//! | Key                | Description                                  | Default                 |
//! |--------------------|----------------------------------------------|-------------------------|
//! | `host`             | Base URL of the cluster                      | `http://localhost:9200` |
//! | `index.prefix`     | Prefix of daily index names                  | `alerts`                |
//! | `max.retries`      | Retries of a failed bulk write               | `10`                    |
//! | `retry.backoff.ms` | Fixed delay between bulk write attempts      | `200`                   |
//! | `read.timeout.ms`  | Deadline of a search                         | `15000`                 |
//! | `max.read.size`    | Cap on the number of alerts a read returns   | `10000`                 |
//! | `template`         | Index template, as JSON; `""` disables it    | built-in                |
//! | `es.aws-iam-auth-required` | Sign requests with AWS SigV4         | `false`                 |
//! | `es.aws_region`    | AWS region of the domain; required when signing |                      |
//!
//! Signed requests draw credentials from the default AWS provider chain.

use crate::{Backend, ConfigMap, Error, IdentifiedAlert, ReadQuery};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

mod reader;
mod signer;
mod transport;
mod writer;

pub use reader::Reader;
pub use signer::{Signer, SERVICE_NAME};
pub use transport::{BulkItem, BulkResponse, Hit, Hits, HttpTransport, SearchResponse, Transport};
pub use writer::{index_name, Writer};

pub const NAME: &str = "elasticsearch";

/// Name of the index template applied by `init`.
pub const TEMPLATE_NAME: &str = "alert-store-template";

const DEFAULT_TEMPLATE: &str = include_str!("template.json");

pub fn factory() -> Box<dyn Backend> {
    Box::new(ElasticsearchBackend::new())
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_host")]
    pub host: String,
    #[serde(rename = "index.prefix", default = "Config::default_index_prefix")]
    pub index_prefix: String,
    #[serde(rename = "max.retries", default = "Config::default_max_retries")]
    pub max_retries: u32,
    #[serde(rename = "retry.backoff.ms", default = "Config::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(rename = "read.timeout.ms", default = "Config::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(rename = "max.read.size", default = "Config::default_max_read_size")]
    pub max_read_size: usize,
    /// Index template, either as a JSON document or as a string encoding one.
    #[serde(default)]
    pub template: Option<serde_json::Value>,
    #[serde(
        rename = "es.aws-iam-auth-required",
        default,
        deserialize_with = "deserialize_flag"
    )]
    pub aws_iam_auth_required: bool,
    #[serde(rename = "es.aws_region", default)]
    pub aws_region: Option<String>,
}

/// Accept a flag as either a boolean or its string spelling.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        String(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(flag) => Ok(flag),
        Flag::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, not '{other}'"
            ))),
        },
    }
}

impl Config {
    fn default_host() -> String {
        "http://localhost:9200".to_string()
    }
    fn default_index_prefix() -> String {
        "alerts".to_string()
    }
    fn default_max_retries() -> u32 {
        10
    }
    fn default_retry_backoff_ms() -> u64 {
        200
    }
    fn default_read_timeout_ms() -> u64 {
        15_000
    }
    fn default_max_read_size() -> usize {
        10_000
    }

    fn parse(config: &ConfigMap) -> Result<Self, Error> {
        serde_json::from_value(config.clone().into()).map_err(|source| Error::Config {
            backend: NAME,
            source,
        })
    }

    /// Resolve the index template to apply, if any.
    fn template(&self) -> Result<Option<serde_json::Value>, Error> {
        match &self.template {
            None => {
                let mut template: serde_json::Value = serde_json::from_str(DEFAULT_TEMPLATE)?;
                template["index_patterns"] = serde_json::json!([format!("{}-*", self.index_prefix)]);
                Ok(Some(template))
            }
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(serde_json::from_str(s)?)),
            Some(doc) => Ok(Some(doc.clone())),
        }
    }

    /// Region to sign requests for, if signing is required.
    fn signing_region(&self) -> Result<Option<&str>, Error> {
        if !self.aws_iam_auth_required {
            return Ok(None);
        }
        match self.aws_region.as_deref().map(str::trim) {
            Some(region) if !region.is_empty() => Ok(Some(region)),
            _ => Err(Error::MissingConfig {
                backend: NAME,
                key: "es.aws_region",
            }),
        }
    }
}

/// ElasticsearchBackend is a Backend over an Elasticsearch cluster.
pub struct ElasticsearchBackend {
    transport: Option<Arc<dyn Transport>>,
    parts: Option<(Writer, Reader)>,
}

impl ElasticsearchBackend {
    pub fn new() -> Self {
        Self {
            transport: None,
            parts: None,
        }
    }

    /// Use the given Transport instead of dialing the configured host.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            parts: None,
        }
    }

    fn parts(&self) -> Result<&(Writer, Reader), Error> {
        self.parts.as_ref().ok_or(Error::NotInitialized(NAME))
    }
}

impl Default for ElasticsearchBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Backend for ElasticsearchBackend {
    async fn init(&mut self, config: &ConfigMap) -> Result<(), Error> {
        let config = Config::parse(config)?;
        tracing::info!(?config, "initializing elasticsearch backend");

        let region = config.signing_region()?;

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => {
                let mut transport = HttpTransport::new(&config.host)?;
                if let Some(region) = region {
                    transport = transport.with_signer(Signer::from_env(region).await?);
                    tracing::info!(%region, "signing requests with AWS credentials");
                }
                Arc::new(transport)
            }
        };

        if let Some(template) = config.template()? {
            transport.put_template(TEMPLATE_NAME, &template).await?;
            tracing::info!(name = TEMPLATE_NAME, "applied index template");
        }

        let writer = Writer::new(
            transport.clone(),
            &config.index_prefix,
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        );
        let reader = Reader::new(
            transport.clone(),
            &config.index_prefix,
            Duration::from_millis(config.read_timeout_ms),
            config.max_read_size,
        );

        self.transport = Some(transport);
        self.parts = Some((writer, reader));
        Ok(())
    }

    async fn write(&self, alerts: Vec<IdentifiedAlert>) -> Result<(), Error> {
        let (writer, _) = self.parts()?;
        writer.write(&alerts).await
    }

    async fn read(&self, query: &ReadQuery) -> Result<Vec<IdentifiedAlert>, Error> {
        let (_, reader) = self.parts()?;
        reader.read(query).await
    }

    async fn close(&self) {
        // Pooled connections are released as the transport is dropped.
        tracing::info!("closing elasticsearch backend");
    }
}
