//! Storage backends for alerts consumed from the alert log.
//!
//! A [`Backend`] is the narrow contract the ingestion pipeline writes through
//! and the query path reads through. Concrete backends are selected by name
//! from a [`Registry`] and mounted once at startup.

mod aggregate;
mod alert;
mod backend;
pub mod elasticsearch;
pub mod memory;
mod registry;

pub use aggregate::Aggregator;
pub use alert::{truncate_to_second, Alert, IdentifiedAlert, ReadQuery};
pub use backend::Backend;
pub use registry::{BackendConfig, Factory, Mount, Registry};

/// Free-form configuration handed to [`Backend::init`].
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration for backend '{backend}'")]
    Config {
        backend: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("no backend is registered with name '{0}'")]
    UnknownBackend(String),
    #[error("a backend is already registered with name '{0}'")]
    DuplicateBackend(String),
    #[error("backend '{0}' was used before it was initialized")]
    NotInitialized(&'static str),
    #[error("alert creation time {0} is out of range")]
    InvalidTimestamp(i64),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("bulk write failed for {failed} of {total} documents: {message}")]
    PartialWrite {
        failed: usize,
        total: usize,
        message: String,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("write failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },
    #[error("backend '{backend}' requires configuration key '{key}'")]
    MissingConfig {
        backend: &'static str,
        key: &'static str,
    },
    #[error("failed to sign request: {0}")]
    Signing(String),
    #[error("{0}")]
    Backend(String),
}
