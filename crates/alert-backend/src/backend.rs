use crate::{ConfigMap, Error, IdentifiedAlert, ReadQuery};

/// Backend is a durable store of alerts.
///
/// Backends are mounted once, shared across tasks, and must tolerate
/// concurrent `write` and `read` calls. Each call's returned future is its
/// completion: it resolves exactly once, either with a value or an error.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Prepare the backend for use, connecting and applying any schema.
    /// Called once, before the backend is shared.
    async fn init(&mut self, config: &ConfigMap) -> Result<(), Error>;

    /// Durably write a batch of alerts. Success means every alert of the
    /// batch is visible to readers; any failure fails the whole batch.
    /// Alerts are keyed by id, so re-writing an alert overwrites it.
    async fn write(&self, alerts: Vec<IdentifiedAlert>) -> Result<(), Error>;

    /// Read alerts matching `query`.
    async fn read(&self, query: &ReadQuery) -> Result<Vec<IdentifiedAlert>, Error>;

    /// Release resources held by the backend. Errors are logged.
    async fn close(&self);
}
