use super::Transport;
use crate::{Error, IdentifiedAlert};
use std::sync::Arc;
use std::time::Duration;

/// Writer indexes batches of alerts into daily indices through the bulk API.
pub struct Writer {
    transport: Arc<dyn Transport>,
    index_prefix: String,
    max_retries: u32,
    backoff: Duration,
}

impl Writer {
    pub fn new(
        transport: Arc<dyn Transport>,
        index_prefix: &str,
        max_retries: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            transport,
            index_prefix: index_prefix.to_string(),
            max_retries,
            backoff,
        }
    }

    /// Write the batch of `alerts`, retrying the complete batch after a
    /// fixed backoff whenever any part of it fails.
    pub async fn write(&self, alerts: &[IdentifiedAlert]) -> Result<(), Error> {
        let body = self.bulk_body(alerts)?;
        if body.is_empty() {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            let err = match self.transport.bulk(body.clone()).await {
                Ok(response) => match response.check() {
                    Ok(()) => {
                        tracing::debug!(alerts = alerts.len(), attempt, "wrote alert batch");
                        return Ok(());
                    }
                    Err(err) => err,
                },
                Err(err) => err,
            };

            if attempt > self.max_retries {
                return Err(Error::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            tracing::warn!(
                error = %err,
                attempt,
                max_retries = self.max_retries,
                backoff = ?self.backoff,
                "failed to write alert batch (will retry)"
            );
            tokio::time::sleep(self.backoff).await;
        }
    }

    /// Build the NDJSON body of a bulk request which indexes each alert
    /// under its id, into the index of its creation date. Alerts having a
    /// creation time with no calendar date are logged and skipped.
    pub fn bulk_body(&self, alerts: &[IdentifiedAlert]) -> Result<String, Error> {
        let mut body = String::new();

        for IdentifiedAlert { id, alert } in alerts {
            let index = match index_name(&self.index_prefix, alert.creation_time) {
                Ok(index) => index,
                Err(error) => {
                    tracing::warn!(%id, %error, "skipping alert which can't be indexed");
                    continue;
                }
            };
            let action = serde_json::json!({
                "index": {
                    "_index": index,
                    "_id": id,
                }
            });
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(alert)?);
            body.push('\n');
        }
        Ok(body)
    }
}

/// Name of the daily index holding alerts created at `creation_time`
/// (epoch milliseconds), by its UTC date.
pub fn index_name(prefix: &str, creation_time: i64) -> Result<String, Error> {
    let created =
        time::OffsetDateTime::from_unix_timestamp_nanos(creation_time as i128 * 1_000_000)
            .map_err(|_| Error::InvalidTimestamp(creation_time))?;

    Ok(format!("{prefix}-{}", created.date()))
}
