use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alert is a named event, raised by a detector, which needs attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub name: String,
    /// Labels identify the alert and are matched exactly by reads.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Creation time of the alert, as milliseconds since the Unix epoch.
    #[serde(rename = "startTime")]
    pub creation_time: i64,
    #[serde(
        rename = "observedValue",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub observed_value: Option<String>,
    #[serde(
        rename = "expectedValue",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_value: Option<String>,
    #[serde(
        rename = "generatorURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub generator_url: Option<String>,
}

/// IdentifiedAlert is an Alert having an identifier which is stable across
/// re-deliveries of the same log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifiedAlert {
    pub id: String,
    pub alert: Alert,
}

impl IdentifiedAlert {
    /// Identify an `alert` read from `offset` of a log topic partition.
    /// The creation time is truncated to whole seconds, so that every
    /// delivery of the record maps to the same storage location.
    pub fn from_log(topic: &str, partition: i32, offset: i64, mut alert: Alert) -> Self {
        alert.creation_time = truncate_to_second(alert.creation_time);

        Self {
            id: format!("{topic}-{partition}-{offset}"),
            alert,
        }
    }
}

/// Truncate epoch milliseconds down to a whole second. The few values
/// below the earliest representable whole second round up to it instead.
pub fn truncate_to_second(millis: i64) -> i64 {
    let rem = millis.rem_euclid(1000);
    millis
        .checked_sub(rem)
        .unwrap_or_else(|| millis + (1000 - rem))
}

/// ReadQuery selects alerts having all of `labels`, and which were created
/// strictly between `from` and `to` (epoch milliseconds).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadQuery {
    pub labels: BTreeMap<String, String>,
    pub from: i64,
    pub to: i64,
    /// Maximum number of alerts to return. Zero selects the backend's own cap.
    #[serde(default)]
    pub max_results: usize,
}

impl ReadQuery {
    pub fn matches(&self, alert: &Alert) -> bool {
        alert.creation_time > self.from
            && alert.creation_time < self.to
            && self
                .labels
                .iter()
                .all(|(key, value)| alert.labels.get(key) == Some(value))
    }

    /// Effective result size, given a backend's own cap.
    pub fn size(&self, cap: usize) -> usize {
        if self.max_results == 0 {
            cap
        } else {
            self.max_results.min(cap)
        }
    }
}
