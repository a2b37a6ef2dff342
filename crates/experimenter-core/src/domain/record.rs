//! The experiment record stored in a tag annotation.

use chrono::{DateTime, Utc};
use experiment_state::CommitId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Experiment parameters, keyed by name.
pub type Parameters = Map<String, Value>;

/// Experiment results, keyed by name.
pub type Results = Map<String, Value>;

/// Metadata describing one captured experiment.
///
/// Serialized as the JSON body of the experiment's annotated tag:
/// `{"parameters": {...}, "started": 1700000000.25, "description": null,
///   "commit_sha": "<hex>", "results": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecord {
    /// Parameters the experiment was started with.
    #[serde(default)]
    pub parameters: Parameters,

    /// Capture time in fractional seconds since the Unix epoch.
    pub started: f64,

    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,

    /// Commit the experiment tag points at.
    #[serde(default)]
    pub commit_sha: String,

    /// Recorded results; empty until results are recorded.
    #[serde(default)]
    pub results: Results,
}

impl ExperimentRecord {
    /// Create a record with no results.
    pub fn new(
        parameters: Parameters,
        started: DateTime<Utc>,
        description: Option<String>,
        commit: &CommitId,
    ) -> Self {
        Self {
            parameters,
            started: started.timestamp_micros() as f64 / 1_000_000.0,
            description,
            commit_sha: commit.to_string(),
            results: Results::new(),
        }
    }

    /// Whether any results have been recorded.
    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }

    /// A copy of this record with `results` replaced.
    pub fn with_results(&self, results: Results) -> Self {
        Self {
            results,
            ..self.clone()
        }
    }

    /// Capture time as a UTC timestamp.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros((self.started * 1_000_000.0).round() as i64)
    }

    /// The capture commit as a typed id.
    pub fn commit(&self) -> CommitId {
        CommitId::new(self.commit_sha.as_str())
    }
}
