//! Domain-level error taxonomy for Experimenter.

use experiment_state::{CommitId, GatewayError};

use crate::capture::RestorePoint;

/// Errors produced when validating experiment names and tag prefixes.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("experiment name must not be empty")]
    EmptyName,

    #[error("experiment name {name:?} cannot be used in a tag: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("tag prefix must not be empty")]
    EmptyPrefix,

    #[error("tag prefix {prefix:?} is not a valid ref path: {reason}")]
    InvalidPrefix {
        prefix: String,
        reason: &'static str,
    },
}

/// Experimenter domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("experiment tag already exists: {tag}")]
    Conflict { tag: String },

    #[error("experiment tag not found: {tag}")]
    MissingTag { tag: String },

    #[error("repository error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(
        "capture of {tag} was interrupted and the repository was not restored ({source}); \
         recover with `git reset --soft {original_head}`"
    )]
    PartialTransaction {
        tag: String,
        tag_created: bool,
        original_head: CommitId,
        capture_commit: Option<CommitId>,
        restore_point: RestorePoint,
        #[source]
        source: GatewayError,
    },

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed experiment record in tag {tag}: {source}")]
    Codec {
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for Experimenter domain operations.
pub type Result<T> = std::result::Result<T, ExperimentError>;
