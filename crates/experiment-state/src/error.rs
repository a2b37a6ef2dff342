//! Error types for experiment-state

use thiserror::Error;

/// Errors raised by a [`RepositoryGateway`](crate::RepositoryGateway) backend.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No repository found at or above the given path
    #[error("Not a git repository (or any parent): {0}")]
    NotARepository(String),

    /// The repository is bare and has no working tree
    #[error("Repository has no working tree: {0}")]
    BareRepository(String),

    /// HEAD does not point at a commit yet
    #[error("Repository has no commits yet")]
    UnbornHead,

    /// A tag with this name already exists and force was not requested
    #[error("Tag already exists: {name}")]
    TagExists { name: String },

    /// The tag does not exist
    #[error("Tag not found: {name}")]
    TagNotFound { name: String },

    /// The tag exists but carries no annotation message
    #[error("Tag is not annotated: {name}")]
    NotAnnotated { name: String },

    /// A revision expression did not resolve to a commit
    #[error("Revision not found: {spec}")]
    RevisionNotFound { spec: String },

    /// Underlying libgit2 failure
    #[error("Git operation failed: {0}")]
    Git(String),

    /// A gateway operation was refused by the backend
    #[error("Gateway operation {op} failed: {reason}")]
    OperationFailed { op: String, reason: String },

    /// Filesystem error while walking the working tree
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<git2::Error> for GatewayError {
    fn from(err: git2::Error) -> Self {
        GatewayError::Git(err.message().to_string())
    }
}
