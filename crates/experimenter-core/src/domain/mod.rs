//! Domain models for Experimenter.
//!
//! Canonical definitions for the core entities:
//! - `ExperimentRecord`: the metadata stored in an experiment tag
//! - `TagPrefix`: the tag namespace experiments live under
//! - `ExperimentError`: the error taxonomy shared by all operations

pub mod error;
pub mod naming;
pub mod record;

// Re-export main types and errors
pub use error::{ExperimentError, Result, ValidationError};
pub use naming::{
    experiment_id, validate_experiment_name, TagPrefix, DEFAULT_TAG_PREFIX, EXPERIMENT_MARKER,
};
pub use record::{ExperimentRecord, Parameters, Results};
