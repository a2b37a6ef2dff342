//! Experimenter Core Library
//!
//! Records the exact code state and parameters behind an experiment as an
//! annotated git tag, without moving the branch or touching the working tree.
//!
//! - [`CaptureTransaction`]: capture-and-restore of the repository state
//! - [`ExperimentHandle`]: result recording and scope-based cleanup
//! - [`ExperimentCatalog`]: listing, lookup and deletion of experiment tags
//! - [`Experimenter`]: facade tying the above to one repository

pub mod capture;
pub mod catalog;
pub mod clock;
pub mod codec;
pub mod config;
pub mod domain;
pub mod experimenter;
pub mod metrics;
pub mod obs;
pub mod recording;

pub use capture::{CaptureTransaction, RepositorySnapshot, RestorePoint, MAX_SUFFIX_PROBES};
pub use catalog::{ExperimentCatalog, ExperimentEntry, ListFilter};
pub use clock::{Clock, FixedClock, SystemClock};
pub use codec::MetadataCodec;
pub use config::{CollisionPolicy, ExperimentConfig};
pub use domain::{
    experiment_id, validate_experiment_name, ExperimentError, ExperimentRecord, Parameters,
    Result, Results, TagPrefix, ValidationError, DEFAULT_TAG_PREFIX, EXPERIMENT_MARKER,
};
pub use experimenter::Experimenter;
pub use metrics::METRICS;
pub use recording::{ExperimentHandle, ExperimentOutcome, HandleState};

pub use experiment_state::{CommitId, GatewayError, GitRepository, RepositoryGateway};

/// Crate version, kept in lockstep with the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
