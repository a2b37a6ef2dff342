//! Experiment-State: repository gateway for Experimenter
//!
//! This crate is the only place that talks to the version-control backend.
//! It exposes a blocking capability interface over commits, the index, the
//! branch pointer and annotated tags.
//!
//! ## Layer 0 - Repository access
//!
//! Focus: faithful, side-effect-precise git primitives. No experiment
//! semantics live here.
//!
//! ## Key Components
//!
//! - `RepositoryGateway`: the capability trait consumed by the core
//! - `GitRepository`: libgit2 backend with upward repository discovery
//! - `fakes::MemoryRepository`: in-memory backend with fault injection

mod error;
pub mod fakes;
pub mod gateway;
mod git_repository;

pub use error::GatewayError;
pub use gateway::{
    CommitId, GatewayResult, IndexSnapshot, RepositoryGateway, TagRecord,
};
pub use git_repository::GitRepository;
