//! The capture-and-restore transaction.
//!
//! A capture records the exact code state an experiment runs against:
//!
//! 1. warn about untracked files (they are never captured)
//! 2. snapshot the branch tip, the dirty flag and (when dirty) the index
//! 3. when dirty, stage every tracked file and commit on top of the tip
//! 4. tag the capture point with the encoded [`ExperimentRecord`]
//! 5. when a temporary commit was made, move the branch back to the original
//!    tip and restore the index
//!
//! The working tree is never touched. The temporary commit stays reachable
//! through the tag only.
//!
//! At most one capture may run against a repository at a time; there is no
//! locking layer.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use experiment_state::{
    CommitId, GatewayError, GatewayResult, IndexSnapshot, RepositoryGateway,
};
use tracing::{debug, error, warn};

use crate::clock::{Clock, SystemClock};
use crate::codec::MetadataCodec;
use crate::config::CollisionPolicy;
use crate::domain::{
    experiment_id, validate_experiment_name, ExperimentError, ExperimentRecord, Parameters,
    Result, TagPrefix,
};
use crate::metrics::METRICS;
use crate::obs::{self, ExperimentSpan};
use crate::recording::ExperimentHandle;

/// Highest `_<n>` suffix tried before a collision is reported.
pub const MAX_SUFFIX_PROBES: u32 = 1000;

/// Repository state observed at the start of a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySnapshot {
    pub head: CommitId,
    pub dirty: bool,
    pub untracked: Vec<PathBuf>,
    /// Index as it was before staging; only taken when dirty.
    pub index: Option<IndexSnapshot>,
}

impl RepositorySnapshot {
    /// Where the branch and index must return to, if a commit is made.
    pub fn restore_point(&self) -> Option<RestorePoint> {
        self.index.as_ref().map(|index| RestorePoint {
            head: self.head.clone(),
            index: index.clone(),
        })
    }
}

/// Branch tip and index to return to after a temporary commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePoint {
    pub head: CommitId,
    pub index: IndexSnapshot,
}

/// Orchestrates one capture against a repository gateway.
pub struct CaptureTransaction {
    gateway: Arc<dyn RepositoryGateway>,
    prefix: TagPrefix,
    collision: CollisionPolicy,
    clock: Arc<dyn Clock>,
}

impl CaptureTransaction {
    pub fn new(gateway: Arc<dyn RepositoryGateway>, prefix: TagPrefix) -> Self {
        Self {
            gateway,
            prefix,
            collision: CollisionPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_collision_policy(mut self, collision: CollisionPolicy) -> Self {
        self.collision = collision;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Capture the repository state and tag it as experiment `name`.
    ///
    /// Returns a handle owning the new tag. Dropping the handle without
    /// recording results deletes the tag again.
    ///
    /// # Errors
    ///
    /// * `Validation` for names that cannot appear in a tag.
    /// * `Conflict` when the tag name is taken (see [`CollisionPolicy`]).
    /// * `Gateway` when a repository operation fails; any temporary commit
    ///   has been rolled back and no tag exists.
    /// * `PartialTransaction` when the branch could not be restored.
    pub fn begin(
        &self,
        name: &str,
        parameters: Parameters,
        description: Option<String>,
    ) -> Result<ExperimentHandle> {
        validate_experiment_name(name)?;
        let started = self.clock.now();
        let tag = self.allocate_tag_name(name, started.timestamp())?;
        let _span = ExperimentSpan::enter(&tag);

        let untracked = self.gateway.untracked_files()?;
        if !untracked.is_empty() {
            obs::emit_untracked_ignored(&tag, &untracked);
        }

        let snapshot = self.snapshot(untracked)?;
        let restore_point = snapshot.restore_point();

        let capture_point = match &restore_point {
            Some(point) => self.commit_working_tree(&tag, point, &snapshot.untracked)?,
            None => snapshot.head.clone(),
        };

        let record = ExperimentRecord::new(parameters, started, description, &capture_point);
        if let Err(err) = self.create_tag(&tag, &capture_point, &record) {
            return Err(self.abort(&tag, restore_point.as_ref(), Some(&capture_point), err));
        }

        if let Some(point) = &restore_point {
            if let Err(source) = Self::restore(self.gateway.as_ref(), point) {
                obs::emit_partial_transaction(&tag, point.head.as_str(), &source);
                return Err(ExperimentError::PartialTransaction {
                    tag,
                    tag_created: true,
                    original_head: point.head.clone(),
                    capture_commit: Some(capture_point),
                    restore_point: point.clone(),
                    source,
                });
            }
        }

        METRICS.inc_captures();
        obs::emit_experiment_started(&tag, capture_point.as_str(), restore_point.is_some());
        Ok(ExperimentHandle::new(
            Arc::clone(&self.gateway),
            tag,
            capture_point,
            record,
        ))
    }

    /// Move the branch back to `point.head` and reinstate its index.
    ///
    /// Idempotent; safe to retry after a `PartialTransaction`.
    pub fn restore(gateway: &dyn RepositoryGateway, point: &RestorePoint) -> GatewayResult<()> {
        gateway.reset_branch(&point.head)?;
        gateway.restore_index(&point.index)
    }

    fn snapshot(&self, untracked: Vec<PathBuf>) -> Result<RepositorySnapshot> {
        let head = self.gateway.head_commit()?;
        let dirty = self.gateway.is_dirty()?;
        let index = if dirty {
            Some(self.gateway.snapshot_index()?)
        } else {
            None
        };
        Ok(RepositorySnapshot {
            head,
            dirty,
            untracked,
            index,
        })
    }

    /// First free tag name for `name` at `timestamp` under the collision policy.
    fn allocate_tag_name(&self, name: &str, timestamp: i64) -> Result<String> {
        let base = self.prefix.tag_name(name, timestamp);
        if !self.gateway.tag_exists(&base)? {
            return Ok(base);
        }
        match self.collision {
            CollisionPolicy::Fail => Err(ExperimentError::Conflict { tag: base }),
            CollisionPolicy::Suffix => {
                for n in 1..=MAX_SUFFIX_PROBES {
                    let candidate = format!("{base}_{n}");
                    if !self.gateway.tag_exists(&candidate)? {
                        debug!(base = %base, tag = %candidate, "tag name taken, using suffix");
                        return Ok(candidate);
                    }
                }
                Err(ExperimentError::Conflict { tag: base })
            }
        }
    }

    /// Commit the working tree, rolling back on failure.
    fn commit_working_tree(
        &self,
        tag: &str,
        point: &RestorePoint,
        untracked: &[PathBuf],
    ) -> Result<CommitId> {
        let message = format!("Temporary commit for experiment {}", experiment_id(tag));
        match self.stage_and_commit(&message, untracked) {
            Ok((commit, staged, removed)) => {
                METRICS.inc_temporary_commits();
                obs::emit_temporary_commit(tag, commit.as_str(), staged, removed);
                Ok(commit)
            }
            Err(err) => Err(self.abort(tag, Some(point), None, err.into())),
        }
    }

    /// Stage tracked files and commit them on top of the current tip.
    ///
    /// Files tracked but missing from the working tree are recorded as deleted.
    /// Untracked files are never staged, including files still in the tip
    /// tree but removed from the index.
    fn stage_and_commit(
        &self,
        message: &str,
        untracked: &[PathBuf],
    ) -> GatewayResult<(CommitId, usize, usize)> {
        let tracked: BTreeSet<PathBuf> = self.gateway.tracked_files()?.into_iter().collect();
        let present: BTreeSet<PathBuf> = self.gateway.worktree_files()?.into_iter().collect();
        let untracked: BTreeSet<&PathBuf> = untracked.iter().collect();
        let to_stage: Vec<PathBuf> = tracked
            .intersection(&present)
            .filter(|path| !untracked.contains(path))
            .cloned()
            .collect();
        let to_remove: Vec<PathBuf> = tracked.difference(&present).cloned().collect();

        self.gateway.stage_paths(&to_stage)?;
        if !to_remove.is_empty() {
            self.gateway.remove_paths(&to_remove)?;
        }
        let commit = self.gateway.commit_index(message)?;
        Ok((commit, to_stage.len(), to_remove.len()))
    }

    fn create_tag(&self, tag: &str, target: &CommitId, record: &ExperimentRecord) -> Result<()> {
        let message = MetadataCodec::encode(record)?;
        match self.gateway.create_tag(tag, target, &message, false) {
            Ok(()) => Ok(()),
            Err(GatewayError::TagExists { name }) => Err(ExperimentError::Conflict { tag: name }),
            Err(err) => Err(err.into()),
        }
    }

    /// Roll back a capture that failed before its tag existed.
    ///
    /// Returns `error` when the rollback succeeds, `PartialTransaction`
    /// otherwise.
    fn abort(
        &self,
        tag: &str,
        point: Option<&RestorePoint>,
        capture_commit: Option<&CommitId>,
        error: ExperimentError,
    ) -> ExperimentError {
        let Some(point) = point else {
            return error;
        };
        match Self::restore(self.gateway.as_ref(), point) {
            Ok(()) => {
                warn!(tag = %tag, error = %error, "capture aborted, repository restored");
                error
            }
            Err(source) => {
                error!(tag = %tag, error = %error, "capture aborted and rollback failed");
                obs::emit_partial_transaction(tag, point.head.as_str(), &source);
                ExperimentError::PartialTransaction {
                    tag: tag.to_string(),
                    tag_created: false,
                    original_head: point.head.clone(),
                    capture_commit: capture_commit.cloned(),
                    restore_point: point.clone(),
                    source,
                }
            }
        }
    }
}
