//! The live experiment handle returned by a capture.
//!
//! State machine: `Active → {ResultsRecorded | Cancelled}`. Recording results
//! may be repeated; each call replaces the stored results. When the handle's
//! scope ends (explicit [`ExperimentHandle::finish`] / [`ExperimentHandle::cancel`]
//! or drop) the tag is deleted unless results were recorded.

use std::fmt;
use std::sync::Arc;

use experiment_state::{CommitId, GatewayError, RepositoryGateway};

use crate::codec::MetadataCodec;
use crate::domain::{ExperimentError, ExperimentRecord, Result, Results};
use crate::metrics::METRICS;
use crate::obs;

/// Lifecycle of an [`ExperimentHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Active,
    ResultsRecorded,
    Cancelled,
}

/// How a handle's scope ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentOutcome {
    /// Results were recorded; the tag is kept.
    Completed,
    /// No results were recorded; the tag was removed.
    Cancelled,
}

/// Owns the tag of one in-flight experiment.
pub struct ExperimentHandle {
    gateway: Arc<dyn RepositoryGateway>,
    tag: String,
    target: CommitId,
    record: ExperimentRecord,
    state: HandleState,
    closed: bool,
}

impl ExperimentHandle {
    pub(crate) fn new(
        gateway: Arc<dyn RepositoryGateway>,
        tag: String,
        target: CommitId,
        record: ExperimentRecord,
    ) -> Self {
        Self {
            gateway,
            tag,
            target,
            record,
            state: HandleState::Active,
            closed: false,
        }
    }

    /// Full tag name, e.g. `experiments/exp_lr1700000000`.
    pub fn name(&self) -> &str {
        &self.tag
    }

    /// The capture point the tag targets.
    pub fn commit(&self) -> &CommitId {
        &self.target
    }

    /// The record as last written by this handle.
    pub fn record(&self) -> &ExperimentRecord {
        &self.record
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Store `results` in the tag, replacing any earlier results.
    ///
    /// The stored record is re-read first, so edits made to the tag since the
    /// capture are preserved apart from `results`.
    ///
    /// # Errors
    ///
    /// `MissingTag` if the tag was deleted since the capture.
    pub fn record_results(&mut self, results: Results) -> Result<()> {
        self.record = replace_results(self.gateway.as_ref(), &self.tag, results)?;
        self.state = HandleState::ResultsRecorded;
        Ok(())
    }

    /// End the handle's scope: keep the tag when results were recorded,
    /// delete it otherwise.
    pub fn finish(mut self) -> Result<ExperimentOutcome> {
        self.close()
    }

    /// Abandon the experiment. Same as [`finish`](Self::finish): recorded
    /// results still keep the tag.
    pub fn cancel(self) -> Result<ExperimentOutcome> {
        self.finish()
    }

    fn close(&mut self) -> Result<ExperimentOutcome> {
        self.closed = true;
        match self.state {
            HandleState::ResultsRecorded => {
                obs::emit_experiment_completed(&self.tag);
                Ok(ExperimentOutcome::Completed)
            }
            HandleState::Active | HandleState::Cancelled => {
                let deleted = remove_tag(self.gateway.as_ref(), &self.tag)?;
                self.state = HandleState::Cancelled;
                METRICS.inc_cancellations();
                obs::emit_experiment_cancelled(&self.tag, deleted);
                Ok(ExperimentOutcome::Cancelled)
            }
        }
    }
}

impl Drop for ExperimentHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.close() {
            obs::emit_cleanup_failed(&self.tag, &err);
        }
    }
}

impl fmt::Debug for ExperimentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentHandle")
            .field("tag", &self.tag)
            .field("target", &self.target)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Re-read `tag`, swap in `results` and force-replace the annotation.
///
/// The tag keeps its target commit; only the annotation changes.
pub(crate) fn replace_results(
    gateway: &dyn RepositoryGateway,
    tag: &str,
    results: Results,
) -> Result<ExperimentRecord> {
    let stored = gateway
        .find_tag(tag)?
        .ok_or_else(|| ExperimentError::MissingTag {
            tag: tag.to_string(),
        })?;
    let updated = MetadataCodec::decode(&stored)?.with_results(results);
    let message = MetadataCodec::encode(&updated)?;
    gateway.create_tag(tag, &stored.target, &message, true)?;

    METRICS.inc_results_recorded();
    obs::emit_results_recorded(tag, updated.results.len());
    Ok(updated)
}

/// Delete `tag`, reporting whether it existed and is now gone.
pub(crate) fn remove_tag(gateway: &dyn RepositoryGateway, tag: &str) -> Result<bool> {
    if !gateway.tag_exists(tag)? {
        return Ok(false);
    }
    match gateway.delete_tag(tag) {
        Ok(()) => {}
        // Deleted concurrently between the check and the delete.
        Err(GatewayError::TagNotFound { .. }) => return Ok(false),
        Err(err) => return Err(err.into()),
    }
    Ok(!gateway.tag_exists(tag)?)
}
