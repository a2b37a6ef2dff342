//! Structured observability hooks for the experiment lifecycle.
//!
//! This module provides:
//! - Experiment-scoped tracing spans via the `ExperimentSpan` RAII guard
//! - Emission functions for lifecycle events: capture, results, cancel, delete
//!
//! Lifecycle events are emitted at `info!`; cancellations and the untracked
//! files notice at `warn!`; restore and cleanup failures at `error!`.

use std::path::PathBuf;

use tracing::{error, info, warn};

/// RAII guard that enters an experiment-scoped span for the duration of a capture.
///
/// # Example
///
/// ```ignore
/// let _span = ExperimentSpan::enter("experiments/exp_lr1700000000");
/// // every event below is tagged with tag = experiments/exp_lr1700000000
/// ```
pub struct ExperimentSpan {
    _span: tracing::span::EnteredSpan,
}

impl ExperimentSpan {
    /// Create and enter a span tagged with the experiment tag.
    pub fn enter(tag: &str) -> Self {
        let span = tracing::info_span!("experimenter.capture", tag = %tag);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: experiment captured and tagged.
pub fn emit_experiment_started(tag: &str, commit_sha: &str, temporary_commit: bool) {
    info!(
        event = "experiment.started",
        tag = %tag,
        commit_sha = %commit_sha,
        temporary_commit = temporary_commit,
        "Started experiment {tag}"
    );
}

/// Emit event: untracked files present at capture time (warning level).
pub fn emit_untracked_ignored(tag: &str, files: &[PathBuf]) {
    let listed: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    warn!(
        event = "experiment.untracked_ignored",
        tag = %tag,
        count = files.len(),
        "Untracked files will not be recorded: {listed:?}"
    );
}

/// Emit event: working-tree changes committed as the capture point.
pub fn emit_temporary_commit(tag: &str, commit_sha: &str, staged: usize, removed: usize) {
    info!(
        event = "experiment.temporary_commit",
        tag = %tag,
        commit_sha = %commit_sha,
        staged = staged,
        removed = removed,
    );
}

/// Emit event: results written into the experiment tag.
pub fn emit_results_recorded(tag: &str, result_keys: usize) {
    info!(event = "experiment.results_recorded", tag = %tag, result_keys = result_keys);
}

/// Emit event: experiment scope ended with results kept.
pub fn emit_experiment_completed(tag: &str) {
    info!(event = "experiment.completed", tag = %tag, "Experiment {tag} completed");
}

/// Emit event: experiment scope ended without results (warning level).
pub fn emit_experiment_cancelled(tag: &str, tag_deleted: bool) {
    warn!(
        event = "experiment.cancelled",
        tag = %tag,
        tag_deleted = tag_deleted,
        "Experiment {tag} cancelled, since no results were recorded"
    );
}

/// Emit event: experiment tag deleted through the catalog.
pub fn emit_experiment_deleted(tag: &str, existed: bool) {
    info!(event = "experiment.deleted", tag = %tag, existed = existed);
}

/// Emit event: capture could not restore the branch (error level).
pub fn emit_partial_transaction(tag: &str, original_head: &str, error: &dyn std::fmt::Display) {
    error!(
        event = "experiment.partial_transaction",
        tag = %tag,
        original_head = %original_head,
        error = %error,
        "Repository left mid-capture; run `git reset --soft {original_head}` to recover"
    );
}

/// Emit event: automatic cleanup at scope exit failed (error level).
pub fn emit_cleanup_failed(tag: &str, error: &dyn std::fmt::Display) {
    error!(event = "experiment.cleanup_failed", tag = %tag, error = %error);
}
