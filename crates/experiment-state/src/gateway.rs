//! Repository gateway trait definitions
//!
//! The gateway is the only way the experiment core touches a repository:
//! - Branch tip queries and resets
//! - Dirty / untracked / tracked file queries
//! - Index staging, snapshots and commits
//! - Annotated tag listing, creation and deletion
//!
//! All methods are synchronous and blocking. An in-memory implementation is
//! provided for testing via the `fakes` module.

use std::path::{Path, PathBuf};

use crate::error::GatewayError;

/// Result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Hexadecimal commit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(String);

impl CommitId {
    /// Wrap a hex identifier, normalising it to lowercase.
    pub fn new(hex: impl Into<String>) -> Self {
        CommitId(hex.into().to_ascii_lowercase())
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 8 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<git2::Oid> for CommitId {
    fn from(oid: git2::Oid) -> Self {
        CommitId(oid.to_string())
    }
}

/// An annotated tag as stored in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    /// Full tag name without the `refs/tags/` prefix
    pub name: String,
    /// Commit the tag points at
    pub target: CommitId,
    /// Annotation body
    pub message: String,
}

/// Opaque snapshot of the index, restorable with
/// [`RepositoryGateway::restore_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSnapshot {
    tree_id: String,
}

impl IndexSnapshot {
    pub fn new(tree_id: impl Into<String>) -> Self {
        IndexSnapshot {
            tree_id: tree_id.into(),
        }
    }

    /// Identifier of the tree the index was written to.
    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }
}

/// Capability surface over a version-control repository.
///
/// Paths are relative to [`workdir`](RepositoryGateway::workdir) and use `/`
/// separators.
///
/// Guarantees expected by callers:
/// - `commit_index` advances the current branch (or detached HEAD) to the new commit.
/// - `reset_branch` moves the branch pointer only; index and working tree are untouched.
/// - `create_tag` without `force` fails with `GatewayError::TagExists` on an existing name.
/// - `delete_tag` fails with `GatewayError::TagNotFound` on a missing name.
pub trait RepositoryGateway: Send + Sync {
    /// Root of the working tree.
    fn workdir(&self) -> &Path;

    /// Commit the current branch (or detached HEAD) points at.
    fn head_commit(&self) -> GatewayResult<CommitId>;

    /// Whether the index or tracked working-tree files differ from HEAD.
    /// Untracked files do not make a repository dirty, and neither do
    /// changes inside a checked-out submodule; a staged submodule bump does.
    fn is_dirty(&self) -> GatewayResult<bool>;

    /// Files present in the working tree but neither tracked nor ignored.
    fn untracked_files(&self) -> GatewayResult<Vec<PathBuf>>;

    /// Files tracked by the HEAD tree or already present in the index.
    /// Submodule entries are not files and are left out.
    fn tracked_files(&self) -> GatewayResult<Vec<PathBuf>>;

    /// Every regular file (or symlink) under the working tree, excluding `.git`.
    fn worktree_files(&self) -> GatewayResult<Vec<PathBuf>>;

    /// Stage the working-tree content of each path into the index.
    fn stage_paths(&self, paths: &[PathBuf]) -> GatewayResult<()>;

    /// Drop each path from the index.
    fn remove_paths(&self, paths: &[PathBuf]) -> GatewayResult<()>;

    /// Capture the current index so it can be restored later.
    fn snapshot_index(&self) -> GatewayResult<IndexSnapshot>;

    /// Replace the index with a previously captured snapshot.
    fn restore_index(&self, snapshot: &IndexSnapshot) -> GatewayResult<()>;

    /// Commit the current index on top of HEAD and advance the branch.
    fn commit_index(&self, message: &str) -> GatewayResult<CommitId>;

    /// Point the current branch (or detached HEAD) at `target`.
    fn reset_branch(&self, target: &CommitId) -> GatewayResult<()>;

    /// Parents of a commit, in order.
    fn commit_parents(&self, id: &CommitId) -> GatewayResult<Vec<CommitId>>;

    /// Resolve a revision expression (`HEAD`, a branch, a full or short id).
    fn resolve_commit(&self, spec: &str) -> GatewayResult<CommitId>;

    /// All annotated tags whose name starts with `prefix`.
    fn list_tags(&self, prefix: &str) -> GatewayResult<Vec<TagRecord>>;

    /// A single tag by full name, or `None` if absent.
    fn find_tag(&self, name: &str) -> GatewayResult<Option<TagRecord>>;

    /// Create (or with `force`, replace) an annotated tag.
    fn create_tag(
        &self,
        name: &str,
        target: &CommitId,
        message: &str,
        force: bool,
    ) -> GatewayResult<()>;

    /// Delete a tag by full name.
    fn delete_tag(&self, name: &str) -> GatewayResult<()>;

    /// Whether a tag with this full name exists.
    fn tag_exists(&self, name: &str) -> GatewayResult<bool> {
        Ok(self.find_tag(name)?.is_some())
    }
}
