//! libgit2-backed [`RepositoryGateway`].

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use git2::{
    ErrorCode, ObjectType, Oid, Repository, ResetType, Signature, Status, StatusOptions,
    TreeWalkMode, TreeWalkResult,
};
use tracing::debug;

use crate::error::GatewayError;
use crate::gateway::{CommitId, GatewayResult, IndexSnapshot, RepositoryGateway, TagRecord};

const FALLBACK_NAME: &str = "experimenter";
const FALLBACK_EMAIL: &str = "experimenter@localhost";

/// Index mode of a submodule entry.
const GITLINK_MODE: u32 = 0o160000;

fn index_changes() -> Status {
    Status::INDEX_NEW
        | Status::INDEX_MODIFIED
        | Status::INDEX_DELETED
        | Status::INDEX_RENAMED
        | Status::INDEX_TYPECHANGE
}

/// Gateway over an on-disk git repository.
///
/// Stateless apart from the working-tree root: the repository is reopened
/// for each call so the index is never stale between operations.
#[derive(Debug, Clone)]
pub struct GitRepository {
    workdir: PathBuf,
}

impl GitRepository {
    /// Discover the repository containing `path`, searching parent directories.
    pub fn discover(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let repo = Repository::discover(path).map_err(|e| match e.code() {
            ErrorCode::NotFound => GatewayError::NotARepository(path.display().to_string()),
            _ => GatewayError::from(e),
        })?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| GatewayError::BareRepository(repo.path().display().to_string()))?
            .to_path_buf();
        debug!(workdir = %workdir.display(), "opened git repository");
        Ok(Self { workdir })
    }

    fn repo(&self) -> GatewayResult<Repository> {
        Ok(Repository::open(&self.workdir)?)
    }

    fn head_commit_of<'r>(repo: &'r Repository) -> GatewayResult<git2::Commit<'r>> {
        let head = repo.head().map_err(|e| match e.code() {
            ErrorCode::UnbornBranch | ErrorCode::NotFound => GatewayError::UnbornHead,
            _ => GatewayError::from(e),
        })?;
        Ok(head.peel_to_commit()?)
    }

    fn signature(repo: &Repository) -> GatewayResult<Signature<'static>> {
        match repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?),
        }
    }

    fn oid(id: &CommitId) -> GatewayResult<Oid> {
        Ok(Oid::from_str(id.as_str())?)
    }

    fn read_tag(repo: &Repository, name: &str) -> GatewayResult<Option<TagRecord>> {
        let reference = match repo.find_reference(&format!("refs/tags/{name}")) {
            Ok(reference) => reference,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let tag = reference
            .peel_to_tag()
            .map_err(|_| GatewayError::NotAnnotated {
                name: name.to_string(),
            })?;
        let target = tag.target()?.peel_to_commit()?.id();
        Ok(Some(TagRecord {
            name: name.to_string(),
            target: CommitId::from(target),
            message: tag.message().unwrap_or_default().to_string(),
        }))
    }

    fn walk_worktree(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> GatewayResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_name() == ".git" {
                continue;
            }
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                Self::walk_worktree(root, &path, out)?;
            } else if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
        Ok(())
    }
}

impl RepositoryGateway for GitRepository {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn head_commit(&self) -> GatewayResult<CommitId> {
        let repo = self.repo()?;
        let commit = Self::head_commit_of(&repo)?;
        Ok(CommitId::from(commit.id()))
    }

    fn is_dirty(&self) -> GatewayResult<bool> {
        let repo = self.repo()?;
        let gitlinks: BTreeSet<Vec<u8>> = repo
            .index()?
            .iter()
            .filter(|entry| entry.mode == GITLINK_MODE)
            .map(|entry| entry.path)
            .collect();
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        // Staged submodule bumps count; changes inside a checked-out submodule do not.
        let dirty = statuses.iter().any(|entry| {
            let status = entry.status();
            status.intersects(index_changes()) || !gitlinks.contains(entry.path_bytes())
        });
        Ok(dirty)
    }

    fn untracked_files(&self) -> GatewayResult<Vec<PathBuf>> {
        let repo = self.repo()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .filter(|entry| entry.status().contains(Status::WT_NEW))
            .filter_map(|entry| entry.path().map(PathBuf::from))
            .collect())
    }

    fn tracked_files(&self) -> GatewayResult<Vec<PathBuf>> {
        let repo = self.repo()?;
        let mut files = BTreeSet::new();

        match Self::head_commit_of(&repo) {
            Ok(commit) => {
                let tree = commit.tree()?;
                tree.walk(TreeWalkMode::PreOrder, |root, entry| {
                    if entry.kind() == Some(ObjectType::Blob) {
                        if let Some(name) = entry.name() {
                            files.insert(PathBuf::from(format!("{root}{name}")));
                        }
                    }
                    TreeWalkResult::Ok
                })?;
            }
            Err(GatewayError::UnbornHead) => {}
            Err(e) => return Err(e),
        }

        let index = repo.index()?;
        for entry in index.iter().filter(|entry| entry.mode != GITLINK_MODE) {
            files.insert(PathBuf::from(
                String::from_utf8_lossy(&entry.path).into_owned(),
            ));
        }

        Ok(files.into_iter().collect())
    }

    fn worktree_files(&self) -> GatewayResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        Self::walk_worktree(&self.workdir, &self.workdir, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn stage_paths(&self, paths: &[PathBuf]) -> GatewayResult<()> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        for path in paths {
            index.add_path(path)?;
        }
        index.write()?;
        debug!(count = paths.len(), "staged paths");
        Ok(())
    }

    fn remove_paths(&self, paths: &[PathBuf]) -> GatewayResult<()> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        for path in paths {
            index.remove_path(path)?;
        }
        index.write()?;
        debug!(count = paths.len(), "removed paths from index");
        Ok(())
    }

    fn snapshot_index(&self) -> GatewayResult<IndexSnapshot> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        let tree = index.write_tree()?;
        Ok(IndexSnapshot::new(tree.to_string()))
    }

    fn restore_index(&self, snapshot: &IndexSnapshot) -> GatewayResult<()> {
        let repo = self.repo()?;
        let tree = repo.find_tree(Oid::from_str(snapshot.tree_id())?)?;
        let mut index = repo.index()?;
        index.read_tree(&tree)?;
        index.write()?;
        Ok(())
    }

    fn commit_index(&self, message: &str) -> GatewayResult<CommitId> {
        let repo = self.repo()?;
        let parent = Self::head_commit_of(&repo)?;
        let mut index = repo.index()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = Self::signature(&repo)?;
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
        debug!(commit = %oid, parent = %parent.id(), "created commit");
        Ok(CommitId::from(oid))
    }

    fn reset_branch(&self, target: &CommitId) -> GatewayResult<()> {
        let repo = self.repo()?;
        let object = repo.find_object(Self::oid(target)?, Some(ObjectType::Commit))?;
        repo.reset(&object, ResetType::Soft, None)?;
        debug!(target = %target, "branch pointer reset");
        Ok(())
    }

    fn commit_parents(&self, id: &CommitId) -> GatewayResult<Vec<CommitId>> {
        let repo = self.repo()?;
        let commit = repo.find_commit(Self::oid(id)?)?;
        Ok(commit.parent_ids().map(CommitId::from).collect())
    }

    fn resolve_commit(&self, spec: &str) -> GatewayResult<CommitId> {
        let repo = self.repo()?;
        let object = repo.revparse_single(spec).map_err(|e| match e.code() {
            ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::Ambiguous => {
                GatewayError::RevisionNotFound {
                    spec: spec.to_string(),
                }
            }
            _ => GatewayError::from(e),
        })?;
        let commit = object
            .peel_to_commit()
            .map_err(|_| GatewayError::RevisionNotFound {
                spec: spec.to_string(),
            })?;
        Ok(CommitId::from(commit.id()))
    }

    fn list_tags(&self, prefix: &str) -> GatewayResult<Vec<TagRecord>> {
        let repo = self.repo()?;
        let names = repo.tag_names(None)?;
        let mut tags = Vec::new();
        for name in names.iter().flatten() {
            if !name.starts_with(prefix) {
                continue;
            }
            if let Some(tag) = Self::read_tag(&repo, name)? {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    fn find_tag(&self, name: &str) -> GatewayResult<Option<TagRecord>> {
        let repo = self.repo()?;
        Self::read_tag(&repo, name)
    }

    fn create_tag(
        &self,
        name: &str,
        target: &CommitId,
        message: &str,
        force: bool,
    ) -> GatewayResult<()> {
        let repo = self.repo()?;
        let object = repo.find_object(Self::oid(target)?, Some(ObjectType::Commit))?;
        let sig = Self::signature(&repo)?;
        match repo.tag(name, &object, &sig, message, force) {
            Ok(_) => {
                debug!(tag = %name, target = %target, force, "tag written");
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::Exists => Err(GatewayError::TagExists {
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_tag(&self, name: &str) -> GatewayResult<()> {
        let repo = self.repo()?;
        match repo.tag_delete(name) {
            Ok(()) => Ok(()),
            Err(e) if e.code() == ErrorCode::NotFound => Err(GatewayError::TagNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn tag_exists(&self, name: &str) -> GatewayResult<bool> {
        let repo = self.repo()?;
        let found = match repo.find_reference(&format!("refs/tags/{name}")) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        };
        found
    }
}
