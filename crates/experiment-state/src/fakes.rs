//! In-memory fake for [`RepositoryGateway`] (testing only)
//!
//! `MemoryRepository` models commits, one branch, an index, a working tree and
//! annotated tags without touching the filesystem. Individual operations can
//! be made to fail with [`MemoryRepository::fail_on`] to exercise the
//! partial-failure paths of a capture.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::GatewayError;
use crate::gateway::*;

type Tree = BTreeMap<PathBuf, Vec<u8>>;

/// Gateway operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    HeadCommit,
    IsDirty,
    UntrackedFiles,
    TrackedFiles,
    WorktreeFiles,
    StagePaths,
    RemovePaths,
    SnapshotIndex,
    RestoreIndex,
    CommitIndex,
    ResetBranch,
    CommitParents,
    ResolveCommit,
    ListTags,
    FindTag,
    CreateTag,
    DeleteTag,
}

/// A commit stored by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCommit {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub message: String,
    pub tree: BTreeMap<PathBuf, Vec<u8>>,
}

#[derive(Debug, Default)]
struct RepoState {
    commits: HashMap<CommitId, MemoryCommit>,
    trees: HashMap<String, Tree>,
    head: Option<CommitId>,
    index: Tree,
    worktree: Tree,
    ignored: HashSet<PathBuf>,
    tags: BTreeMap<String, TagRecord>,
    sequence: u64,
}

impl RepoState {
    fn head(&self) -> GatewayResult<&MemoryCommit> {
        let id = self.head.as_ref().ok_or(GatewayError::UnbornHead)?;
        self.commits
            .get(id)
            .ok_or_else(|| GatewayError::Git(format!("dangling HEAD {id}")))
    }

    fn head_tree(&self) -> Tree {
        self.head().map(|c| c.tree.clone()).unwrap_or_default()
    }

    fn tracked(&self) -> HashSet<PathBuf> {
        let mut tracked: HashSet<PathBuf> = self.index.keys().cloned().collect();
        tracked.extend(self.head_tree().into_keys());
        tracked
    }

    fn write_commit(&mut self, message: &str, tree: Tree, parents: Vec<CommitId>) -> CommitId {
        self.sequence += 1;
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(message.as_bytes());
        for parent in &parents {
            hasher.update(parent.as_str().as_bytes());
        }
        for (path, content) in &tree {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update(content);
        }
        let id = CommitId::new(&hex::encode(hasher.finalize())[..40]);
        self.commits.insert(
            id.clone(),
            MemoryCommit {
                id: id.clone(),
                parents,
                message: message.to_string(),
                tree,
            },
        );
        id
    }
}

/// In-memory repository with a single branch.
#[derive(Debug)]
pub struct MemoryRepository {
    workdir: PathBuf,
    state: Mutex<RepoState>,
    faults: Mutex<HashSet<GatewayOp>>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// An empty repository with an unborn HEAD.
    pub fn new() -> Self {
        Self {
            workdir: PathBuf::from("/memory"),
            state: Mutex::new(RepoState::default()),
            faults: Mutex::new(HashSet::new()),
        }
    }

    /// A repository whose first commit contains `files`, with a clean working tree.
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let repo = Self::new();
        for (path, content) in files {
            repo.write_file(path, content);
        }
        repo.commit_all("Initial commit");
        repo
    }

    /// Write a file into the working tree.
    pub fn write_file(&self, path: &str, content: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .worktree
            .insert(PathBuf::from(path), content.as_bytes().to_vec());
    }

    /// Remove a file from the working tree.
    pub fn remove_file(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.worktree.remove(Path::new(path));
    }

    /// Working-tree content of a file.
    pub fn read_file(&self, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .worktree
            .get(Path::new(path))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Mark a path as ignored so it is never reported as untracked.
    pub fn ignore(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.ignored.insert(PathBuf::from(path));
    }

    /// Stage a single working-tree file, like `git add <path>`.
    pub fn stage(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        let key = PathBuf::from(path);
        match state.worktree.get(&key).cloned() {
            Some(content) => {
                state.index.insert(key, content);
            }
            None => {
                state.index.remove(&key);
            }
        }
    }

    /// Stage every non-ignored working-tree file and commit, like `git add -A && git commit`.
    pub fn commit_all(&self, message: &str) -> CommitId {
        let mut state = self.state.lock().unwrap();
        let ignored = state.ignored.clone();
        let tree: Tree = state
            .worktree
            .iter()
            .filter(|(path, _)| !ignored.contains(*path))
            .map(|(path, content)| (path.clone(), content.clone()))
            .collect();
        let parents = state.head.iter().cloned().collect();
        let id = state.write_commit(message, tree.clone(), parents);
        state.index = tree;
        state.head = Some(id.clone());
        id
    }

    /// Current index content.
    pub fn index_entries(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        self.state.lock().unwrap().index.clone()
    }

    /// A stored commit by id.
    pub fn commit(&self, id: &CommitId) -> Option<MemoryCommit> {
        self.state.lock().unwrap().commits.get(id).cloned()
    }

    /// Make every subsequent call of `op` fail until [`clear_faults`](Self::clear_faults).
    pub fn fail_on(&self, op: GatewayOp) {
        self.faults.lock().unwrap().insert(op);
    }

    /// Remove all injected failures.
    pub fn clear_faults(&self) {
        self.faults.lock().unwrap().clear();
    }

    fn check(&self, op: GatewayOp) -> GatewayResult<()> {
        if self.faults.lock().unwrap().contains(&op) {
            return Err(GatewayError::OperationFailed {
                op: format!("{op:?}"),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl RepositoryGateway for MemoryRepository {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn head_commit(&self) -> GatewayResult<CommitId> {
        self.check(GatewayOp::HeadCommit)?;
        let state = self.state.lock().unwrap();
        Ok(state.head()?.id.clone())
    }

    fn is_dirty(&self) -> GatewayResult<bool> {
        self.check(GatewayOp::IsDirty)?;
        let state = self.state.lock().unwrap();
        if state.index != state.head_tree() {
            return Ok(true);
        }
        Ok(state
            .index
            .iter()
            .any(|(path, staged)| state.worktree.get(path) != Some(staged)))
    }

    fn untracked_files(&self) -> GatewayResult<Vec<PathBuf>> {
        self.check(GatewayOp::UntrackedFiles)?;
        let state = self.state.lock().unwrap();
        let tracked = state.tracked();
        Ok(state
            .worktree
            .keys()
            .filter(|path| !tracked.contains(*path) && !state.ignored.contains(*path))
            .cloned()
            .collect())
    }

    fn tracked_files(&self) -> GatewayResult<Vec<PathBuf>> {
        self.check(GatewayOp::TrackedFiles)?;
        let state = self.state.lock().unwrap();
        let mut tracked: Vec<PathBuf> = state.tracked().into_iter().collect();
        tracked.sort();
        Ok(tracked)
    }

    fn worktree_files(&self) -> GatewayResult<Vec<PathBuf>> {
        self.check(GatewayOp::WorktreeFiles)?;
        let state = self.state.lock().unwrap();
        Ok(state.worktree.keys().cloned().collect())
    }

    fn stage_paths(&self, paths: &[PathBuf]) -> GatewayResult<()> {
        self.check(GatewayOp::StagePaths)?;
        let mut state = self.state.lock().unwrap();
        for path in paths {
            let content = state.worktree.get(path).cloned().ok_or_else(|| {
                GatewayError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist in the working tree", path.display()),
                ))
            })?;
            state.index.insert(path.clone(), content);
        }
        Ok(())
    }

    fn remove_paths(&self, paths: &[PathBuf]) -> GatewayResult<()> {
        self.check(GatewayOp::RemovePaths)?;
        let mut state = self.state.lock().unwrap();
        for path in paths {
            state.index.remove(path);
        }
        Ok(())
    }

    fn snapshot_index(&self) -> GatewayResult<IndexSnapshot> {
        self.check(GatewayOp::SnapshotIndex)?;
        let mut state = self.state.lock().unwrap();
        let mut hasher = Sha256::new();
        for (path, content) in &state.index {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(content);
        }
        let tree_id = hex::encode(hasher.finalize());
        let index = state.index.clone();
        state.trees.insert(tree_id.clone(), index);
        Ok(IndexSnapshot::new(tree_id))
    }

    fn restore_index(&self, snapshot: &IndexSnapshot) -> GatewayResult<()> {
        self.check(GatewayOp::RestoreIndex)?;
        let mut state = self.state.lock().unwrap();
        let tree = state
            .trees
            .get(snapshot.tree_id())
            .cloned()
            .ok_or_else(|| GatewayError::Git(format!("unknown tree {}", snapshot.tree_id())))?;
        state.index = tree;
        Ok(())
    }

    fn commit_index(&self, message: &str) -> GatewayResult<CommitId> {
        self.check(GatewayOp::CommitIndex)?;
        let mut state = self.state.lock().unwrap();
        let parent = state.head()?.id.clone();
        let tree = state.index.clone();
        let id = state.write_commit(message, tree, vec![parent]);
        state.head = Some(id.clone());
        Ok(id)
    }

    fn reset_branch(&self, target: &CommitId) -> GatewayResult<()> {
        self.check(GatewayOp::ResetBranch)?;
        let mut state = self.state.lock().unwrap();
        if !state.commits.contains_key(target) {
            return Err(GatewayError::RevisionNotFound {
                spec: target.to_string(),
            });
        }
        state.head = Some(target.clone());
        Ok(())
    }

    fn commit_parents(&self, id: &CommitId) -> GatewayResult<Vec<CommitId>> {
        self.check(GatewayOp::CommitParents)?;
        let state = self.state.lock().unwrap();
        state
            .commits
            .get(id)
            .map(|c| c.parents.clone())
            .ok_or_else(|| GatewayError::RevisionNotFound {
                spec: id.to_string(),
            })
    }

    fn resolve_commit(&self, spec: &str) -> GatewayResult<CommitId> {
        self.check(GatewayOp::ResolveCommit)?;
        let state = self.state.lock().unwrap();
        if spec == "HEAD" {
            return Ok(state.head()?.id.clone());
        }
        let needle = spec.to_ascii_lowercase();
        let mut matches = state
            .commits
            .keys()
            .filter(|id| needle.len() >= 4 && id.as_str().starts_with(&needle));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id.clone()),
            _ => Err(GatewayError::RevisionNotFound {
                spec: spec.to_string(),
            }),
        }
    }

    fn list_tags(&self, prefix: &str) -> GatewayResult<Vec<TagRecord>> {
        self.check(GatewayOp::ListTags)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .tags
            .values()
            .filter(|tag| tag.name.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn find_tag(&self, name: &str) -> GatewayResult<Option<TagRecord>> {
        self.check(GatewayOp::FindTag)?;
        let state = self.state.lock().unwrap();
        Ok(state.tags.get(name).cloned())
    }

    fn create_tag(
        &self,
        name: &str,
        target: &CommitId,
        message: &str,
        force: bool,
    ) -> GatewayResult<()> {
        self.check(GatewayOp::CreateTag)?;
        let mut state = self.state.lock().unwrap();
        if !state.commits.contains_key(target) {
            return Err(GatewayError::RevisionNotFound {
                spec: target.to_string(),
            });
        }
        if !force && state.tags.contains_key(name) {
            return Err(GatewayError::TagExists {
                name: name.to_string(),
            });
        }
        state.tags.insert(
            name.to_string(),
            TagRecord {
                name: name.to_string(),
                target: target.clone(),
                message: message.to_string(),
            },
        );
        Ok(())
    }

    fn delete_tag(&self, name: &str) -> GatewayResult<()> {
        self.check(GatewayOp::DeleteTag)?;
        let mut state = self.state.lock().unwrap();
        state
            .tags
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| GatewayError::TagNotFound {
                name: name.to_string(),
            })
    }
}
