//! End-to-end capture tests against real git repositories.
//!
//! Each test builds a fresh repository in a temp directory with two committed
//! files, then drives the public `Experimenter` API and inspects the result
//! with git2 directly.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use experimenter_core::{
    CollisionPolicy, CommitId, ExperimentConfig, ExperimentError, ExperimentOutcome,
    Experimenter, FixedClock, HandleState, ListFilter, Parameters, TagPrefix,
};
use git2::{Repository, Signature, Status};
use serde_json::{json, Value};

const TEST1: &str = "a/package/test1.txt";
const TEST2: &str = "test2.txt";
const ORIGINAL1: &str = "This is a test!";
const ORIGINAL2: &str = "This is another test!";
const SUBMODULE: &str = "vendor/lib";
const GITLINK_MODE: u32 = 0o160000;

struct Sample {
    dir: tempfile::TempDir,
    experimenter: Experimenter,
}

impl Sample {
    fn new() -> Self {
        Self::with_config(|config| config)
    }

    fn with_config(adjust: impl FnOnce(ExperimentConfig) -> ExperimentConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "test-user").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
        }
        fs::create_dir_all(dir.path().join("a/package")).unwrap();
        fs::write(dir.path().join(TEST1), ORIGINAL1).unwrap();
        fs::write(dir.path().join(TEST2), ORIGINAL2).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(TEST1)).unwrap();
        index.add_path(Path::new(TEST2)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("test-user", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial dummy commit", &tree, &[])
            .unwrap();

        let config = adjust(ExperimentConfig {
            repo_dir: dir.path().to_path_buf(),
            ..ExperimentConfig::default()
        });
        let experimenter = Experimenter::open(&config)
            .unwrap()
            .with_clock(Arc::new(FixedClock::at_unix(1_700_000_000)));
        Sample { dir, experimenter }
    }

    fn repo(&self) -> Repository {
        Repository::open(self.dir.path()).unwrap()
    }

    fn head(&self) -> CommitId {
        CommitId::from(self.repo().head().unwrap().peel_to_commit().unwrap().id())
    }

    fn tag_names(&self) -> Vec<String> {
        self.repo()
            .tag_names(None)
            .unwrap()
            .iter()
            .flatten()
            .map(str::to_string)
            .collect()
    }

    fn write(&self, path: &str, content: &str) {
        fs::write(self.dir.path().join(path), content).unwrap();
    }

    fn read(&self, path: &str) -> String {
        fs::read_to_string(self.dir.path().join(path)).unwrap()
    }

    fn stage(&self, path: &str) {
        let repo = self.repo();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(path)).unwrap();
        index.write().unwrap();
    }

    fn unstage(&self, path: &str) {
        let repo = self.repo();
        let mut index = repo.index().unwrap();
        index.remove_path(Path::new(path)).unwrap();
        index.write().unwrap();
    }

    /// Stage a submodule entry pointing at `id`.
    fn stage_gitlink(&self, path: &str, id: git2::Oid) {
        let repo = self.repo();
        let mut index = repo.index().unwrap();
        index
            .add(&git2::IndexEntry {
                ctime: git2::IndexTime::new(0, 0),
                mtime: git2::IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode: GITLINK_MODE,
                uid: 0,
                gid: 0,
                file_size: 0,
                id,
                flags: 0,
                flags_extended: 0,
                path: path.as_bytes().to_vec(),
            })
            .unwrap();
        index.write().unwrap();
    }

    /// Register an unpopulated submodule at `vendor/lib` and commit it.
    fn add_submodule(&self) -> git2::Oid {
        let id = git2::Oid::hash_object(git2::ObjectType::Blob, b"lib v1").unwrap();
        self.write(
            ".gitmodules",
            "[submodule \"lib\"]\n\tpath = vendor/lib\n\turl = https://example.com/lib.git\n",
        );
        fs::create_dir_all(self.dir.path().join(SUBMODULE)).unwrap();
        self.stage(".gitmodules");
        self.stage_gitlink(SUBMODULE, id);

        let repo = self.repo();
        let tree = repo
            .find_tree(repo.index().unwrap().write_tree().unwrap())
            .unwrap();
        let parent = repo.head().unwrap().peel_to_commit().unwrap();
        let sig = Signature::now("test-user", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Add submodule", &tree, &[&parent])
            .unwrap();
        id
    }

    /// Submodule commit recorded at `path` in the tree of `commit`, if any.
    fn committed_gitlink(&self, commit: &CommitId, path: &str) -> Option<git2::Oid> {
        let repo = self.repo();
        let commit = repo
            .find_commit(git2::Oid::from_str(commit.as_str()).unwrap())
            .unwrap();
        let entry = commit.tree().unwrap().get_path(Path::new(path)).ok()?;
        assert_eq!(entry.filemode(), GITLINK_MODE as i32);
        Some(entry.id())
    }

    /// Submodule commit recorded at `path` in the index.
    fn indexed_gitlink(&self, path: &str) -> git2::Oid {
        let index = self.repo().index().unwrap();
        index.get_path(Path::new(path), 0).unwrap().id
    }

    fn status(&self, path: &str) -> Status {
        self.repo().status_file(Path::new(path)).unwrap()
    }

    /// Content of `path` in the tree of `commit`, if present.
    fn committed(&self, commit: &CommitId, path: &str) -> Option<String> {
        let repo = self.repo();
        let commit = repo
            .find_commit(git2::Oid::from_str(commit.as_str()).unwrap())
            .unwrap();
        let tree = commit.tree().unwrap();
        let entry = tree.get_path(Path::new(path)).ok()?;
        let blob = entry.to_object(&repo).unwrap().peel_to_blob().unwrap();
        Some(String::from_utf8_lossy(blob.content()).into_owned())
    }

    fn parent(&self, commit: &CommitId) -> CommitId {
        let repo = self.repo();
        let commit = repo
            .find_commit(git2::Oid::from_str(commit.as_str()).unwrap())
            .unwrap();
        CommitId::from(commit.parent_id(0).unwrap())
    }
}

fn params(value: Value) -> Parameters {
    value.as_object().cloned().unwrap()
}

// ===========================================================================
// Clean repository
// ===========================================================================

#[test]
fn clean_capture_tags_current_tip() {
    let sample = Sample::new();
    let c0 = sample.head();

    let handle = sample
        .experimenter
        .start("exp1", params(json!({"lr": 0.1})), None)
        .unwrap();
    assert_eq!(handle.name(), "experiments/exp_exp11700000000");
    assert_eq!(handle.commit(), &c0);

    let records = sample.experimenter.catalog().list(&ListFilter::all()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].commit_sha, c0.as_str());
    assert_eq!(records[0].parameters, params(json!({"lr": 0.1})));
    assert!(records[0].results.is_empty());
    assert_eq!(records[0].started, 1_700_000_000.0);
    assert_eq!(sample.head(), c0);
}

#[test]
fn tag_is_absent_before_and_present_once_after_capture() {
    let sample = Sample::new();
    assert!(sample.tag_names().is_empty());

    let handle = sample
        .experimenter
        .start("unittest", params(json!({"testParams": true})), None)
        .unwrap();
    let names = sample.tag_names();
    assert_eq!(names, vec![handle.name().to_string()]);
}

// ===========================================================================
// Dirty repository
// ===========================================================================

#[test]
fn dirty_capture_commits_changes_and_restores_branch() {
    let sample = Sample::new();
    let c0 = sample.head();
    let modified = format!("{ORIGINAL1}Updated!");
    sample.write(TEST1, &modified);

    let handle = sample.experimenter.start("exp2", Parameters::new(), None).unwrap();

    assert_eq!(sample.head(), c0);
    assert_ne!(handle.commit(), &c0);
    assert_eq!(sample.parent(handle.commit()), c0);
    assert_eq!(sample.read(TEST1), modified);
    assert_eq!(sample.committed(handle.commit(), TEST1).as_deref(), Some(modified.as_str()));
    assert_eq!(sample.committed(handle.commit(), TEST2).as_deref(), Some(ORIGINAL2));

    let entry = sample.experimenter.catalog().get(handle.name()).unwrap();
    assert_eq!(entry.record.commit_sha, handle.commit().as_str());
    assert_eq!(entry.target, *handle.commit());
}

#[test]
fn dirty_capture_preserves_index_state() {
    let sample = Sample::new();
    sample.write(TEST1, "unstaged edit");
    sample.write(TEST2, "staged edit");
    sample.stage(TEST2);

    let handle = sample.experimenter.start("idx", Parameters::new(), None).unwrap();

    assert_eq!(sample.status(TEST1), Status::WT_MODIFIED);
    assert_eq!(sample.status(TEST2), Status::INDEX_MODIFIED);
    assert_eq!(sample.committed(handle.commit(), TEST1).as_deref(), Some("unstaged edit"));
    assert_eq!(sample.committed(handle.commit(), TEST2).as_deref(), Some("staged edit"));
}

#[test]
fn untracked_files_are_neither_captured_nor_staged() {
    let sample = Sample::new();
    sample.write(TEST1, "changed");
    sample.write("notes.txt", "scratch");

    let handle = sample.experimenter.start("untracked", Parameters::new(), None).unwrap();

    assert!(sample.committed(handle.commit(), "notes.txt").is_none());
    assert_eq!(sample.status("notes.txt"), Status::WT_NEW);
    assert_eq!(sample.read("notes.txt"), "scratch");
}

#[test]
fn untracked_files_alone_do_not_create_a_commit() {
    let sample = Sample::new();
    let c0 = sample.head();
    sample.write("notes.txt", "scratch");

    let handle = sample.experimenter.start("clean", Parameters::new(), None).unwrap();
    assert_eq!(handle.commit(), &c0);
}

#[test]
fn deleted_tracked_file_is_captured_as_deletion() {
    let sample = Sample::new();
    fs::remove_file(sample.dir.path().join(TEST2)).unwrap();

    let handle = sample.experimenter.start("rm", Parameters::new(), None).unwrap();

    assert!(sample.committed(handle.commit(), TEST2).is_none());
    assert_eq!(sample.committed(handle.commit(), TEST1).as_deref(), Some(ORIGINAL1));
    assert_eq!(sample.status(TEST2), Status::WT_DELETED);
}

#[test]
fn file_removed_from_index_is_not_captured() {
    let sample = Sample::new();
    sample.write(TEST1, "changed");
    sample.unstage(TEST2);
    assert_eq!(sample.status(TEST2), Status::INDEX_DELETED | Status::WT_NEW);

    let handle = sample.experimenter.start("cached", Parameters::new(), None).unwrap();

    assert!(sample.committed(handle.commit(), TEST2).is_none());
    assert_eq!(sample.committed(handle.commit(), TEST1).as_deref(), Some("changed"));
    assert_eq!(sample.status(TEST2), Status::INDEX_DELETED | Status::WT_NEW);
    assert_eq!(sample.read(TEST2), ORIGINAL2);
}

#[test]
fn dirty_capture_keeps_submodules() {
    let sample = Sample::new();
    let gitlink = sample.add_submodule();
    let tip = sample.head();
    sample.write(TEST1, "changed");

    let handle = sample.experimenter.start("sub", Parameters::new(), None).unwrap();

    assert_ne!(handle.commit(), &tip);
    assert_eq!(sample.committed_gitlink(handle.commit(), SUBMODULE), Some(gitlink));
    assert_eq!(sample.committed(handle.commit(), TEST1).as_deref(), Some("changed"));
    assert_eq!(sample.head(), tip);
    assert_eq!(sample.indexed_gitlink(SUBMODULE), gitlink);
}

#[test]
fn staged_submodule_bump_is_captured() {
    let sample = Sample::new();
    let old = sample.add_submodule();
    let tip = sample.head();
    let bumped = git2::Oid::hash_object(git2::ObjectType::Blob, b"lib v2").unwrap();
    sample.stage_gitlink(SUBMODULE, bumped);

    let handle = sample.experimenter.start("bump", Parameters::new(), None).unwrap();

    assert_ne!(handle.commit(), &tip);
    assert_eq!(sample.parent(handle.commit()), tip);
    assert_eq!(sample.committed_gitlink(handle.commit(), SUBMODULE), Some(bumped));
    assert_eq!(sample.committed_gitlink(&tip, SUBMODULE), Some(old));
    assert_eq!(sample.head(), tip);
    assert_eq!(sample.indexed_gitlink(SUBMODULE), bumped);
}

#[test]
fn dirty_capture_without_results_is_cleaned_up() {
    let sample = Sample::new();
    let modified = format!("{ORIGINAL1}Updated!");
    sample.write(TEST1, &modified);

    let name = {
        let handle = sample
            .experimenter
            .start("unittest", params(json!({"testParams": true})), None)
            .unwrap();
        handle.name().to_string()
    };

    assert!(!sample.tag_names().contains(&name));
    assert_eq!(sample.read(TEST1), modified);
}

// ===========================================================================
// Naming collisions
// ===========================================================================

#[test]
fn same_second_captures_get_distinct_names() {
    let sample = Sample::new();
    let first = sample.experimenter.start("lr", Parameters::new(), None).unwrap();
    let second = sample.experimenter.start("lr", Parameters::new(), None).unwrap();

    assert_eq!(first.name(), "experiments/exp_lr1700000000");
    assert_eq!(second.name(), "experiments/exp_lr1700000000_1");
    assert_eq!(sample.tag_names().len(), 2);
}

#[test]
fn fail_policy_rejects_same_second_capture() {
    let sample = Sample::with_config(|config| ExperimentConfig {
        collision: CollisionPolicy::Fail,
        ..config
    });
    let first = sample.experimenter.start("lr", Parameters::new(), None).unwrap();
    let err = sample.experimenter.start("lr", Parameters::new(), None).unwrap_err();

    assert!(matches!(err, ExperimentError::Conflict { ref tag } if tag == first.name()));
    assert_eq!(sample.tag_names(), vec![first.name().to_string()]);
}

#[test]
fn custom_prefix_gets_trailing_slash() {
    let sample = Sample::with_config(|config| ExperimentConfig {
        tag_prefix: TagPrefix::new("runs").unwrap(),
        ..config
    });
    let handle = sample.experimenter.start("a", Parameters::new(), None).unwrap();
    assert_eq!(handle.name(), "runs/exp_a1700000000");
}

// ===========================================================================
// Results and cleanup
// ===========================================================================

#[test]
fn recording_twice_keeps_only_last_results() {
    let sample = Sample::new();
    sample.write(TEST1, "changed");
    let mut handle = sample
        .experimenter
        .start("p4", params(json!({"lr": 0.1})), Some("sweep".to_string()))
        .unwrap();
    let commit = handle.commit().clone();

    handle.record_results(params(json!({"acc": 0.5, "loss": 2.0}))).unwrap();
    handle.record_results(params(json!({"acc": 0.9}))).unwrap();

    let entry = sample.experimenter.catalog().get(handle.name()).unwrap();
    assert_eq!(entry.record.results, params(json!({"acc": 0.9})));
    assert_eq!(entry.record.parameters, params(json!({"lr": 0.1})));
    assert_eq!(entry.record.description.as_deref(), Some("sweep"));
    assert_eq!(entry.record.commit_sha, commit.as_str());
    assert_eq!(entry.target, commit);
    assert_eq!(handle.state(), HandleState::ResultsRecorded);
}

#[test]
fn handle_dropped_without_results_removes_tag() {
    let sample = Sample::new();
    let name = {
        let handle = sample.experimenter.start("p6", Parameters::new(), None).unwrap();
        handle.name().to_string()
    };
    assert!(!sample.tag_names().contains(&name));
    assert!(sample.experimenter.catalog().list(&ListFilter::all()).unwrap().is_empty());
}

#[test]
fn explicit_cancel_removes_tag() {
    let sample = Sample::new();
    let handle = sample.experimenter.start("cancel", Parameters::new(), None).unwrap();
    assert_eq!(handle.cancel().unwrap(), ExperimentOutcome::Cancelled);
    assert!(sample.tag_names().is_empty());
}

#[test]
fn recording_after_external_delete_is_missing_tag() {
    let sample = Sample::new();
    let mut handle = sample.experimenter.start("gone", Parameters::new(), None).unwrap();
    sample.repo().tag_delete(handle.name()).unwrap();

    let err = handle.record_results(params(json!({"acc": 1}))).unwrap_err();
    assert!(matches!(err, ExperimentError::MissingTag { .. }));
    assert_eq!(handle.state(), HandleState::Active);
}

#[test]
fn capture_record_delete_returns_catalog_to_previous_size() {
    let sample = Sample::new();
    let catalog = sample.experimenter.catalog();
    let before = catalog.list(&ListFilter::all()).unwrap().len();

    let mut handle = sample.experimenter.start("d", Parameters::new(), None).unwrap();
    handle.record_results(params(json!({"acc": 0.9}))).unwrap();
    let name = handle.name().to_string();
    assert_eq!(handle.finish().unwrap(), ExperimentOutcome::Completed);
    assert_eq!(catalog.list(&ListFilter::all()).unwrap().len(), before + 1);

    assert!(catalog.delete(&name).unwrap());
    assert_eq!(catalog.list(&ListFilter::all()).unwrap().len(), before);
    assert!(!catalog.delete(&name).unwrap());
}

#[test]
fn overlapping_experiments_share_the_capture_commit() {
    let sample = Sample::new();
    let catalog = sample.experimenter.catalog();

    let mut first = sample
        .experimenter
        .start("unittest", params(json!({"testParams": true})), None)
        .unwrap();
    first.record_results(params(json!({"data": 10}))).unwrap();

    let mut second = sample
        .experimenter
        .start("unittest2", params(json!({"testParams": true})), None)
        .unwrap();
    assert_eq!(catalog.list(&ListFilter::all()).unwrap().len(), 2);
    assert_eq!(catalog.list(&ListFilter::all().with_results()).unwrap().len(), 1);
    second.record_results(params(json!({"test": "test"}))).unwrap();

    let at_head = ListFilter::all().at_commit(first.commit().short().to_string());
    let entries = catalog.entries(&at_head).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, first.name());

    drop(second);
    drop(first);
    assert_eq!(catalog.list(&ListFilter::all().with_results()).unwrap().len(), 2);
}
