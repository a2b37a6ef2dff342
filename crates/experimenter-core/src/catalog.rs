//! Read-side queries and deletion over the experiment tag namespace.

use std::sync::Arc;

use experiment_state::{CommitId, RepositoryGateway};
use serde::Serialize;

use crate::codec::MetadataCodec;
use crate::domain::{ExperimentError, ExperimentRecord, Result, Results, TagPrefix};
use crate::metrics::METRICS;
use crate::obs;
use crate::recording::{remove_tag, replace_results};

/// Which experiments a listing includes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Keep only experiments captured at this revision (any expression the
    /// repository can resolve: full or short id, branch, `HEAD`).
    pub commit: Option<String>,
    /// Keep only experiments with non-empty results.
    pub require_results: bool,
}

impl ListFilter {
    /// Every experiment under the prefix.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn at_commit(mut self, revision: impl Into<String>) -> Self {
        self.commit = Some(revision.into());
        self
    }

    pub fn with_results(mut self) -> Self {
        self.require_results = true;
        self
    }
}

/// An experiment record together with the tag that stores it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentEntry {
    /// Full tag name.
    pub name: String,
    /// Commit the tag points at.
    #[serde(serialize_with = "serialize_commit")]
    pub target: CommitId,
    pub record: ExperimentRecord,
}

fn serialize_commit<S: serde::Serializer>(
    id: &CommitId,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(id.as_str())
}

/// Queries experiments stored under one tag prefix.
pub struct ExperimentCatalog {
    gateway: Arc<dyn RepositoryGateway>,
    prefix: TagPrefix,
}

impl ExperimentCatalog {
    pub fn new(gateway: Arc<dyn RepositoryGateway>, prefix: TagPrefix) -> Self {
        Self { gateway, prefix }
    }

    pub fn prefix(&self) -> &TagPrefix {
        &self.prefix
    }

    /// Records of every experiment matching `filter`.
    ///
    /// Order is not part of the contract.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<ExperimentRecord>> {
        Ok(self
            .entries(filter)?
            .into_iter()
            .map(|entry| entry.record)
            .collect())
    }

    /// Like [`list`](Self::list), keyed by tag name and sorted by it.
    ///
    /// # Errors
    ///
    /// `Codec` if a tag under the prefix does not carry a valid record, and
    /// `Gateway` if `filter.commit` does not resolve.
    pub fn entries(&self, filter: &ListFilter) -> Result<Vec<ExperimentEntry>> {
        let commit = match &filter.commit {
            Some(revision) => Some(self.gateway.resolve_commit(revision)?),
            None => None,
        };

        let mut entries = Vec::new();
        for tag in self.gateway.list_tags(self.prefix.as_str())? {
            let record = MetadataCodec::decode(&tag)?;
            if filter.require_results && !record.has_results() {
                continue;
            }
            if let Some(commit) = &commit {
                if record.commit() != *commit {
                    continue;
                }
            }
            entries.push(ExperimentEntry {
                name: tag.name,
                target: tag.target,
                record,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// One experiment by full or prefix-relative tag name.
    pub fn get(&self, name: &str) -> Result<ExperimentEntry> {
        let tag_name = self.prefix.qualify(name);
        let tag = self
            .gateway
            .find_tag(&tag_name)?
            .ok_or(ExperimentError::MissingTag { tag: tag_name })?;
        let record = MetadataCodec::decode(&tag)?;
        Ok(ExperimentEntry {
            name: tag.name,
            target: tag.target,
            record,
        })
    }

    /// Delete an experiment by full or prefix-relative tag name.
    ///
    /// Returns `false` when no such tag existed; `true` once the tag is
    /// confirmed gone.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let tag_name = self.prefix.qualify(name);
        let deleted = remove_tag(self.gateway.as_ref(), &tag_name)?;
        if deleted {
            METRICS.inc_deletions();
        }
        obs::emit_experiment_deleted(&tag_name, deleted);
        Ok(deleted)
    }

    /// Replace the results of an existing experiment outside any live handle.
    pub fn record_results(&self, name: &str, results: Results) -> Result<ExperimentRecord> {
        replace_results(self.gateway.as_ref(), &self.prefix.qualify(name), results)
    }
}
