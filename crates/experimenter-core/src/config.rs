//! Experimenter configuration.
//!
//! Defaults can be overridden through environment variables:
//! - `EXPERIMENTER_DIR`: directory inside the repository (default `.`)
//! - `EXPERIMENTER_TAG_PREFIX`: tag namespace (default `experiments/`)
//! - `EXPERIMENTER_ON_COLLISION`: `suffix` or `fail` (default `suffix`)

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::{ExperimentError, Result, TagPrefix};

pub const ENV_REPO_DIR: &str = "EXPERIMENTER_DIR";
pub const ENV_TAG_PREFIX: &str = "EXPERIMENTER_TAG_PREFIX";
pub const ENV_ON_COLLISION: &str = "EXPERIMENTER_ON_COLLISION";

/// What to do when the computed tag name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Append `_1`, `_2`, … until a free name is found.
    #[default]
    Suffix,
    /// Fail with `ExperimentError::Conflict`.
    Fail,
}

impl FromStr for CollisionPolicy {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "suffix" => Ok(CollisionPolicy::Suffix),
            "fail" => Ok(CollisionPolicy::Fail),
            other => Err(ExperimentError::InvalidConfig(format!(
                "unknown collision policy {other:?} (expected \"suffix\" or \"fail\")"
            ))),
        }
    }
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollisionPolicy::Suffix => f.write_str("suffix"),
            CollisionPolicy::Fail => f.write_str("fail"),
        }
    }
}

/// Settings shared by capture and catalog operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentConfig {
    /// Any directory inside the repository; parents are searched.
    pub repo_dir: PathBuf,
    /// Namespace for experiment tags.
    pub tag_prefix: TagPrefix,
    /// Tag-name collision handling.
    pub collision: CollisionPolicy,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("."),
            tag_prefix: TagPrefix::default(),
            collision: CollisionPolicy::default(),
        }
    }
}

impl ExperimentConfig {
    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_REPO_DIR) {
            config.repo_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = lookup(ENV_TAG_PREFIX) {
            config.tag_prefix = TagPrefix::new(&prefix)
                .map_err(|e| ExperimentError::InvalidConfig(format!("{ENV_TAG_PREFIX}: {e}")))?;
        }
        if let Some(policy) = lookup(ENV_ON_COLLISION) {
            config.collision = policy.parse()?;
        }
        Ok(config)
    }
}
