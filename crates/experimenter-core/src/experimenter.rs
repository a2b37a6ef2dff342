//! Entry point bundling a repository with capture and catalog settings.

use std::sync::Arc;

use experiment_state::{GitRepository, RepositoryGateway};

use crate::capture::CaptureTransaction;
use crate::catalog::ExperimentCatalog;
use crate::clock::{Clock, SystemClock};
use crate::config::{CollisionPolicy, ExperimentConfig};
use crate::domain::{ExperimentError, Parameters, Result, TagPrefix};
use crate::obs;
use crate::recording::ExperimentHandle;

/// Starts experiments and opens catalogs against one repository.
///
/// # Example
///
/// ```ignore
/// let experimenter = Experimenter::open(&ExperimentConfig::default())?;
/// experimenter.scoped("resnet", params, None, |exp| {
///     let results = train()?;
///     exp.record_results(results)?;
///     Ok::<_, ExperimentError>(())
/// })?;
/// ```
pub struct Experimenter {
    gateway: Arc<dyn RepositoryGateway>,
    prefix: TagPrefix,
    collision: CollisionPolicy,
    clock: Arc<dyn Clock>,
}

impl Experimenter {
    /// Discover the repository containing `config.repo_dir`.
    pub fn open(config: &ExperimentConfig) -> Result<Self> {
        let repo = GitRepository::discover(&config.repo_dir)?;
        Ok(Self::with_gateway(Arc::new(repo), config.tag_prefix.clone())
            .with_collision_policy(config.collision))
    }

    /// Use an existing gateway, e.g. an in-memory fake.
    pub fn with_gateway(gateway: Arc<dyn RepositoryGateway>, prefix: TagPrefix) -> Self {
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

    pub fn gateway(&self) -> &Arc<dyn RepositoryGateway> {
        &self.gateway
    }

    pub fn prefix(&self) -> &TagPrefix {
        &self.prefix
    }

    fn transaction(&self) -> CaptureTransaction {
        CaptureTransaction::new(Arc::clone(&self.gateway), self.prefix.clone())
            .with_collision_policy(self.collision)
            .with_clock(Arc::clone(&self.clock))
    }

    /// Capture the repository and return the experiment's handle.
    pub fn start(
        &self,
        name: &str,
        parameters: Parameters,
        description: Option<String>,
    ) -> Result<ExperimentHandle> {
        self.transaction().begin(name, parameters, description)
    }

    /// Run `body` inside an experiment scope.
    ///
    /// The handle is finished on every exit path: the tag survives only if
    /// `body` recorded results. An error from `body` is returned unchanged
    /// even if cleanup also fails.
    pub fn scoped<T, E, F>(
        &self,
        name: &str,
        parameters: Parameters,
        description: Option<String>,
        body: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut ExperimentHandle) -> std::result::Result<T, E>,
        E: From<ExperimentError>,
    {
        let mut handle = self.start(name, parameters, description)?;
        let tag = handle.name().to_string();
        match body(&mut handle) {
            Ok(value) => {
                handle.finish()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(cleanup) = handle.finish() {
                    obs::emit_cleanup_failed(&tag, &cleanup);
                }
                Err(err)
            }
        }
    }

    /// Catalog over this experimenter's prefix.
    pub fn catalog(&self) -> ExperimentCatalog {
        ExperimentCatalog::new(Arc::clone(&self.gateway), self.prefix.clone())
    }
}
