//! Build job state and lifecycle.
//!
//! A [`Build`] is created per triggered event and driven through
//! `setup` → `run_node` → `publish_image` → `teardown`. Once `setup` has
//! succeeded the caller must call `teardown` on every exit path;
//! [`Build::run_with_network`] does this for the common setup/walk/teardown
//! sequence.

use crate::analysis::{ImageAnalyzer, NoopAnalyzer};
use crate::config::RunnerConfig;
use crate::error::{CiError, Result};
use crate::event::Event;
use crate::manager::{ContainerManager, Network};
use crate::network;
use crate::steplog::{EventStepLogger, StepLogger, StepStage, StepState};
use drydock_pipeline::{NodeTypes, Tree};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Job-level facts recorded while the job runs. Bits are only ever added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStatus(u8);

impl BuildStatus {
    /// The produced image was pushed to the registry.
    pub const PUSH_IMAGE_SUCCESS: BuildStatus = BuildStatus(1);

    pub fn contains(&self, other: BuildStatus) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn insert(&mut self, other: BuildStatus) {
        self.0 |= other.0;
    }
}

/// A build job for one event.
pub struct Build {
    pub(crate) context_dir: PathBuf,
    pub(crate) event: Event,
    pub(crate) network: Option<Network>,
    pub(crate) manager: Arc<dyn ContainerManager>,
    pub(crate) tree: Arc<Tree>,
    pub(crate) flags: NodeTypes,
    pub(crate) service_containers: Vec<String>,
    pub(crate) status: BuildStatus,
    pub(crate) config: RunnerConfig,
    pub(crate) step_logger: Arc<dyn StepLogger>,
    pub(crate) analyzer: Arc<dyn ImageAnalyzer>,
}

impl Build {
    /// Load the tree into a new build job. No side effects.
    pub fn load(
        context_dir: impl Into<PathBuf>,
        event: Event,
        manager: Arc<dyn ContainerManager>,
        tree: Arc<Tree>,
    ) -> Self {
        Self {
            context_dir: context_dir.into(),
            event,
            network: None,
            manager,
            tree,
            flags: NodeTypes::empty(),
            service_containers: Vec::new(),
            status: BuildStatus::default(),
            config: RunnerConfig::default(),
            step_logger: Arc::new(EventStepLogger),
            analyzer: Arc::new(NoopAnalyzer),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_step_logger(mut self, logger: Arc<dyn StepLogger>) -> Self {
        self.step_logger = logger;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ImageAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Create the job network, named after the event id.
    ///
    /// On failure an `{Integration, Stop}` entry is recorded and the job has
    /// no network; `teardown` is then unnecessary.
    pub async fn setup(&mut self) -> Result<()> {
        let name = self.event.id.clone();
        match network::create_network(self, &name).await {
            Ok(created) => {
                info!(event_id = %self.event.id, network = %created.id, "job network created");
                self.network = Some(created);
                Ok(())
            }
            Err(e) => {
                self.log_step(StepStage::Integration, StepState::Stop, Some(&e));
                Err(e)
            }
        }
    }

    /// Remove the job network. Removal errors are returned untouched and the
    /// network is kept so teardown can be retried.
    pub async fn teardown(&mut self) -> Result<()> {
        let Some(existing) = self.network.take() else {
            debug!(event_id = %self.event.id, "no job network to remove");
            return Ok(());
        };
        if let Err(e) = network::remove_network(self, &existing).await {
            self.network = Some(existing);
            return Err(e);
        }
        info!(event_id = %self.event.id, network = %existing.id, "job network removed");
        Ok(())
    }

    /// Setup, walk the tree with `flags`, then release everything the walk
    /// acquired on every path.
    ///
    /// Service containers are removed before the network, which cannot be
    /// removed while they are attached. A walk error wins over a cleanup error
    /// and a service cleanup error wins over a teardown error; the losers are
    /// logged.
    pub async fn run_with_network(&mut self, flags: NodeTypes) -> Result<()> {
        self.setup().await?;
        let walked = self.run_node(flags).await;
        let services = self.remove_service_containers().await;
        let torn_down = self.teardown().await;

        let mut first: Option<CiError> = None;
        let outcomes = [
            ("walk", walked),
            ("service cleanup", services),
            ("teardown", torn_down),
        ];
        for (stage, result) in outcomes {
            let Err(e) = result else { continue };
            if first.is_none() {
                first = Some(e);
            } else {
                warn!(event_id = %self.event.id, error = %e, "{} failed after an earlier error", stage);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Force-remove every service container started by the walk.
    ///
    /// All containers are attempted; the ones that could not be removed stay
    /// listed and the first error is returned.
    pub async fn remove_service_containers(&mut self) -> Result<()> {
        let mut first_err: Option<CiError> = None;
        let mut remaining = Vec::new();
        for id in std::mem::take(&mut self.service_containers) {
            match self.manager.remove_container(&id).await {
                Ok(()) => debug!(event_id = %self.event.id, container = %id, "service removed"),
                Err(e) => {
                    warn!(event_id = %self.event.id, container = %id, error = %e, "service removal failed");
                    first_err.get_or_insert(e);
                    remaining.push(id);
                }
            }
        }
        self.service_containers = remaining;
        first_err.map_or(Ok(()), Err)
    }

    /// The event this job runs for.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Hand the event (with its step log) back to the caller.
    pub fn into_event(self) -> Event {
        self.event
    }

    pub fn context_dir(&self) -> &Path {
        &self.context_dir
    }

    pub fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    /// Flags of the most recent `run_node`.
    pub fn flags(&self) -> NodeTypes {
        self.flags
    }

    /// Ids of service containers started so far, in start order.
    pub fn service_containers(&self) -> &[String] {
        &self.service_containers
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub(crate) fn log_step(&mut self, stage: StepStage, state: StepState, error: Option<&CiError>) {
        self.step_logger.record(&mut self.event, stage, state, error);
    }
}
