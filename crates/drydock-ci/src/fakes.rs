//! In-memory fakes for collaborator traits (testing only)
//!
//! Provides `RecordingManager` and `RecordingAnalyzer`, which satisfy the
//! trait contracts without a container runtime and record every call so
//! tests can assert on what a build job did.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::analysis::ImageAnalyzer;
use crate::error::{CiError, Result};
use crate::event::Event;
use crate::manager::{
    Container, ContainerManager, ContainerSpec, ContainerState, ImageBuild, Network,
};

// ---------------------------------------------------------------------------
// RecordingManager
// ---------------------------------------------------------------------------

/// Operations of [`ContainerManager`], used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerOp {
    CreateNetwork,
    RemoveNetwork,
    ConnectNetwork,
    StartContainer,
    RunContainer,
    CopyFromContainer,
    RemoveContainer,
    BuildImage,
    PushImage,
}

impl ManagerOp {
    fn name(&self) -> &'static str {
        match self {
            ManagerOp::CreateNetwork => "create network",
            ManagerOp::RemoveNetwork => "remove network",
            ManagerOp::ConnectNetwork => "connect network",
            ManagerOp::StartContainer => "start container",
            ManagerOp::RunContainer => "run container",
            ManagerOp::CopyFromContainer => "copy from container",
            ManagerOp::RemoveContainer => "remove container",
            ManagerOp::BuildImage => "build image",
            ManagerOp::PushImage => "push image",
        }
    }
}

/// A recorded call, with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerCall {
    CreateNetwork { name: String },
    RemoveNetwork { id: String },
    ConnectNetwork { network_id: String, container: String, alias: String },
    StartContainer(ContainerSpec),
    RunContainer(ContainerSpec),
    CopyFromContainer { container: String, src: String, dest: PathBuf },
    RemoveContainer { container: String },
    BuildImage(ImageBuild),
    PushImage { image: String },
}

/// Container manager that records calls instead of touching a runtime.
///
/// Containers exit 0 unless an exit code was scripted for their image.
/// Failures can be injected per operation or per image. Like Docker, a
/// network cannot be removed while containers are still attached to it.
#[derive(Debug, Default)]
pub struct RecordingManager {
    calls: Mutex<Vec<ManagerCall>>,
    endpoints: Mutex<HashMap<String, Vec<String>>>,
    exit_codes: Mutex<HashMap<String, i64>>,
    failing_ops: Mutex<HashMap<ManagerOp, String>>,
    failing_images: Mutex<HashMap<String, String>>,
    next_id: AtomicU64,
}

impl RecordingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers run from `image` exit with `code`.
    pub fn set_exit_code(&self, image: &str, code: i64) {
        self.exit_codes
            .lock()
            .unwrap()
            .insert(image.to_string(), code);
    }

    /// Every call of `op` fails with `message`.
    pub fn fail_operation(&self, op: ManagerOp, message: &str) {
        self.failing_ops
            .lock()
            .unwrap()
            .insert(op, message.to_string());
    }

    /// Starting or running a container from `image` fails with `message`.
    pub fn fail_image(&self, image: &str, message: &str) {
        self.failing_images
            .lock()
            .unwrap()
            .insert(image.to_string(), message.to_string());
    }

    /// Snapshot of recorded calls, in order.
    pub fn calls(&self) -> Vec<ManagerCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Images of containers started or run, in order.
    pub fn container_images(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ManagerCall::StartContainer(spec) | ManagerCall::RunContainer(spec) => {
                    Some(spec.image)
                }
                _ => None,
            })
            .collect()
    }

    /// Specs passed to `run_container`, in order.
    pub fn run_specs(&self) -> Vec<ContainerSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ManagerCall::RunContainer(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: ManagerOp, call: ManagerCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.failing_ops.lock().unwrap().get(&op) {
            Some(message) => Err(CiError::runtime(op.name(), message.clone())),
            None => Ok(()),
        }
    }

    fn check_image(&self, op: ManagerOp, image: &str) -> Result<()> {
        match self.failing_images.lock().unwrap().get(image) {
            Some(message) => Err(CiError::runtime(op.name(), message.clone())),
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl ContainerManager for RecordingManager {
    async fn create_network(&self, name: &str) -> Result<Network> {
        self.record(
            ManagerOp::CreateNetwork,
            ManagerCall::CreateNetwork {
                name: name.to_string(),
            },
        )?;
        Ok(Network {
            id: self.next_id("net"),
            name: name.to_string(),
        })
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.record(
            ManagerOp::RemoveNetwork,
            ManagerCall::RemoveNetwork { id: id.to_string() },
        )?;
        let mut endpoints = self.endpoints.lock().unwrap();
        if endpoints.get(id).is_some_and(|attached| !attached.is_empty()) {
            return Err(CiError::runtime(
                ManagerOp::RemoveNetwork.name(),
                "network has active endpoints",
            ));
        }
        endpoints.remove(id);
        Ok(())
    }

    async fn connect_network(
        &self,
        network_id: &str,
        container: &str,
        alias: &str,
    ) -> Result<()> {
        self.record(
            ManagerOp::ConnectNetwork,
            ManagerCall::ConnectNetwork {
                network_id: network_id.to_string(),
                container: container.to_string(),
                alias: alias.to_string(),
            },
        )?;
        self.endpoints
            .lock()
            .unwrap()
            .entry(network_id.to_string())
            .or_default()
            .push(container.to_string());
        Ok(())
    }

    async fn start_container(&self, spec: &ContainerSpec) -> Result<Container> {
        self.record(
            ManagerOp::StartContainer,
            ManagerCall::StartContainer(spec.clone()),
        )?;
        self.check_image(ManagerOp::StartContainer, &spec.image)?;
        Ok(Container {
            id: self.next_id("ctr"),
            name: spec.name.clone(),
            state: ContainerState {
                running: true,
                exit_code: 0,
            },
        })
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<Container> {
        self.record(ManagerOp::RunContainer, ManagerCall::RunContainer(spec.clone()))?;
        self.check_image(ManagerOp::RunContainer, &spec.image)?;
        let exit_code = self
            .exit_codes
            .lock()
            .unwrap()
            .get(&spec.image)
            .copied()
            .unwrap_or(0);
        Ok(Container {
            id: self.next_id("ctr"),
            name: spec.name.clone(),
            state: ContainerState {
                running: false,
                exit_code,
            },
        })
    }

    async fn copy_from_container(&self, container: &str, src: &str, dest: &Path) -> Result<()> {
        self.record(
            ManagerOp::CopyFromContainer,
            ManagerCall::CopyFromContainer {
                container: container.to_string(),
                src: src.to_string(),
                dest: dest.to_path_buf(),
            },
        )
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        self.record(
            ManagerOp::RemoveContainer,
            ManagerCall::RemoveContainer {
                container: container.to_string(),
            },
        )?;
        for attached in self.endpoints.lock().unwrap().values_mut() {
            attached.retain(|c| c != container);
        }
        Ok(())
    }

    async fn build_image(&self, request: &ImageBuild) -> Result<()> {
        self.record(ManagerOp::BuildImage, ManagerCall::BuildImage(request.clone()))
    }

    async fn push_image(&self, image: &str) -> Result<()> {
        self.record(
            ManagerOp::PushImage,
            ManagerCall::PushImage {
                image: image.to_string(),
            },
        )
    }
}

// ---------------------------------------------------------------------------
// RecordingAnalyzer
// ---------------------------------------------------------------------------

/// Analyzer that records which events it was asked to analyze.
#[derive(Debug, Default)]
pub struct RecordingAnalyzer {
    analyzed: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
}

impl RecordingAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every analysis fail with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// Event ids analyzed so far.
    pub fn analyzed(&self) -> Vec<String> {
        self.analyzed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageAnalyzer for RecordingAnalyzer {
    async fn analyze(&self, event: &Event, _manager: &dyn ContainerManager) -> Result<()> {
        self.analyzed.lock().unwrap().push(event.id.clone());
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(CiError::Analysis(message)),
            None => Ok(()),
        }
    }
}
