//! Container runtime abstraction.
//!
//! Every network, container and image operation a build job performs goes
//! through [`ContainerManager`]. One manager is shared by all jobs of a worker,
//! so implementations must be safe for concurrent use.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// An isolated container network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    pub id: String,
    pub name: String,
}

/// Request to create a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,

    pub image: String,

    /// Entrypoint override.
    pub entrypoint: Option<String>,

    /// Arguments passed to the entrypoint.
    pub cmd: Vec<String>,

    pub env: BTreeMap<String, String>,

    pub working_dir: Option<String>,

    /// Bind mounts as `host:container`.
    pub binds: Vec<String>,

    /// Network to join at creation; `None` is the runtime default.
    pub network: Option<String>,
}

/// A created container and the state it was last observed in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: i64,
}

/// Request to build an image from a Dockerfile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageBuild {
    /// Build context directory.
    pub context: PathBuf,

    /// Dockerfile location.
    pub dockerfile: PathBuf,

    /// Tag applied to the result.
    pub tag: String,
}

impl ImageBuild {
    /// Resolve a Dockerfile from its declared directory and file name.
    ///
    /// The directory is relative to the context; an empty name means `Dockerfile`.
    pub fn new(
        context: impl Into<PathBuf>,
        dockerfile_path: &str,
        dockerfile_name: &str,
        tag: impl Into<String>,
    ) -> Self {
        let context = context.into();
        let name = if dockerfile_name.is_empty() {
            "Dockerfile"
        } else {
            dockerfile_name
        };
        let dockerfile = context.join(dockerfile_path.trim_start_matches('/')).join(name);
        Self {
            context,
            dockerfile,
            tag: tag.into(),
        }
    }
}

/// Container runtime operations used by build jobs.
#[async_trait]
pub trait ContainerManager: Send + Sync {
    /// Create a network named `name`.
    async fn create_network(&self, name: &str) -> Result<Network>;

    /// Remove a network by id.
    async fn remove_network(&self, id: &str) -> Result<()>;

    /// Attach a container to a network under `alias`.
    async fn connect_network(&self, network_id: &str, container: &str, alias: &str)
        -> Result<()>;

    /// Create and start a container without waiting for it.
    async fn start_container(&self, spec: &ContainerSpec) -> Result<Container>;

    /// Create and start a container, waiting until it exits.
    ///
    /// The container is left in place so outputs can be copied out of it.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<Container>;

    /// Copy `src` from inside a container to the host directory `dest`.
    async fn copy_from_container(&self, container: &str, src: &str, dest: &Path) -> Result<()>;

    /// Force-remove a container.
    async fn remove_container(&self, container: &str) -> Result<()>;

    async fn build_image(&self, request: &ImageBuild) -> Result<()>;

    async fn push_image(&self, image: &str) -> Result<()>;
}
