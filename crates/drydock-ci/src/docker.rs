//! [`ContainerManager`] backed by the Docker Engine API.

use crate::config::RunnerConfig;
use crate::error::{CiError, Result};
use crate::manager::{Container, ContainerManager, ContainerSpec, ContainerState, ImageBuild, Network};
use async_trait::async_trait;
use bollard::errors::Error as DockerError;
use bollard::models::{
    ContainerCreateBody, EndpointSettings, HostConfig, NetworkConnectRequest, NetworkCreateRequest,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptionsBuilder, CreateImageOptionsBuilder,
    DownloadFromContainerOptionsBuilder, LogsOptionsBuilder, PushImageOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drives containers through the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    client: Docker,
    network_driver: String,
    timeout_secs: u64,
}

fn api(operation: &'static str) -> impl FnOnce(DockerError) -> CiError {
    move |e| CiError::runtime(operation, e.to_string())
}

impl DockerEngine {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket).
    pub fn connect(config: &RunnerConfig) -> Result<Self> {
        let client = Docker::connect_with_local_defaults().map_err(api("connect docker"))?;
        Ok(Self {
            client,
            network_driver: config.network_driver.clone(),
            timeout_secs: config.command_timeout_secs,
        })
    }

    /// Pull `image` unless it is already present locally.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.client.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        info!(image = %image, "pulling image");
        self.client
            .create_image(
                Some(CreateImageOptionsBuilder::default().from_image(image).build()),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(api("pull image"))?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.ensure_image(&spec.image).await?;
        let options = (!spec.name.is_empty())
            .then(|| CreateContainerOptionsBuilder::default().name(&spec.name).build());
        let created = self
            .client
            .create_container(options, container_body(spec))
            .await
            .map_err(api("create container"))?;
        debug!(container = %created.id, name = %spec.name, "container created");
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.client
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(api("start container"))
    }

    /// Forward the container's output to the log until it exits.
    async fn forward_logs(&self, id: &str, name: &str) {
        let options = LogsOptionsBuilder::default()
            .follow(true)
            .stdout(true)
            .stderr(true)
            .build();
        let mut logs = Box::pin(self.client.logs(id, Some(options)));
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(output) => {
                    let line = output.to_string();
                    info!(container = %name, "{}", line.trim_end());
                }
                Err(e) => {
                    warn!(container = %name, error = %e, "log stream closed");
                    break;
                }
            }
        }
    }

    /// Block until the container exits and return its exit code.
    async fn wait(&self, id: &str) -> Result<i64> {
        let mut waiting = Box::pin(self.client.wait_container(id, None::<WaitContainerOptions>));
        match waiting.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // nonzero exits arrive as errors
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(CiError::runtime("wait container", e.to_string())),
            None => Err(CiError::runtime("wait container", "wait stream ended early")),
        }
    }

    async fn start_and_wait(&self, id: &str, name: &str) -> Result<i64> {
        self.start(id).await?;
        let finished = async {
            let (_, exit_code) = tokio::join!(self.forward_logs(id, name), self.wait(id));
            exit_code
        };
        if self.timeout_secs == 0 {
            return finished.await;
        }
        tokio::time::timeout(Duration::from_secs(self.timeout_secs), finished)
            .await
            .map_err(|_| {
                CiError::runtime(
                    "run container",
                    format!("timed out after {} seconds", self.timeout_secs),
                )
            })?
    }
}

/// Force-remove a container whose start or wait failed, keeping the original error.
async fn discard_on_error<T>(
    manager: &dyn ContainerManager,
    id: &str,
    result: Result<T>,
) -> Result<T> {
    if result.is_err() {
        if let Err(e) = manager.remove_container(id).await {
            warn!(container = %id, error = %e, "failed to remove container after error");
        }
    }
    result
}

/// Engine create request for a spec.
fn container_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    ContainerCreateBody {
        image: Some(spec.image.clone()),
        entrypoint: spec.entrypoint.clone().map(|e| vec![e]),
        cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
        env: (!env.is_empty()).then_some(env),
        working_dir: spec.working_dir.clone(),
        host_config: Some(HostConfig {
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            network_mode: spec.network.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Split `repository:tag`; a missing tag means `latest`.
fn split_image(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => (repository, tag),
        _ => (image, "latest"),
    }
}

/// Dockerfile location as the engine expects it: relative to the context.
fn dockerfile_in_context(request: &ImageBuild) -> String {
    request
        .dockerfile
        .strip_prefix(&request.context)
        .unwrap_or(&request.dockerfile)
        .to_string_lossy()
        .into_owned()
}

fn context_archive(context: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", context)?;
    builder.into_inner()
}

fn unpack_archive(archive: &[u8], dest: &Path) -> std::io::Result<()> {
    let mut archive = tar::Archive::new(Cursor::new(archive));
    archive.set_preserve_mtime(false);
    archive.set_overwrite(true);
    archive.unpack(dest)
}

async fn blocking<T, F>(operation: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CiError::runtime(operation, e.to_string()))?
        .map_err(CiError::from)
}

#[async_trait]
impl ContainerManager for DockerEngine {
    async fn create_network(&self, name: &str) -> Result<Network> {
        let request = NetworkCreateRequest {
            name: name.to_string(),
            driver: Some(self.network_driver.clone()),
            ..Default::default()
        };
        let created = self
            .client
            .create_network(request)
            .await
            .map_err(api("create network"))?;
        Ok(Network {
            id: created.id,
            name: name.to_string(),
        })
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.client
            .remove_network(id)
            .await
            .map_err(api("remove network"))
    }

    async fn connect_network(
        &self,
        network_id: &str,
        container: &str,
        alias: &str,
    ) -> Result<()> {
        let request = NetworkConnectRequest {
            container: Some(container.to_string()),
            endpoint_config: Some(EndpointSettings {
                aliases: Some(vec![alias.to_string()]),
                ..Default::default()
            }),
        };
        self.client
            .connect_network(network_id, request)
            .await
            .map_err(api("connect network"))
    }

    async fn start_container(&self, spec: &ContainerSpec) -> Result<Container> {
        let id = self.create(spec).await?;
        let started = self.start(&id).await;
        discard_on_error(self, &id, started).await?;
        Ok(Container {
            id,
            name: spec.name.clone(),
            state: ContainerState {
                running: true,
                exit_code: 0,
            },
        })
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<Container> {
        let id = self.create(spec).await?;
        let finished = self.start_and_wait(&id, &spec.name).await;
        let exit_code = discard_on_error(self, &id, finished).await?;
        Ok(Container {
            id,
            name: spec.name.clone(),
            state: ContainerState {
                running: false,
                exit_code,
            },
        })
    }

    async fn copy_from_container(&self, container: &str, src: &str, dest: &Path) -> Result<()> {
        let options = DownloadFromContainerOptionsBuilder::new().path(src).build();
        let mut download = Box::pin(self.client.download_from_container(container, Some(options)));
        let mut archive = Vec::new();
        while let Some(chunk) = download
            .try_next()
            .await
            .map_err(api("copy from container"))?
        {
            archive.extend_from_slice(&chunk);
        }

        let dest: PathBuf = dest.to_path_buf();
        blocking("copy from container", move || {
            std::fs::create_dir_all(&dest)?;
            unpack_archive(&archive, &dest)
        })
        .await
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        self.client
            .remove_container(
                container,
                Some(RemoveContainerOptionsBuilder::default().force(true).build()),
            )
            .await
            .map_err(api("remove container"))
    }

    async fn build_image(&self, request: &ImageBuild) -> Result<()> {
        let context = request.context.clone();
        let archive = blocking("build image", move || context_archive(&context)).await?;
        let options = BuildImageOptionsBuilder::default()
            .dockerfile(&dockerfile_in_context(request))
            .t(&request.tag)
            .rm(true)
            .build();

        let mut progress = Box::pin(self.client.build_image(
            options,
            None,
            Some(bollard::body_full(archive.into())),
        ));
        while let Some(info) = progress.try_next().await.map_err(api("build image"))? {
            if let Some(line) = info.stream.as_deref().map(str::trim_end) {
                if !line.is_empty() {
                    debug!(tag = %request.tag, "{}", line);
                }
            }
        }
        Ok(())
    }

    async fn push_image(&self, image: &str) -> Result<()> {
        let (repository, tag) = split_image(image);
        let options = PushImageOptionsBuilder::default().tag(tag).build();
        let mut progress = Box::pin(self.client.push_image(repository, Some(options), None));
        while let Some(info) = progress.try_next().await.map_err(api("push image"))? {
            if let Some(message) = info.error {
                return Err(CiError::runtime("push image", message));
            }
            if let Some(status) = info.status {
                debug!(image = %image, "{}", status);
            }
        }
        Ok(())
    }
}
