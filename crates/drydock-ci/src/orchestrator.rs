//! Translation of step nodes into container requests, and their execution.

use crate::build::Build;
use crate::error::{CiError, Result};
use crate::manager::{Container, ContainerSpec, ImageBuild};
use drydock_pipeline::{NodeType, StepNode};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Environment variable carrying the event id into every step container.
pub const EVENT_ID_ENV: &str = "DRYDOCK_EVENT_ID";

/// Restrict a string to characters valid in container names and tags.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Alias a service is reachable under: its name, or the image's base name,
/// or `service` when the step has neither.
pub fn service_alias(step: &StepNode) -> String {
    if !step.name.is_empty() {
        return step.name.clone();
    }
    let repository = step.image.rsplit('/').next().unwrap_or(&step.image);
    let base = repository.split([':', '@']).next().unwrap_or(repository);
    if base.is_empty() {
        return "service".to_string();
    }
    sanitize(base)
}

fn step_env(step: &StepNode, job: &Build) -> BTreeMap<String, String> {
    let mut env = step.environment.clone();
    env.insert(EVENT_ID_ENV.to_string(), job.event.id.clone());
    env
}

/// Container request for a Service node, plus the alias it is attached under.
pub fn service_container_spec(step: &StepNode, job: &Build) -> (ContainerSpec, String) {
    let alias = service_alias(step);
    let spec = ContainerSpec {
        name: sanitize(&format!("{}-{}", alias, job.event.id)),
        image: step.image.clone(),
        env: step_env(step, job),
        ..Default::default()
    };
    (spec, alias)
}

/// Container request for a one-shot step of `kind`.
///
/// The build context is mounted at the configured workspace path. Integration
/// steps join the job network so services resolve; pre/post build hooks run on
/// the default network.
pub fn build_container_spec(step: &StepNode, job: &Build, kind: NodeType) -> ContainerSpec {
    let label = if step.name.is_empty() {
        "step"
    } else {
        step.name.as_str()
    };
    let network = match kind {
        NodeType::Integration => job.network.as_ref().map(|n| n.name.clone()),
        _ => None,
    };
    let mount = &job.config.workspace_mount;

    ContainerSpec {
        name: sanitize(&format!("{}-{}-{}", job.event.id, kind, label)),
        image: step.image.clone(),
        env: step_env(step, job),
        working_dir: Some(mount.clone()),
        binds: vec![format!("{}:{}", job.context_dir.display(), mount)],
        network,
        ..Default::default()
    }
}

/// Join commands into one script that stops at the first failing command.
pub fn encode_script(commands: &[String]) -> String {
    let mut script = String::from("set -e\n");
    script.push_str(&commands.join("\n"));
    script
}

/// Replace the spec's command with the step's commands as one inline script.
pub fn encode(spec: &mut ContainerSpec, step: &StepNode, shell: &str) {
    spec.entrypoint = Some(shell.to_string());
    spec.cmd = vec!["-c".to_string(), encode_script(&step.commands)];
}

/// Start a long-lived container without waiting for it.
pub(crate) async fn start(job: &Build, spec: &ContainerSpec) -> Result<Container> {
    let container = job.manager.start_container(spec).await?;
    info!(event_id = %job.event.id, container = %container.id, image = %spec.image, "container started");
    Ok(container)
}

/// Run a container to completion and capture `outputs` into `output_path`.
///
/// Outputs are only copied from containers that exited 0. The container is
/// removed afterwards; a failed removal is logged, not returned.
pub(crate) async fn run(
    job: &Build,
    spec: &ContainerSpec,
    outputs: &[String],
    output_path: &str,
) -> Result<Container> {
    let container = job.manager.run_container(spec).await?;
    info!(
        event_id = %job.event.id,
        container = %container.id,
        exit_code = container.state.exit_code,
        "container finished"
    );

    let mut copied = Ok(());
    if container.state.exit_code == 0 {
        let dest = Path::new(output_path);
        for output in outputs {
            copied = job
                .manager
                .copy_from_container(&container.id, output, dest)
                .await;
            if copied.is_err() {
                break;
            }
        }
    }

    if let Err(e) = job.manager.remove_container(&container.id).await {
        warn!(event_id = %job.event.id, container = %container.id, error = %e, "failed to remove container");
    }

    copied.map(|()| container)
}

/// Nonzero exit codes become [`CiError::ContainerExit`].
pub fn ensure_success(container: &Container) -> Result<()> {
    if container.state.exit_code != 0 {
        return Err(CiError::ContainerExit {
            container: container.name.clone(),
            exit_code: container.state.exit_code,
        });
    }
    Ok(())
}

/// Build the event's image from the step's Dockerfile in the build context.
pub(crate) async fn build_image(job: &Build, step: &StepNode) -> Result<()> {
    info!(
        event_id = %job.event.id,
        dockerfile_path = %step.dockerfile_path,
        dockerfile_name = %step.dockerfile_name,
        "build with Dockerfile"
    );
    let request = ImageBuild::new(
        &job.context_dir,
        &step.dockerfile_path,
        &step.dockerfile_name,
        job.event.image_name(),
    );
    job.manager.build_image(&request).await
}

/// Tag for the image produced by a Dockerfile-based pre-build step.
pub fn pre_build_tag(event_id: &str) -> String {
    format!("drydock-prebuild:{}", sanitize(event_id))
}

/// Pre-build from a Dockerfile: build the image, copy the declared outputs out
/// of it, and record the image on the event for later stages.
pub(crate) async fn pre_build_by_dockerfile(
    job: &mut Build,
    step: &StepNode,
    output_path: &str,
) -> Result<()> {
    info!(
        event_id = %job.event.id,
        dockerfile_path = %step.dockerfile_path,
        dockerfile_name = %step.dockerfile_name,
        "pre_build with Dockerfile"
    );
    let tag = pre_build_tag(&job.event.id);
    let request = ImageBuild::new(
        &job.context_dir,
        &step.dockerfile_path,
        &step.dockerfile_name,
        tag.clone(),
    );
    job.manager.build_image(&request).await?;

    if !step.outputs.is_empty() {
        let extract = ContainerSpec {
            name: sanitize(&format!("{}-{}-extract", job.event.id, NodeType::PreBuild)),
            image: tag.clone(),
            entrypoint: Some(job.config.shell.clone()),
            cmd: vec!["-c".to_string(), "true".to_string()],
            ..Default::default()
        };
        let container = run(job, &extract, &step.outputs, output_path).await?;
        ensure_success(&container)?;
    }

    job.event.output.pre_build_image = Some(tag);
    Ok(())
}
