//! Pipeline tree walk.
//!
//! The walk is depth-first, pre-order and strictly sequential. The first
//! error anywhere unwinds the whole walk; skipped nodes are not errors.

use crate::build::Build;
use crate::error::Result;
use crate::network;
use crate::orchestrator;
use crate::steplog::{StepStage, StepState};
use drydock_pipeline::{Node, NodeType, NodeTypes, StepNode};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, info};

/// True when `flags` restricts the run and does not select `node_type`.
pub fn should_skip(flags: NodeTypes, node_type: NodeType) -> bool {
    !flags.selects(node_type)
}

/// Non-build steps need an image or a Dockerfile; build steps never do.
pub fn lacks_critical_config(node_type: NodeType, step: &StepNode) -> bool {
    match node_type {
        NodeType::Build => false,
        _ => step.lacks_image_config(),
    }
}

impl Build {
    /// Walk the tree, running the steps selected by `flags`.
    pub async fn run_node(&mut self, flags: NodeTypes) -> Result<()> {
        self.flags = flags;
        let tree = Arc::clone(&self.tree);
        info!(event_id = %self.event.id, flags = %flags, steps = tree.step_count(), "walking pipeline");
        self.walk(&tree.root).await
    }

    fn walk<'a>(&'a mut self, node: &'a Node) -> BoxFuture<'a, Result<()>> {
        async move {
            let (node_type, step) = match node {
                Node::List(list) => {
                    for child in &list.nodes {
                        self.walk(child).await?;
                    }
                    return Ok(());
                }
                Node::Service(step) => (NodeType::Service, step),
                Node::Integration(step) => (NodeType::Integration, step),
                Node::Build(step) => (NodeType::Build, step),
                Node::PreBuild(step) => (NodeType::PreBuild, step),
                Node::PostBuild(step) => (NodeType::PostBuild, step),
            };

            if should_skip(self.flags, node_type) {
                debug!(event_id = %self.event.id, node = %node_type, name = %step.name, "not selected; skipping");
                return Ok(());
            }
            if lacks_critical_config(node_type, step) {
                debug!(event_id = %self.event.id, node = %node_type, name = %step.name, "no image or Dockerfile; skipping");
                return Ok(());
            }

            match node_type {
                NodeType::Service => self.run_service(step).await,
                NodeType::Integration => self.run_integration(step).await,
                NodeType::Build => orchestrator::build_image(self, step).await,
                NodeType::PreBuild => self.run_pre_build(step).await,
                NodeType::PostBuild => self.run_post_build(step).await,
            }
        }
        .boxed()
    }

    async fn run_service(&mut self, step: &StepNode) -> Result<()> {
        let (spec, alias) = orchestrator::service_container_spec(step, self);
        let container = orchestrator::start(self, &spec).await?;
        // Recorded before attaching so the caller can still clean it up.
        self.service_containers.push(container.id.clone());
        network::connect_network(self, &container.id, &alias).await
    }

    async fn run_integration(&mut self, step: &StepNode) -> Result<()> {
        let output_path = self.event.output_path()?;
        self.run_scripted(step, NodeType::Integration, &output_path)
            .await
    }

    async fn run_pre_build(&mut self, step: &StepNode) -> Result<()> {
        self.log_step(StepStage::PreBuild, StepState::Start, None);
        let result = match self.event.output_path() {
            Ok(output_path) if step.has_dockerfile() => {
                orchestrator::pre_build_by_dockerfile(self, step, &output_path).await
            }
            Ok(output_path) => {
                self.run_scripted(step, NodeType::PreBuild, &output_path)
                    .await
            }
            Err(e) => Err(e),
        };
        self.finish_stage(StepStage::PreBuild, result)
    }

    /// Post-build hooks always run scripted, even when a Dockerfile is set.
    async fn run_post_build(&mut self, step: &StepNode) -> Result<()> {
        self.log_step(StepStage::PostBuild, StepState::Start, None);
        let result = match self.event.output_path() {
            Ok(output_path) => {
                self.run_scripted(step, NodeType::PostBuild, &output_path)
                    .await
            }
            Err(e) => Err(e),
        };
        self.finish_stage(StepStage::PostBuild, result)
    }

    /// Build a one-shot container for the step, run its commands as one
    /// script and require exit code 0.
    async fn run_scripted(
        &mut self,
        step: &StepNode,
        kind: NodeType,
        output_path: &str,
    ) -> Result<()> {
        let mut spec = orchestrator::build_container_spec(step, self, kind);
        orchestrator::encode(&mut spec, step, &self.config.shell);
        let container = orchestrator::run(self, &spec, &step.outputs, output_path).await?;
        orchestrator::ensure_success(&container)
    }

    fn finish_stage(&mut self, stage: StepStage, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => self.log_step(stage, StepState::Finish, None),
            Err(e) => self.log_step(stage, StepState::Stop, Some(e)),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_skip_empty_flags_runs_everything() {
        for t in NodeType::ALL {
            assert!(!should_skip(NodeTypes::empty(), t));
        }
    }

    #[test]
    fn test_should_skip_unselected_types() {
        let flags = NodeTypes::from(NodeType::Integration);
        for t in NodeType::ALL {
            assert_eq!(should_skip(flags, t), t != NodeType::Integration);
        }
    }

    #[test]
    fn test_lacks_critical_config() {
        let empty = StepNode::new("empty");
        for t in NodeType::ALL {
            assert_eq!(lacks_critical_config(t, &empty), t != NodeType::Build);
        }

        let with_image = StepNode::new("img").with_image("alpine:3");
        for t in NodeType::ALL {
            assert!(!lacks_critical_config(t, &with_image));
        }
    }
}
