//! drydock CI - build job execution core
//!
//! Drives one pipeline tree to completion for a triggering event:
//! - Creates an isolated network per event and tears it down afterwards
//! - Walks the tree sequentially, running each selected step as a container
//!   or a native image build, failing fast on the first error
//! - Records pre/post build progress and network setup failures on the event
//! - Pushes the produced image and triggers vulnerability analysis
//!
//! Container runtimes plug in through [`ContainerManager`]; [`DockerEngine`]
//! drives the local Docker daemon and [`fakes`] records calls for tests.

pub mod analysis;
pub mod build;
pub mod config;
pub mod docker;
pub mod error;
pub mod event;
pub mod fakes;
pub mod manager;
mod network;
pub mod orchestrator;
mod publish;
pub mod steplog;
pub mod telemetry;
mod walker;

// Re-export key types
pub use analysis::{HttpAnalyzer, ImageAnalyzer, NoopAnalyzer};
pub use build::{Build, BuildStatus};
pub use config::RunnerConfig;
pub use docker::DockerEngine;
pub use error::{CiError, Result};
pub use event::{Event, EventOutput, ImageRef, Operation};
pub use manager::{Container, ContainerManager, ContainerSpec, ContainerState, ImageBuild, Network};
pub use steplog::{EventStepLogger, StepLogEntry, StepLogger, StepStage, StepState};
pub use walker::{lacks_critical_config, should_skip};

pub use drydock_pipeline::{Node, NodeType, NodeTypes, StepNode, Tree};
