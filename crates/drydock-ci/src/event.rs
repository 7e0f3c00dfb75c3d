//! Triggering event record.
//!
//! The event is the job's view of the outside world: it names the image the
//! build produces, carries the host directory step outputs are captured into,
//! and collects the step log entries recorded while the job runs.

use crate::error::{CiError, Result};
use crate::steplog::StepLogEntry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Event data key holding the host directory for captured outputs.
pub const CONTEXT_DIR_KEY: &str = "context-dir";

/// Operation that triggered the event.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Build and test only.
    #[default]
    Integration,

    /// Build, test, and push the image.
    Publish,

    /// Roll out an existing image; nothing new is pushed.
    Deploy,
}

/// Image the build produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// `repository:tag`, or the bare repository when no tag is set.
    pub fn name(&self) -> String {
        if self.tag.is_empty() {
            self.repository.clone()
        } else {
            format!("{}:{}", self.repository, self.tag)
        }
    }
}

/// Values produced by steps for reuse by later stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventOutput {
    /// Image built by a Dockerfile-based pre-build step.
    pub pre_build_image: Option<String>,
}

/// A triggered build event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Unique across concurrently active jobs; names the job network.
    pub id: String,

    #[serde(default)]
    pub operation: Operation,

    #[serde(default)]
    pub image: ImageRef,

    /// Free-form metadata supplied by the trigger.
    #[serde(default)]
    pub data: Map<String, Value>,

    #[serde(default)]
    pub output: EventOutput,

    /// Audit entries recorded during the job.
    #[serde(default)]
    pub step_logs: Vec<StepLogEntry>,
}

impl Event {
    /// Create an event with a fresh id.
    pub fn new(operation: Operation, image: ImageRef) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), operation, image)
    }

    pub fn with_id(id: impl Into<String>, operation: Operation, image: ImageRef) -> Self {
        Self {
            id: id.into(),
            operation,
            image,
            data: Map::new(),
            output: EventOutput::default(),
            step_logs: Vec::new(),
        }
    }

    /// Set the host directory outputs are captured into.
    pub fn with_context_dir(mut self, dir: impl Into<String>) -> Self {
        self.data
            .insert(CONTEXT_DIR_KEY.to_string(), Value::String(dir.into()));
        self
    }

    /// Directory from the `context-dir` data field, with a trailing separator.
    pub fn output_path(&self) -> Result<String> {
        match self.data.get(CONTEXT_DIR_KEY) {
            Some(Value::String(dir)) => Ok(format!("{dir}/")),
            _ => Err(CiError::MissingEventData(CONTEXT_DIR_KEY.to_string())),
        }
    }

    pub fn image_name(&self) -> String {
        self.image.name()
    }

    pub fn is_deploy(&self) -> bool {
        self.operation == Operation::Deploy
    }
}
