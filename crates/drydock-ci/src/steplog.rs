//! Step log (audit) entries.
//!
//! Only network setup failures and the pre/post build hooks are recorded;
//! service, integration and build steps report through their returned error.

use crate::error::CiError;
use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Category an entry is recorded under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStage {
    /// Integration phase; also used for network setup failures.
    Integration,
    PreBuild,
    PostBuild,
}

impl fmt::Display for StepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepStage::Integration => "integration",
            StepStage::PreBuild => "pre_build",
            StepStage::PostBuild => "post_build",
        })
    }
}

/// Progress marker within a stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Start,
    Finish,
    Stop,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepState::Start => "start",
            StepState::Finish => "finish",
            StepState::Stop => "stop",
        })
    }
}

/// One recorded audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepLogEntry {
    pub stage: StepStage,
    pub state: StepState,

    /// Error message for `Stop` entries.
    pub error: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

/// Sink for audit entries.
pub trait StepLogger: Send + Sync {
    fn record(
        &self,
        event: &mut Event,
        stage: StepStage,
        state: StepState,
        error: Option<&CiError>,
    );
}

/// Appends entries to the event's step log and mirrors them to tracing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventStepLogger;

impl StepLogger for EventStepLogger {
    fn record(
        &self,
        event: &mut Event,
        stage: StepStage,
        state: StepState,
        error: Option<&CiError>,
    ) {
        match error {
            Some(err) => {
                warn!(event_id = %event.id, %stage, %state, error = %err, "step log")
            }
            None => info!(event_id = %event.id, %stage, %state, "step log"),
        }

        event.step_logs.push(StepLogEntry {
            stage,
            state,
            error: error.map(|e| e.to_string()),
            recorded_at: Utc::now(),
        });
    }
}
