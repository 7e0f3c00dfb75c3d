//! Downstream vulnerability analysis trigger.
//!
//! Analysis runs after a successful push. Its outcome never affects the job:
//! callers go through [`trigger_best_effort`], which logs and discards errors.

use crate::error::{CiError, Result};
use crate::event::Event;
use crate::manager::ContainerManager;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Starts analysis of the image an event produced.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze(&self, event: &Event, manager: &dyn ContainerManager) -> Result<()>;
}

/// Analyzer used when no endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyzer;

#[async_trait]
impl ImageAnalyzer for NoopAnalyzer {
    async fn analyze(&self, event: &Event, _manager: &dyn ContainerManager) -> Result<()> {
        debug!(event_id = %event.id, "image analysis disabled");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    event_id: &'a str,
    image: String,
}

/// Posts analysis requests to an HTTP scanner.
#[derive(Debug, Clone)]
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnalyzer {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CiError::Analysis(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn url(&self) -> String {
        format!("{}/analyze", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl ImageAnalyzer for HttpAnalyzer {
    async fn analyze(&self, event: &Event, _manager: &dyn ContainerManager) -> Result<()> {
        let request = AnalysisRequest {
            event_id: &event.id,
            image: event.image_name(),
        };
        self.client
            .post(self.url())
            .json(&request)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| CiError::Analysis(e.to_string()))?;
        Ok(())
    }
}

/// Run analysis, discarding any failure after logging it.
pub async fn trigger_best_effort(
    analyzer: &dyn ImageAnalyzer,
    event: &Event,
    manager: &dyn ContainerManager,
) {
    if let Err(e) = analyzer.analyze(event, manager).await {
        warn!(event_id = %event.id, error = %e, "image analysis failed; ignoring");
    }
}
