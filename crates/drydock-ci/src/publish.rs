//! Image publishing and push bookkeeping.

use crate::analysis;
use crate::build::{Build, BuildStatus};
use crate::error::Result;
use tracing::info;

impl Build {
    /// Push the event's image, mark the push as successful, then trigger
    /// vulnerability analysis. Analysis failures are logged and discarded.
    pub async fn publish_image(&mut self) -> Result<()> {
        let image = self.event.image_name();
        self.manager.push_image(&image).await?;

        self.status.insert(BuildStatus::PUSH_IMAGE_SUCCESS);
        info!(event_id = %self.event.id, image = %image, "image pushed");

        analysis::trigger_best_effort(self.analyzer.as_ref(), &self.event, self.manager.as_ref())
            .await;
        Ok(())
    }

    /// Whether the job's image counts as pushed. Deploy events never push a
    /// new image and always report success.
    pub fn is_push_image_success(&self) -> bool {
        self.event.is_deploy() || self.status.contains(BuildStatus::PUSH_IMAGE_SUCCESS)
    }
}
