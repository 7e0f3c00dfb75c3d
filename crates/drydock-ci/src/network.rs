//! Job network lifecycle and service attachment.

use crate::build::Build;
use crate::error::{CiError, Result};
use crate::manager::Network;
use tracing::debug;

/// Create the isolated network for a job.
pub(crate) async fn create_network(job: &Build, name: &str) -> Result<Network> {
    debug!(event_id = %job.event.id, network = %name, "creating job network");
    job.manager.create_network(name).await
}

pub(crate) async fn remove_network(job: &Build, network: &Network) -> Result<()> {
    job.manager.remove_network(&network.id).await
}

/// Attach `container` to the job network so later steps resolve it by `alias`.
pub(crate) async fn connect_network(job: &Build, container: &str, alias: &str) -> Result<()> {
    let network = job.network.as_ref().ok_or(CiError::NetworkNotReady)?;
    debug!(
        event_id = %job.event.id,
        network = %network.id,
        container = %container,
        alias = %alias,
        "attaching service"
    );
    job.manager
        .connect_network(&network.id, container, alias)
        .await
}
