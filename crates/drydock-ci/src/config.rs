//! Runner configuration.

use crate::error::{CiError, Result};
use serde::{Deserialize, Serialize};

/// Settings shared by every build job a worker drives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Driver for per-event networks.
    pub network_driver: String,

    /// Where the build context is mounted inside step containers.
    pub workspace_mount: String,

    /// Shell used to execute encoded step scripts.
    pub shell: String,

    /// Limit on a one-shot step container's run time in seconds (0 = no limit).
    pub command_timeout_secs: u64,

    /// Vulnerability analysis endpoint; `None` disables analysis.
    pub analyzer_endpoint: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            network_driver: "bridge".to_string(),
            workspace_mount: "/workspace".to_string(),
            shell: "/bin/sh".to_string(),
            command_timeout_secs: 0,
            analyzer_endpoint: None,
        }
    }
}

impl RunnerConfig {
    /// Create from environment variables
    ///
    /// Reads:
    /// - DRYDOCK_NETWORK_DRIVER (optional, default: "bridge")
    /// - DRYDOCK_WORKSPACE_MOUNT (optional, default: "/workspace")
    /// - DRYDOCK_SHELL (optional, default: "/bin/sh")
    /// - DRYDOCK_COMMAND_TIMEOUT_SECS (optional, default: 0)
    /// - DRYDOCK_ANALYZER_ENDPOINT (optional, unset disables analysis)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let command_timeout_secs = match lookup("DRYDOCK_COMMAND_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                CiError::Config(format!("DRYDOCK_COMMAND_TIMEOUT_SECS={raw:?}: {e}"))
            })?,
            None => defaults.command_timeout_secs,
        };

        Ok(Self {
            network_driver: lookup("DRYDOCK_NETWORK_DRIVER").unwrap_or(defaults.network_driver),
            workspace_mount: lookup("DRYDOCK_WORKSPACE_MOUNT")
                .unwrap_or(defaults.workspace_mount),
            shell: lookup("DRYDOCK_SHELL").unwrap_or(defaults.shell),
            command_timeout_secs,
            analyzer_endpoint: lookup("DRYDOCK_ANALYZER_ENDPOINT").filter(|s| !s.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = RunnerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, RunnerConfig::default());
        assert!(config.analyzer_endpoint.is_none());
    }

    #[test]
    fn test_overrides_from_env() {
        let config = RunnerConfig::from_lookup(lookup_from(&[
            ("DRYDOCK_NETWORK_DRIVER", "overlay"),
            ("DRYDOCK_SHELL", "/bin/bash"),
            ("DRYDOCK_COMMAND_TIMEOUT_SECS", "600"),
            ("DRYDOCK_ANALYZER_ENDPOINT", "http://clair:6060"),
        ]))
        .unwrap();
        assert_eq!(config.network_driver, "overlay");
        assert_eq!(config.shell, "/bin/bash");
        assert_eq!(config.command_timeout_secs, 600);
        assert_eq!(config.analyzer_endpoint.as_deref(), Some("http://clair:6060"));
        assert_eq!(config.workspace_mount, "/workspace");
    }

    #[test]
    fn test_invalid_timeout_is_config_error() {
        let err = RunnerConfig::from_lookup(lookup_from(&[(
            "DRYDOCK_COMMAND_TIMEOUT_SECS",
            "soon",
        )]))
        .unwrap_err();
        assert!(matches!(err, CiError::Config(_)));
    }

    #[test]
    fn test_empty_endpoint_disables_analysis() {
        let config =
            RunnerConfig::from_lookup(lookup_from(&[("DRYDOCK_ANALYZER_ENDPOINT", "")])).unwrap();
        assert!(config.analyzer_endpoint.is_none());
    }
}
