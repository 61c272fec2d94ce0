//! Configuration for the bridge binary
//!
//! Settings are read from an optional YAML file. The bridge never writes
//! configuration back.
//!
//! ```yaml
//! device_name: "Demo"
//! ports: [test, drums]
//! resolve:
//!   timeout_ms: 2000
//!   poll_interval_ms: 25
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::patch::DEFAULT_CLIENT_NAME;
use crate::resolver::ResolvePolicy;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BridgeSettings {
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub resolve: ResolveSettings,
}

/// Handle resolution timing
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResolveSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ResolveSettings {
    pub fn policy(&self) -> ResolvePolicy {
        ResolvePolicy::new(
            Duration::from_millis(self.timeout_ms),
            Duration::from_millis(self.poll_interval_ms),
        )
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            ports: Vec::new(),
            resolve: ResolveSettings::default(),
        }
    }
}

impl BridgeSettings {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Failed to parse YAML config: {}", path))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let settings: BridgeSettings = serde_yaml::from_str(contents)?;
        Ok(settings)
    }
}

// Default value functions
fn default_device_name() -> String { DEFAULT_CLIENT_NAME.to_string() }
fn default_timeout_ms() -> u64 { 2000 }
fn default_poll_interval_ms() -> u64 { 25 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_document() {
        let settings = BridgeSettings::from_yaml("{}").unwrap();
        assert_eq!(settings, BridgeSettings::default());
        assert_eq!(settings.device_name, DEFAULT_CLIENT_NAME);
        assert_eq!(settings.resolve.policy(), ResolvePolicy::default());
    }

    #[test]
    fn test_partial_resolve_section() {
        let yaml = r#"
device_name: Demo
ports: [test, drums]
resolve:
  timeout_ms: 500
"#;
        let settings = BridgeSettings::from_yaml(yaml).unwrap();
        assert_eq!(settings.device_name, "Demo");
        assert_eq!(settings.ports, vec!["test", "drums"]);
        assert_eq!(settings.resolve.timeout_ms, 500);
        assert_eq!(settings.resolve.poll_interval_ms, 25);
        assert_eq!(settings.resolve.policy().timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        assert!(BridgeSettings::from_yaml("ports: {not: [a list").is_err());
        assert!(BridgeSettings::from_yaml("ports: 12").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device_name: From File\nports:\n  - keys").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let settings = BridgeSettings::load(&path).await.unwrap();
        assert_eq!(settings.device_name, "From File");
        assert_eq!(settings.ports, vec!["keys"]);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = BridgeSettings::load("/nonexistent/vmidi.yaml").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
