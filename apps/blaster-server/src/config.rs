//! Server configuration: `blaster.yaml` loading with environment and CLI
//! overrides.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blaster_core::BlastConfig;
use serde::Deserialize;

/// Server-level configuration loaded from YAML with environment overrides.
/// Wraps [`BlastConfig`] with deployment concerns (bind address, rule
/// store location) that aren't part of a single blast run's tunables.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the Media Origin HTTP server to.
    /// Override: `BLASTER_BIND_PORT`
    pub bind_port: u16,

    /// IP address to advertise to renderers. If not specified,
    /// auto-detection is attempted.
    /// Override: `BLASTER_ADVERTISE_IP`
    pub advertise_ip: Option<IpAddr>,

    /// Path to the rule store JSON file.
    /// Override: `BLASTER_RULES_PATH`
    pub rules_path: PathBuf,

    /// Blast run tunables (budgets, retry policy, enabled discoverers).
    #[serde(flatten)]
    pub blast: BlastConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 8080,
            advertise_ip: None,
            rules_path: PathBuf::from("rules.json"),
            blast: BlastConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides. With no path, starts from [`Self::default`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BLASTER_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
                self.blast.preferred_port = port;
            }
        }

        if let Ok(val) = std::env::var("BLASTER_ADVERTISE_IP") {
            if let Ok(ip) = val.parse() {
                self.advertise_ip = Some(ip);
            }
        }

        if let Ok(val) = std::env::var("BLASTER_RULES_PATH") {
            self.rules_path = PathBuf::from(val);
        }

        // Note: BLASTER_DATA_DIR / --rules are applied by clap via
        // #[arg(env = ...)] overrides in main.rs, after this load.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_blast_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.blast.preferred_port, 8080);
        assert!(config.advertise_ip.is_none());
    }

    #[test]
    fn loads_from_yaml_without_error() {
        let yaml = "bind_port: 9090\ntotal_budget_ms: 5000\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blaster.yaml");
        std::fs::write(&path, yaml).unwrap();
        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.bind_port, 9090);
        assert_eq!(config.blast.total_budget_ms, 5000);
    }
}
