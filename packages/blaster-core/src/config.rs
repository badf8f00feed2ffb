//! Blast pipeline configuration: timing budgets, retry policy, and which
//! discoverers are enabled.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::model::RendererSource;

/// Tunables for one blast run, loaded from `blaster.yaml` and overridable
/// from the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlastConfig {
    /// Hard ceiling on the entire pipeline, from discovery start to done.
    pub total_budget_ms: u64,
    /// Portion of `total_budget_ms` allotted to discovery before the
    /// Orchestrator starts working with whatever renderers it has.
    pub discovery_budget_ms: u64,
    /// Per-renderer ceiling from first SOAP attempt to terminal outcome.
    pub per_device_timeout_ms: u64,
    /// Maximum SOAP retries per operation (Set and Play have separate buckets).
    pub soap_retry_count: u32,
    /// Base delay for the exponential backoff between SOAP retries.
    pub soap_retry_base_ms: u64,
    /// TCP ports probed by the Port-Scan discoverer.
    pub port_scan_ports: BTreeSet<u16>,
    /// mDNS service types browsed by the mDNS discoverer.
    pub mdns_service_types: Vec<String>,
    /// Which discoverers participate in a run.
    pub enabled_sources: BTreeSet<RendererSource>,
    /// Preferred Media Origin bind port; falls back to an OS-assigned port
    /// if unavailable.
    pub preferred_port: u16,
    /// Grace period the Orchestrator waits for in-flight SOAP calls to
    /// settle before a cancelled run reports `Done`.
    pub shutdown_grace_ms: u64,
}

impl Default for BlastConfig {
    fn default() -> Self {
        Self {
            total_budget_ms: 8_000,
            discovery_budget_ms: 3_500,
            per_device_timeout_ms: 4_000,
            soap_retry_count: 2,
            soap_retry_base_ms: 250,
            port_scan_ports: [8008, 8009, 1400, 49152, 49153, 49154, 80, 7000]
                .into_iter()
                .collect(),
            mdns_service_types: vec![
                "_googlecast._tcp.local.".to_string(),
                "_airplay._tcp.local.".to_string(),
                "_raop._tcp.local.".to_string(),
                "_spotify-connect._tcp.local.".to_string(),
            ],
            enabled_sources: [
                RendererSource::Ssdp,
                RendererSource::Mdns,
                RendererSource::PortScan,
            ]
            .into_iter()
            .collect(),
            preferred_port: 8080,
            shutdown_grace_ms: 500,
        }
    }
}

impl BlastConfig {
    /// Validates cross-field invariants that serde defaults alone don't enforce.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.discovery_budget_ms > self.total_budget_ms {
            return Err(PipelineError::InvalidConfig(
                "discovery_budget_ms must not exceed total_budget_ms".into(),
            ));
        }
        if self.per_device_timeout_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "per_device_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.enabled_sources.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "enabled_sources must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The exponential backoff delay before SOAP retry attempt `attempt`
    /// (0-indexed), before jitter is applied: `base * 2^attempt`.
    pub fn soap_retry_delay_ms(&self, attempt: u32) -> u64 {
        self.soap_retry_base_ms.saturating_mul(1u64 << attempt.min(16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = BlastConfig::default();
        assert_eq!(cfg.total_budget_ms, 8_000);
        assert_eq!(cfg.discovery_budget_ms, 3_500);
        assert_eq!(cfg.per_device_timeout_ms, 4_000);
        assert_eq!(cfg.soap_retry_count, 2);
        assert_eq!(cfg.preferred_port, 8080);
        assert_eq!(cfg.shutdown_grace_ms, 500);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn discovery_budget_exceeding_total_is_rejected() {
        let mut cfg = BlastConfig::default();
        cfg.discovery_budget_ms = cfg.total_budget_ms + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_enabled_sources_is_rejected() {
        let mut cfg = BlastConfig::default();
        cfg.enabled_sources.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retry_delay_doubles_each_attempt() {
        let cfg = BlastConfig::default();
        assert_eq!(cfg.soap_retry_delay_ms(0), 250);
        assert_eq!(cfg.soap_retry_delay_ms(1), 500);
        assert_eq!(cfg.soap_retry_delay_ms(2), 1000);
    }
}
