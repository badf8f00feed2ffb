//! Composition root: wires the Media Origin, network context, event bus,
//! rule store, and HTTP client into one [`BootstrappedServices`] handle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::BlastConfig;
use crate::context::{IpDetector, LocalIpDetector, NetworkContext};
use crate::error::{PipelineError, PipelineResult};
use crate::events::EventBus;
use crate::origin::MediaOrigin;
use crate::rules::RuleStore;

const SOAP_CLIENT_TIMEOUT_SECS: u64 = 10;

/// Every long-lived service the server binary needs, built in dependency
/// order and torn down together on shutdown.
pub struct BootstrappedServices {
    /// Blast run tunables.
    pub config: BlastConfig,
    /// Network identity (advertise IP + bound port) shared by the origin
    /// and every URL the orchestrator hands to renderers.
    pub network: NetworkContext,
    /// The Media Origin HTTP server.
    pub origin: MediaOrigin,
    /// Pipeline-wide event bus.
    pub bus: EventBus,
    /// Rule persistence.
    pub rule_store: RuleStore,
    /// Shared HTTP client for SOAP calls, description fetches, and proxying.
    pub http_client: Client,
    /// Cancellation signal for graceful shutdown.
    pub cancel: CancellationToken,
    origin_handle: Option<tokio::task::JoinHandle<()>>,
}

impl BootstrappedServices {
    /// Starts the Media Origin listener, finishing the service graph.
    pub async fn start(&mut self) -> PipelineResult<()> {
        let handle = self.origin.start(self.config.preferred_port).await?;
        tracing::info!(base_url = %self.network.url_builder().base_url(), "media origin started");
        self.origin_handle = Some(handle);
        Ok(())
    }

    /// Cancels in-flight work and waits up to `shutdown_grace_ms` for it to
    /// settle before aborting the origin listener outright.
    pub async fn shutdown(&mut self) {
        tracing::info!("shutting down blast services");
        self.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(self.config.shutdown_grace_ms)).await;
        if let Some(handle) = self.origin_handle.take() {
            handle.abort();
        }
    }
}

fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(SOAP_CLIENT_TIMEOUT_SECS))
        .build()
        .expect("reqwest client builds with a fixed timeout")
}

/// Builds every service using auto-detected network identity.
pub fn bootstrap_services(config: BlastConfig, rules_path: PathBuf) -> PipelineResult<BootstrappedServices> {
    let detector: Arc<dyn IpDetector> = Arc::new(LocalIpDetector);
    bootstrap_services_with_network(config, rules_path, None, detector)
}

/// Builds every service, optionally pinning the advertise IP instead of
/// auto-detecting it (used when the CLI passes `--advertise-ip`).
pub fn bootstrap_services_with_network(
    config: BlastConfig,
    rules_path: PathBuf,
    explicit_ip: Option<std::net::IpAddr>,
    detector: Arc<dyn IpDetector>,
) -> PipelineResult<BootstrappedServices> {
    // 1. network identity: explicit IP wins, otherwise auto-detect.
    let network = match explicit_ip {
        Some(ip) => NetworkContext::explicit(config.preferred_port, ip),
        None => NetworkContext::auto_detect(config.preferred_port, detector)
            .map_err(|_| PipelineError::NetworkUnavailable)?,
    };

    // 2. shared infra: HTTP client, event bus, cancellation token.
    let http_client = create_http_client();
    let bus = EventBus::default();
    let cancel = CancellationToken::new();

    // 3. Media Origin, built on top of the network identity and HTTP client.
    let origin = MediaOrigin::new(network.clone(), http_client.clone());

    // 4. rule persistence.
    let rule_store = RuleStore::new(rules_path);

    Ok(BootstrappedServices {
        config,
        network,
        origin,
        bus,
        rule_store,
        http_client,
        cancel,
        origin_handle: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_client_has_timeout() {
        let client = create_http_client();
        // Smoke-check that building with a fixed timeout doesn't panic;
        // reqwest doesn't expose the configured duration for inspection.
        drop(client);
    }

    #[tokio::test]
    async fn bootstrap_with_explicit_network_succeeds() {
        let config = BlastConfig::default();
        let detector: Arc<dyn IpDetector> = Arc::new(LocalIpDetector);
        let services = bootstrap_services_with_network(
            config,
            PathBuf::from("/tmp/blaster-test-rules.json"),
            Some(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)),
            detector,
        )
        .unwrap();
        assert_eq!(services.network.get_ip(), std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    }
}
