//! Discovery Bus: runs the enabled discoverers concurrently, merges their
//! output, and deduplicates by `(ip, port)` so a renderer seen by more
//! than one discoverer only produces one [`Renderer`].

pub mod descriptor;
pub mod mdns;
pub mod port_scan;
pub mod ssdp;
pub mod types;

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::BlastConfig;
use crate::events::{EventBus, PipelineEvent};
use crate::model::{Renderer, RendererSource};

use self::descriptor::fetch_descriptor;
use self::mdns::{discover_mdns, MdnsConfig};
use self::port_scan::scan_subnet;
use self::ssdp::{discover_ssdp, SsdpConfig};
use self::types::DiscoveryResult;

/// Runs every enabled discoverer concurrently, each bounded by
/// `discovery_budget_ms`, and streams the deduplicated set of renderers
/// found back to the caller as each one is admitted — rather than making
/// the caller wait for the whole discovery budget to elapse before acting
/// on any of them. Each admitted renderer is also published on `bus`.
pub fn spawn_discovery(
    config: BlastConfig,
    client: Client,
    local_ip: Option<Ipv4Addr>,
    bus: EventBus,
) -> mpsc::Receiver<Renderer> {
    let (out_tx, out_rx) = mpsc::channel::<Renderer>(64);
    tokio::spawn(async move {
        run_discovery_inner(&config, &client, local_ip, &bus, out_tx).await;
    });
    out_rx
}

/// Convenience wrapper over [`spawn_discovery`] for callers that want the
/// full, deduplicated set of renderers found within the discovery budget
/// rather than a live stream (e.g. the `/blast/discover-only` diagnostic
/// endpoint).
pub async fn run_discovery(
    config: &BlastConfig,
    client: &Client,
    local_ip: Option<Ipv4Addr>,
    bus: &EventBus,
) -> Vec<Renderer> {
    let mut rx = spawn_discovery(config.clone(), client.clone(), local_ip, bus.clone());
    let mut renderers = Vec::new();
    while let Some(renderer) = rx.recv().await {
        renderers.push(renderer);
    }
    renderers
}

async fn run_discovery_inner(
    config: &BlastConfig,
    client: &Client,
    local_ip: Option<Ipv4Addr>,
    bus: &EventBus,
    out_tx: mpsc::Sender<Renderer>,
) {
    let (tx, mut rx) = mpsc::channel::<Renderer>(64);
    let deadline = Duration::from_millis(config.discovery_budget_ms);

    let mut handles = Vec::new();

    if config.enabled_sources.contains(&RendererSource::Ssdp) {
        let tx = tx.clone();
        let client = client.clone();
        handles.push(tokio::spawn(run_ssdp(client, tx, deadline)));
    }
    if config.enabled_sources.contains(&RendererSource::Mdns) {
        let tx = tx.clone();
        let client = client.clone();
        let service_types = config.mdns_service_types.clone();
        handles.push(tokio::spawn(run_mdns(client, tx, service_types, deadline)));
    }
    if config.enabled_sources.contains(&RendererSource::PortScan) {
        if let Some(ip) = local_ip {
            let tx = tx.clone();
            let client = client.clone();
            let ports: Vec<u16> = config.port_scan_ports.iter().copied().collect();
            handles.push(tokio::spawn(run_port_scan(client, tx, ip, ports, deadline)));
        }
    }
    drop(tx);

    let mut seen: HashSet<(IpAddr, u16)> = HashSet::new();
    let mut found_per_source: std::collections::HashMap<RendererSource, u32> = std::collections::HashMap::new();

    let collect = async {
        while let Some(renderer) = rx.recv().await {
            let id = renderer.id();
            if seen.insert(id) {
                let counter = found_per_source.entry(renderer.source).or_insert(0);
                *counter += 1;
                tracing::debug!(source = %renderer.source, ip = %renderer.ip, port = renderer.port, "renderer admitted to discovery bus");
                bus.publish(PipelineEvent::RendererFound {
                    ip: renderer.ip,
                    port: renderer.port,
                    friendly_name: renderer.friendly_name.clone(),
                    source: renderer.source,
                });
                bus.publish(PipelineEvent::DiscoveryProgress {
                    source: renderer.source,
                    found_so_far: *counter,
                });
                // Stream the renderer to the caller immediately; a closed
                // receiver (caller gone) just means we stop forwarding.
                if out_tx.send(renderer).await.is_err() {
                    break;
                }
            }
        }
    };

    let _ = timeout(deadline + Duration::from_millis(500), collect).await;

    for handle in handles {
        handle.abort();
    }
}

async fn run_ssdp(client: Client, tx: mpsc::Sender<Renderer>, deadline: Duration) {
    let config = SsdpConfig::default();
    let hits = match timeout(deadline, discover_ssdp(&config)).await {
        Ok(Ok(hits)) => hits,
        _ => return,
    };
    for hit in hits {
        if let Ok(renderer) = fetch_descriptor(&client, hit.ip, port_from_location(&hit.location), &hit.location, RendererSource::Ssdp).await {
            let _ = tx.send(renderer).await;
        }
    }
}

fn port_from_location(location: &str) -> u16 {
    reqwest::Url::parse(location)
        .ok()
        .and_then(|u| u.port())
        .unwrap_or(80)
}

async fn run_mdns(client: Client, tx: mpsc::Sender<Renderer>, service_types: Vec<String>, deadline: Duration) {
    let config = MdnsConfig {
        service_types,
        browse_timeout: Duration::from_millis(2000),
    };
    let daemon = match mdns::create_daemon() {
        Ok(d) => d,
        Err(_) => return,
    };
    let hits = match timeout(deadline, discover_mdns(&daemon, &config)).await {
        Ok(Ok(hits)) => hits,
        _ => return,
    };
    for hit in hits {
        let ip = mdns::hit_ip(&hit);
        let location = format!("http://{}:{}/", ip, hit.port);
        let renderer = match fetch_descriptor(&client, ip, hit.port, &location, RendererSource::Mdns).await {
            Ok(renderer) => renderer,
            Err(_) => Renderer {
                ip,
                port: hit.port,
                device_type: None,
                friendly_name: Some(hit.instance_name.clone()),
                manufacturer: None,
                model: None,
                control_urls: Default::default(),
                icon_url: None,
                uuid: None,
                source: RendererSource::Mdns,
            },
        };
        let _ = tx.send(renderer).await;
    }
}

async fn run_port_scan(client: Client, tx: mpsc::Sender<Renderer>, local_ip: Ipv4Addr, ports: Vec<u16>, deadline: Duration) {
    let hits: DiscoveryResult<Vec<port_scan::PortScanHit>> = timeout(deadline, scan_subnet(&client, local_ip, &ports))
        .await
        .unwrap_or(Ok(Vec::new()));
    let Ok(hits) = hits else { return };
    for hit in hits {
        let location = format!("http://{}:{}{}", hit.ip, hit.port, hit.probed_path.as_deref().unwrap_or("/"));
        let renderer = match fetch_descriptor(&client, hit.ip, hit.port, &location, RendererSource::PortScan).await {
            Ok(renderer) => renderer,
            Err(_) => Renderer {
                ip: hit.ip,
                port: hit.port,
                device_type: None,
                friendly_name: None,
                manufacturer: None,
                model: None,
                control_urls: Default::default(),
                icon_url: None,
                uuid: None,
                source: RendererSource::PortScan,
            },
        };
        let _ = tx.send(renderer).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_from_location_parses_device_description_url() {
        assert_eq!(port_from_location("http://192.168.1.50:1400/description.xml"), 1400);
    }

    #[test]
    fn port_from_location_defaults_to_80_without_explicit_port() {
        assert_eq!(port_from_location("http://192.168.1.50/description.xml"), 80);
    }
}
