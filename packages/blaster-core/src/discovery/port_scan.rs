//! Port-scan discoverer: last-resort fallback that sweeps the local /24
//! for renderers that don't answer SSDP or mDNS, by probing a small set of
//! known vendor ports and GET-ing a vendor-specific description path.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;

use super::types::{DiscoveryError, DiscoveryResult};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(400);
const HTTP_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_CONCURRENCY: usize = 64;

/// Paths known vendors serve a device-description-like document on, tried
/// in order until one returns a 2xx.
const VENDOR_PATHS: &[&str] = &["/xml/device_description.xml", "/setup/eureka_info"];

/// One raw port-scan hit: an open port that also answered a vendor path probe.
#[derive(Debug, Clone)]
pub struct PortScanHit {
    /// Host IP that answered.
    pub ip: IpAddr,
    /// Port that accepted a TCP connection and answered an HTTP probe.
    pub port: u16,
    /// Which vendor path succeeded, if a body was fetched (informational).
    pub probed_path: Option<String>,
}

/// Sweeps every host in `local_ip`'s /24 across `ports`, probing each open
/// port with the vendor paths.
pub async fn scan_subnet(
    client: &Client,
    local_ip: Ipv4Addr,
    ports: &[u16],
) -> DiscoveryResult<Vec<PortScanHit>> {
    let octets = local_ip.octets();
    let hosts: Vec<Ipv4Addr> = (1u8..=254)
        .filter(|&last| last != octets[3])
        .map(|last| Ipv4Addr::new(octets[0], octets[1], octets[2], last))
        .collect();

    let targets: Vec<(Ipv4Addr, u16)> = hosts
        .into_iter()
        .flat_map(|host| ports.iter().map(move |&port| (host, port)))
        .collect();

    let hits: Vec<PortScanHit> = stream::iter(targets)
        .map(|(host, port)| probe(client, host, port))
        .buffer_unordered(MAX_CONCURRENCY)
        .filter_map(|result| async move { result })
        .collect()
        .await;

    Ok(hits)
}

async fn probe(client: &Client, host: Ipv4Addr, port: u16) -> Option<PortScanHit> {
    let addr = SocketAddr::from((host, port));
    let connect = tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::TcpStream::connect(addr)).await;
    let stream = connect.ok()?.ok()?;
    drop(stream);

    for path in VENDOR_PATHS {
        let url = format!("http://{host}:{port}{path}");
        let response = client
            .get(&url)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await;
        if let Ok(resp) = response {
            if resp.status().is_success() {
                return Some(PortScanHit {
                    ip: IpAddr::V4(host),
                    port,
                    probed_path: Some((*path).to_string()),
                });
            }
        }
    }

    None
}

/// Error helper used by callers that need a typed failure for "no local IP
/// available to scan from" (the local IP itself comes from [`crate::context::NetworkContext`]).
pub fn require_local_ip(ip: Option<Ipv4Addr>) -> DiscoveryResult<Ipv4Addr> {
    ip.ok_or(DiscoveryError::NoInterfaces)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_paths_cover_cast_and_roku() {
        assert!(VENDOR_PATHS.contains(&"/xml/device_description.xml"));
        assert!(VENDOR_PATHS.contains(&"/setup/eureka_info"));
    }

    #[test]
    fn require_local_ip_rejects_none() {
        assert!(require_local_ip(None).is_err());
    }

    #[test]
    fn require_local_ip_accepts_some() {
        assert!(require_local_ip(Some(Ipv4Addr::new(192, 168, 1, 1))).is_ok());
    }
}
