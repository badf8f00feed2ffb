//! mDNS/Bonjour discoverer: browses a configurable set of service types
//! (Chromecast, AirPlay, Spotify Connect, ...) and resolves them to
//! `(ip, port)` hits.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent};

use super::types::{DiscoveryError, DiscoveryResult};

/// Default ports for service types that don't publish a usable port in
/// their SRV record (Chromecast is the common case: 8008 plain, 8009 TLS).
const CAST_PLAIN_PORT: u16 = 8008;
const CAST_TLS_PORT: u16 = 8009;

/// Tunables for one mDNS browse pass.
#[derive(Debug, Clone)]
pub struct MdnsConfig {
    /// Service types to browse, e.g. `_googlecast._tcp.local.`.
    pub service_types: Vec<String>,
    /// How long to wait for resolved services per service type.
    pub browse_timeout: Duration,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            service_types: vec![
                "_googlecast._tcp.local.".to_string(),
                "_airplay._tcp.local.".to_string(),
                "_raop._tcp.local.".to_string(),
                "_spotify-connect._tcp.local.".to_string(),
            ],
            browse_timeout: Duration::from_millis(2000),
        }
    }
}

/// One resolved mDNS hit.
#[derive(Debug, Clone)]
pub struct MdnsHit {
    /// Resolved IPv4 address.
    pub ip: Ipv4Addr,
    /// Resolved port, defaulting per service type when the SRV record omits one.
    pub port: u16,
    /// Advertised instance name (used as a friendly-name fallback).
    pub instance_name: String,
    /// The mDNS service type this hit was resolved under.
    pub service_type: String,
}

/// Creates a fresh mDNS daemon for one discovery run.
pub fn create_daemon() -> DiscoveryResult<ServiceDaemon> {
    ServiceDaemon::new().map_err(|e| DiscoveryError::Mdns(e.to_string()))
}

/// Browses every configured service type and collects resolved hits.
pub async fn discover_mdns(daemon: &ServiceDaemon, config: &MdnsConfig) -> DiscoveryResult<Vec<MdnsHit>> {
    let mut hits = Vec::new();
    for service_type in &config.service_types {
        hits.extend(browse_one(daemon, service_type, config.browse_timeout).await?);
    }
    Ok(hits)
}

async fn browse_one(daemon: &ServiceDaemon, service_type: &str, browse_timeout: Duration) -> DiscoveryResult<Vec<MdnsHit>> {
    let receiver = daemon
        .browse(service_type)
        .map_err(|e| DiscoveryError::Mdns(e.to_string()))?;

    let mut hits = Vec::new();
    let deadline = tokio::time::Instant::now() + browse_timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, receiver.recv_async()).await {
            Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                if let Some(hit) = parse_mdns_service(&info, service_type) {
                    hits.push(hit);
                }
            }
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    let _ = daemon.stop_browse(service_type);
    Ok(hits)
}

fn parse_mdns_service(info: &mdns_sd::ResolvedService, service_type: &str) -> Option<MdnsHit> {
    let ip = info
        .get_addresses()
        .iter()
        .find_map(|addr| match addr.to_ip_addr() {
            std::net::IpAddr::V4(v4) => Some(v4),
            _ => None,
        })?;

    let srv_port = info.get_port();
    let port = if srv_port != 0 {
        srv_port
    } else if service_type.contains("googlecast") {
        CAST_PLAIN_PORT
    } else {
        CAST_TLS_PORT
    };

    Some(MdnsHit {
        ip,
        port,
        instance_name: info.get_fullname().trim_end_matches(service_type).trim_end_matches('.').to_string(),
        service_type: service_type.to_string(),
    })
}

/// Converts a resolved hit's IP into a generic [`IpAddr`] for identity use.
pub fn hit_ip(hit: &MdnsHit) -> IpAddr {
    IpAddr::V4(hit.ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_service_types_cover_chromecast_and_airplay() {
        let config = MdnsConfig::default();
        assert!(config.service_types.iter().any(|s| s.contains("googlecast")));
        assert!(config.service_types.iter().any(|s| s.contains("airplay")));
        assert!(config.service_types.iter().any(|s| s.contains("raop")));
        assert!(config.service_types.iter().any(|s| s.contains("spotify-connect")));
    }

    #[test]
    fn default_browse_timeout_is_two_seconds() {
        assert_eq!(MdnsConfig::default().browse_timeout, Duration::from_millis(2000));
    }
}
