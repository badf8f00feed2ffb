//! SSDP (Simple Service Discovery Protocol) discoverer: sends M-SEARCH
//! requests over UDP multicast and collects `LOCATION` headers from
//! renderers that respond.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::types::{contains_ignore_ascii_case, is_virtual_interface, DiscoveryError, DiscoveryResult};

/// SSDP multicast group and port per the UPnP device architecture spec.
pub const MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// Search targets tried, in order, each round: a renderer-specific type
/// first, then progressively broader targets to catch devices that only
/// answer `ssdp:all` or advertise as a bare root device.
pub const SEARCH_TARGETS: &[&str] = &[
    "urn:schemas-upnp-org:device:MediaRenderer:1",
    "upnp:rootdevice",
    "ssdp:all",
];

/// One raw SSDP discovery hit: a renderer's description-document URL,
/// before the descriptor fetch has resolved friendly name / control URLs.
#[derive(Debug, Clone)]
pub struct SsdpHit {
    /// Source IP address of the SSDP response.
    pub ip: IpAddr,
    /// `LOCATION` header value, expected to be an absolute HTTP URL.
    pub location: String,
}

/// Tunables for one SSDP discovery run.
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// How many times each search target is sent per interface.
    pub send_count: u32,
    /// Delay between successive sends of the same search target.
    pub retry_delay: Duration,
    /// `MX` header value: how long responders should randomize their delay over.
    pub mx_value: u32,
    /// Total time to keep listening for responses after the last send.
    pub listen_timeout: Duration,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            send_count: 3,
            retry_delay: Duration::from_millis(250),
            mx_value: 1,
            listen_timeout: Duration::from_secs(2),
        }
    }
}

/// Builds the M-SEARCH request body for a given search target.
pub fn build_msearch_message(search_target: &str, mx: u32) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx}\r\n\
         ST: {search_target}\r\n\r\n"
    )
}

/// A local interface address usable for SSDP.
struct InterfaceInfo {
    ip: Ipv4Addr,
}

fn get_interfaces() -> DiscoveryResult<Vec<InterfaceInfo>> {
    let all = local_ip_address::list_afinet_netifas()
        .map_err(|e| DiscoveryError::Socket(e.to_string()))?;
    let mut interfaces = Vec::new();
    for (name, ip) in all {
        if is_virtual_interface(&name) {
            continue;
        }
        if let IpAddr::V4(v4) = ip {
            if !v4.is_loopback() {
                interfaces.push(InterfaceInfo { ip: v4 });
            }
        }
    }
    if interfaces.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }
    Ok(interfaces)
}

fn create_socket(iface_ip: Ipv4Addr) -> DiscoveryResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| DiscoveryError::Socket(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| DiscoveryError::Socket(e.to_string()))?;
    #[cfg(unix)]
    socket
        .set_reuse_port(true)
        .map_err(|e| DiscoveryError::Socket(e.to_string()))?;
    socket
        .set_multicast_ttl_v4(4)
        .map_err(|e| DiscoveryError::Socket(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| DiscoveryError::Socket(e.to_string()))?;
    let bind_addr: SocketAddr = (iface_ip, 0).into();
    socket
        .bind(&bind_addr.into())
        .map_err(|e| DiscoveryError::Socket(e.to_string()))?;
    UdpSocket::from_std(socket.into()).map_err(|e| DiscoveryError::Socket(e.to_string()))
}

/// Parses an SSDP response: requires a `LOCATION` header and an `ST` or
/// `NT` header that identifies the device as a media renderer or a root
/// device (the broadest target also matches here, leaving the descriptor
/// fetch to confirm device type).
fn parse_ssdp_response(response: &str, src_ip: IpAddr) -> Option<SsdpHit> {
    let mut location = None;
    let mut is_relevant = false;

    for line in response.split("\r\n") {
        if let Some(value) = line.strip_prefix_ignore_case("LOCATION:") {
            location = Some(value.trim().to_string());
        } else if line.to_ascii_uppercase().starts_with("ST:") || line.to_ascii_uppercase().starts_with("NT:") {
            if contains_ignore_ascii_case(line, "MediaRenderer")
                || contains_ignore_ascii_case(line, "rootdevice")
                || contains_ignore_ascii_case(line, "ssdp:all")
            {
                is_relevant = true;
            }
        }
    }

    if !is_relevant {
        return None;
    }

    location.map(|location| SsdpHit { ip: src_ip, location })
}

trait StripPrefixIgnoreCase {
    fn strip_prefix_ignore_case<'a>(&'a self, prefix: &str) -> Option<&'a str>;
}

impl StripPrefixIgnoreCase for str {
    fn strip_prefix_ignore_case<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        if self.len() >= prefix.len() && self.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes()) {
            Some(&self[prefix.len()..])
        } else {
            None
        }
    }
}

/// Runs one SSDP discovery pass across all usable interfaces, returning
/// deduplicated hits by source IP.
pub async fn discover_ssdp(config: &SsdpConfig) -> DiscoveryResult<Vec<SsdpHit>> {
    let interfaces = get_interfaces()?;
    let mut futures = Vec::new();
    for iface in interfaces {
        futures.push(discover_on_interface(iface.ip, config));
    }
    let results = futures::future::join_all(futures).await;

    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    for result in results.into_iter().flatten() {
        for hit in result {
            if seen.insert(hit.ip) {
                hits.push(hit);
            }
        }
    }
    Ok(hits)
}

async fn discover_on_interface(iface_ip: Ipv4Addr, config: &SsdpConfig) -> DiscoveryResult<Vec<SsdpHit>> {
    let socket = create_socket(iface_ip)?;
    let multicast_addr: SocketAddr = MULTICAST_ADDR.parse().expect("valid multicast address");

    let send_task = async {
        for target in SEARCH_TARGETS {
            let message = build_msearch_message(target, config.mx_value);
            for _ in 0..config.send_count {
                let _ = socket.send_to(message.as_bytes(), multicast_addr).await;
                tokio::time::sleep(config.retry_delay).await;
            }
        }
    };

    let recv_task = async {
        let mut hits = Vec::new();
        let mut buf = [0u8; 2048];
        let deadline = timeout(config.listen_timeout, async {
            loop {
                if let Ok((len, src)) = socket.recv_from(&mut buf).await {
                    let response = String::from_utf8_lossy(&buf[..len]);
                    if let Some(hit) = parse_ssdp_response(&response, src.ip()) {
                        hits.push(hit);
                    }
                }
            }
        })
        .await;
        let _ = deadline;
        hits
    };

    let (_, hits) = tokio::join!(send_task, recv_task);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn builds_msearch_with_search_target_and_mx() {
        let msg = build_msearch_message("urn:schemas-upnp-org:device:MediaRenderer:1", 1);
        assert!(msg.contains("HOST: 239.255.255.250:1900"));
        assert!(msg.contains("MAN: \"ssdp:discover\""));
        assert!(msg.contains("MX: 1"));
        assert!(msg.contains("ST: urn:schemas-upnp-org:device:MediaRenderer:1"));
        assert!(msg.ends_with("\r\n\r\n"));
    }

    #[test]
    fn parses_response_with_media_renderer_st() {
        let response = "HTTP/1.1 200 OK\r\n\
            LOCATION: http://192.168.1.50:1400/description.xml\r\n\
            ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";
        let hit = parse_ssdp_response(response, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))).unwrap();
        assert_eq!(hit.location, "http://192.168.1.50:1400/description.xml");
    }

    #[test]
    fn ignores_response_with_unrelated_st() {
        let response = "HTTP/1.1 200 OK\r\n\
            LOCATION: http://192.168.1.51:80/description.xml\r\n\
            ST: urn:schemas-upnp-org:service:ContentDirectory:1\r\n\r\n";
        assert!(parse_ssdp_response(response, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 51))).is_none());
    }

    #[test]
    fn default_config_matches_spec_timings() {
        let config = SsdpConfig::default();
        assert_eq!(config.send_count, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.mx_value, 1);
    }

    #[test]
    fn search_targets_include_renderer_root_and_all() {
        assert_eq!(SEARCH_TARGETS.len(), 3);
        assert!(SEARCH_TARGETS.contains(&"urn:schemas-upnp-org:device:MediaRenderer:1"));
        assert!(SEARCH_TARGETS.contains(&"upnp:rootdevice"));
        assert!(SEARCH_TARGETS.contains(&"ssdp:all"));
    }
}
