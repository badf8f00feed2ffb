//! Shared types for the discoverers: errors, interface enumeration, and
//! ASCII case-insensitive text-matching helpers for parsing SSDP-style
//! header blocks without allocating a lowercased copy of the whole buffer.

use thiserror::Error;

/// Failure modes for a discoverer run.
#[derive(Debug, Error, Clone)]
pub enum DiscoveryError {
    /// Binding or configuring a UDP/TCP socket failed.
    #[error("socket error: {0}")]
    Socket(String),
    /// No usable, non-virtual network interface was found.
    #[error("no usable network interfaces")]
    NoInterfaces,
    /// The mDNS daemon failed to start or browse.
    #[error("mdns daemon error: {0}")]
    Mdns(String),
}

/// Result alias for discoverer operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Network interface names that never carry LAN renderer traffic and are
/// skipped when enumerating interfaces to bind/scan from.
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "utun", "awdl", "llw", "anpi",
];

/// Whether `name` looks like a virtual/loopback interface that shouldn't be
/// used for discovery.
pub fn is_virtual_interface(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Case-insensitive ASCII substring search, avoiding an allocation for the
/// common case of scanning short SSDP response buffers.
pub fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    find_ignore_ascii_case(haystack, needle).is_some()
}

/// Case-insensitive ASCII `starts_with`.
pub fn starts_with_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    haystack.len() >= needle.len() && haystack.as_bytes()[..needle.len()].eq_ignore_ascii_case(needle.as_bytes())
}

/// Case-insensitive ASCII substring search, returning the byte offset of
/// the first match.
pub fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_interfaces_are_detected() {
        assert!(is_virtual_interface("lo"));
        assert!(is_virtual_interface("docker0"));
        assert!(is_virtual_interface("veth1234"));
        assert!(!is_virtual_interface("en0"));
        assert!(!is_virtual_interface("wlan0"));
    }

    #[test]
    fn case_insensitive_contains_matches() {
        assert!(contains_ignore_ascii_case("ST: upnp:rootdevice", "ROOTDEVICE"));
        assert!(!contains_ignore_ascii_case("ST: upnp:rootdevice", "chromecast"));
    }

    #[test]
    fn case_insensitive_starts_with() {
        assert!(starts_with_ignore_ascii_case("HTTP/1.1 200 OK", "http/1.1"));
        assert!(!starts_with_ignore_ascii_case("HTTP/1.1 200 OK", "ftp"));
    }
}
