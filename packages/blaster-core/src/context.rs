//! Network context: the advertise IP and bound port renderers use to reach
//! the Media Origin, with pluggable IP auto-detection.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Failure modes when determining this host's advertise IP.
#[derive(Debug, Error, Clone)]
pub enum NetworkError {
    /// The configured or auto-detecting [`IpDetector`] failed.
    #[error("IP detection failed: {0}")]
    Detection(String),
    /// Auto-detection was requested but no detector was configured.
    #[error("no IP detector configured")]
    NoDetector,
}

/// Abstraction over "what is this host's LAN-facing IP", so tests can stub
/// it out without touching real interfaces.
pub trait IpDetector: Send + Sync {
    /// Returns the best-guess LAN IP address for this host.
    fn detect(&self) -> Result<IpAddr, NetworkError>;
}

/// Default [`IpDetector`] backed by `local_ip_address::local_ip()`.
pub struct LocalIpDetector;

impl IpDetector for LocalIpDetector {
    fn detect(&self) -> Result<IpAddr, NetworkError> {
        local_ip_address::local_ip().map_err(|e| NetworkError::Detection(e.to_string()))
    }
}

/// Shared, mutable view of the Media Origin's network identity: the IP
/// renderers should use to reach it, and the port it ended up bound to
/// (which may differ from the preferred port).
#[derive(Clone)]
pub struct NetworkContext {
    port: Arc<RwLock<u16>>,
    advertise_ip: Arc<RwLock<IpAddr>>,
    ip_detector: Option<Arc<dyn IpDetector>>,
}

impl NetworkContext {
    /// Builds a context with an explicit advertise IP and port — no
    /// auto-detection is performed.
    pub fn explicit(port: u16, advertise_ip: IpAddr) -> Self {
        Self {
            port: Arc::new(RwLock::new(port)),
            advertise_ip: Arc::new(RwLock::new(advertise_ip)),
            ip_detector: None,
        }
    }

    /// Builds a context that auto-detects the advertise IP via `detector`,
    /// starting with `preferred_port` (updated later by [`Self::set_port`]
    /// once the Media Origin has actually bound).
    pub fn auto_detect(preferred_port: u16, detector: Arc<dyn IpDetector>) -> Result<Self, NetworkError> {
        let ip = detector.detect()?;
        Ok(Self {
            port: Arc::new(RwLock::new(preferred_port)),
            advertise_ip: Arc::new(RwLock::new(ip)),
            ip_detector: Some(detector),
        })
    }

    /// Builds a loopback-bound context for unit/integration tests.
    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::explicit(0, IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
    }

    /// Re-runs IP detection and updates the stored advertise IP.
    pub fn refresh_ip(&self) -> Result<(), NetworkError> {
        let detector = self.ip_detector.as_ref().ok_or(NetworkError::NoDetector)?;
        let ip = detector.detect()?;
        *self.advertise_ip.write() = ip;
        Ok(())
    }

    /// Current advertise IP.
    pub fn get_ip(&self) -> IpAddr {
        *self.advertise_ip.read()
    }

    /// Current bound port.
    pub fn get_port(&self) -> u16 {
        *self.port.read()
    }

    /// Updates the bound port, called once the Media Origin listener is live.
    pub fn set_port(&self, port: u16) {
        *self.port.write() = port;
    }

    /// Builds a [`UrlBuilder`] snapshotting the current IP and port.
    pub fn url_builder(&self) -> UrlBuilder {
        UrlBuilder {
            ip: self.get_ip(),
            port: self.get_port(),
        }
    }
}

/// Builds URLs the Media Origin serves under, from a fixed `(ip, port)` pair.
#[derive(Debug, Clone, Copy)]
pub struct UrlBuilder {
    ip: IpAddr,
    port: u16,
}

impl UrlBuilder {
    /// The base URL renderers should resolve media paths against, e.g.
    /// `http://192.168.1.20:8080`.
    pub fn base_url(&self) -> String {
        match self.ip {
            IpAddr::V4(ip) => format!("http://{ip}:{}", self.port),
            IpAddr::V6(ip) => format!("http://[{ip}]:{}", self.port),
        }
    }

    /// Full URL to the currently configured clip, given its file extension.
    pub fn media_url(&self, extension: &str) -> String {
        format!("{}/media/current.{extension}", self.base_url())
    }

    /// Full URL to the proxy-streamed remote clip endpoint.
    pub fn stream_url(&self) -> String {
        format!("{}/media/stream", self.base_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct StubDetector(IpAddr);

    impl IpDetector for StubDetector {
        fn detect(&self) -> Result<IpAddr, NetworkError> {
            Ok(self.0)
        }
    }

    #[test]
    fn explicit_context_reports_configured_values() {
        let ctx = NetworkContext::explicit(8080, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(ctx.get_port(), 8080);
        assert_eq!(ctx.url_builder().base_url(), "http://192.168.1.20:8080");
    }

    #[test]
    fn set_port_updates_subsequent_builders() {
        let ctx = NetworkContext::explicit(0, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        ctx.set_port(51234);
        assert_eq!(ctx.url_builder().base_url(), "http://10.0.0.1:51234");
    }

    #[test]
    fn auto_detect_uses_detector_result() {
        let detector: Arc<dyn IpDetector> =
            Arc::new(StubDetector(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 5))));
        let ctx = NetworkContext::auto_detect(8080, detector).unwrap();
        assert_eq!(ctx.get_ip(), IpAddr::V4(Ipv4Addr::new(172, 16, 0, 5)));
    }

    #[test]
    fn media_url_includes_extension() {
        let ctx = NetworkContext::explicit(8080, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(
            ctx.url_builder().media_url("wav"),
            "http://192.168.1.20:8080/media/current.wav"
        );
    }
}
