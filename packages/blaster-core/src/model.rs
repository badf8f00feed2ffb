//! Core data model: clips, renderers, and evaluation context.
//!
//! These types are the nouns the rest of the crate operates on. They carry
//! no behavior beyond small invariant checks at construction.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// The audio clip a blast will push to renderers: either a local file or a
/// validated remote URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClipSource {
    /// A file on the local filesystem, served by the Media Origin.
    Local {
        /// Absolute or relative path to the audio file.
        path: String,
    },
    /// A remote HTTP(S) URL, proxied by the Media Origin.
    Remote {
        /// Absolute http/https URL.
        url: String,
    },
}

impl ClipSource {
    /// Validates the clip: local paths must exist and be readable, remote
    /// URLs must be absolute http/https.
    pub fn validate(&self) -> PipelineResult<()> {
        match self {
            ClipSource::Local { path } => {
                let meta = std::fs::metadata(path).map_err(|e| {
                    PipelineError::InvalidClipSource(format!("{path}: {e}"))
                })?;
                if !meta.is_file() {
                    return Err(PipelineError::InvalidClipSource(format!(
                        "{path} is not a regular file"
                    )));
                }
                Ok(())
            }
            ClipSource::Remote { url } => {
                let parsed = reqwest::Url::parse(url).map_err(|e| {
                    PipelineError::InvalidClipSource(format!("{url}: {e}"))
                })?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(PipelineError::InvalidClipSource(format!(
                        "{url}: scheme must be http or https"
                    )));
                }
                Ok(())
            }
        }
    }

    /// File extension to use for the `/media/current.<ext>` path, defaulting
    /// to `mp3` when the local path has no extension.
    pub fn extension(&self) -> String {
        match self {
            ClipSource::Local { path } => std::path::Path::new(path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("mp3")
                .to_string(),
            ClipSource::Remote { .. } => "mp3".to_string(),
        }
    }
}

/// Which discoverer produced a [`Renderer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RendererSource {
    /// Found via SSDP M-SEARCH.
    Ssdp,
    /// Found via mDNS service browsing.
    Mdns,
    /// Found via TCP port-scan fallback.
    PortScan,
}

impl std::fmt::Display for RendererSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ssdp => write!(f, "SSDP"),
            Self::Mdns => write!(f, "MDNS"),
            Self::PortScan => write!(f, "PORT_SCAN"),
        }
    }
}

/// A discovered UPnP/DLNA media renderer.
///
/// Identity is `(ip, port)` for the lifetime of one discovery session — not
/// UUID, because some renderers advertise different UUIDs per service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Renderer {
    /// IPv4/IPv6 address of the renderer.
    pub ip: IpAddr,
    /// Port the renderer's HTTP/description server listens on.
    pub port: u16,
    /// UPnP device type, if known (e.g. `urn:schemas-upnp-org:device:MediaRenderer:1`).
    pub device_type: Option<String>,
    /// Human-readable name from the device description, if fetched.
    pub friendly_name: Option<String>,
    /// Manufacturer string from the device description, if fetched.
    pub manufacturer: Option<String>,
    /// Model name from the device description, if fetched.
    pub model: Option<String>,
    /// Service name -> control URL (e.g. `"AVTransport" -> "http://.../Control"`).
    pub control_urls: std::collections::BTreeMap<String, String>,
    /// Icon URL from the device description, if present.
    pub icon_url: Option<String>,
    /// UPnP UDN / unique identifier, if known.
    pub uuid: Option<String>,
    /// Which discoverer first produced this renderer.
    pub source: RendererSource,
}

impl Renderer {
    /// Identity key used for Discovery Bus dedup.
    pub fn id(&self) -> (IpAddr, u16) {
        (self.ip, self.port)
    }

    /// Returns the AVTransport control URL, if one has been resolved.
    pub fn av_transport_control_url(&self) -> Option<&str> {
        self.control_urls.get("AVTransport").map(String::as_str)
    }

    /// True once an AVTransport control URL has been resolved, meaning the
    /// Orchestrator can skip the description-fetch step.
    pub fn has_control_url(&self) -> bool {
        self.av_transport_control_url().is_some()
    }
}

/// Current network state as observed by the caller, fed to the Rule Evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NetworkState {
    /// Connected to WiFi with the given SSID.
    WiFi {
        /// Network name, possibly surrounded by quotes as some platforms report it.
        ssid: String,
    },
    /// Connected via a mobile/cellular data connection.
    Mobile,
    /// No network connection.
    Disconnected,
}

/// Immutable snapshot of conditions evaluated by the Rule Evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationContext {
    /// Current network connectivity.
    pub network: NetworkState,
    /// Minutes since midnight, local time, in `[0, 1440)`.
    pub time_of_day_minutes: u16,
    /// ISO 8601 day of week: 1 = Monday .. 7 = Sunday.
    pub day_of_week: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_clip_requires_http_scheme() {
        let clip = ClipSource::Remote {
            url: "ftp://example.com/a.mp3".into(),
        };
        assert!(clip.validate().is_err());
    }

    #[test]
    fn remote_clip_accepts_https() {
        let clip = ClipSource::Remote {
            url: "https://example.com/a.mp3".into(),
        };
        assert!(clip.validate().is_ok());
    }

    #[test]
    fn local_clip_rejects_missing_file() {
        let clip = ClipSource::Local {
            path: "/nonexistent/path/to/clip.mp3".into(),
        };
        assert!(clip.validate().is_err());
    }

    #[test]
    fn renderer_id_is_ip_port_pair() {
        let renderer = Renderer {
            ip: "192.168.1.10".parse().unwrap(),
            port: 1400,
            device_type: None,
            friendly_name: None,
            manufacturer: None,
            model: None,
            control_urls: Default::default(),
            icon_url: None,
            uuid: None,
            source: RendererSource::Ssdp,
        };
        assert_eq!(
            renderer.id(),
            ("192.168.1.10".parse::<IpAddr>().unwrap(), 1400)
        );
        assert!(!renderer.has_control_url());
    }
}
