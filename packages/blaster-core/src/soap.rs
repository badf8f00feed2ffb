//! Minimal SOAP 1.1 client for the two AVTransport actions the pipeline
//! needs: `SetAVTransportURI` and `Play`.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::utils::{escape_xml, extract_xml_text};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(4);

const AV_TRANSPORT_URN: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// Failure modes for a single SOAP call.
#[derive(Debug, Error, Clone)]
pub enum SoapError {
    /// The HTTP request itself failed (connect refused, timed out, DNS, ...).
    #[error("http request failed: {0}")]
    Http(String),
    /// The renderer returned a non-2xx status with no SOAP fault body.
    #[error("http status {0}")]
    HttpStatus(u16),
    /// The renderer returned a SOAP fault.
    #[error("soap fault: {message} (upnp code {upnp_code:?})")]
    Fault {
        /// `<faultstring>` text, if present.
        message: String,
        /// `<errorCode>` from the UPnPError detail block, if present.
        upnp_code: Option<u32>,
    },
}

impl SoapError {
    /// Whether this failure is worth retrying: connection-level failures
    /// and the UPnP transition-not-available/transport-locked codes
    /// (701/714/716/718), but not a clean 4xx/5xx with no fault or a
    /// permanent fault like 402 (invalid args).
    pub fn is_transient(&self) -> bool {
        match self {
            SoapError::Http(_) => true,
            SoapError::HttpStatus(status) => *status >= 500,
            SoapError::Fault { upnp_code, .. } => {
                matches!(upnp_code, Some(701) | Some(714) | Some(716) | Some(718))
            }
        }
    }

    /// The UPnP error code carried by this failure, if any.
    pub fn upnp_code(&self) -> Option<u32> {
        match self {
            SoapError::Fault { upnp_code, .. } => *upnp_code,
            _ => None,
        }
    }
}

/// Result alias for SOAP calls.
pub type SoapResult<T> = Result<T, SoapError>;

/// Sends `SetAVTransportURI` with the given media URL and DIDL-Lite metadata.
pub async fn set_av_transport_uri(
    client: &Client,
    control_url: &str,
    media_url: &str,
    didl_metadata: &str,
) -> SoapResult<()> {
    let args = [
        ("InstanceID", "0"),
        ("CurrentURI", media_url),
        ("CurrentURIMetaData", didl_metadata),
    ];
    send_soap_request(client, control_url, AV_TRANSPORT_URN, "SetAVTransportURI", &args).await?;
    Ok(())
}

/// Sends `Play` with normal (`1`) playback speed.
pub async fn play(client: &Client, control_url: &str) -> SoapResult<()> {
    let args = [("InstanceID", "0"), ("Speed", "1")];
    send_soap_request(client, control_url, AV_TRANSPORT_URN, "Play", &args).await?;
    Ok(())
}

async fn send_soap_request(
    client: &Client,
    control_url: &str,
    service_urn: &str,
    action: &str,
    args: &[(&str, &str)],
) -> SoapResult<String> {
    let body_args: String = args
        .iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape_xml(value)))
        .collect();

    let envelope = format!(
        "<?xml version=\"1.0\"?><s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\"><s:Body>\
         <u:{action} xmlns:u=\"{service_urn}\">{body_args}</u:{action}></s:Body></s:Envelope>"
    );

    let soap_action = format!("\"{service_urn}#{action}\"");

    let response = client
        .post(control_url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", soap_action)
        .header("Connection", "close")
        .timeout(TOTAL_TIMEOUT)
        .body(envelope)
        .send()
        .await
        .map_err(|e| SoapError::Http(e.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| SoapError::Http(e.to_string()))?;

    if text.contains("<s:Fault>") || text.contains("<soap:Fault>") || text.contains(":Fault>") {
        let message = extract_fault_string(&text).unwrap_or_else(|| "unknown fault".to_string());
        let upnp_code = extract_xml_text(&text, "errorCode").and_then(|s| s.parse().ok());
        return Err(SoapError::Fault { message, upnp_code });
    }

    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16()));
    }

    Ok(text)
}

fn extract_fault_string(xml: &str) -> Option<String> {
    extract_xml_text(xml, "faultstring")
}
