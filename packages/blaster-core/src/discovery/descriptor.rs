//! Renderer Descriptor: fetches and parses a UPnP device description
//! document into friendly name / manufacturer / model / control URLs.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;

use crate::model::{Renderer, RendererSource};
use crate::utils::extract_xml_text;

const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Failure modes when fetching or parsing a device description document.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DescriptorError {
    /// The HTTP fetch of the description document failed.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// The `LOCATION`/description URL could not be parsed.
    #[error("invalid location url: {0}")]
    InvalidUrl(String),
}

/// Fetches `location` and builds a [`Renderer`] from its device description.
///
/// `ip` and `port` are the identity used for the bus even if the
/// description's `<URLBase>` disagrees (a best-effort description parse
/// never overrides the network-observed identity).
pub async fn fetch_descriptor(
    client: &Client,
    ip: IpAddr,
    port: u16,
    location: &str,
    source: RendererSource,
) -> Result<Renderer, DescriptorError> {
    let body = client
        .get(location)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| DescriptorError::Fetch(e.to_string()))?
        .text()
        .await
        .map_err(|e| DescriptorError::Fetch(e.to_string()))?;

    if let Some(renderer) = parse_json_descriptor(&body, ip, port, source) {
        return Ok(renderer);
    }

    let url_base = extract_xml_text(&body, "URLBase").unwrap_or_else(|| base_url_from_location(location));

    let friendly_name = extract_xml_text(&body, "friendlyName");
    let manufacturer = extract_xml_text(&body, "manufacturer");
    let model = extract_xml_text(&body, "modelName");
    let uuid = extract_xml_text(&body, "UDN");
    let device_type = extract_xml_text(&body, "deviceType");
    let icon_url = extract_xml_text(&body, "url").map(|u| resolve_url(&url_base, &u));

    let control_urls = extract_control_urls(&body, &url_base);

    Ok(Renderer {
        ip,
        port,
        device_type,
        friendly_name,
        manufacturer,
        model,
        control_urls,
        icon_url,
        uuid,
        source,
    })
}

/// Parses a vendor JSON status document (e.g. Chromecast's
/// `/setup/eureka_info`) instead of UPnP device XML. Such devices don't
/// publish a `<serviceList>`, so the AVTransport control URL is
/// synthesized from the well-known per-vendor control path convention
/// rather than read out of the document. Returns `None` for anything that
/// doesn't parse as a JSON object, so XML bodies fall through untouched.
fn parse_json_descriptor(body: &str, ip: IpAddr, port: u16, source: RendererSource) -> Option<Renderer> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let obj = value.as_object()?;

    let friendly_name = obj
        .get("name")
        .or_else(|| obj.get("device_name"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let manufacturer = obj.get("manufacturer").and_then(|v| v.as_str()).map(str::to_string);
    let model = obj
        .get("model_name")
        .or_else(|| obj.get("modelName"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let uuid = obj
        .get("ssdp_udn")
        .or_else(|| obj.get("udn"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let mut control_urls = BTreeMap::new();
    control_urls.insert(
        "AVTransport".to_string(),
        format!("http://{ip}:{port}/upnp/control/AVTransport1"),
    );

    Some(Renderer {
        ip,
        port,
        device_type: Some("json-vendor-description".to_string()),
        friendly_name,
        manufacturer,
        model,
        control_urls,
        icon_url: None,
        uuid,
        source,
    })
}

fn base_url_from_location(location: &str) -> String {
    if let Ok(url) = reqwest::Url::parse(location) {
        format!("{}://{}", url.scheme(), url.authority())
    } else {
        location.to_string()
    }
}

fn resolve_url(base: &str, maybe_relative: &str) -> String {
    if maybe_relative.starts_with("http://") || maybe_relative.starts_with("https://") {
        maybe_relative.to_string()
    } else {
        format!("{}{}{}", base.trim_end_matches('/'), if maybe_relative.starts_with('/') { "" } else { "/" }, maybe_relative)
    }
}

/// Walks `<serviceList><service>...</service></serviceList>` entries and
/// maps each service's short name (the last path segment of its service
/// type, e.g. `AVTransport`) to its absolute control URL.
fn extract_control_urls(xml: &str, url_base: &str) -> BTreeMap<String, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut map = BTreeMap::new();
    let mut current_tag = String::new();
    let mut service_type: Option<String> = None;
    let mut control_url: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current_tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .decode()
                    .ok()
                    .and_then(|raw| quick_xml::escape::unescape(&raw).ok().map(|c| c.to_string()))
                    .unwrap_or_default();
                match current_tag.as_str() {
                    "serviceType" => service_type = Some(text),
                    "controlURL" => control_url = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if tag == "service" {
                    if let (Some(st), Some(cu)) = (service_type.take(), control_url.take()) {
                        if let Some(short) = st.rsplit(':').nth(1) {
                            map.insert(short.to_string(), resolve_url(url_base, &cu));
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room Speaker</friendlyName>
    <manufacturer>Acme</manufacturer>
    <modelName>Blaster One</modelName>
    <UDN>uuid:1234-5678</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <controlURL>/AVTransport/Control</controlURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <controlURL>/RenderingControl/Control</controlURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    #[test]
    fn extracts_control_urls_by_short_service_name() {
        let urls = extract_control_urls(SAMPLE_DESCRIPTION, "http://192.168.1.50:1400");
        assert_eq!(
            urls.get("AVTransport").map(String::as_str),
            Some("http://192.168.1.50:1400/AVTransport/Control")
        );
        assert_eq!(
            urls.get("RenderingControl").map(String::as_str),
            Some("http://192.168.1.50:1400/RenderingControl/Control")
        );
    }

    #[test]
    fn resolve_url_passes_through_absolute_urls() {
        assert_eq!(
            resolve_url("http://host:1400", "http://other/x"),
            "http://other/x"
        );
    }

    #[test]
    fn resolve_url_joins_relative_path() {
        assert_eq!(
            resolve_url("http://host:1400", "/AVTransport/Control"),
            "http://host:1400/AVTransport/Control"
        );
    }

    #[test]
    fn parses_chromecast_style_eureka_info_json() {
        let body = r#"{"name":"Living Room TV","ssdp_udn":"abcd-1234","build_version":"1.56"}"#;
        let renderer = parse_json_descriptor(
            body,
            "192.168.1.20".parse().unwrap(),
            8009,
            RendererSource::Mdns,
        )
        .expect("JSON descriptor should parse");
        assert_eq!(renderer.friendly_name.as_deref(), Some("Living Room TV"));
        assert_eq!(renderer.uuid.as_deref(), Some("abcd-1234"));
        assert!(renderer.has_control_url());
    }

    #[test]
    fn xml_body_is_not_mistaken_for_json() {
        assert!(parse_json_descriptor(
            SAMPLE_DESCRIPTION,
            "192.168.1.50".parse().unwrap(),
            1400,
            RendererSource::Ssdp,
        )
        .is_none());
    }

    #[test]
    fn base_url_from_location_strips_path() {
        assert_eq!(
            base_url_from_location("http://192.168.1.50:1400/description.xml"),
            "http://192.168.1.50:1400"
        );
    }
}
