//! DIDL-Lite metadata construction for `SetAVTransportURI`.
//!
//! Renderers require a metadata XML document describing the object it is
//! being asked to play. This is a single fixed "track" with no browse
//! hierarchy, so the document is built by string concatenation rather than
//! a full XML writer — consistent with how small, fixed UPnP fragments are
//! usually produced.

use crate::utils::escape_xml;

/// Builds the DIDL-Lite metadata document for one clip.
///
/// `title` is typically derived from the clip's file name or URL; it has
/// no bearing on playback, only on what a renderer's UI displays.
pub fn format_didl_lite(media_url: &str, title: &str) -> String {
    format!(
        "<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\" \
         xmlns:dc=\"http://purl.org/dc/elements/1.1/\" \
         xmlns:upnp=\"urn:schemas-upnp-org:metadata-1-0/upnp/\">\
         <item id=\"1\" parentID=\"0\" restricted=\"1\">\
         <dc:title>{title}</dc:title>\
         <upnp:class>object.item.audioItem.musicTrack</upnp:class>\
         <res protocolInfo=\"http-get:*:audio/mpeg:*\">{url}</res>\
         </item></DIDL-Lite>",
        title = escape_xml(title),
        url = escape_xml(media_url),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_music_track_class_and_protocol_info() {
        let didl = format_didl_lite("http://192.168.1.20:8080/media/current.mp3", "blast clip");
        assert!(didl.contains("object.item.audioItem.musicTrack"));
        assert!(didl.contains("protocolInfo=\"http-get:*:audio/mpeg:*\""));
        assert!(didl.contains("http://192.168.1.20:8080/media/current.mp3"));
    }

    #[test]
    fn escapes_special_characters_in_title() {
        let didl = format_didl_lite("http://host/clip.mp3", "Rock & Roll <Live>");
        assert!(didl.contains("Rock &amp; Roll &lt;Live&gt;"));
        assert!(!didl.contains("<Live>"));
    }
}
