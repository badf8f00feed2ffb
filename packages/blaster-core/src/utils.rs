//! Small free-standing helpers shared across modules: clock access and
//! hand-rolled XML text handling for the SOAP/DIDL-Lite call sites that
//! don't warrant a full parser.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since the Unix epoch, clamped to zero if
/// the system clock is somehow before 1970.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Escapes the five XML special characters for safe inclusion in element
/// text or attribute values.
pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Extracts the text content of the first `<tag>...</tag>` occurrence in
/// `xml`, ignoring namespace prefixes on the tag (e.g. `s:Fault` still
/// matches `Fault`). Returns `None` if the tag isn't found.
///
/// This is a targeted scan, not a general XML parser: it's used for small,
/// well-known fields (fault strings, UPnP error codes) where pulling in a
/// full parse tree would be overkill.
pub fn extract_xml_text(xml: &str, tag: &str) -> Option<String> {
    let open_start = find_tag_close(xml, tag)?;
    let after_open = &xml[open_start..];
    let close_rel = find_closing_tag(after_open, tag)?;
    let text = &after_open[..close_rel];
    Some(html_escape::decode_html_entities(text.trim()).into_owned())
}

/// Finds the byte offset just past the opening tag's `>`, accounting for a
/// possible namespace prefix (`<ns:Tag ...>` or `<ns:Tag>`).
fn find_tag_close(xml: &str, tag: &str) -> Option<usize> {
    let bytes = xml.as_bytes();
    let mut idx = 0;
    while let Some(lt) = xml[idx..].find('<') {
        let abs = idx + lt;
        if abs + 1 >= bytes.len() || bytes[abs + 1] == b'/' {
            idx = abs + 1;
            continue;
        }
        let rest = &xml[abs + 1..];
        let name_end = rest
            .find(|c: char| c == '>' || c == ' ' || c == '\t' || c == '\r' || c == '\n')
            .unwrap_or(rest.len());
        let raw_name = &rest[..name_end];
        let local_name = raw_name.rsplit(':').next().unwrap_or(raw_name);
        if local_name == tag {
            if let Some(gt) = rest.find('>') {
                return Some(abs + 1 + gt + 1);
            }
        }
        idx = abs + 1;
    }
    None
}

/// Finds the byte offset of the closing tag matching `tag` (namespace
/// agnostic), relative to the start of `haystack`.
fn find_closing_tag(haystack: &str, tag: &str) -> Option<usize> {
    let mut idx = 0;
    while let Some(lt) = haystack[idx..].find("</") {
        let abs = idx + lt;
        let rest = &haystack[abs + 2..];
        let name_end = rest.find('>').unwrap_or(rest.len());
        let raw_name = &rest[..name_end];
        let local_name = raw_name.rsplit(':').next().unwrap_or(raw_name);
        if local_name == tag {
            return Some(abs);
        }
        idx = abs + 2;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_all_five_special_chars() {
        assert_eq!(
            escape_xml("<a & b > \"c\" 'd'>"),
            "&lt;a &amp; b &gt; &quot;c&quot; &apos;d&apos;&gt;"
        );
    }

    #[test]
    fn extracts_plain_tag_text() {
        let xml = "<errorCode>718</errorCode>";
        assert_eq!(extract_xml_text(xml, "errorCode").as_deref(), Some("718"));
    }

    #[test]
    fn extracts_namespaced_tag_text() {
        let xml = "<s:Envelope><s:Body><s:Fault><faultstring>Invalid Action</faultstring></s:Fault></s:Body></s:Envelope>";
        assert_eq!(
            extract_xml_text(xml, "faultstring").as_deref(),
            Some("Invalid Action")
        );
    }

    #[test]
    fn missing_tag_returns_none() {
        let xml = "<a><b>1</b></a>";
        assert_eq!(extract_xml_text(xml, "c"), None);
    }

    #[test]
    fn now_millis_is_nonzero_in_practice() {
        assert!(now_millis() > 0);
    }
}
