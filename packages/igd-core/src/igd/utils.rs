//! XML helpers shared by the SOAP, GENA and description parsers.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// Extracts text content from the first occurrence of an XML element.
///
/// Matches on the local name, ignoring namespace prefixes, and returns the
/// text with entities decoded.
///
/// # Example
/// ```ignore
/// let xml = r#"<u:NewExternalIPAddress>203.0.113.5</u:NewExternalIPAddress>"#;
/// assert_eq!(extract_xml_text(xml, "NewExternalIPAddress"), Some("203.0.113.5".to_string()));
/// ```
pub fn extract_xml_text(xml: &str, element_name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let target_bytes = element_name.as_bytes();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == target_bytes => {
                if let Ok(text) = reader.read_text(e.name()) {
                    let decoded = html_escape::decode_html_entities(&text);
                    return Some(decoded.trim().to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    None
}

/// Collects the direct children of every element named `parent` as name/text pairs.
///
/// Used for SOAP action responses (`<u:ActionResponse>`) and GENA property
/// sets (`<e:property>`), which both carry flat lists of named values.
/// Empty elements map to an empty string. Later duplicates overwrite earlier ones.
///
/// # Errors
/// Returns the parser's message if the document is malformed.
pub fn collect_child_values(xml: &str, parent: &str) -> Result<HashMap<String, String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let parent_bytes = parent.as_bytes();
    let mut values = HashMap::new();
    let mut inside = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if !inside && e.local_name().as_ref() == parent_bytes => {
                inside = true;
            }
            Ok(Event::Start(ref e)) if inside => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let text = reader.read_text(e.name()).map_err(|e| e.to_string())?;
                let decoded = html_escape::decode_html_entities(&text);
                values.insert(name, decoded.trim().to_string());
            }
            Ok(Event::Empty(ref e)) if inside => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                values.insert(name, String::new());
            }
            Ok(Event::End(ref e)) if inside && e.local_name().as_ref() == parent_bytes => {
                inside = false;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    Ok(values)
}

/// Escapes text for inclusion in an XML element.
pub fn escape_xml(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}
