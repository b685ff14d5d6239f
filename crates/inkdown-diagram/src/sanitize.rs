#![forbid(unsafe_code)]

//! Structural sanitizer for renderer output.
//!
//! The worker's sandboxing is defense-in-depth, not a substitute for output
//! sanitization: the returned markup is parsed as a strict XML document,
//! denylisted elements and attributes are removed over the whole tree, and
//! the result is re-serialized from the sanitized event stream — never from
//! the original string, so mutation tricks in the raw text cannot survive.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SanitizeError {
    /// The markup failed strict parsing, or is not an `<svg>` document.
    /// Callers treat this as an empty result.
    #[error("diagram markup failed strict parsing")]
    Parse,
}

/// Elements removed together with their entire subtree.
const DENIED_ELEMENTS: [&str; 12] = [
    "script",
    "foreignobject",
    "iframe",
    "embed",
    "object",
    "use",
    "image",
    "animate",
    "animatetransform",
    "animatemotion",
    "set",
    "feimage",
];

/// Sanitize renderer output into displayable SVG.
///
/// # Errors
///
/// Returns [`SanitizeError::Parse`] when the markup is not well-formed XML
/// with an `svg` root; the caller renders nothing in that case.
pub fn sanitize_svg(markup: &str) -> Result<String, SanitizeError> {
    let mut reader = Reader::from_str(markup);
    let mut writer = Writer::new(Vec::new());
    let mut saw_root = false;
    let mut removed = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(element)) => {
                if !saw_root {
                    if !element.local_name().as_ref().eq_ignore_ascii_case(b"svg") {
                        return Err(SanitizeError::Parse);
                    }
                    saw_root = true;
                }
                if is_denied_element(element.local_name().as_ref()) {
                    removed += 1;
                    let end = element.to_end().into_owned();
                    reader
                        .read_to_end(end.name())
                        .map_err(|_| SanitizeError::Parse)?;
                    continue;
                }
                let clean = clean_element(&element, &mut removed)?;
                writer
                    .write_event(Event::Start(clean))
                    .map_err(|_| SanitizeError::Parse)?;
            }
            Ok(Event::Empty(element)) => {
                if !saw_root {
                    // An empty root is not a usable svg document.
                    return Err(SanitizeError::Parse);
                }
                if is_denied_element(element.local_name().as_ref()) {
                    removed += 1;
                    continue;
                }
                let clean = clean_element(&element, &mut removed)?;
                writer
                    .write_event(Event::Empty(clean))
                    .map_err(|_| SanitizeError::Parse)?;
            }
            Ok(event @ (Event::End(_) | Event::Text(_) | Event::CData(_))) => {
                writer
                    .write_event(event)
                    .map_err(|_| SanitizeError::Parse)?;
            }
            // Declarations are harmless; comments, processing instructions
            // and doctypes are not part of a strict diagram document.
            Ok(Event::Decl(decl)) => {
                writer
                    .write_event(Event::Decl(decl))
                    .map_err(|_| SanitizeError::Parse)?;
            }
            Ok(Event::Comment(_) | Event::PI(_) | Event::DocType(_)) => {}
            // Predefined and numeric character references are ordinary
            // escaped text; custom entities are rejected outright.
            Ok(Event::GeneralRef(reference)) => {
                let name: &[u8] = &reference;
                let harmless = matches!(name, b"amp" | b"lt" | b"gt" | b"quot" | b"apos")
                    || name.first() == Some(&b'#');
                if !harmless {
                    return Err(SanitizeError::Parse);
                }
                writer
                    .write_event(Event::GeneralRef(reference))
                    .map_err(|_| SanitizeError::Parse)?;
            }
            Err(_) => return Err(SanitizeError::Parse),
        }
    }

    if !saw_root {
        return Err(SanitizeError::Parse);
    }
    if removed > 0 {
        tracing::debug!(removed, "stripped denylisted diagram constructs");
    }

    String::from_utf8(writer.into_inner()).map_err(|_| SanitizeError::Parse)
}

fn is_denied_element(local_name: &[u8]) -> bool {
    DENIED_ELEMENTS
        .iter()
        .any(|denied| local_name.eq_ignore_ascii_case(denied.as_bytes()))
}

fn is_denied_attribute(key: &[u8], value: &str) -> bool {
    // Event handlers.
    if key.len() >= 2 && key[..2].eq_ignore_ascii_case(b"on") {
        return true;
    }
    // Any reference resolving to a script-executing scheme, regardless of
    // which attribute carries it.
    let folded: String = value
        .chars()
        .filter(|c| !c.is_ascii_control())
        .collect::<String>()
        .trim()
        .to_ascii_lowercase();
    folded.starts_with("javascript:") || folded.starts_with("vbscript:") || folded.starts_with("data:")
}

fn clean_element(
    element: &BytesStart<'_>,
    removed: &mut usize,
) -> Result<BytesStart<'static>, SanitizeError> {
    let name = String::from_utf8(element.name().as_ref().to_vec())
        .map_err(|_| SanitizeError::Parse)?;
    let mut clean = BytesStart::new(name);

    for attribute in element.attributes() {
        let attribute = attribute.map_err(|_| SanitizeError::Parse)?;
        let value = attribute
            .unescape_value()
            .map_err(|_| SanitizeError::Parse)?;
        if is_denied_attribute(attribute.key.as_ref(), &value) {
            *removed += 1;
            continue;
        }
        let key =
            std::str::from_utf8(attribute.key.as_ref()).map_err(|_| SanitizeError::Parse)?;
        clean.push_attribute((key, value.as_ref()));
    }

    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_plain_svg_through() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg"><rect width="10" height="10"/><text>hi</text></svg>"#;
        let out = sanitize_svg(svg);
        assert!(out.is_ok());
        let out = out.unwrap_or_default();
        assert!(out.contains("<rect"));
        assert!(out.contains("<text>hi</text>"));
    }

    #[test]
    fn strips_script_elements_and_their_subtree() {
        let svg = r"<svg><script>alert(1)<g>nested</g></script><rect/></svg>";
        let out = sanitize_svg(svg).unwrap_or_default();
        assert!(!out.contains("script"));
        assert!(!out.contains("alert"));
        assert!(!out.contains("nested"));
        assert!(out.contains("<rect"));
    }

    #[test]
    fn strips_event_handler_attributes() {
        let svg = r#"<svg><rect onclick="alert(1)" ONLOAD="x" width="5"/></svg>"#;
        let out = sanitize_svg(svg).unwrap_or_default();
        assert!(!out.to_ascii_lowercase().contains("onclick"));
        assert!(!out.to_ascii_lowercase().contains("onload"));
        assert!(out.contains("width=\"5\""));
    }

    #[test]
    fn strips_foreign_documents_and_remote_inclusion() {
        let svg = r##"<svg><foreignObject><body>html</body></foreignObject><image href="http://x/y.png"/><use href="#ok"/><circle r="1"/></svg>"##;
        let out = sanitize_svg(svg).unwrap_or_default();
        assert!(!out.contains("foreignObject"));
        assert!(!out.contains("html"));
        assert!(!out.contains("<image"));
        assert!(!out.contains("<use"));
        assert!(out.contains("<circle"));
    }

    #[test]
    fn strips_script_scheme_references_anywhere() {
        let svg = r##"<svg><a href="javascript:alert(1)"><text>x</text></a><a href="#frag"><text>y</text></a></svg>"##;
        let out = sanitize_svg(svg).unwrap_or_default();
        assert!(!out.contains("javascript:"));
        assert!(out.contains("#frag"));
        assert!(out.contains("<text>x</text>"));
    }

    #[test]
    fn malformed_markup_is_rejected() {
        assert_eq!(sanitize_svg("<svg><rect></svg>"), Err(SanitizeError::Parse));
        assert_eq!(sanitize_svg("not xml at all"), Err(SanitizeError::Parse));
        assert_eq!(sanitize_svg(""), Err(SanitizeError::Parse));
    }

    #[test]
    fn non_svg_root_is_rejected() {
        assert_eq!(
            sanitize_svg("<html><body>x</body></html>"),
            Err(SanitizeError::Parse)
        );
    }

    #[test]
    fn output_is_reserialized_not_copied() {
        // Attribute quoting is normalized by re-serialization.
        let svg = "<svg width  =  \"3\"><rect/></svg>";
        let out = sanitize_svg(svg).unwrap_or_default();
        assert!(out.contains("<svg width=\"3\">"));
    }
}
