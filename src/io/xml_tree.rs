use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{CgtError, Result};

/// A generic, namespace-aware XML element tree.
///
/// The streaming reader first materializes one of these per chunk, then a second
/// pass ([`crate::io::feature_xml`]) interprets the tree against the known CityGML
/// vocabulary. Splitting the concerns this way keeps the low-level XML plumbing
/// (quick-xml event handling, entity/whitespace bookkeeping) independent of the
/// CityGML-specific element names.
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn attr(&self, local_name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| local_name_of(k) == local_name)
            .map(|(_, v)| v.as_str())
    }

    pub fn children_named<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children
            .iter()
            .filter(move |c| local_name_of(&c.name) == local_name)
    }

    pub fn child_named(&self, local_name: &str) -> Option<&XmlNode> {
        self.children_named(local_name).next()
    }

    pub fn local_name(&self) -> &str {
        local_name_of(&self.name)
    }
}

/// Returns the part of a (possibly prefixed) element/attribute name after `:`.
pub fn local_name_of(qualified: &str) -> &str {
    qualified.split(':').next_back().unwrap_or(qualified)
}

/// Parses one element (already opened via `start`) and everything up to its matching
/// end tag into an [`XmlNode`]. `path` is used only for error messages.
pub fn parse_element<R: BufRead>(
    xml_reader: &mut Reader<R>,
    start: &BytesStart,
    path: &std::path::Path,
) -> Result<XmlNode> {
    let name = decode(start.name().as_ref());
    let attrs = start
        .attributes()
        .filter_map(|a| a.ok())
        .map(|a| (decode(a.key.as_ref()), a.decode_and_unescape_value(xml_reader.decoder()).unwrap_or_default().into_owned()))
        .collect();

    let mut node = XmlNode {
        name,
        attrs,
        text: String::new(),
        children: Vec::new(),
    };

    if start.is_empty() || matches!(start.to_end().name().as_ref(), b"") {
        // handled below via the normal event loop for non-self-closing starts; a
        // self-closing tag never reaches here because quick-xml emits Event::Empty
        // for it, handled by the caller.
    }

    let mut buf = Vec::new();
    loop {
        match xml_reader.read_event_into(&mut buf) {
            Ok(Event::Start(child_start)) => {
                let child = parse_element(xml_reader, &child_start, path)?;
                node.children.push(child);
            }
            Ok(Event::Empty(child_start)) => {
                let child = XmlNode {
                    name: decode(child_start.name().as_ref()),
                    attrs: child_start
                        .attributes()
                        .filter_map(|a| a.ok())
                        .map(|a| {
                            (
                                decode(a.key.as_ref()),
                                a.decode_and_unescape_value(xml_reader.decoder())
                                    .unwrap_or_default()
                                    .into_owned(),
                            )
                        })
                        .collect(),
                    text: String::new(),
                    children: Vec::new(),
                };
                node.children.push(child);
            }
            Ok(Event::Text(t)) => {
                let decoded = t.unescape().map_err(|e| {
                    CgtError::malformed(path, format!("invalid text content: {e}"))
                })?;
                node.text.push_str(decoded.as_ref());
            }
            Ok(Event::CData(t)) => {
                node.text
                    .push_str(&String::from_utf8_lossy(t.as_ref()));
            }
            Ok(Event::End(_)) => break,
            Ok(Event::Eof) => {
                return Err(CgtError::malformed(
                    path,
                    format!("unexpected end of document inside <{}>", node.name),
                ));
            }
            Ok(_) => {}
            Err(e) => return Err(CgtError::malformed(path, e.to_string())),
        }
        buf.clear();
    }

    Ok(node)
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_nested_element_with_attrs_and_text() {
        let xml = r#"<bldg:Building gml:id="b1"><bldg:lod1Solid><gml:Solid/></bldg:lod1Solid><core:name>Test</core:name></bldg:Building>"#;
        let mut reader = Reader::from_reader(Cursor::new(xml.as_bytes()));
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let start = match reader.read_event_into(&mut buf).unwrap() {
            Event::Start(s) => s.into_owned(),
            other => panic!("expected start, got {other:?}"),
        };
        let node = parse_element(&mut reader, &start, std::path::Path::new("test.gml")).unwrap();
        assert_eq!(node.local_name(), "Building");
        assert_eq!(node.attr("id"), Some("b1"));
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.child_named("name").unwrap().text, "Test");
        assert_eq!(
            node.child_named("lod1Solid")
                .unwrap()
                .child_named("Solid")
                .unwrap()
                .local_name(),
            "Solid"
        );
    }
}
