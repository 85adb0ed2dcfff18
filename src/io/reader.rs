use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader as QuickReader;
use rustc_hash::FxHashSet;

use crate::error::{CgtError, Result};
use crate::model::{CityGmlVersion, CityModel, Feature};

use super::feature_xml::{self, GLOBAL_OBJECT_NAMES};
use super::namespaces::version_from_namespace;
use super::xml_tree::{local_name_of, parse_element};

/// Chunked, event-driven reader over one CityGML document.
///
/// `next()` yields one top-level feature per call, in document order, while
/// preserving the enclosing collection's namespace/version/envelope information in
/// [`Reader::city_model`]. Global-object element names (appearances, groups, implicit
/// templates) are always skipped here — the [`crate::registry::GlobalObjectRegistry`]
/// collects those in a separate forward pass because they may appear
/// before or after the features that reference them.
pub struct Reader<R> {
    xml: QuickReader<R>,
    path: PathBuf,
    model: CityModel,
    header_loaded: bool,
    skip_names: FxHashSet<String>,
    finished: bool,
}

impl Reader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| CgtError::io(&path, e))?;
        Ok(Self::new(BufReader::new(file), path))
    }
}

impl<R: std::io::BufRead> Reader<R> {
    pub fn new(inner: R, path: PathBuf) -> Self {
        let mut xml = QuickReader::from_reader(inner);
        xml.config_mut().trim_text(true);
        Reader {
            xml,
            path,
            model: CityModel::default(),
            header_loaded: false,
            skip_names: FxHashSet::default(),
            finished: false,
        }
    }

    /// Decorates this reader so elements matching `local_names` (and their subtrees)
    /// are skipped during iteration without being removed from the document. Used to
    /// additionally bypass namespaces the caller already special-cased.
    pub fn with_skip_filter(mut self, local_names: impl IntoIterator<Item = String>) -> Self {
        self.skip_names.extend(local_names);
        self
    }

    pub fn namespaces(&self) -> &[(String, String)] {
        &self.model.namespaces
    }

    pub fn version(&self) -> Option<CityGmlVersion> {
        (self.model.version != CityGmlVersion::default() || self.header_loaded)
            .then_some(self.model.version)
    }

    pub fn city_model(&self) -> &CityModel {
        &self.model
    }

    fn ensure_header(&mut self) -> Result<()> {
        if self.header_loaded {
            return Ok(());
        }
        let mut buf = Vec::new();
        loop {
            match self.xml.read_event_into(&mut buf).map_err(|e| CgtError::malformed(&self.path, e.to_string()))? {
                Event::Start(start) => {
                    let namespaces: Vec<(String, String)> = start
                        .attributes()
                        .filter_map(|a| a.ok())
                        .filter_map(|a| {
                            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
                            key.strip_prefix("xmlns:").map(|prefix| {
                                (
                                    prefix.to_string(),
                                    a.decode_and_unescape_value(self.xml.decoder())
                                        .unwrap_or_default()
                                        .into_owned(),
                                )
                            })
                        })
                        .collect();
                    self.model.version = namespaces
                        .iter()
                        .find_map(|(_, uri)| version_from_namespace(uri))
                        .unwrap_or_default();
                    self.model.namespaces = namespaces;
                    self.header_loaded = true;
                    return Ok(());
                }
                Event::Eof => {
                    return Err(CgtError::malformed(&self.path, "document has no root element"));
                }
                _ => {}
            }
            buf.clear();
        }
    }

    /// Yields the next top-level feature, or `None` at the collection trailer. The
    /// first call also populates [`Reader::city_model`]'s header fields.
    pub fn next(&mut self) -> Result<Option<Feature>> {
        self.ensure_header()?;
        if self.finished {
            return Ok(None);
        }
        let mut buf = Vec::new();
        loop {
            let event = self
                .xml
                .read_event_into(&mut buf)
                .map_err(|e| CgtError::malformed(&self.path, e.to_string()))?;
            match event {
                Event::Start(start) => {
                    let owned = start.to_owned();
                    let local = local_name_of(&String::from_utf8_lossy(owned.name().as_ref())).to_string();
                    if local == "boundedBy" {
                        let node = parse_element(&mut self.xml, &owned, &self.path)?;
                        if let Some(env_node) = node.child_named("Envelope") {
                            self.model.bounded_by = Some(parse_envelope_standalone(env_node)?);
                        }
                        buf.clear();
                        continue;
                    }
                    if GLOBAL_OBJECT_NAMES.contains(&local.as_str()) || self.skip_names.contains(&local) {
                        let _ = parse_element(&mut self.xml, &owned, &self.path)?;
                        buf.clear();
                        continue;
                    }
                    let node = parse_element(&mut self.xml, &owned, &self.path)?;
                    let feature = feature_xml::node_to_feature(&node, &self.path)?;
                    return Ok(Some(feature));
                }
                Event::Empty(_) => {
                    // A self-closing top-level element has no content worth treating
                    // as a feature; keep scanning.
                }
                Event::End(_) | Event::Eof => {
                    self.finished = true;
                    return Ok(None);
                }
                _ => {}
            }
            buf.clear();
        }
    }
}

fn parse_envelope_standalone(node: &super::xml_tree::XmlNode) -> Result<crate::model::Envelope> {
    // Re-expressed locally (rather than reusing `feature_xml::parse_envelope`, which
    // is private to that module) since this is the only other call site.
    let lower = node
        .child_named("lowerCorner")
        .map(|c| parse_floats(&c.text))
        .transpose()?
        .unwrap_or([0.0; 3]);
    let upper = node
        .child_named("upperCorner")
        .map(|c| parse_floats(&c.text))
        .transpose()?
        .unwrap_or([0.0; 3]);
    Ok(crate::model::Envelope {
        min: lower,
        max: upper,
        srs_name: node.attr("srsName").map(str::to_string),
    })
}

fn parse_floats(text: &str) -> Result<[f64; 3]> {
    let vals: Vec<f64> = text
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| CgtError::malformed(Path::new(""), format!("invalid coordinate list: {text}")))?;
    Ok(match vals.as_slice() {
        [x, y] => [*x, *y, 0.0],
        [x, y, z] => [*x, *y, *z],
        _ => [0.0, 0.0, 0.0],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_doc() -> &'static str {
        r#"<?xml version="1.0" encoding="UTF-8"?>
<core:CityModel xmlns:core="http://www.opengis.net/citygml/2.0" xmlns:bldg="http://www.opengis.net/citygml/building/2.0" xmlns:gml="http://www.opengis.net/gml/3.2">
  <gml:boundedBy><gml:Envelope srsDimension="3" srsName="EPSG:25832"><gml:lowerCorner>0 0 0</gml:lowerCorner><gml:upperCorner>1 1 1</gml:upperCorner></gml:Envelope></gml:boundedBy>
  <bldg:Building gml:id="b1"><bldg:lod1Solid><gml:Solid><gml:exterior><gml:CompositeSurface/></gml:exterior></gml:Solid></bldg:lod1Solid></bldg:Building>
  <bldg:Building gml:id="b2"><bldg:lod1Solid><gml:Solid><gml:exterior><gml:CompositeSurface/></gml:exterior></gml:Solid></bldg:lod1Solid></bldg:Building>
</core:CityModel>"#
    }

    #[test]
    fn reads_version_and_envelope_then_two_features() {
        let mut reader = Reader::new(Cursor::new(sample_doc().as_bytes()), PathBuf::from("t.gml"));
        let f1 = reader.next().unwrap().unwrap();
        assert_eq!(reader.version(), Some(CityGmlVersion::V2));
        assert_eq!(f1.id, "b1");
        let envelope = reader.city_model().bounded_by.clone().unwrap();
        assert_eq!(envelope.srs_name.as_deref(), Some("EPSG:25832"));

        let f2 = reader.next().unwrap().unwrap();
        assert_eq!(f2.id, "b2");

        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn skip_filter_bypasses_named_elements() {
        let doc = r#"<core:CityModel xmlns:core="http://www.opengis.net/citygml/2.0" xmlns:bldg="http://www.opengis.net/citygml/building/2.0">
            <bldg:LandUse gml:id="lu1"></bldg:LandUse>
            <bldg:Building gml:id="b1"></bldg:Building>
        </core:CityModel>"#;
        let mut reader = Reader::new(Cursor::new(doc.as_bytes()), PathBuf::from("t.gml"))
            .with_skip_filter(["LandUse".to_string()]);
        let f = reader.next().unwrap().unwrap();
        assert_eq!(f.id, "b1");
    }
}
