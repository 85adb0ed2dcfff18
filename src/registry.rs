//! First-pass scan collecting the three kinds of collection-global objects
//! (appearances, city-object groups, implicit-geometry templates) referenced by the
//! streamed features. Appearances, groups, and templates can precede or follow the
//! objects that reference them, so they are gathered in a pass of their own before
//! the streamed pass begins.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader as QuickReader;

use crate::error::{CgtError, Result};
use crate::io::feature_xml::{self, GLOBAL_OBJECT_NAMES};
use crate::io::xml_tree::{local_name_of, parse_element};
use crate::model::{Appearance, CityObjectGroup, ImplicitTemplate};

/// The three owned lists collected by the pre-pass.
#[derive(Debug, Clone, Default)]
pub struct GlobalObjectRegistry {
    pub appearances: Vec<Appearance>,
    pub groups: Vec<CityObjectGroup>,
    pub templates: Vec<ImplicitTemplate>,
}

impl GlobalObjectRegistry {
    /// Scans `path` once, collecting every `Appearance` and `CityObjectGroup` at the
    /// collection root plus every `ImplicitGeometryTemplate` referenced from inside a
    /// feature's `relativeGMLGeometry`. The streaming [`crate::io::Reader`] should
    /// then be built with [`crate::io::Reader::with_skip_filter`] over the element
    /// names this pass already consumed, so the main pass never materializes them
    /// twice.
    pub fn scan(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| CgtError::io(path, e))?;
        let mut xml = QuickReader::from_reader(BufReader::new(file));
        xml.config_mut().trim_text(true);

        let mut registry = GlobalObjectRegistry::default();
        let mut buf = Vec::new();
        loop {
            match xml
                .read_event_into(&mut buf)
                .map_err(|e| CgtError::malformed(path, e.to_string()))?
            {
                Event::Start(start) => {
                    let owned = start.to_owned();
                    let local = local_name_of(&String::from_utf8_lossy(owned.name().as_ref())).to_string();
                    let node = parse_element(&mut xml, &owned, path)?;
                    match local.as_str() {
                        "CityObjectGroup" => registry.groups.push(feature_xml::node_to_group(&node)?),
                        "Appearance" => registry.appearances.push(feature_xml::node_to_appearance(&node)?),
                        _ => registry.collect_templates_from(&node, path)?,
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(registry)
    }

    /// Implicit-geometry templates have no dedicated top-level element in practice;
    /// they live inline at the first reference site under `core:ImplicitGeometry`'s
    /// `relativeGMLGeometry` target. This walks every feature chunk looking for one,
    /// registering it the first time its id is seen.
    fn collect_templates_from(&mut self, node: &crate::io::xml_tree::XmlNode, path: &Path) -> Result<()> {
        if local_name_of(&node.name) == "ImplicitGeometryTemplate" {
            let template = feature_xml::node_to_template(node, path)?;
            if !self.templates.iter().any(|t| t.id == template.id) {
                self.templates.push(template);
            }
        }
        for child in &node.children {
            self.collect_templates_from(child, path)?;
        }
        Ok(())
    }

    /// Element local names this pass has already captured, for decorating the main
    /// streaming reader with a skip filter.
    pub fn consumed_names(&self) -> impl Iterator<Item = String> {
        GLOBAL_OBJECT_NAMES.iter().map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn scan_collects_group_and_appearance_but_not_features() {
        let doc = r#"<?xml version="1.0"?>
<core:CityModel xmlns:core="http://www.opengis.net/citygml/2.0" xmlns:grp="http://www.opengis.net/citygml/cityobjectgroup/2.0" xmlns:app="http://www.opengis.net/citygml/appearance/2.0">
  <bldg:Building gml:id="b1"></bldg:Building>
  <grp:CityObjectGroup gml:id="g1"><grp:groupMember xlink:href="#b1"/></grp:CityObjectGroup>
  <app:Appearance gml:id="a1"><app:theme>visual</app:theme></app:Appearance>
</core:CityModel>"#;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(doc.as_bytes()).unwrap();
        let registry = GlobalObjectRegistry::scan(tmp.path()).unwrap();
        assert_eq!(registry.groups.len(), 1);
        assert_eq!(registry.groups[0].id, "g1");
        assert_eq!(registry.appearances.len(), 1);
        assert_eq!(registry.appearances[0].theme, "visual");
    }
}
