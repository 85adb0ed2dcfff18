use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer as QuickWriter;

use crate::error::{CgtError, Result};
use crate::model::appearance::{SurfaceData, Target};
use crate::model::geometry::{Geometry, LinearRingGeom, MultiSurfaceGeom, PolygonGeom};
use crate::model::{Appearance, CityGmlVersion, CityModel, CityObjectGroup, Feature};

use super::namespaces::namespace_table;

/// Mirrors [`super::reader::Reader`]: writes the collection header once, accepts
/// feature writes in document order, then writes the trailer on close.
///
/// If the caller is overwriting one of its own input files, it is expected to pass
/// a temp path here and call [`Writer::finish_atomic`] to move it into place, rather
/// than opening the writer directly on the original path while the corresponding
/// reader still has it open.
pub struct Writer<W: Write> {
    inner: QuickWriter<W>,
    pretty: bool,
    version: CityGmlVersion,
    header_written: bool,
    closed: bool,
}

impl Writer<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, version: CityGmlVersion, pretty: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| CgtError::io(path, e))?;
        Ok(Self::new(BufWriter::new(file), version, pretty))
    }

    /// Writes to `temp_path`, and on success moves it over `final_path`: atomic
    /// replacement, used when an output path equals one of the input paths.
    pub fn finish_atomic(self, temp_path: impl AsRef<Path>, final_path: impl AsRef<Path>) -> Result<()> {
        self.close()?;
        std::fs::rename(temp_path.as_ref(), final_path.as_ref())
            .map_err(|e| CgtError::io(final_path.as_ref(), e))
    }
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W, version: CityGmlVersion, pretty: bool) -> Self {
        let inner = if pretty {
            QuickWriter::new_with_indent(inner, b' ', 2)
        } else {
            QuickWriter::new(inner)
        };
        Writer {
            inner,
            pretty,
            version,
            header_written: false,
            closed: false,
        }
    }

    pub fn write_header(&mut self, model: &CityModel) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.inner
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(wrap)?;

        let mut root = BytesStart::new("core:CityModel");
        let ns = if model.namespaces.is_empty() {
            namespace_table(self.version)
        } else {
            model.namespaces.clone()
        };
        for (prefix, uri) in &ns {
            root.push_attribute((format!("xmlns:{prefix}").as_str(), uri.as_str()));
        }
        self.inner.write_event(Event::Start(root)).map_err(wrap)?;

        if let Some(envelope) = &model.bounded_by {
            write_envelope(&mut self.inner, envelope)?;
        }

        self.header_written = true;
        Ok(())
    }

    pub fn write_feature(&mut self, feature: &Feature) -> Result<()> {
        write_feature_node(&mut self.inner, feature)
    }

    pub fn write_group(&mut self, group: &CityObjectGroup) -> Result<()> {
        write_group_node(&mut self.inner, group)
    }

    pub fn write_appearance(&mut self, appearance: &Appearance, global: bool) -> Result<()> {
        write_appearance_node(&mut self.inner, appearance, global)
    }

    pub fn close(mut self) -> Result<()> {
        self.inner
            .write_event(Event::End(BytesEnd::new("core:CityModel")))
            .map_err(wrap)?;
        self.closed = true;
        Ok(())
    }
}

impl<W: Write> Drop for Writer<W> {
    fn drop(&mut self) {
        if !self.closed && self.header_written {
            log::warn!("Writer dropped without close(); output may be truncated");
        }
    }
}

fn wrap(e: quick_xml::Error) -> CgtError {
    CgtError::malformed(PathBuf::new(), e.to_string())
}

fn write_envelope<W: Write>(w: &mut QuickWriter<W>, envelope: &crate::model::Envelope) -> Result<()> {
    let mut start = BytesStart::new("gml:boundedBy");
    w.write_event(Event::Start(start.to_owned())).map_err(wrap)?;
    start = BytesStart::new("gml:Envelope");
    start.push_attribute(("srsDimension", "3"));
    if let Some(srs) = &envelope.srs_name {
        start.push_attribute(("srsName", srs.as_str()));
    }
    w.write_event(Event::Start(start)).map_err(wrap)?;
    write_text_elem(w, "gml:lowerCorner", &fmt_point(&envelope.min))?;
    write_text_elem(w, "gml:upperCorner", &fmt_point(&envelope.max))?;
    w.write_event(Event::End(BytesEnd::new("gml:Envelope"))).map_err(wrap)?;
    w.write_event(Event::End(BytesEnd::new("gml:boundedBy"))).map_err(wrap)?;
    Ok(())
}

fn fmt_point(p: &[f64; 3]) -> String {
    format!("{} {} {}", p[0], p[1], p[2])
}

fn write_text_elem<W: Write>(w: &mut QuickWriter<W>, name: &str, text: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name))).map_err(wrap)?;
    w.write_event(Event::Text(BytesText::new(text))).map_err(wrap)?;
    w.write_event(Event::End(BytesEnd::new(name))).map_err(wrap)?;
    Ok(())
}

fn write_feature_node<W: Write>(w: &mut QuickWriter<W>, feature: &Feature) -> Result<()> {
    let tag = qualified_tag(&feature.type_name);
    let mut start = BytesStart::new(tag.as_str());
    start.push_attribute(("gml:id", feature.id.as_str()));
    w.write_event(Event::Start(start)).map_err(wrap)?;

    if let Some(env) = &feature.bounded_by {
        write_envelope(w, env)?;
    }
    for (name, value) in &feature.attributes {
        write_text_elem(w, &format!("core:{name}"), value)?;
    }
    for (prop_name, _lod, geom) in &feature.geometries {
        if let Geometry::Reference(r) = geom {
            let mut href = BytesStart::new(format!("bldg:{prop_name}"));
            href.push_attribute(("xlink:href", r.href.as_str()));
            w.write_event(Event::Empty(href)).map_err(wrap)?;
            continue;
        }
        w.write_event(Event::Start(BytesStart::new(format!("bldg:{prop_name}"))))
            .map_err(wrap)?;
        write_geometry_node(w, geom)?;
        w.write_event(Event::End(BytesEnd::new(format!("bldg:{prop_name}"))))
            .map_err(wrap)?;
    }
    for child in &feature.children {
        w.write_event(Event::Start(BytesStart::new("bldg:boundedBy")))
            .map_err(wrap)?;
        write_feature_node(w, child)?;
        w.write_event(Event::End(BytesEnd::new("bldg:boundedBy")))
            .map_err(wrap)?;
    }
    for relation in &feature.object_relations {
        w.write_event(Event::Start(BytesStart::new("core:CityObjectRelation")))
            .map_err(wrap)?;
        let mut rel = BytesStart::new("core:relatedTo");
        rel.push_attribute(("xlink:href", relation.related_id.as_str()));
        w.write_event(Event::Empty(rel)).map_err(wrap)?;
        if let Some(rt) = &relation.relation_type {
            write_text_elem(w, "core:relationType", rt)?;
        }
        w.write_event(Event::End(BytesEnd::new("core:CityObjectRelation")))
            .map_err(wrap)?;
    }

    w.write_event(Event::End(BytesEnd::new(tag.as_str()))).map_err(wrap)?;
    Ok(())
}

fn qualified_tag(type_name: &str) -> String {
    if type_name.contains(':') {
        type_name.to_string()
    } else {
        format!("bldg:{type_name}")
    }
}

fn write_geometry_node<W: Write>(w: &mut QuickWriter<W>, geom: &Geometry) -> Result<()> {
    match geom {
        Geometry::Point(g) => {
            let mut start = BytesStart::new("gml:Point");
            push_id(&mut start, &g.header.id);
            w.write_event(Event::Start(start)).map_err(wrap)?;
            write_text_elem(w, "gml:pos", &fmt_point(&g.pos))?;
            w.write_event(Event::End(BytesEnd::new("gml:Point"))).map_err(wrap)?;
        }
        Geometry::LineString(g) => {
            let mut start = BytesStart::new("gml:LineString");
            push_id(&mut start, &g.header.id);
            w.write_event(Event::Start(start)).map_err(wrap)?;
            write_pos_list(w, &g.points)?;
            w.write_event(Event::End(BytesEnd::new("gml:LineString"))).map_err(wrap)?;
        }
        Geometry::LinearRing(g) => write_linear_ring(w, g)?,
        Geometry::Curve(g) => {
            let mut start = BytesStart::new("gml:Curve");
            push_id(&mut start, &g.header.id);
            w.write_event(Event::Start(start)).map_err(wrap)?;
            w.write_event(Event::Start(BytesStart::new("gml:segments"))).map_err(wrap)?;
            for seg in &g.segments {
                w.write_event(Event::Start(BytesStart::new("gml:LineStringSegment"))).map_err(wrap)?;
                write_pos_list(w, seg)?;
                w.write_event(Event::End(BytesEnd::new("gml:LineStringSegment"))).map_err(wrap)?;
            }
            w.write_event(Event::End(BytesEnd::new("gml:segments"))).map_err(wrap)?;
            w.write_event(Event::End(BytesEnd::new("gml:Curve"))).map_err(wrap)?;
        }
        Geometry::Polygon(g) => write_polygon(w, g)?,
        Geometry::MultiSurface(g) => write_multi_surface(w, g, "gml:MultiSurface")?,
        Geometry::Solid(g) => {
            let mut start = BytesStart::new("gml:Solid");
            push_id(&mut start, &g.header.id);
            w.write_event(Event::Start(start)).map_err(wrap)?;
            w.write_event(Event::Start(BytesStart::new("gml:exterior"))).map_err(wrap)?;
            write_multi_surface(w, &g.exterior, "gml:CompositeSurface")?;
            w.write_event(Event::End(BytesEnd::new("gml:exterior"))).map_err(wrap)?;
            for interior in &g.interiors {
                w.write_event(Event::Start(BytesStart::new("gml:interior"))).map_err(wrap)?;
                write_multi_surface(w, interior, "gml:CompositeSurface")?;
                w.write_event(Event::End(BytesEnd::new("gml:interior"))).map_err(wrap)?;
            }
            w.write_event(Event::End(BytesEnd::new("gml:Solid"))).map_err(wrap)?;
        }
        Geometry::ImplicitGeometry(g) => {
            let mut start = BytesStart::new("core:ImplicitGeometry");
            push_id(&mut start, &g.header.id);
            w.write_event(Event::Start(start)).map_err(wrap)?;
            let flat: Vec<String> = g
                .transformation
                .iter()
                .flat_map(|row| row.iter())
                .map(|v| v.to_string())
                .collect();
            write_text_elem(w, "core:transformationMatrix", &flat.join(" "))?;
            if let Some(rp) = &g.reference_point {
                w.write_event(Event::Start(BytesStart::new("core:referencePoint"))).map_err(wrap)?;
                w.write_event(Event::Start(BytesStart::new("gml:Point"))).map_err(wrap)?;
                write_text_elem(w, "gml:pos", &fmt_point(rp))?;
                w.write_event(Event::End(BytesEnd::new("gml:Point"))).map_err(wrap)?;
                w.write_event(Event::End(BytesEnd::new("core:referencePoint"))).map_err(wrap)?;
            }
            let mut href = BytesStart::new("core:relativeGMLGeometry");
            href.push_attribute(("xlink:href", format!("#{}", g.template_id).as_str()));
            w.write_event(Event::Empty(href)).map_err(wrap)?;
            w.write_event(Event::End(BytesEnd::new("core:ImplicitGeometry"))).map_err(wrap)?;
        }
        // Callers emit a self-closing `xlink:href` property instead of nesting a
        // geometry element for this variant; see `write_feature_node`.
        Geometry::Reference(_) => {}
    }
    Ok(())
}

fn push_id(start: &mut BytesStart, id: &Option<String>) {
    if let Some(id) = id {
        start.push_attribute(("gml:id", id.as_str()));
    }
}

fn write_pos_list<W: Write>(w: &mut QuickWriter<W>, points: &[[f64; 3]]) -> Result<()> {
    let flat: Vec<String> = points.iter().flat_map(|p| p.iter()).map(|v| v.to_string()).collect();
    let mut start = BytesStart::new("gml:posList");
    start.push_attribute(("srsDimension", "3"));
    w.write_event(Event::Start(start)).map_err(wrap)?;
    w.write_event(Event::Text(BytesText::new(&flat.join(" ")))).map_err(wrap)?;
    w.write_event(Event::End(BytesEnd::new("gml:posList"))).map_err(wrap)?;
    Ok(())
}

fn write_linear_ring<W: Write>(w: &mut QuickWriter<W>, ring: &LinearRingGeom) -> Result<()> {
    let mut start = BytesStart::new("gml:LinearRing");
    push_id(&mut start, &ring.header.id);
    w.write_event(Event::Start(start)).map_err(wrap)?;
    write_pos_list(w, &ring.points)?;
    w.write_event(Event::End(BytesEnd::new("gml:LinearRing"))).map_err(wrap)?;
    Ok(())
}

fn write_polygon<W: Write>(w: &mut QuickWriter<W>, poly: &PolygonGeom) -> Result<()> {
    let mut start = BytesStart::new("gml:Polygon");
    push_id(&mut start, &poly.header.id);
    w.write_event(Event::Start(start)).map_err(wrap)?;
    w.write_event(Event::Start(BytesStart::new("gml:exterior"))).map_err(wrap)?;
    write_linear_ring(w, &poly.exterior)?;
    w.write_event(Event::End(BytesEnd::new("gml:exterior"))).map_err(wrap)?;
    for interior in &poly.interiors {
        w.write_event(Event::Start(BytesStart::new("gml:interior"))).map_err(wrap)?;
        write_linear_ring(w, interior)?;
        w.write_event(Event::End(BytesEnd::new("gml:interior"))).map_err(wrap)?;
    }
    w.write_event(Event::End(BytesEnd::new("gml:Polygon"))).map_err(wrap)?;
    Ok(())
}

fn write_multi_surface<W: Write>(w: &mut QuickWriter<W>, ms: &MultiSurfaceGeom, tag: &str) -> Result<()> {
    let mut start = BytesStart::new(tag);
    push_id(&mut start, &ms.header.id);
    w.write_event(Event::Start(start)).map_err(wrap)?;
    for member in &ms.surface_members {
        w.write_event(Event::Start(BytesStart::new("gml:surfaceMember"))).map_err(wrap)?;
        write_polygon(w, member)?;
        w.write_event(Event::End(BytesEnd::new("gml:surfaceMember"))).map_err(wrap)?;
    }
    w.write_event(Event::End(BytesEnd::new(tag))).map_err(wrap)?;
    Ok(())
}

fn write_group_node<W: Write>(w: &mut QuickWriter<W>, group: &CityObjectGroup) -> Result<()> {
    let mut start = BytesStart::new("grp:CityObjectGroup");
    start.push_attribute(("gml:id", group.id.as_str()));
    w.write_event(Event::Start(start)).map_err(wrap)?;
    for member in &group.members {
        let mut m = BytesStart::new("grp:groupMember");
        m.push_attribute(("xlink:href", member.0.as_str()));
        w.write_event(Event::Empty(m)).map_err(wrap)?;
    }
    if let Some(parent) = &group.parent {
        let mut p = BytesStart::new("grp:parent");
        p.push_attribute(("xlink:href", parent.0.as_str()));
        w.write_event(Event::Empty(p)).map_err(wrap)?;
    }
    w.write_event(Event::End(BytesEnd::new("grp:CityObjectGroup"))).map_err(wrap)?;
    Ok(())
}

fn write_appearance_node<W: Write>(w: &mut QuickWriter<W>, appearance: &Appearance, _global: bool) -> Result<()> {
    let mut start = BytesStart::new("app:Appearance");
    start.push_attribute(("gml:id", appearance.id.as_str()));
    w.write_event(Event::Start(start)).map_err(wrap)?;
    write_text_elem(w, "app:theme", &appearance.theme)?;
    for sd in &appearance.surface_data {
        w.write_event(Event::Start(BytesStart::new("app:surfaceDataMember"))).map_err(wrap)?;
        write_surface_data_node(w, sd)?;
        w.write_event(Event::End(BytesEnd::new("app:surfaceDataMember"))).map_err(wrap)?;
    }
    w.write_event(Event::End(BytesEnd::new("app:Appearance"))).map_err(wrap)?;
    Ok(())
}

fn write_surface_data_node<W: Write>(w: &mut QuickWriter<W>, sd: &SurfaceData) -> Result<()> {
    match sd {
        SurfaceData::ParameterizedTexture(t) => {
            let mut start = BytesStart::new("app:ParameterizedTexture");
            start.push_attribute(("gml:id", t.id.as_str()));
            w.write_event(Event::Start(start)).map_err(wrap)?;
            write_text_elem(w, "app:imageURI", &t.image_uri)?;
            for (target, uv) in &t.targets {
                write_texture_target(w, target, uv)?;
            }
            w.write_event(Event::End(BytesEnd::new("app:ParameterizedTexture"))).map_err(wrap)?;
        }
        SurfaceData::GeoreferencedTexture(t) => {
            let mut start = BytesStart::new("app:GeoreferencedTexture");
            start.push_attribute(("gml:id", t.id.as_str()));
            w.write_event(Event::Start(start)).map_err(wrap)?;
            write_text_elem(w, "app:imageURI", &t.image_uri)?;
            for target in &t.targets {
                write_text_elem(w, "app:target", &target.0)?;
            }
            w.write_event(Event::End(BytesEnd::new("app:GeoreferencedTexture"))).map_err(wrap)?;
        }
        SurfaceData::X3DMaterial(m) => {
            let mut start = BytesStart::new("app:X3DMaterial");
            start.push_attribute(("gml:id", m.id.as_str()));
            w.write_event(Event::Start(start)).map_err(wrap)?;
            write_text_elem(
                w,
                "app:diffuseColor",
                &format!("{} {} {}", m.diffuse_color[0], m.diffuse_color[1], m.diffuse_color[2]),
            )?;
            for target in &m.targets {
                write_text_elem(w, "app:target", &target.0)?;
            }
            w.write_event(Event::End(BytesEnd::new("app:X3DMaterial"))).map_err(wrap)?;
        }
    }
    Ok(())
}

fn write_texture_target<W: Write>(w: &mut QuickWriter<W>, target: &Target, uv: &[(f64, f64)]) -> Result<()> {
    let mut start = BytesStart::new("app:target");
    start.push_attribute(("uri", target.0.as_str()));
    w.write_event(Event::Start(start)).map_err(wrap)?;
    w.write_event(Event::Start(BytesStart::new("app:TexCoordList"))).map_err(wrap)?;
    let flat: Vec<String> = uv.iter().flat_map(|(s, t)| [s.to_string(), t.to_string()]).collect();
    let mut tc = BytesStart::new("app:textureCoordinates");
    tc.push_attribute(("ring", target.0.as_str()));
    w.write_event(Event::Start(tc)).map_err(wrap)?;
    w.write_event(Event::Text(BytesText::new(&flat.join(" ")))).map_err(wrap)?;
    w.write_event(Event::End(BytesEnd::new("app:textureCoordinates"))).map_err(wrap)?;
    w.write_event(Event::End(BytesEnd::new("app:TexCoordList"))).map_err(wrap)?;
    w.write_event(Event::End(BytesEnd::new("app:target"))).map_err(wrap)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CityGmlVersion, Feature};

    #[test]
    fn writes_a_minimal_feature_and_closes() {
        let mut buf = Vec::new();
        let mut writer = Writer::new(&mut buf, CityGmlVersion::V2, false);
        let model = CityModel {
            version: CityGmlVersion::V2,
            ..Default::default()
        };
        writer.write_header(&model).unwrap();
        writer.write_feature(&Feature::new("b1", "Building")).unwrap();
        writer.close().unwrap();

        let xml = String::from_utf8(buf).unwrap();
        assert!(xml.contains("gml:id=\"b1\""));
        assert!(xml.contains("</core:CityModel>"));
    }
}
