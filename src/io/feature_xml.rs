//! Translates the generic [`XmlNode`] tree produced by [`super::xml_tree`] into the
//! typed model of [`crate::model`], and back. Covers exactly the vocabulary the
//! engine components need to operate on (geometries, appearances, groups, implicit
//! templates, and the feature tree that carries them) rather than the complete
//! CityGML schema.

use std::path::Path;

use crate::error::{CgtError, Result};
use crate::model::{
    appearance::{GeoreferencedTexture, ParameterizedTexture, SurfaceData, Target, Uv, X3DMaterial},
    feature::ImplicitTemplate,
    geometry::{
        CurveGeom, Geometry, GeometryHeader, ImplicitGeometryGeom, LineStringGeom, LinearRingGeom,
        MultiSurfaceGeom, PolygonGeom, SolidGeom,
    },
    group::{CityObjectGroup, GroupMember},
    Appearance, Feature, Matrix4, Point3,
};

use super::xml_tree::XmlNode;

/// Element local names that start a new top-level feature chunk.
/// Generic/unknown elements directly under the collection root are also treated as
/// chunk boundaries as long as they are not one of the global-object kinds below.
pub const GLOBAL_OBJECT_NAMES: [&str; 2] = ["CityObjectGroup", "Appearance"];

pub fn is_global_object(local_name: &str) -> bool {
    GLOBAL_OBJECT_NAMES.contains(&local_name)
}

pub fn parse_lod_tag(property_name: &str) -> Option<u8> {
    // lod0Solid, lod2MultiSurface, lod1Geometry, ...
    let rest = property_name.strip_prefix("lod")?;
    let digit = rest.chars().next()?;
    digit.to_digit(10).map(|d| d as u8)
}

/// Parses one top-level feature chunk (already isolated by the reader) into a
/// [`Feature`]. Nested thematic surfaces (walls, roofs, ...) become child features;
/// LoD-tagged geometry properties are collected onto [`Feature::geometries`].
pub fn node_to_feature(node: &XmlNode, path: &Path) -> Result<Feature> {
    let id = node
        .attr("id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("FEATURE_{}", uuid::Uuid::new_v4()));
    let mut feature = Feature::new(id, node.local_name().to_string());

    for child in &node.children {
        let local = child.local_name();
        if local == "boundedBy" && child.children.iter().any(|c| c.local_name() == "Envelope") {
            feature.bounded_by = child
                .child_named("Envelope")
                .map(parse_envelope)
                .transpose()?;
            continue;
        }
        if local.starts_with("bounded") || local.ends_with("Surface") || local.ends_with("Member") {
            // boundary-surface aggregation properties (e.g. bldg:boundedBy wrapping a
            // WallSurface/RoofSurface/GroundSurface), or generic thematic membership.
            if let Some(thematic) = child
                .children
                .iter()
                .find(|c| is_thematic_surface(c.local_name()))
            {
                feature.children.push(node_to_feature(thematic, path)?);
                continue;
            }
        }
        if let Some(lod) = parse_lod_tag(local) {
            if let Some(href) = child.attr("href") {
                // Cross-LoD or cross-top-level share: the property itself carries
                // the xlink:href instead of nesting a geometry element.
                feature.geometries.push((
                    local.to_string(),
                    lod,
                    Geometry::Reference(crate::model::geometry::GeometryRefGeom {
                        header: GeometryHeader::default(),
                        href: href.to_string(),
                    }),
                ));
            } else if let Some(geom_node) = child.children.first() {
                let geom = node_to_geometry(geom_node, path)?;
                feature.geometries.push((local.to_string(), lod, geom));
            }
            continue;
        }
        if local == "CityObjectRelation" {
            if let Some(related) = child
                .child_named("relatedTo")
                .and_then(|r| r.attr("href"))
            {
                feature.object_relations.push(crate::model::ObjectRelation {
                    related_id: related.to_string(),
                    relation_type: child
                        .child_named("relationType")
                        .map(|n| n.text.trim().to_string()),
                });
            }
            continue;
        }
        if local == "name" || local == "description" {
            feature
                .attributes
                .insert(local.to_string(), child.text.trim().to_string());
        }
    }

    Ok(feature)
}

fn is_thematic_surface(local_name: &str) -> bool {
    matches!(
        local_name,
        "WallSurface"
            | "RoofSurface"
            | "GroundSurface"
            | "ClosureSurface"
            | "OuterCeilingSurface"
            | "OuterFloorSurface"
            | "GenericThematicSurface"
    )
}

fn parse_envelope(node: &XmlNode) -> Result<crate::model::Envelope> {
    let lower = node
        .child_named("lowerCorner")
        .map(|c| parse_pos_text(&c.text))
        .transpose()?
        .unwrap_or([0.0; 3]);
    let upper = node
        .child_named("upperCorner")
        .map(|c| parse_pos_text(&c.text))
        .transpose()?
        .unwrap_or([0.0; 3]);
    let srs_name = node.attr("srsName").map(str::to_string);
    Ok(crate::model::Envelope {
        min: lower,
        max: upper,
        srs_name,
    })
}

fn parse_pos_text(text: &str) -> Result<Point3> {
    let vals: Vec<f64> = text
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| CgtError::malformed(Path::new(""), format!("invalid coordinate list: {text}")))?;
    Ok(match vals.as_slice() {
        [x, y] => [*x, *y, 0.0],
        [x, y, z] => [*x, *y, *z],
        _ => {
            return Err(CgtError::malformed(
                Path::new(""),
                format!("expected 2 or 3 coordinate components, got {}", vals.len()),
            ))
        }
    })
}

fn parse_pos_list(text: &str, srs_dimension: usize) -> Result<Vec<Point3>> {
    let vals: Vec<f64> = text
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| CgtError::malformed(Path::new(""), format!("invalid posList: {text}")))?;
    if srs_dimension == 0 || vals.len() % srs_dimension != 0 {
        return Err(CgtError::malformed(
            Path::new(""),
            format!("posList length {} not divisible by srsDimension {srs_dimension}", vals.len()),
        ));
    }
    Ok(vals
        .chunks(srs_dimension)
        .map(|c| match c {
            [x, y] => [*x, *y, 0.0],
            [x, y, z] => [*x, *y, *z],
            _ => [0.0, 0.0, 0.0],
        })
        .collect())
}

fn header_of(node: &XmlNode) -> GeometryHeader {
    GeometryHeader {
        id: node.attr("id").map(str::to_string),
        srs_name: node.attr("srsName").map(str::to_string),
    }
}

fn srs_dimension_of(node: &XmlNode) -> usize {
    node.attr("srsDimension")
        .and_then(|s| s.parse().ok())
        .unwrap_or(3)
}

fn ring_points(node: &XmlNode) -> Result<Vec<Point3>> {
    if let Some(pos_list) = node.child_named("posList") {
        return parse_pos_list(&pos_list.text, srs_dimension_of(node).max(srs_dimension_of(pos_list)));
    }
    let mut points = Vec::new();
    for pos in node.children_named("pos") {
        points.push(parse_pos_text(&pos.text)?);
    }
    Ok(points)
}

fn node_to_linear_ring(node: &XmlNode) -> Result<LinearRingGeom> {
    Ok(LinearRingGeom {
        header: header_of(node),
        points: ring_points(node)?,
    })
}

fn node_to_polygon(node: &XmlNode) -> Result<PolygonGeom> {
    let exterior_wrap = node
        .child_named("exterior")
        .and_then(|e| e.child_named("LinearRing"))
        .ok_or_else(|| CgtError::malformed(Path::new(""), "Polygon missing exterior ring"))?;
    let exterior = node_to_linear_ring(exterior_wrap)?;
    let mut interiors = Vec::new();
    for interior_wrap in node.children_named("interior") {
        if let Some(ring) = interior_wrap.child_named("LinearRing") {
            interiors.push(node_to_linear_ring(ring)?);
        }
    }
    Ok(PolygonGeom {
        header: header_of(node),
        exterior,
        interiors,
    })
}

fn node_to_multi_surface(node: &XmlNode) -> Result<MultiSurfaceGeom> {
    let mut surface_members = Vec::new();
    for member in node.children_named("surfaceMember") {
        if let Some(poly) = member.child_named("Polygon") {
            surface_members.push(node_to_polygon(poly)?);
        }
    }
    // CompositeSurface is also common as the direct payload of a surfaceMember.
    for member in node.children_named("surfaceMember") {
        if let Some(composite) = member.child_named("CompositeSurface") {
            for sub in composite.children_named("surfaceMember") {
                if let Some(poly) = sub.child_named("Polygon") {
                    surface_members.push(node_to_polygon(poly)?);
                }
            }
        }
    }
    Ok(MultiSurfaceGeom {
        header: header_of(node),
        surface_members,
    })
}

fn node_to_solid(node: &XmlNode) -> Result<SolidGeom> {
    let exterior_wrap = node
        .child_named("exterior")
        .ok_or_else(|| CgtError::malformed(Path::new(""), "Solid missing exterior"))?;
    let exterior = if let Some(ms) = exterior_wrap.child_named("CompositeSurface") {
        node_to_multi_surface(ms)?
    } else {
        MultiSurfaceGeom {
            header: GeometryHeader::default(),
            surface_members: Vec::new(),
        }
    };
    let mut interiors = Vec::new();
    for interior_wrap in node.children_named("interior") {
        if let Some(ms) = interior_wrap.child_named("CompositeSurface") {
            interiors.push(node_to_multi_surface(ms)?);
        }
    }
    Ok(SolidGeom {
        header: header_of(node),
        exterior,
        interiors,
    })
}

fn node_to_curve(node: &XmlNode) -> Result<CurveGeom> {
    let mut segments = Vec::new();
    if let Some(segs) = node.child_named("segments") {
        for seg in &segs.children {
            segments.push(ring_points(seg)?);
        }
    }
    Ok(CurveGeom {
        header: header_of(node),
        segments,
    })
}

fn node_to_implicit_geometry(node: &XmlNode) -> Result<ImplicitGeometryGeom> {
    let template_id = node
        .child_named("relativeGMLGeometry")
        .and_then(|n| n.attr("href"))
        .map(|s| s.trim_start_matches('#').to_string())
        .ok_or_else(|| CgtError::malformed(Path::new(""), "ImplicitGeometry missing template reference"))?;
    let transformation = node
        .child_named("transformationMatrix")
        .map(|n| parse_matrix(&n.text))
        .transpose()?
        .unwrap_or(crate::model::geometry::IDENTITY_MATRIX);
    let reference_point = node
        .child_named("referencePoint")
        .and_then(|n| n.child_named("Point"))
        .and_then(|p| p.child_named("pos"))
        .map(|p| parse_pos_text(&p.text))
        .transpose()?;
    Ok(ImplicitGeometryGeom {
        header: header_of(node),
        template_id,
        transformation,
        reference_point,
    })
}

fn parse_matrix(text: &str) -> Result<Matrix4> {
    let vals: Vec<f64> = text
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| CgtError::malformed(Path::new(""), "invalid transformationMatrix"))?;
    if vals.len() != 16 {
        return Err(CgtError::malformed(
            Path::new(""),
            format!("transformationMatrix expected 16 values, got {}", vals.len()),
        ));
    }
    let mut m = [[0.0; 4]; 4];
    for r in 0..4 {
        for c in 0..4 {
            m[r][c] = vals[r * 4 + c];
        }
    }
    Ok(m)
}

pub fn node_to_geometry(node: &XmlNode, _path: &Path) -> Result<Geometry> {
    match node.local_name() {
        "Point" => Ok(Geometry::Point(crate::model::geometry::PointGeom {
            header: header_of(node),
            pos: node
                .child_named("pos")
                .map(|p| parse_pos_text(&p.text))
                .transpose()?
                .unwrap_or([0.0, 0.0, 0.0]),
        })),
        "LineString" => Ok(Geometry::LineString(LineStringGeom {
            header: header_of(node),
            points: ring_points(node)?,
        })),
        "LinearRing" => Ok(Geometry::LinearRing(node_to_linear_ring(node)?)),
        "Curve" => Ok(Geometry::Curve(node_to_curve(node)?)),
        "Polygon" => Ok(Geometry::Polygon(node_to_polygon(node)?)),
        "MultiSurface" | "CompositeSurface" => Ok(Geometry::MultiSurface(node_to_multi_surface(node)?)),
        "Solid" | "CompositeSolid" => Ok(Geometry::Solid(node_to_solid(node)?)),
        "ImplicitGeometry" => Ok(Geometry::ImplicitGeometry(node_to_implicit_geometry(node)?)),
        other => Err(CgtError::malformed(
            Path::new(""),
            format!("unsupported geometry element <{other}>"),
        )),
    }
}

pub fn node_to_template(node: &XmlNode, path: &Path) -> Result<ImplicitTemplate> {
    let id = node
        .attr("id")
        .map(str::to_string)
        .ok_or_else(|| CgtError::malformed(path, "implicit-geometry template missing gml:id"))?;
    let geometry = node_to_geometry(
        node.children
            .first()
            .ok_or_else(|| CgtError::malformed(path, "empty template"))?,
        path,
    )?;
    Ok(ImplicitTemplate {
        id,
        geometry,
        library_object: None,
    })
}

pub fn node_to_group(node: &XmlNode) -> Result<CityObjectGroup> {
    let id = node
        .attr("id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("GROUP_{}", uuid::Uuid::new_v4()));
    let members = node
        .children_named("groupMember")
        .filter_map(|m| m.attr("href").map(|h| GroupMember(h.to_string())))
        .collect();
    let parent = node
        .child_named("parent")
        .and_then(|p| p.attr("href"))
        .map(|h| GroupMember(h.to_string()));
    Ok(CityObjectGroup { id, members, parent })
}

pub fn node_to_appearance(node: &XmlNode) -> Result<Appearance> {
    let id = node
        .attr("id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("APP_{}", uuid::Uuid::new_v4()));
    let theme = node
        .child_named("theme")
        .map(|n| n.text.trim().to_string())
        .unwrap_or_default();
    let mut surface_data = Vec::new();
    for sd_wrap in node.children_named("surfaceDataMember") {
        for sd_node in &sd_wrap.children {
            if let Some(sd) = node_to_surface_data(sd_node)? {
                surface_data.push(sd);
            }
        }
    }
    Ok(Appearance {
        id,
        theme,
        surface_data,
    })
}

fn node_to_surface_data(node: &XmlNode) -> Result<Option<SurfaceData>> {
    match node.local_name() {
        "ParameterizedTexture" => {
            let id = node
                .attr("id")
                .map(str::to_string)
                .unwrap_or_else(|| format!("TEX_{}", uuid::Uuid::new_v4()));
            let image_uri = node
                .child_named("imageURI")
                .map(|n| n.text.trim().to_string())
                .unwrap_or_default();
            let mut targets = Vec::new();
            for tc in node.children_named("target") {
                let target = tc
                    .attr("uri")
                    .map(Target::new)
                    .ok_or_else(|| CgtError::malformed(Path::new(""), "texture target missing uri"))?;
                let uv = parse_tex_coord_list(tc)?;
                targets.push((target, uv));
            }
            Ok(Some(SurfaceData::ParameterizedTexture(ParameterizedTexture {
                id,
                image_uri,
                targets,
            })))
        }
        "GeoreferencedTexture" => {
            let id = node
                .attr("id")
                .map(str::to_string)
                .unwrap_or_else(|| format!("GTEX_{}", uuid::Uuid::new_v4()));
            let image_uri = node
                .child_named("imageURI")
                .map(|n| n.text.trim().to_string())
                .unwrap_or_default();
            let targets = node
                .children_named("target")
                .filter(|t| !t.text.trim().is_empty())
                .map(|t| Target::new(t.text.trim()))
                .collect();
            Ok(Some(SurfaceData::GeoreferencedTexture(GeoreferencedTexture {
                id,
                image_uri,
                world_file: None,
                reference_point: None,
                targets,
            })))
        }
        "X3DMaterial" => {
            let id = node
                .attr("id")
                .map(str::to_string)
                .unwrap_or_else(|| format!("MAT_{}", uuid::Uuid::new_v4()));
            let diffuse_color = node
                .child_named("diffuseColor")
                .map(|n| parse_rgb(&n.text))
                .unwrap_or([0.8, 0.8, 0.8]);
            let targets = node
                .children_named("target")
                .map(|t| Target::new(t.text.trim()))
                .collect();
            Ok(Some(SurfaceData::X3DMaterial(X3DMaterial {
                id,
                diffuse_color,
                targets,
            })))
        }
        _ => Ok(None),
    }
}

fn parse_rgb(text: &str) -> [f32; 3] {
    let vals: Vec<f32> = text.split_whitespace().filter_map(|s| s.parse().ok()).collect();
    match vals.as_slice() {
        [r, g, b] => [*r, *g, *b],
        _ => [0.8, 0.8, 0.8],
    }
}

fn parse_tex_coord_list(target_node: &XmlNode) -> Result<Vec<Uv>> {
    let Some(coords_node) = target_node.child_named("TexCoordList") else {
        return Ok(Vec::new());
    };
    let mut uv = Vec::new();
    for tc in coords_node.children_named("textureCoordinates") {
        let vals: Vec<f64> = tc
            .text
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| CgtError::malformed(Path::new(""), "invalid textureCoordinates"))?;
        if vals.len() % 2 != 0 {
            return Err(CgtError::malformed(
                Path::new(""),
                "odd number of texture coordinate components: UV pairs must be complete",
            ));
        }
        for pair in vals.chunks(2) {
            uv.push((pair[0], pair[1]));
        }
    }
    Ok(uv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::xml_tree::parse_element;
    use quick_xml::events::Event;
    use quick_xml::Reader;
    use std::io::Cursor;

    fn parse(xml: &str) -> XmlNode {
        let mut reader = Reader::from_reader(Cursor::new(xml.as_bytes()));
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let start = match reader.read_event_into(&mut buf).unwrap() {
            Event::Start(s) => s.into_owned(),
            other => panic!("expected start event, got {other:?}"),
        };
        parse_element(&mut reader, &start, Path::new("t.gml")).unwrap()
    }

    #[test]
    fn parses_building_with_two_lods() {
        let xml = r#"<bldg:Building gml:id="b1">
            <bldg:lod1Solid><gml:Solid><gml:exterior><gml:CompositeSurface>
                <gml:surfaceMember><gml:Polygon><gml:exterior><gml:LinearRing>
                    <gml:posList srsDimension="3">0 0 0 1 0 0 1 1 0 0 0 0</gml:posList>
                </gml:LinearRing></gml:exterior></gml:Polygon></gml:surfaceMember>
            </gml:CompositeSurface></gml:exterior></gml:Solid></bldg:lod1Solid>
            <bldg:lod2Solid><gml:Solid><gml:exterior><gml:CompositeSurface>
            </gml:CompositeSurface></gml:exterior></gml:Solid></bldg:lod2Solid>
        </bldg:Building>"#;
        let node = parse(xml);
        let feature = node_to_feature(&node, Path::new("t.gml")).unwrap();
        assert_eq!(feature.id, "b1");
        let mut lods = feature.lods_present();
        lods.sort();
        assert_eq!(lods, vec![1, 2]);
    }

    #[test]
    fn odd_texture_coordinates_is_an_error() {
        let xml = r#"<app:ParameterizedTexture gml:id="t1">
            <app:imageURI>tex.jpg</app:imageURI>
            <app:target uri="#poly1">
                <app:TexCoordList>
                    <app:textureCoordinates ring="#poly1">0.0 0.0 1.0</app:textureCoordinates>
                </app:TexCoordList>
            </app:target>
        </app:ParameterizedTexture>"#;
        let node = parse(xml);
        let result = node_to_surface_data(&node);
        assert!(result.is_err());
    }
}
