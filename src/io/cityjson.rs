//! CityJSON 1.0/1.1/2.0 reading and writing, including JSON-Lines
//! ("CityJSONFeature") streaming.
//!
//! CityJSON encodes geometry as integer-indexed boundary arrays into a shared vertex
//! list rather than inline coordinates; this module is the only place that knows
//! about that encoding, translating to and from the same [`Feature`]/[`Geometry`]
//! model the CityGML reader/writer use so every other component (appearance engine,
//! LoD filter, reprojector, ...) is format-agnostic.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{CgtError, Result};
use crate::model::geometry::{GeometryHeader, LinearRingGeom, MultiSurfaceGeom, PolygonGeom, SolidGeom};
use crate::model::{Feature, Geometry, Point3};

/// Governs how CityGML's integer LoDs (0..4) map to CityJSON's `X.Y` LoDs.
#[derive(Debug, Clone)]
pub struct LodMappingPolicy {
    pub mode: LodSelectionMode,
    pub overrides: FxHashMap<u8, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodSelectionMode {
    /// Picks the finest (`.3`) sublevel CityJSON defines for each integer LoD.
    Maximum,
    /// Picks the coarsest (`.0`) sublevel.
    Minimum,
}

impl Default for LodMappingPolicy {
    fn default() -> Self {
        LodMappingPolicy {
            mode: LodSelectionMode::Maximum,
            overrides: FxHashMap::default(),
        }
    }
}

impl LodMappingPolicy {
    pub fn citygml_to_cityjson(&self, lod: u8) -> String {
        if let Some(over) = self.overrides.get(&lod) {
            return over.clone();
        }
        match self.mode {
            LodSelectionMode::Maximum => format!("{lod}.3"),
            LodSelectionMode::Minimum => format!("{lod}.0"),
        }
    }

    /// `X = L`: the integer CityGML LoD is always the leading component.
    pub fn cityjson_to_citygml(lod: &str) -> Option<u8> {
        lod.split('.').next()?.parse().ok()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CityJsonDoc {
    #[serde(rename = "type")]
    doc_type: String,
    version: String,
    #[serde(default)]
    transform: Option<CjTransform>,
    #[serde(rename = "CityObjects", default)]
    city_objects: BTreeMap<String, CjObject>,
    #[serde(default)]
    vertices: Vec<[f64; 3]>,
    #[serde(default, rename = "metadata")]
    metadata: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CjTransform {
    scale: [f64; 3],
    translate: [f64; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CjObject {
    #[serde(rename = "type")]
    obj_type: String,
    #[serde(default)]
    geometry: Vec<CjGeometry>,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    attributes: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CjGeometry {
    #[serde(rename = "type")]
    geom_type: String,
    lod: String,
    boundaries: Value,
}

/// One JSON-Lines ("CityJSONFeature") record: a self-contained feature plus a
/// vertex list local to that line, per CityJSON's streaming convention.
#[derive(Debug, Serialize, Deserialize)]
struct CityJsonFeatureLine {
    #[serde(rename = "type")]
    line_type: String,
    id: String,
    #[serde(rename = "CityObjects")]
    city_objects: BTreeMap<String, CjObject>,
    vertices: Vec<[f64; 3]>,
}

fn apply_transform(raw: [f64; 3], transform: Option<&CjTransform>) -> Point3 {
    match transform {
        Some(t) => [
            raw[0] * t.scale[0] + t.translate[0],
            raw[1] * t.scale[1] + t.translate[1],
            raw[2] * t.scale[2] + t.translate[2],
        ],
        None => raw,
    }
}

fn unapply_transform(p: Point3, transform: Option<&CjTransform>) -> [f64; 3] {
    match transform {
        Some(t) => [
            (p[0] - t.translate[0]) / t.scale[0],
            (p[1] - t.translate[1]) / t.scale[1],
            (p[2] - t.translate[2]) / t.scale[2],
        ],
        None => p,
    }
}

fn indices_to_ring(value: &Value, vertices: &[[f64; 3]], transform: Option<&CjTransform>) -> Result<LinearRingGeom> {
    let idxs = value
        .as_array()
        .ok_or_else(|| CgtError::malformed("".into(), "expected ring index array"))?;
    let mut points = Vec::with_capacity(idxs.len());
    for idx in idxs {
        let i = idx
            .as_u64()
            .ok_or_else(|| CgtError::malformed("".into(), "non-integer vertex index"))? as usize;
        let raw = *vertices
            .get(i)
            .ok_or_else(|| CgtError::malformed("".into(), format!("vertex index {i} out of range")))?;
        points.push(apply_transform(raw, transform));
    }
    Ok(LinearRingGeom {
        header: GeometryHeader::default(),
        points,
    })
}

fn indices_to_polygon(value: &Value, vertices: &[[f64; 3]], transform: Option<&CjTransform>) -> Result<PolygonGeom> {
    let rings = value
        .as_array()
        .ok_or_else(|| CgtError::malformed("".into(), "expected surface ring array"))?;
    let mut rings_iter = rings.iter();
    let exterior = rings_iter
        .next()
        .map(|r| indices_to_ring(r, vertices, transform))
        .transpose()?
        .ok_or_else(|| CgtError::malformed("".into(), "surface with no rings"))?;
    let interiors = rings_iter
        .map(|r| indices_to_ring(r, vertices, transform))
        .collect::<Result<Vec<_>>>()?;
    Ok(PolygonGeom {
        header: GeometryHeader::default(),
        exterior,
        interiors,
    })
}

fn indices_to_multisurface(value: &Value, vertices: &[[f64; 3]], transform: Option<&CjTransform>) -> Result<MultiSurfaceGeom> {
    let surfaces = value
        .as_array()
        .ok_or_else(|| CgtError::malformed("".into(), "expected MultiSurface boundary array"))?;
    let surface_members = surfaces
        .iter()
        .map(|s| indices_to_polygon(s, vertices, transform))
        .collect::<Result<Vec<_>>>()?;
    Ok(MultiSurfaceGeom {
        header: GeometryHeader::default(),
        surface_members,
    })
}

fn indices_to_solid(value: &Value, vertices: &[[f64; 3]], transform: Option<&CjTransform>) -> Result<SolidGeom> {
    let shells = value
        .as_array()
        .ok_or_else(|| CgtError::malformed("".into(), "expected Solid boundary array"))?;
    let mut shells_iter = shells.iter();
    let exterior = shells_iter
        .next()
        .map(|s| indices_to_multisurface(s, vertices, transform))
        .transpose()?
        .ok_or_else(|| CgtError::malformed("".into(), "solid with no shells"))?;
    let interiors = shells_iter
        .map(|s| indices_to_multisurface(s, vertices, transform))
        .collect::<Result<Vec<_>>>()?;
    Ok(SolidGeom {
        header: GeometryHeader::default(),
        exterior,
        interiors,
    })
}

fn cj_geometry_to_geometry(g: &CjGeometry, vertices: &[[f64; 3]], transform: Option<&CjTransform>) -> Result<Geometry> {
    match g.geom_type.as_str() {
        "MultiSurface" | "CompositeSurface" => {
            Ok(Geometry::MultiSurface(indices_to_multisurface(&g.boundaries, vertices, transform)?))
        }
        "Solid" => Ok(Geometry::Solid(indices_to_solid(&g.boundaries, vertices, transform)?)),
        other => Err(CgtError::malformed("".into(), format!("unsupported CityJSON geometry type {other}"))),
    }
}

fn cj_object_to_feature(
    id: &str,
    obj: &CjObject,
    all: &BTreeMap<String, CjObject>,
    vertices: &[[f64; 3]],
    transform: Option<&CjTransform>,
) -> Result<Feature> {
    let mut feature = Feature::new(id.to_string(), obj.obj_type.clone());
    for geom in &obj.geometry {
        let lod = LodMappingPolicy::cityjson_to_citygml(&geom.lod).unwrap_or(2);
        let property_name = format!("lod{lod}{}", geom.geom_type);
        feature
            .geometries
            .push((property_name, lod, cj_geometry_to_geometry(geom, vertices, transform)?));
    }
    for child_id in &obj.children {
        if let Some(child_obj) = all.get(child_id) {
            feature.children.push(cj_object_to_feature(child_id, child_obj, all, vertices, transform)?);
        }
    }
    Ok(feature)
}

/// Reads an entire (non-streaming) CityJSON document into top-level features. Only
/// objects with no `parents` are returned at the top level; their `children` are
/// nested recursively, mirroring the CityGML feature tree shape.
pub fn read_cityjson(reader: impl std::io::Read) -> Result<Vec<Feature>> {
    let doc: CityJsonDoc =
        serde_json::from_reader(reader).map_err(|e| CgtError::malformed("".into(), e.to_string()))?;
    let transform = doc.transform.as_ref();
    doc.city_objects
        .iter()
        .filter(|(_, obj)| obj.parents.is_empty())
        .map(|(id, obj)| cj_object_to_feature(id, obj, &doc.city_objects, &doc.vertices, transform))
        .collect()
}

/// Streams a CityJSON-Lines document: the first line is the header object (metadata
/// + transform, empty `CityObjects`), each subsequent line is a self-contained
/// `CityJSONFeature`.
pub struct CityJsonLinesReader<R> {
    lines: std::io::Lines<R>,
    transform: Option<CjTransform>,
}

impl<R: BufRead> CityJsonLinesReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut header_line = String::new();
        reader
            .read_line(&mut header_line)
            .map_err(|e| CgtError::io("", e))?;
        let header: CityJsonDoc =
            serde_json::from_str(&header_line).map_err(|e| CgtError::malformed("".into(), e.to_string()))?;
        Ok(CityJsonLinesReader {
            lines: reader.lines(),
            transform: header.transform,
        })
    }

    pub fn next(&mut self) -> Result<Option<Feature>> {
        let Some(line) = self.lines.next() else {
            return Ok(None);
        };
        let line = line.map_err(|e| CgtError::io("", e))?;
        if line.trim().is_empty() {
            return self.next();
        }
        let feature_line: CityJsonFeatureLine =
            serde_json::from_str(&line).map_err(|e| CgtError::malformed("".into(), e.to_string()))?;
        let root = feature_line
            .city_objects
            .get(&feature_line.id)
            .ok_or_else(|| CgtError::malformed("".into(), format!("feature line missing root object {}", feature_line.id)))?;
        let feature = cj_object_to_feature(
            &feature_line.id,
            root,
            &feature_line.city_objects,
            &feature_line.vertices,
            self.transform.as_ref(),
        )?;
        Ok(Some(feature))
    }
}

// --- writing ---------------------------------------------------------------

struct VertexPool {
    vertices: Vec<[f64; 3]>,
}

impl VertexPool {
    fn new() -> Self {
        VertexPool { vertices: Vec::new() }
    }

    /// No deduplication: every call appends a new vertex. CityJSON tooling commonly
    /// runs a dedup pass as a separate optimization step; this writer keeps one
    /// vertex per referenced point so it stays correct without one.
    fn push(&mut self, p: Point3, transform: Option<&CjTransform>) -> usize {
        let idx = self.vertices.len();
        self.vertices.push(unapply_transform(p, transform));
        idx
    }
}

fn ring_to_indices(ring: &LinearRingGeom, pool: &mut VertexPool, transform: Option<&CjTransform>) -> Value {
    json!(ring.points.iter().map(|p| pool.push(*p, transform)).collect::<Vec<_>>())
}

fn polygon_to_indices(poly: &PolygonGeom, pool: &mut VertexPool, transform: Option<&CjTransform>) -> Value {
    let mut rings = vec![ring_to_indices(&poly.exterior, pool, transform)];
    rings.extend(poly.interiors.iter().map(|r| ring_to_indices(r, pool, transform)));
    json!(rings)
}

fn multisurface_to_indices(ms: &MultiSurfaceGeom, pool: &mut VertexPool, transform: Option<&CjTransform>) -> Value {
    json!(ms
        .surface_members
        .iter()
        .map(|p| polygon_to_indices(p, pool, transform))
        .collect::<Vec<_>>())
}

fn solid_to_indices(solid: &SolidGeom, pool: &mut VertexPool, transform: Option<&CjTransform>) -> Value {
    let mut shells = vec![multisurface_to_indices(&solid.exterior, pool, transform)];
    shells.extend(solid.interiors.iter().map(|ms| multisurface_to_indices(ms, pool, transform)));
    json!(shells)
}

fn geometry_to_cj(geom: &Geometry, lod: u8, policy: &LodMappingPolicy, pool: &mut VertexPool, transform: Option<&CjTransform>) -> Option<CjGeometry> {
    let (geom_type, boundaries) = match geom {
        Geometry::MultiSurface(ms) => ("MultiSurface", multisurface_to_indices(ms, pool, transform)),
        Geometry::Solid(s) => ("Solid", solid_to_indices(s, pool, transform)),
        _ => return None,
    };
    Some(CjGeometry {
        geom_type: geom_type.to_string(),
        lod: policy.citygml_to_cityjson(lod),
        boundaries,
    })
}

fn feature_to_cj_object(feature: &Feature, policy: &LodMappingPolicy, pool: &mut VertexPool, transform: Option<&CjTransform>, out: &mut BTreeMap<String, CjObject>, parent_id: Option<&str>) {
    let geometry = feature
        .geometries
        .iter()
        .filter_map(|(_, lod, g)| geometry_to_cj(g, *lod, policy, pool, transform))
        .collect();
    let children: Vec<String> = feature.children.iter().map(|c| c.id.clone()).collect();
    out.insert(
        feature.id.clone(),
        CjObject {
            obj_type: feature.type_name.clone(),
            geometry,
            children: children.clone(),
            parents: parent_id.map(|p| vec![p.to_string()]).unwrap_or_default(),
            attributes: None,
        },
    );
    for child in &feature.children {
        feature_to_cj_object(child, policy, pool, transform, out, Some(&feature.id));
    }
}

/// Writes a whole (non-streaming) CityJSON document for the given top-level
/// features.
pub fn write_cityjson(mut writer: impl Write, features: &[Feature], policy: &LodMappingPolicy) -> Result<()> {
    let mut pool = VertexPool::new();
    let mut city_objects = BTreeMap::new();
    for f in features {
        feature_to_cj_object(f, policy, &mut pool, None, &mut city_objects, None);
    }
    let doc = CityJsonDoc {
        doc_type: "CityJSON".to_string(),
        version: "2.0".to_string(),
        transform: None,
        city_objects,
        vertices: pool.vertices,
        metadata: None,
    };
    serde_json::to_writer_pretty(&mut writer, &doc).map_err(|e| CgtError::malformed("".into(), e.to_string()))?;
    writeln!(writer).map_err(|e| CgtError::io("", e))?;
    Ok(())
}

/// Writes CityJSON-Lines: a header line followed by one self-contained
/// `CityJSONFeature` line per top-level feature.
pub fn write_cityjson_lines(mut writer: impl Write, features: &[Feature], policy: &LodMappingPolicy) -> Result<()> {
    let header = json!({
        "type": "CityJSON",
        "version": "2.0",
        "CityObjects": {},
        "vertices": [] as [(); 0],
    });
    serde_json::to_writer(&mut writer, &header).map_err(|e| CgtError::malformed("".into(), e.to_string()))?;
    writeln!(writer).map_err(|e| CgtError::io("", e))?;

    for f in features {
        let mut pool = VertexPool::new();
        let mut city_objects = BTreeMap::new();
        feature_to_cj_object(f, policy, &mut pool, None, &mut city_objects, None);
        let line = CityJsonFeatureLine {
            line_type: "CityJSONFeature".to_string(),
            id: f.id.clone(),
            city_objects,
            vertices: pool.vertices,
        };
        serde_json::to_writer(&mut writer, &line).map_err(|e| CgtError::malformed("".into(), e.to_string()))?;
        writeln!(writer).map_err(|e| CgtError::io("", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_mapping_maximum_default() {
        let policy = LodMappingPolicy::default();
        assert_eq!(policy.citygml_to_cityjson(2), "2.3");
        assert_eq!(LodMappingPolicy::cityjson_to_citygml("2.2"), Some(2));
    }

    #[test]
    fn round_trips_a_solid_through_cityjson() {
        let mut feature = Feature::new("b1", "Building");
        let poly = PolygonGeom {
            header: GeometryHeader::default(),
            exterior: LinearRingGeom {
                header: GeometryHeader::default(),
                points: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 0.0, 0.0]],
            },
            interiors: vec![],
        };
        let solid = SolidGeom {
            header: GeometryHeader::default(),
            exterior: MultiSurfaceGeom {
                header: GeometryHeader::default(),
                surface_members: vec![poly],
            },
            interiors: vec![],
        };
        feature.geometries.push(("lod1Solid".to_string(), 1, Geometry::Solid(solid)));

        let mut buf = Vec::new();
        write_cityjson(&mut buf, std::slice::from_ref(&feature), &LodMappingPolicy::default()).unwrap();

        let read_back = read_cityjson(buf.as_slice()).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].id, "b1");
        assert_eq!(read_back[0].geometries[0].1, 1);
    }
}
