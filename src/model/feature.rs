use rustc_hash::FxHashMap;

use super::appearance::Appearance;
use super::geometry::{Geometry, Matrix4, Point3};
use super::group::CityObjectGroup;

/// The enclosing collection envelope.
///
/// Constructed by the reader on the first element, mutated by the driver
/// only to attach a computed extent on merge, and written once at document start by
/// the writer.
#[derive(Debug, Clone, Default)]
pub struct CityModel {
    pub version: CityGmlVersion,
    pub namespaces: Vec<(String, String)>,
    pub bounded_by: Option<Envelope>,
    /// Present only until the global-object registry / appearance engine have run;
    /// local appearances live on their owning [`Feature`].
    pub global_appearances: Vec<Appearance>,
    pub groups: Vec<CityObjectGroup>,
    pub templates: Vec<ImplicitTemplate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CityGmlVersion {
    V1,
    V2,
    #[default]
    V3,
}

impl CityGmlVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            CityGmlVersion::V1 => "1.0",
            CityGmlVersion::V2 => "2.0",
            CityGmlVersion::V3 => "3.0",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1.0" => Some(CityGmlVersion::V1),
            "2.0" => Some(CityGmlVersion::V2),
            "3.0" => Some(CityGmlVersion::V3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub min: Point3,
    pub max: Point3,
    pub srs_name: Option<String>,
}

/// A geometry template shared by multiple [`Geometry::ImplicitGeometry`] instances.
#[derive(Debug, Clone)]
pub struct ImplicitTemplate {
    pub id: String,
    pub geometry: Geometry,
    pub library_object: Option<String>,
}

/// A top-level city object. Owns a subtree of nested features and
/// geometries; nested features are kept as an explicit tree here rather than linked
/// through parent back-pointers: callers that
/// need "find enclosing top-level object" walk down from the [`Feature`] they already
/// hold, or build a geometry-id → owner index over the batch they're working with
/// (see `appearance_engine`'s `OwnerIndex`).
#[derive(Debug, Clone)]
pub struct Feature {
    pub id: String,
    pub type_name: String,
    pub bounded_by: Option<Envelope>,
    /// LoD-tagged geometry properties, e.g. `("lod2Solid", Solid(..))`.
    pub geometries: Vec<(String, u8, Geometry)>,
    pub local_appearances: Vec<Appearance>,
    pub children: Vec<Feature>,
    pub attributes: FxHashMap<String, String>,
    /// v3 `core:relatedTo` links, inserted by the upgrader (`-a`/`--add-object-relations`)
    /// when a geometry shared between two top-level objects gets an owner assigned.
    pub object_relations: Vec<ObjectRelation>,
}

impl Feature {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Feature {
            id: id.into(),
            type_name: type_name.into(),
            bounded_by: None,
            geometries: Vec::new(),
            local_appearances: Vec::new(),
            children: Vec::new(),
            attributes: FxHashMap::default(),
            object_relations: Vec::new(),
        }
    }

    /// LoDs that currently carry a geometry-bearing property directly on this object.
    /// Does not recurse into `children`.
    pub fn lods_present(&self) -> Vec<u8> {
        let mut lods: Vec<u8> = self.geometries.iter().map(|(_, lod, _)| *lod).collect();
        lods.sort_unstable();
        lods.dedup();
        lods
    }

    /// Like [`Feature::lods_present`] but also includes LoDs carried by boundary
    /// surfaces and other nested features: a top-level object's LoD set includes the
    /// LoD of every geometry-bearing property reachable under it, not only those
    /// attached directly.
    pub fn lods_present_recursive(&self) -> Vec<u8> {
        let mut lods = Vec::new();
        self.walk_features(&mut |f| lods.extend(f.geometries.iter().map(|(_, lod, _)| *lod)));
        lods.sort_unstable();
        lods.dedup();
        lods
    }

    pub fn walk_geometries_mut(&mut self, f: &mut impl FnMut(&mut Geometry)) {
        for (_, _, g) in &mut self.geometries {
            f(g);
        }
        for child in &mut self.children {
            child.walk_geometries_mut(f);
        }
    }

    pub fn walk_geometries(&self, f: &mut impl FnMut(&Geometry)) {
        for (_, _, g) in &self.geometries {
            f(g);
        }
        for child in &self.children {
            child.walk_geometries(f);
        }
    }

    pub fn walk_features(&self, f: &mut impl FnMut(&Feature)) {
        f(self);
        for child in &self.children {
            child.walk_features(f);
        }
    }

    pub fn walk_features_mut(&mut self, f: &mut impl FnMut(&mut Feature)) {
        f(self);
        for child in &mut self.children {
            child.walk_features_mut(f);
        }
    }

    /// Every geometry id owned anywhere in this subtree, used to derive candidate
    /// target URIs for the appearance engine.
    pub fn candidate_geometry_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.walk_geometries(&mut |g| g.collect_ids(&mut ids));
        ids
    }

    pub fn recompute_bounds(&mut self, srs_name: Option<String>) {
        self.bounded_by = union_bounds(std::slice::from_ref(self)).map(|(min, max)| Envelope { min, max, srs_name });
    }

    pub fn is_empty_of_geometry(&self) -> bool {
        let mut any = false;
        self.walk_geometries(&mut |_| any = true);
        !any
    }
}

/// Axis-aligned union of every geometry's bounds across `features`, used to derive a
/// collection-level envelope for an output that spans more than one source feature
/// tree (a merge, a reprojected batch, a format conversion with no inbound envelope).
pub fn union_bounds(features: &[Feature]) -> Option<(Point3, Point3)> {
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    let mut any = false;
    for feature in features {
        feature.walk_geometries(&mut |g| {
            if let Some((gmin, gmax)) = g.bounds() {
                any = true;
                for i in 0..3 {
                    min[i] = min[i].min(gmin[i]);
                    max[i] = max[i].max(gmax[i]);
                }
            }
        });
    }
    any.then_some((min, max))
}

pub fn identity_matrix() -> Matrix4 {
    super::geometry::IDENTITY_MATRIX
}

/// A `core:CityObjectRelation`: a typed link from one top-level feature to another,
/// inserted by the upgrader when a geometry is shared by value/href across objects.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRelation {
    /// `#<feature-id>` of the related object.
    pub related_id: String,
    pub relation_type: Option<String>,
}
