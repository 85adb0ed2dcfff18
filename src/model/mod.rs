//! The in-memory object model shared by every pipeline component.
//!
//! The chunked streaming pass that decides *where* one top-level feature ends and the
//! next begins lives in [`crate::io`]. This module only defines the shapes every
//! component downstream of the reader agrees on.

pub mod appearance;
pub mod crs;
pub mod feature;
pub mod geometry;
pub mod group;

pub use appearance::{Appearance, GeoreferencedTexture, ParameterizedTexture, SurfaceData, Target, X3DMaterial};
pub use crs::CrsName;
pub use feature::{union_bounds, CityGmlVersion, CityModel, Envelope, Feature, ImplicitTemplate, ObjectRelation};
pub use geometry::{
    CurveGeom, Geometry, GeometryHeader, GeometryRefGeom, ImplicitGeometryGeom, LineStringGeom,
    LinearRingGeom, Matrix4, MultiSurfaceGeom, Point3, PolygonGeom, SolidGeom,
};
pub use group::{CityObjectGroup, GroupMember};
