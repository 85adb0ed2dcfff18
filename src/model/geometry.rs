use uuid::Uuid;

/// A single coordinate tuple. Always stored as 3 components; 2-D geometries carry
/// `z == 0.0` and are tagged by [`Geometry::dimension`] rather than by a shorter tuple,
/// so reprojection and bounding-box code never has to branch on arity.
pub type Point3 = [f64; 3];

/// The 4x4 row-major affine transform used by [`Geometry::ImplicitGeometry`].
pub type Matrix4 = [[f64; 4]; 4];

/// A discriminated union over the CityGML geometry primitives.
///
/// Modeled as a tagged-variant AST rather than a class hierarchy with visitor
/// dispatch: the variant set is small and fixed, so an exhaustive `match` at each
/// walker is cheaper to keep correct than a capability trait would be here.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(PointGeom),
    LineString(LineStringGeom),
    LinearRing(LinearRingGeom),
    Curve(CurveGeom),
    Polygon(PolygonGeom),
    MultiSurface(MultiSurfaceGeom),
    Solid(SolidGeom),
    ImplicitGeometry(ImplicitGeometryGeom),
    /// An xlink href standing in for a geometry that lives elsewhere — either another
    /// LoD of the same feature, or (by value) under a different top-level feature
    /// entirely. Introduced for the v2/1->v3 upgrader's cross-LoD and cross-top-level
    /// reference bookkeeping (see `crate::upgrade`); the streaming reader/writer
    /// round-trip it as a self-closing element carrying only `xlink:href`.
    Reference(GeometryRefGeom),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryHeader {
    pub id: Option<String>,
    /// `None` means "inherit from the nearest ancestor with a CRS set".
    pub srs_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointGeom {
    pub header: GeometryHeader,
    pub pos: Point3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineStringGeom {
    pub header: GeometryHeader,
    pub points: Vec<Point3>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearRingGeom {
    pub header: GeometryHeader,
    pub points: Vec<Point3>,
}

/// A segmented curve. CityGML allows several segment kinds; we keep only the two
/// that matter for LoD0 roof-edge promotion and reprojection: straight line segments
/// and arcs are both flattened to their control points, since neither this crate nor
/// its collaborators perform curve tessellation.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveGeom {
    pub header: GeometryHeader,
    pub segments: Vec<Vec<Point3>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolygonGeom {
    pub header: GeometryHeader,
    pub exterior: LinearRingGeom,
    pub interiors: Vec<LinearRingGeom>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiSurfaceGeom {
    pub header: GeometryHeader,
    pub surface_members: Vec<PolygonGeom>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolidGeom {
    pub header: GeometryHeader,
    pub exterior: MultiSurfaceGeom,
    pub interiors: Vec<MultiSurfaceGeom>,
}

/// A reference to an [`ImplicitTemplate`](crate::model::feature::ImplicitTemplate)
/// plus the affine placement of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitGeometryGeom {
    pub header: GeometryHeader,
    pub template_id: String,
    pub transformation: Matrix4,
    pub reference_point: Option<Point3>,
}

/// An xlink href to a geometry owned elsewhere. Carries no points of its own; the
/// pointed-to geometry's id is everything downstream components need (appearance
/// target resolution, reference rewriting, cross-LoD bookkeeping).
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRefGeom {
    pub header: GeometryHeader,
    /// `#<geometry-id>`, same-document only — this crate never models cross-file
    /// geometry sharing.
    pub href: String,
}

impl GeometryRefGeom {
    pub fn target_id(&self) -> &str {
        self.href.trim_start_matches('#')
    }
}

pub const IDENTITY_MATRIX: Matrix4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

impl Geometry {
    pub fn header(&self) -> &GeometryHeader {
        match self {
            Geometry::Point(g) => &g.header,
            Geometry::LineString(g) => &g.header,
            Geometry::LinearRing(g) => &g.header,
            Geometry::Curve(g) => &g.header,
            Geometry::Polygon(g) => &g.header,
            Geometry::MultiSurface(g) => &g.header,
            Geometry::Solid(g) => &g.header,
            Geometry::ImplicitGeometry(g) => &g.header,
            Geometry::Reference(g) => &g.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut GeometryHeader {
        match self {
            Geometry::Point(g) => &mut g.header,
            Geometry::LineString(g) => &mut g.header,
            Geometry::LinearRing(g) => &mut g.header,
            Geometry::Curve(g) => &mut g.header,
            Geometry::Polygon(g) => &mut g.header,
            Geometry::MultiSurface(g) => &mut g.header,
            Geometry::Solid(g) => &mut g.header,
            Geometry::ImplicitGeometry(g) => &mut g.header,
            Geometry::Reference(g) => &mut g.header,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.header().id.as_deref()
    }

    pub fn ensure_id(&mut self) -> &str {
        if self.header().id.is_none() {
            self.header_mut().id = Some(format!("GEOM_{}", Uuid::new_v4()));
        }
        self.header().id.as_deref().unwrap()
    }

    /// Invokes `f` on every point, in document order, including nested rings/segments.
    /// Used by the reprojector and by bounding-box recomputation.
    pub fn for_each_point_mut(&mut self, f: &mut impl FnMut(&mut Point3)) {
        match self {
            Geometry::Point(g) => f(&mut g.pos),
            Geometry::LineString(g) | Geometry::LinearRing(g) => {
                g.points.iter_mut().for_each(|p| f(p));
            }
            Geometry::Curve(g) => {
                for seg in &mut g.segments {
                    seg.iter_mut().for_each(|p| f(p));
                }
            }
            Geometry::Polygon(g) => {
                g.exterior.points.iter_mut().for_each(|p| f(p));
                for ring in &mut g.interiors {
                    ring.points.iter_mut().for_each(|p| f(p));
                }
            }
            Geometry::MultiSurface(g) => {
                for poly in &mut g.surface_members {
                    poly.exterior.points.iter_mut().for_each(|p| f(p));
                    for ring in &mut poly.interiors {
                        ring.points.iter_mut().for_each(|p| f(p));
                    }
                }
            }
            Geometry::Solid(g) => {
                for poly in &mut g.exterior.surface_members {
                    poly.exterior.points.iter_mut().for_each(|p| f(p));
                    for ring in &mut poly.interiors {
                        ring.points.iter_mut().for_each(|p| f(p));
                    }
                }
                for ms in &mut g.interiors {
                    for poly in &mut ms.surface_members {
                        poly.exterior.points.iter_mut().for_each(|p| f(p));
                        for ring in &mut poly.interiors {
                            ring.points.iter_mut().for_each(|p| f(p));
                        }
                    }
                }
            }
            // Templates live in a model-local frame; only the reference point moves.
            Geometry::ImplicitGeometry(_) => {}
            // No points of its own; the geometry it points at is walked where it's
            // owned by value.
            Geometry::Reference(_) => {}
        }
    }

    pub fn for_each_point(&self, f: &mut impl FnMut(&Point3)) {
        let mut clone = self.clone();
        // Read-only traversal reuses the mutable walker against a throwaway clone to
        // avoid keeping two hand-written traversals in sync; geometries are cheap
        // enough (bounded polygon counts per feature) that this is not on a hot path.
        clone.for_each_point_mut(&mut |p| f(p));
    }

    /// Bounding-box corners (min, max) over all points owned directly by this geometry
    /// (not recursing into referenced templates).
    pub fn bounds(&self) -> Option<(Point3, Point3)> {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        let mut any = false;
        self.for_each_point(&mut |p| {
            any = true;
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        });
        any.then_some((min, max))
    }

    /// All identifiers of this geometry and every nested surface/ring that itself
    /// carries an id — used by the appearance engine to derive candidate target URIs
    /// and by the reference rewriter.
    pub fn collect_ids(&self, out: &mut Vec<String>) {
        if let Some(id) = self.id() {
            out.push(id.to_string());
        }
        match self {
            Geometry::Polygon(g) => {
                if let Some(id) = &g.exterior.header.id {
                    out.push(id.clone());
                }
                for r in &g.interiors {
                    if let Some(id) = &r.header.id {
                        out.push(id.clone());
                    }
                }
            }
            Geometry::MultiSurface(g) => {
                for poly in &g.surface_members {
                    if let Some(id) = &poly.header.id {
                        out.push(id.clone());
                    }
                }
            }
            Geometry::Solid(g) => {
                for poly in &g.exterior.surface_members {
                    if let Some(id) = &poly.header.id {
                        out.push(id.clone());
                    }
                }
                for ms in &g.interiors {
                    for poly in &ms.surface_members {
                        if let Some(id) = &poly.header.id {
                            out.push(id.clone());
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poly(id: &str) -> PolygonGeom {
        PolygonGeom {
            header: GeometryHeader {
                id: Some(id.to_string()),
                srs_name: None,
            },
            exterior: LinearRingGeom {
                header: GeometryHeader::default(),
                points: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]],
            },
            interiors: vec![],
        }
    }

    #[test]
    fn bounds_cover_all_points() {
        let g = Geometry::MultiSurface(MultiSurfaceGeom {
            header: GeometryHeader::default(),
            surface_members: vec![poly("p1"), poly("p2")],
        });
        let (min, max) = g.bounds().unwrap();
        assert_eq!(min, [0.0, 0.0, 0.0]);
        assert_eq!(max, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn collect_ids_includes_nested_surfaces() {
        let g = Geometry::MultiSurface(MultiSurfaceGeom {
            header: GeometryHeader {
                id: Some("ms1".into()),
                srs_name: None,
            },
            surface_members: vec![poly("p1"), poly("p2")],
        });
        let mut ids = vec![];
        g.collect_ids(&mut ids);
        assert_eq!(ids, vec!["ms1", "p1", "p2"]);
    }

    #[test]
    fn implicit_geometry_points_not_walked() {
        let g = Geometry::ImplicitGeometry(ImplicitGeometryGeom {
            header: GeometryHeader::default(),
            template_id: "t1".into(),
            transformation: IDENTITY_MATRIX,
            reference_point: Some([1.0, 2.0, 3.0]),
        });
        let mut count = 0;
        g.for_each_point(&mut |_| count += 1);
        assert_eq!(count, 0);
    }
}
