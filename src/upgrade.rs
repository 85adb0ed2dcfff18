//! Upgrades a CityGML 1.0/2.0 document to the 3.0 data model: promotes bare
//! multi-surface representations into thematic boundary surfaces, relabels LoD4 as
//! LoD3, and resolves the geometry-sharing-by-href patterns 2.0 permitted but 3.0
//! discourages (see `DESIGN.md` for how the open questions around this were decided).

use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use crate::error::{CgtError, Result};
use crate::model::{Feature, Geometry, ObjectRelation};

#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    pub map_lod1_multi_surfaces: bool,
    pub map_lod0_roof_edge: bool,
    pub use_lod4_as_lod3: bool,
    /// When a cross-LoD or cross-top-level href can't be resolved, drop it instead
    /// of failing the file.
    pub resolve_geometry_references: bool,
    pub create_city_object_relations: bool,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        UpgradeOptions {
            map_lod1_multi_surfaces: true,
            map_lod0_roof_edge: true,
            use_lod4_as_lod3: true,
            resolve_geometry_references: true,
            create_city_object_relations: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeStats {
    pub resolved_cross_lod: u64,
    pub resolved_cross_top_level: u64,
    pub created_object_relations: u64,
    pub removed_cross_lod: u64,
}

/// Runs the full upgrade pipeline over one file's worth of top-level objects,
/// mutating them in place.
pub fn apply(top_level: &mut Vec<Feature>, opts: &UpgradeOptions) -> Result<UpgradeStats> {
    let mut stats = UpgradeStats::default();

    for feature in top_level.iter_mut() {
        if opts.map_lod1_multi_surfaces {
            promote_multi_surfaces(feature, 1, "WallSurface");
        }
        if opts.map_lod0_roof_edge {
            promote_multi_surfaces(feature, 0, "RoofSurface");
        }
        if opts.use_lod4_as_lod3 {
            relabel_lod4_as_lod3(feature);
        }
    }

    let value_owner = build_value_owner_index(top_level);
    let mut cross_pairs: FxHashSet<(usize, usize)> = FxHashSet::default();

    for i in 0..top_level.len() {
        let local_ids: FxHashSet<String> = top_level[i].candidate_geometry_ids().into_iter().collect();
        let mut to_remove: FxHashSet<String> = FxHashSet::default();
        let mut unresolved: Option<String> = None;

        top_level[i].walk_features(&mut |f| {
            for (_, _, g) in &f.geometries {
                let Geometry::Reference(r) = g else { continue };
                if unresolved.is_some() {
                    continue;
                }
                let target = r.target_id().to_string();
                if local_ids.contains(&target) {
                    stats.resolved_cross_lod += 1;
                } else if let Some(&owner_idx) = value_owner.get(&target) {
                    stats.resolved_cross_top_level += 1;
                    if owner_idx != i {
                        cross_pairs.insert((i.min(owner_idx), i.max(owner_idx)));
                    }
                } else if opts.resolve_geometry_references {
                    to_remove.insert(target);
                } else {
                    unresolved = Some(target);
                }
            }
        });

        if let Some(target) = unresolved {
            return Err(CgtError::UpgradeFailed {
                feature_id: top_level[i].id.clone(),
                message: format!("unresolvable geometry reference to '{target}'"),
            });
        }

        if !to_remove.is_empty() {
            stats.removed_cross_lod += to_remove.len() as u64;
            remove_dangling_references(&mut top_level[i], &to_remove);
        }
    }

    if opts.create_city_object_relations {
        for (a, b) in cross_pairs {
            let id_a = top_level[a].id.clone();
            let id_b = top_level[b].id.clone();
            top_level[a].object_relations.push(ObjectRelation {
                related_id: format!("#{id_b}"),
                relation_type: None,
            });
            top_level[b].object_relations.push(ObjectRelation {
                related_id: format!("#{id_a}"),
                relation_type: None,
            });
            stats.created_object_relations += 2;
        }
    }

    for feature in top_level.iter_mut() {
        assign_missing_ids(feature);
    }

    Ok(stats)
}

/// Wraps every value-held `MultiSurface` tagged at `lod` into a fresh thematic-surface
/// child feature of type `surface_type`, matching what 3.0 expects for a boundary
/// surface representation instead of a bare multi-surface property on the object
/// itself.
fn promote_multi_surfaces(feature: &mut Feature, lod: u8, surface_type: &str) {
    let mut promoted = Vec::new();
    feature.geometries.retain(|(prop, l, geom)| {
        if *l == lod && matches!(geom, Geometry::MultiSurface(_)) {
            promoted.push((prop.clone(), geom.clone()));
            false
        } else {
            true
        }
    });
    for (prop, geom) in promoted {
        let mut surface = Feature::new(format!("ID_{}", Uuid::new_v4()), surface_type);
        surface.geometries.push((prop, lod, geom));
        feature.children.push(surface);
    }
}

/// Drops any geometry property already tagged LoD3, then relabels every LoD4
/// property (and its `lodN...` property name) down to LoD3. Recurses into child
/// features, since thematic surfaces carry their own lod-tagged properties too.
fn relabel_lod4_as_lod3(feature: &mut Feature) {
    feature.geometries.retain(|(_, lod, _)| *lod != 3);
    for (prop, lod, _) in feature.geometries.iter_mut() {
        if *lod == 4 {
            *lod = 3;
            *prop = prop.replacen("lod4", "lod3", 1);
        }
    }
    for child in &mut feature.children {
        relabel_lod4_as_lod3(child);
    }
}

/// geometry-id -> index of the top-level object that holds it by value, built after
/// surface promotion has run (promotion can move an id between property and child
/// feature, but never between top-level objects).
fn build_value_owner_index(top_level: &[Feature]) -> FxHashMap<String, usize> {
    let mut value_owner = FxHashMap::default();
    for (i, feature) in top_level.iter().enumerate() {
        for id in feature.candidate_geometry_ids() {
            value_owner.entry(id).or_insert(i);
        }
    }
    value_owner
}

/// Removes every `Geometry::Reference` property whose target id is in
/// `remove_ids`, recursively.
fn remove_dangling_references(feature: &mut Feature, remove_ids: &FxHashSet<String>) {
    feature.geometries.retain(|(_, _, g)| match g {
        Geometry::Reference(r) => !remove_ids.contains(r.target_id()),
        _ => true,
    });
    for child in &mut feature.children {
        remove_dangling_references(child, remove_ids);
    }
}

/// Assigns a fresh id to every feature and geometry that still lacks one after the
/// rest of the upgrade has run.
fn assign_missing_ids(feature: &mut Feature) {
    if feature.id.is_empty() {
        feature.id = format!("ID_{}", Uuid::new_v4());
    }
    feature.walk_geometries_mut(&mut |g| {
        if g.id().is_none() {
            g.header_mut().id = Some(format!("ID_{}", Uuid::new_v4()));
        }
    });
    for child in &mut feature.children {
        assign_missing_ids(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::geometry::{GeometryHeader, GeometryRefGeom, LinearRingGeom, MultiSurfaceGeom, PolygonGeom};

    fn multi_surface(id: &str) -> Geometry {
        Geometry::MultiSurface(MultiSurfaceGeom {
            header: GeometryHeader {
                id: Some(id.to_string()),
                srs_name: None,
            },
            surface_members: vec![PolygonGeom {
                header: GeometryHeader::default(),
                exterior: LinearRingGeom {
                    header: GeometryHeader::default(),
                    points: vec![[0.0, 0.0, 0.0]],
                },
                interiors: vec![],
            }],
        })
    }

    fn href(target: &str) -> Geometry {
        Geometry::Reference(GeometryRefGeom {
            header: GeometryHeader::default(),
            href: format!("#{target}"),
        })
    }

    #[test]
    fn promotes_lod1_multi_surface_into_wall_surface_child() {
        let mut building = Feature::new("b1", "Building");
        building
            .geometries
            .push(("lod1MultiSurface".into(), 1, multi_surface("ms1")));

        promote_multi_surfaces(&mut building, 1, "WallSurface");

        assert!(building.geometries.is_empty());
        assert_eq!(building.children.len(), 1);
        assert_eq!(building.children[0].type_name, "WallSurface");
        assert_eq!(building.children[0].geometries[0].0, "lod1MultiSurface");
    }

    #[test]
    fn lod4_relabels_to_lod3_and_drops_existing_lod3() {
        let mut building = Feature::new("b1", "Building");
        building
            .geometries
            .push(("lod3Solid".into(), 3, multi_surface("old3")));
        building
            .geometries
            .push(("lod4Solid".into(), 4, multi_surface("was4")));

        relabel_lod4_as_lod3(&mut building);

        assert_eq!(building.geometries.len(), 1);
        assert_eq!(building.geometries[0].0, "lod3Solid");
        assert_eq!(building.geometries[0].1, 3);
    }

    #[test]
    fn shared_wall_gets_owner_and_object_relations() {
        // Two Buildings share a geometry by href; upgrade -a resolves the share and
        // inserts a CityObjectRelation on both sides.
        let mut b1 = Feature::new("b1", "Building");
        b1.geometries.push(("lod2MultiSurface".into(), 2, multi_surface("shared_wall")));
        let mut b2 = Feature::new("b2", "Building");
        b2.geometries.push(("lod2MultiSurface".into(), 2, href("shared_wall")));

        let mut top_level = vec![b1, b2];
        let opts = UpgradeOptions {
            map_lod1_multi_surfaces: false,
            map_lod0_roof_edge: false,
            use_lod4_as_lod3: false,
            resolve_geometry_references: true,
            create_city_object_relations: true,
        };
        let stats = apply(&mut top_level, &opts).unwrap();

        assert_eq!(stats.resolved_cross_top_level, 1);
        assert_eq!(stats.created_object_relations, 2);
        assert_eq!(top_level[0].object_relations.len(), 1);
        assert_eq!(top_level[1].object_relations.len(), 1);
        assert_eq!(top_level[0].object_relations[0].related_id, "#b2");
        assert_eq!(top_level[1].object_relations[0].related_id, "#b1");
    }

    #[test]
    fn unresolvable_reference_errors_when_resolution_disabled() {
        let mut b1 = Feature::new("b1", "Building");
        b1.geometries.push(("lod2MultiSurface".into(), 2, href("nowhere")));
        let mut top_level = vec![b1];
        let opts = UpgradeOptions {
            map_lod1_multi_surfaces: false,
            map_lod0_roof_edge: false,
            use_lod4_as_lod3: false,
            resolve_geometry_references: false,
            create_city_object_relations: false,
        };
        assert!(apply(&mut top_level, &opts).is_err());
    }
}
