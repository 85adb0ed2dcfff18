//! Selects per top-level object which LoD representations to keep, drops the
//! geometries/surfaces that fall out, and cascades that removal through appearances,
//! groups, and (optionally) whole now-empty objects.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;

use crate::appearance_engine;
use crate::model::{Appearance, CityObjectGroup, Feature, Geometry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodFilterMode {
    Keep,
    Remove,
    Minimum,
    Maximum,
    MinimumOrLess,
    MaximumOrGreater,
}

#[derive(Debug, Clone)]
pub struct LodFilterOptions {
    pub lods: BTreeSet<u8>,
    pub mode: LodFilterMode,
    pub keep_empty_objects: bool,
    pub update_extents: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LodFilterStats {
    pub geometries_removed: u64,
    pub objects_dropped: u64,
    pub groups_dropped: u64,
}

/// Computes the set of LoDs to retain for an object whose geometry-bearing
/// properties span `present`, given the requested `lods`/`mode`.
///
/// `MinimumOrLess`/`MaximumOrGreater` are read literally off their names: "minimum or
/// less" keeps every present LoD at or below the lowest requested one, "maximum or
/// greater" keeps every present LoD at or above the highest requested one. See
/// `DESIGN.md` for why this reading was chosen over the alternative.
pub fn retained_lods(lods: &BTreeSet<u8>, present: &BTreeSet<u8>, mode: LodFilterMode) -> BTreeSet<u8> {
    match mode {
        LodFilterMode::Keep => lods.intersection(present).copied().collect(),
        LodFilterMode::Remove => present.difference(lods).copied().collect(),
        LodFilterMode::Minimum => lods
            .intersection(present)
            .min()
            .copied()
            .into_iter()
            .collect(),
        LodFilterMode::Maximum => lods
            .intersection(present)
            .max()
            .copied()
            .into_iter()
            .collect(),
        LodFilterMode::MinimumOrLess => match lods.iter().min() {
            Some(bound) => present.iter().filter(|&&l| l <= *bound).copied().collect(),
            None => BTreeSet::new(),
        },
        LodFilterMode::MaximumOrGreater => match lods.iter().max() {
            Some(bound) => present.iter().filter(|&&l| l >= *bound).copied().collect(),
            None => BTreeSet::new(),
        },
    }
}

/// Applies the LoD filter to one top-level object in place, returning the ids of
/// every geometry (and descendant surface) it removed.
fn filter_feature(feature: &mut Feature, opts: &LodFilterOptions) -> FxHashSet<String> {
    let present: BTreeSet<u8> = feature.lods_present_recursive().into_iter().collect();
    let retained = retained_lods(&opts.lods, &present, opts.mode);

    let mut removed_ids = FxHashSet::default();
    feature.geometries.retain(|(_, lod, geom)| {
        if retained.contains(lod) {
            true
        } else {
            collect_removed_ids(geom, &mut removed_ids);
            false
        }
    });
    removed_ids
}

fn collect_removed_ids(geom: &Geometry, out: &mut FxHashSet<String>) {
    let mut ids = Vec::new();
    geom.collect_ids(&mut ids);
    out.extend(ids);
}

/// Drops every appearance target (local or global) whose fragment is in
/// `removed_ids`, and revalidates every surviving target against the feature's
/// current candidate geometry ids — the closest approximation available, in a model
/// without a dedicated cross-LoD reference graph, to resolving or removing stale
/// cross-LoD geometry references left behind by the filter above.
fn drop_dangling_targets(feature: &mut Feature) {
    let candidates: FxHashSet<String> = feature.candidate_geometry_ids().into_iter().collect();
    for appearance in &mut feature.local_appearances {
        appearance.surface_data.retain_mut(|sd| {
            let stale: Vec<String> = sd
                .targets()
                .into_iter()
                .filter(|t| t.fragment().is_some_and(|f| !candidates.contains(f)))
                .filter_map(|t| t.fragment().map(str::to_string))
                .collect();
            let stale: FxHashSet<String> = stale.into_iter().collect();
            !sd.remove_targets_by_fragment(&stale)
        });
    }
    feature.local_appearances.retain(|a| !a.is_empty());
    for child in &mut feature.children {
        drop_dangling_targets(child);
    }
}

/// Runs the LoD filter over a batch of top-level objects plus the collection's
/// global appearances and groups, mutating all three in place.
pub fn apply(
    top_level: &mut Vec<Feature>,
    global_appearances: &mut Vec<Appearance>,
    groups: &mut Vec<CityObjectGroup>,
    opts: &LodFilterOptions,
) -> LodFilterStats {
    let mut stats = LodFilterStats::default();
    let mut all_removed: FxHashSet<String> = FxHashSet::default();

    for feature in top_level.iter_mut() {
        let removed = filter_feature(feature, opts);
        stats.geometries_removed += removed.len() as u64;
        all_removed.extend(removed);
        drop_dangling_targets(feature);
    }

    appearance_engine::prune(global_appearances, &all_removed);

    prune_groups(groups, &all_removed, &mut stats);

    if !opts.keep_empty_objects {
        let dropped: FxHashSet<String> = top_level
            .iter()
            .filter(|f| f.is_empty_of_geometry())
            .map(|f| f.id.clone())
            .collect();
        stats.objects_dropped += dropped.len() as u64;
        top_level.retain(|f| !dropped.contains(&f.id));
        if !dropped.is_empty() {
            prune_groups(groups, &dropped, &mut stats);
        }
    }

    if opts.update_extents {
        for feature in top_level.iter_mut() {
            let srs = feature.bounded_by.as_ref().and_then(|e| e.srs_name.clone());
            feature.recompute_bounds(srs);
        }
    }

    stats
}

/// Drops group members/parents whose fragment is in `removed_ids`, then deletes
/// now-empty groups, iterating to a fixed point since emptying one group's parent
/// link can cascade into another.
fn prune_groups(groups: &mut Vec<CityObjectGroup>, removed_ids: &FxHashSet<String>, stats: &mut LodFilterStats) {
    loop {
        let before = groups.len();
        groups.retain_mut(|g| !g.drop_members(removed_ids));
        if groups.len() == before {
            break;
        }
        stats.groups_dropped += (before - groups.len()) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GeometryHeader, LinearRingGeom, MultiSurfaceGeom, PolygonGeom, SurfaceData, Target, X3DMaterial};

    fn multi_surface(id: &str) -> Geometry {
        Geometry::MultiSurface(MultiSurfaceGeom {
            header: GeometryHeader::default(),
            surface_members: vec![PolygonGeom {
                header: GeometryHeader {
                    id: Some(id.to_string()),
                    srs_name: None,
                },
                exterior: LinearRingGeom {
                    header: GeometryHeader::default(),
                    points: vec![[0.0, 0.0, 0.0]],
                },
                interiors: vec![],
            }],
        })
    }

    #[test]
    fn retained_lods_matches_each_mode() {
        let lods: BTreeSet<u8> = [2].into_iter().collect();
        let present: BTreeSet<u8> = [1, 2].into_iter().collect();
        assert_eq!(
            retained_lods(&lods, &present, LodFilterMode::Keep),
            [2].into_iter().collect()
        );
        assert_eq!(
            retained_lods(&lods, &present, LodFilterMode::Remove),
            [1].into_iter().collect()
        );
    }

    #[test]
    fn remove_mode_drops_targeted_lod_texture_and_geometry() {
        // Building has lod1 (g1) and lod2 (g2), a ParameterizedTexture painting #g2.
        // filter-lods --lod 2 --mode Remove.
        let mut building = Feature::new("b1", "Building");
        building.geometries.push(("lod1MultiSurface".into(), 1, multi_surface("g1")));
        building.geometries.push(("lod2MultiSurface".into(), 2, multi_surface("g2")));
        building.local_appearances.push(Appearance {
            id: "a1".into(),
            theme: "visual".into(),
            surface_data: vec![SurfaceData::X3DMaterial(X3DMaterial {
                id: "m1".into(),
                diffuse_color: [1.0, 1.0, 1.0],
                targets: vec![Target::new("#g2")],
            })],
        });

        let mut top_level = vec![building];
        let mut global = vec![];
        let mut groups = vec![];
        let opts = LodFilterOptions {
            lods: [2].into_iter().collect(),
            mode: LodFilterMode::Remove,
            keep_empty_objects: true,
            update_extents: false,
        };
        let stats = apply(&mut top_level, &mut global, &mut groups, &opts);

        assert_eq!(stats.geometries_removed, 1);
        assert_eq!(top_level[0].geometries.len(), 1);
        assert_eq!(top_level[0].geometries[0].0, "lod1MultiSurface");
        assert!(top_level[0].local_appearances.is_empty());
    }

    #[test]
    fn minimum_or_less_keeps_everything_at_or_below_bound() {
        let lods: BTreeSet<u8> = [2].into_iter().collect();
        let present: BTreeSet<u8> = [0, 1, 2, 3].into_iter().collect();
        assert_eq!(
            retained_lods(&lods, &present, LodFilterMode::MinimumOrLess),
            [0, 1, 2].into_iter().collect()
        );
    }
}
