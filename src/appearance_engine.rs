//! Target indexing, global→local appearance conversion, and appearance/surface-data
//! pruning when geometries disappear underneath them.

use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use crate::model::{Appearance, Feature, SurfaceData, Target};

/// Whether global→local conversion looks for the owning top-level object or the
/// nearest nested feature that actually carries the target geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerMode {
    TopLevel,
    Nested,
}

/// geometry-id → id of the feature that directly owns it, plus the id of its
/// enclosing top-level object (identical when the geometry lives on the top-level
/// feature itself).
#[derive(Debug, Clone, Default)]
struct OwnerIndex {
    direct_owner: FxHashMap<String, String>,
    top_level_owner: FxHashMap<String, String>,
    /// Set when the owning feature is itself (transitively) inside an implicit
    /// geometry template rather than the live feature tree — appearance engine keeps
    /// such appearances global rather than trying to localize them.
    template_owned: FxHashSet<String>,
}

impl OwnerIndex {
    fn build(top_level: &[Feature], templates: &[crate::model::ImplicitTemplate]) -> Self {
        let mut index = OwnerIndex::default();
        for top in top_level {
            index.visit(top, &top.id);
        }
        for template in templates {
            let mut ids = Vec::new();
            template.geometry.collect_ids(&mut ids);
            for id in ids {
                index.template_owned.insert(id);
            }
        }
        index
    }

    fn visit(&mut self, feature: &Feature, top_level_id: &str) {
        let mut ids = Vec::new();
        for (_, _, g) in &feature.geometries {
            g.collect_ids(&mut ids);
        }
        for id in ids {
            self.direct_owner.insert(id.clone(), feature.id.clone());
            self.top_level_owner.insert(id, top_level_id.to_string());
        }
        for child in &feature.children {
            self.visit(child, top_level_id);
        }
    }

    fn owner(&self, geometry_id: &str, mode: OwnerMode) -> Option<&str> {
        match mode {
            OwnerMode::TopLevel => self.top_level_owner.get(geometry_id).map(String::as_str),
            OwnerMode::Nested => self.direct_owner.get(geometry_id).map(String::as_str),
        }
    }

    fn is_template_owned(&self, geometry_id: &str) -> bool {
        self.template_owned.contains(geometry_id)
    }
}

/// Drops every target whose fragment is in `removed_ids` across a set of appearances,
/// then drops surface-data and appearances left empty.
pub fn prune(appearances: &mut Vec<Appearance>, removed_ids: &FxHashSet<String>) {
    for appearance in appearances.iter_mut() {
        appearance.surface_data.retain_mut(|sd| !sd.remove_targets_by_fragment(removed_ids));
    }
    appearances.retain(|a| !a.is_empty());
}

/// Converts every global appearance's surface-data targets that point into a feature
/// (rather than a template) into per-feature local appearances of the same theme.
///
/// Two target URIs of the same global surface-data that point into different
/// features produce exactly one local surface-data per owning feature, carrying only
/// the matching targets.
pub fn globalize_to_local(
    global_appearances: &mut Vec<Appearance>,
    top_level: &mut [Feature],
    mode: OwnerMode,
) {
    let templates: Vec<crate::model::ImplicitTemplate> = Vec::new();
    globalize_to_local_with_templates(global_appearances, top_level, mode, &templates);
}

pub fn globalize_to_local_with_templates(
    global_appearances: &mut Vec<Appearance>,
    top_level: &mut [Feature],
    mode: OwnerMode,
    templates: &[crate::model::ImplicitTemplate],
) {
    let owners = OwnerIndex::build(top_level, templates);
    let mut by_feature: FxHashMap<String, Vec<(String, SurfaceData)>> = FxHashMap::default();

    for appearance in global_appearances.iter_mut() {
        let theme = appearance.theme.clone();
        let mut remaining = Vec::new();
        for sd in appearance.surface_data.drain(..) {
            let targets = sd.targets().into_iter().cloned().collect::<Vec<_>>();
            let mut per_feature: FxHashMap<String, Vec<Target>> = FxHashMap::default();
            let mut kept_global = Vec::new();
            for target in &targets {
                let Some(fragment) = target.fragment() else {
                    kept_global.push(target.clone());
                    continue;
                };
                if owners.is_template_owned(fragment) {
                    kept_global.push(target.clone());
                    continue;
                }
                match owners.owner(fragment, mode) {
                    Some(owner_id) => per_feature.entry(owner_id.to_string()).or_default().push(target.clone()),
                    None => kept_global.push(target.clone()),
                }
            }

            for (owner_id, owner_targets) in per_feature {
                let clone = clone_surface_data_for(&sd, &owner_targets);
                by_feature.entry(owner_id).or_default().push((theme.clone(), clone));
            }

            if !kept_global.is_empty() {
                remaining.push(restrict_surface_data(sd, &kept_global));
            }
        }
        appearance.surface_data = remaining;
    }
    global_appearances.retain(|a| !a.is_empty());

    for feature in top_level.iter_mut() {
        attach_local(feature, &mut by_feature);
    }
}

fn attach_local(feature: &mut Feature, by_feature: &mut FxHashMap<String, Vec<(String, SurfaceData)>>) {
    if let Some(entries) = by_feature.remove(&feature.id) {
        let mut by_theme: FxHashMap<String, Vec<SurfaceData>> = FxHashMap::default();
        for (theme, sd) in entries {
            by_theme.entry(theme).or_default().push(sd);
        }
        for (theme, surface_data) in by_theme {
            feature.local_appearances.push(Appearance {
                id: format!("APP_{}", Uuid::new_v4()),
                theme,
                surface_data,
            });
        }
    }
    for child in &mut feature.children {
        attach_local(child, by_feature);
    }
}

fn clone_surface_data_for(sd: &SurfaceData, targets: &[Target]) -> SurfaceData {
    match sd {
        SurfaceData::ParameterizedTexture(t) => {
            let kept: Vec<_> = t
                .targets
                .iter()
                .filter(|(target, _)| targets.contains(target))
                .cloned()
                .collect();
            SurfaceData::ParameterizedTexture(crate::model::ParameterizedTexture {
                id: format!("TEX_{}", Uuid::new_v4()),
                image_uri: t.image_uri.clone(),
                targets: kept,
            })
        }
        SurfaceData::GeoreferencedTexture(t) => SurfaceData::GeoreferencedTexture(crate::model::GeoreferencedTexture {
            id: format!("GTEX_{}", Uuid::new_v4()),
            image_uri: t.image_uri.clone(),
            world_file: t.world_file.clone(),
            reference_point: t.reference_point,
            targets: targets.to_vec(),
        }),
        SurfaceData::X3DMaterial(m) => SurfaceData::X3DMaterial(crate::model::X3DMaterial {
            id: format!("MAT_{}", Uuid::new_v4()),
            diffuse_color: m.diffuse_color,
            targets: targets.to_vec(),
        }),
    }
}

fn restrict_surface_data(sd: SurfaceData, keep: &[Target]) -> SurfaceData {
    match sd {
        SurfaceData::ParameterizedTexture(mut t) => {
            t.targets.retain(|(target, _)| keep.contains(target));
            SurfaceData::ParameterizedTexture(t)
        }
        SurfaceData::GeoreferencedTexture(mut t) => {
            t.targets.retain(|target| keep.contains(target));
            SurfaceData::GeoreferencedTexture(t)
        }
        SurfaceData::X3DMaterial(mut m) => {
            m.targets.retain(|target| keep.contains(target));
            SurfaceData::X3DMaterial(m)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GeometryHeader, LinearRingGeom, MultiSurfaceGeom, PolygonGeom, X3DMaterial};

    fn building_with_surface(feature_id: &str, surface_id: &str) -> Feature {
        let mut f = Feature::new(feature_id, "Building");
        let poly = PolygonGeom {
            header: GeometryHeader {
                id: Some(surface_id.to_string()),
                srs_name: None,
            },
            exterior: LinearRingGeom {
                header: GeometryHeader::default(),
                points: vec![[0.0, 0.0, 0.0]],
            },
            interiors: vec![],
        };
        f.geometries.push((
            "lod2MultiSurface".to_string(),
            2,
            crate::model::Geometry::MultiSurface(MultiSurfaceGeom {
                header: GeometryHeader::default(),
                surface_members: vec![poly],
            }),
        ));
        f
    }

    #[test]
    fn globalize_splits_one_surface_data_per_owning_feature() {
        let mut b1 = building_with_surface("b1", "s_b1");
        let mut b2 = building_with_surface("b2", "s_b2");
        let mut global = vec![Appearance {
            id: "a1".into(),
            theme: "visual".into(),
            surface_data: vec![SurfaceData::X3DMaterial(X3DMaterial {
                id: "m1".into(),
                diffuse_color: [1.0, 0.0, 0.0],
                targets: vec![Target::new("#s_b1"), Target::new("#s_b2")],
            })],
        }];
        let mut tops = vec![b1.clone(), b2.clone()];
        globalize_to_local(&mut global, &mut tops, OwnerMode::TopLevel);

        assert!(global.is_empty());
        assert_eq!(tops[0].local_appearances.len(), 1);
        assert_eq!(tops[1].local_appearances.len(), 1);
        assert_eq!(tops[0].local_appearances[0].surface_data[0].targets().len(), 1);

        b1.local_appearances.clear();
        b2.local_appearances.clear();
    }

    #[test]
    fn prune_drops_empty_surface_data_and_appearances() {
        let mut appearances = vec![Appearance {
            id: "a1".into(),
            theme: "visual".into(),
            surface_data: vec![SurfaceData::X3DMaterial(X3DMaterial {
                id: "m1".into(),
                diffuse_color: [1.0, 0.0, 0.0],
                targets: vec![Target::new("#gone")],
            })],
        }];
        let mut removed = FxHashSet::default();
        removed.insert("gone".to_string());
        prune(&mut appearances, &removed);
        assert!(appearances.is_empty());
    }
}
