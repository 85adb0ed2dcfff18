//! Bijective identifier rename map plus xlink URI rewriting, shared by every pass
//! that renames geometries or surfaces (the upgrader wrapping multi-surfaces in
//! thematic surfaces, the texture clipper cloning surface-data, a merge assigning a
//! per-source-file prefix).

use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::model::{Appearance, CityObjectGroup, Feature};

/// How identifiers are handled when a pass could regenerate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityMode {
    /// Never touch an existing identifier.
    #[default]
    KeepAll,
    /// Keep top-level feature identifiers; regenerate everything nested.
    KeepTopLevel,
    /// Regenerate every identifier, top-level and nested alike.
    RegenerateAll,
}

/// Maintains `old_id -> new_id` and rewrites target/href URIs against it.
#[derive(Debug, Clone, Default)]
pub struct ReferenceRewriter {
    renames: FxHashMap<String, String>,
    /// Prepended to every id this rewriter mints, so identifiers from different
    /// source files never collide after a merge.
    prefix: Option<String>,
}

impl ReferenceRewriter {
    pub fn new() -> Self {
        ReferenceRewriter::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        ReferenceRewriter {
            renames: FxHashMap::default(),
            prefix: Some(prefix.into()),
        }
    }

    pub fn register(&mut self, old_id: impl Into<String>, new_id: impl Into<String>) {
        self.renames.insert(old_id.into(), new_id.into());
    }

    /// Mints a fresh id for `old_id`, registers the rename, and returns the new id.
    pub fn regenerate(&mut self, old_id: &str) -> String {
        let new_id = self.mint(old_id);
        self.register(old_id, new_id.clone());
        new_id
    }

    fn mint(&self, old_id: &str) -> String {
        let fresh = format!("ID_{}", Uuid::new_v4());
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{fresh}_{old_id}"),
            None => fresh,
        }
    }

    /// If `uri`'s fragment names a known old id, returns the URI rewritten to the new
    /// one; otherwise returns the URI unchanged.
    pub fn resolve(&self, uri: &str) -> String {
        let Some((path, fragment)) = uri.split_once('#') else {
            return uri.to_string();
        };
        match self.renames.get(fragment) {
            Some(new_id) => format!("{path}#{new_id}"),
            None => uri.to_string(),
        }
    }

    /// Walks every target/href field in a feature subtree and rewrites it in place:
    /// appearance targets, cross-LoD/cross-top-level geometry references, and
    /// `CityObjectRelation` links.
    pub fn resolve_in_feature(&self, feature: &mut Feature) {
        for appearance in &mut feature.local_appearances {
            self.resolve_in_appearance(appearance);
        }
        feature.walk_geometries_mut(&mut |g| {
            if let crate::model::Geometry::Reference(r) = g {
                r.href = self.resolve(&r.href);
            }
        });
        for relation in &mut feature.object_relations {
            relation.related_id = self.resolve(&relation.related_id);
        }
        for child in &mut feature.children {
            self.resolve_in_feature(child);
        }
    }

    pub fn resolve_in_appearance(&self, appearance: &mut Appearance) {
        for sd in &mut appearance.surface_data {
            match sd {
                crate::model::SurfaceData::ParameterizedTexture(t) => {
                    for (target, _) in &mut t.targets {
                        *target = crate::model::Target::new(self.resolve(&target.0));
                    }
                }
                crate::model::SurfaceData::GeoreferencedTexture(t) => {
                    for target in &mut t.targets {
                        *target = crate::model::Target::new(self.resolve(&target.0));
                    }
                }
                crate::model::SurfaceData::X3DMaterial(m) => {
                    for target in &mut m.targets {
                        *target = crate::model::Target::new(self.resolve(&target.0));
                    }
                }
            }
        }
    }

    pub fn resolve_in_group(&self, group: &mut CityObjectGroup) {
        for member in &mut group.members {
            member.0 = self.resolve(&member.0);
        }
        if let Some(parent) = &mut group.parent {
            parent.0 = self.resolve(&parent.0);
        }
    }

    /// Applies [`IdentityMode`] to a top-level feature's own id and, recursively, the
    /// ids of every nested feature and geometry, registering each rename so that
    /// later `resolve_in_*` calls see the new identifiers.
    pub fn apply_identity_mode(&mut self, feature: &mut Feature, mode: IdentityMode, is_top_level: bool) {
        let regenerate_this = match mode {
            IdentityMode::KeepAll => false,
            IdentityMode::KeepTopLevel => !is_top_level,
            IdentityMode::RegenerateAll => true,
        };
        if regenerate_this {
            let new_id = self.regenerate(&feature.id);
            feature.id = new_id;
        }
        feature.walk_geometries_mut(&mut |g| {
            if regenerate_this {
                if let Some(old_id) = g.id().map(str::to_string) {
                    let new_id = self.regenerate(&old_id);
                    g.header_mut().id = Some(new_id);
                }
            }
        });
        for child in &mut feature.children {
            self.apply_identity_mode(child, mode, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rewrites_only_registered_fragments() {
        let mut rw = ReferenceRewriter::new();
        rw.register("p1", "p1_new");
        assert_eq!(rw.resolve("#p1"), "#p1_new");
        assert_eq!(rw.resolve("other.gml#p1"), "other.gml#p1_new");
        assert_eq!(rw.resolve("#unknown"), "#unknown");
    }

    #[test]
    fn prefix_is_applied_to_minted_ids() {
        let mut rw = ReferenceRewriter::with_prefix("src1");
        let new_id = rw.regenerate("old");
        assert!(new_id.starts_with("src1_"));
        assert!(new_id.ends_with("_old"));
    }

    #[test]
    fn keep_top_level_mode_only_touches_nested_ids() {
        let mut rw = ReferenceRewriter::new();
        let mut top = Feature::new("top1", "Building");
        top.children.push(Feature::new("nested1", "WallSurface"));
        rw.apply_identity_mode(&mut top, IdentityMode::KeepTopLevel, true);
        assert_eq!(top.id, "top1");
        assert_ne!(top.children[0].id, "nested1");
    }
}
