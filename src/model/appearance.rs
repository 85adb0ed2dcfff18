/// A themed collection of surface-data objects.
#[derive(Debug, Clone)]
pub struct Appearance {
    pub id: String,
    pub theme: String,
    pub surface_data: Vec<SurfaceData>,
}

impl Appearance {
    pub fn is_empty(&self) -> bool {
        self.surface_data.is_empty()
    }
}

/// A target URI of the form `#<geometry-id>` or `<path>#<geometry-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(pub String);

impl Target {
    pub fn new(uri: impl Into<String>) -> Self {
        Target(uri.into())
    }

    /// The `<geometry-id>` fragment, i.e. the part after `#`.
    pub fn fragment(&self) -> Option<&str> {
        self.0.split('#').nth(1)
    }

    /// The part before `#`, empty for a same-document `#id` target.
    pub fn path(&self) -> &str {
        self.0.split('#').next().unwrap_or("")
    }

    pub fn same_document(&self) -> bool {
        self.path().is_empty()
    }

    pub fn with_fragment(&self, new_fragment: &str) -> Target {
        Target(format!("{}#{}", self.path(), new_fragment))
    }
}

#[derive(Debug, Clone)]
pub enum SurfaceData {
    ParameterizedTexture(ParameterizedTexture),
    GeoreferencedTexture(GeoreferencedTexture),
    X3DMaterial(X3DMaterial),
}

impl SurfaceData {
    pub fn id(&self) -> &str {
        match self {
            SurfaceData::ParameterizedTexture(t) => &t.id,
            SurfaceData::GeoreferencedTexture(t) => &t.id,
            SurfaceData::X3DMaterial(m) => &m.id,
        }
    }

    pub fn targets(&self) -> Vec<&Target> {
        match self {
            SurfaceData::ParameterizedTexture(t) => {
                t.targets.iter().map(|(target, _)| target).collect()
            }
            SurfaceData::GeoreferencedTexture(t) => t.targets.iter().collect(),
            SurfaceData::X3DMaterial(m) => m.targets.iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SurfaceData::ParameterizedTexture(t) => t.targets.is_empty(),
            SurfaceData::GeoreferencedTexture(t) => t.targets.is_empty(),
            SurfaceData::X3DMaterial(m) => m.targets.is_empty(),
        }
    }

    /// Removes every target whose fragment is in `removed_ids`. Returns `true` if the
    /// surface-data is now empty and should itself be removed.
    pub fn remove_targets_by_fragment(&mut self, removed_ids: &rustc_hash::FxHashSet<String>) -> bool {
        match self {
            SurfaceData::ParameterizedTexture(t) => {
                t.targets
                    .retain(|(target, _)| !matches_removed(target, removed_ids));
                t.targets.is_empty()
            }
            SurfaceData::GeoreferencedTexture(t) => {
                t.targets.retain(|target| !matches_removed(target, removed_ids));
                t.targets.is_empty()
            }
            SurfaceData::X3DMaterial(m) => {
                m.targets.retain(|target| !matches_removed(target, removed_ids));
                m.targets.is_empty()
            }
        }
    }
}

fn matches_removed(target: &Target, removed_ids: &rustc_hash::FxHashSet<String>) -> bool {
    target
        .fragment()
        .is_some_and(|frag| removed_ids.contains(frag))
}

/// One UV pair.
pub type Uv = (f64, f64);

#[derive(Debug, Clone)]
pub struct ParameterizedTexture {
    pub id: String,
    pub image_uri: String,
    /// `(target, uv_list)` — invariant: `uv_list` is non-empty and each target paints
    /// exactly one ring's worth of UV pairs, one pair per ring vertex.
    pub targets: Vec<(Target, Vec<Uv>)>,
}

#[derive(Debug, Clone)]
pub struct GeoreferencedTexture {
    pub id: String,
    pub image_uri: String,
    pub world_file: Option<String>,
    pub reference_point: Option<[f64; 2]>,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone)]
pub struct X3DMaterial {
    pub id: String,
    pub diffuse_color: [f32; 3],
    pub targets: Vec<Target>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_fragment_parsing() {
        let t = Target::new("#poly_1");
        assert_eq!(t.fragment(), Some("poly_1"));
        assert!(t.same_document());

        let t2 = Target::new("other.gml#poly_2");
        assert_eq!(t2.fragment(), Some("poly_2"));
        assert_eq!(t2.path(), "other.gml");
        assert!(!t2.same_document());
    }

    #[test]
    fn remove_targets_empties_surface_data() {
        let mut sd = SurfaceData::X3DMaterial(X3DMaterial {
            id: "m1".into(),
            diffuse_color: [1.0, 0.0, 0.0],
            targets: vec![Target::new("#a"), Target::new("#b")],
        });
        let mut removed = rustc_hash::FxHashSet::default();
        removed.insert("a".to_string());
        let now_empty = sd.remove_targets_by_fragment(&removed);
        assert!(!now_empty);
        assert_eq!(sd.targets(), vec![&Target::new("#b")]);

        removed.insert("b".to_string());
        let now_empty = sd.remove_targets_by_fragment(&removed);
        assert!(now_empty);
    }
}
