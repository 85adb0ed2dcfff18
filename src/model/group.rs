/// A city-object group: an ordered list of member references and an optional parent
/// reference, pointing at top-level features.
#[derive(Debug, Clone)]
pub struct CityObjectGroup {
    pub id: String,
    pub members: Vec<GroupMember>,
    pub parent: Option<GroupMember>,
}

/// An href pointing at a top-level feature, e.g. `#bldg_1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember(pub String);

impl GroupMember {
    pub fn fragment(&self) -> Option<&str> {
        self.0.split('#').nth(1)
    }
}

impl CityObjectGroup {
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Drops members (and the parent link) whose fragment is in `removed_ids`.
    /// Returns `true` if the group now has zero members and should be deleted.
    pub fn drop_members(&mut self, removed_ids: &rustc_hash::FxHashSet<String>) -> bool {
        self.members
            .retain(|m| !m.fragment().is_some_and(|f| removed_ids.contains(f)));
        if self
            .parent
            .as_ref()
            .is_some_and(|p| p.fragment().is_some_and(|f| removed_ids.contains(f)))
        {
            self.parent = None;
        }
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn drop_members_cascades_to_empty() {
        let mut group = CityObjectGroup {
            id: "g1".into(),
            members: vec![GroupMember("#b1".into()), GroupMember("#b2".into())],
            parent: None,
        };
        let mut removed = FxHashSet::default();
        removed.insert("b1".to_string());
        assert!(!group.drop_members(&removed));
        assert_eq!(group.members.len(), 1);

        removed.insert("b2".to_string());
        assert!(group.drop_members(&removed));
    }
}
