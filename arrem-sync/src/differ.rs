//! Additive tag delta computation
//!
//! The delta is `source − destination`, compared on exact, case-preserving
//! names. It never contains removals; an empty delta means "nothing to do".

use crate::model::TagSet;

/// Tags to add to one destination item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDelta {
    pub additions: TagSet,
}

impl TagDelta {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty()
    }

    /// Union of `current` and the additions; always a superset of `current`
    pub fn apply_to(&self, current: &TagSet) -> TagSet {
        current.union(&self.additions).cloned().collect()
    }
}

pub fn compute_delta(source_tags: &TagSet, destination_tags: &TagSet) -> TagDelta {
    TagDelta {
        additions: source_tags.difference(destination_tags).cloned().collect(),
    }
}
