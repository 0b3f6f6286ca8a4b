//! Pairs source items with destination items via cross-reference identifiers
//!
//! # Algorithm
//! 1. Index every destination item under each `(media kind, id kind, value)`
//!    it carries.
//! 2. For a source item, run the strategies in precedence order: primary id
//!    (TMDb), alternate id (IMDb), series id (TVDB, series only).
//! 3. The first strategy whose value resolves to exactly one destination item
//!    wins. A value shared by several destination items is ambiguous and the
//!    next strategy is tried.
//!
//! Matching is pure and stateless; nothing is remembered between runs.

use crate::model::{DestinationItem, IdKind, MediaKind, SourceItem};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Why a source item has no destination pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// The source item carries no usable cross-reference value
    NoIdentifier,
    /// No destination item carries any of the source item's values
    NotFound,
    /// A usable value collided on several destination items and no other
    /// value resolved uniquely
    Ambiguous,
}

impl fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedReason::NoIdentifier => f.write_str("no-identifier"),
            UnmatchedReason::NotFound => f.write_str("not-found"),
            UnmatchedReason::Ambiguous => f.write_str("ambiguous"),
        }
    }
}

/// Result of matching one source item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Paired with the destination item at `destination` (index into the
    /// slice the matcher was built from)
    Matched { destination: usize, via: IdKind },
    Unmatched(UnmatchedReason),
}

/// Outcome of a single strategy probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Source item has no value for this kind (or the kind does not apply)
    Absent,
    /// Value present but unknown to the destination
    NotFound,
    /// Exactly one destination item carries the value
    Unique(usize),
    /// This many destination items carry the value
    Ambiguous(usize),
}

/// Lookup table from cross-reference values to destination item positions
#[derive(Debug, Default)]
pub struct DestinationIndex {
    entries: HashMap<(MediaKind, IdKind), HashMap<String, Vec<usize>>>,
}

impl DestinationIndex {
    pub fn build(items: &[DestinationItem]) -> Self {
        let mut entries: HashMap<(MediaKind, IdKind), HashMap<String, Vec<usize>>> =
            HashMap::new();
        for (position, item) in items.iter().enumerate() {
            for (kind, value) in &item.ids {
                entries
                    .entry((item.kind, *kind))
                    .or_default()
                    .entry(value.clone())
                    .or_default()
                    .push(position);
            }
        }
        Self { entries }
    }

    pub fn lookup(&self, media: MediaKind, kind: IdKind, value: &str) -> &[usize] {
        self.entries
            .get(&(media, kind))
            .and_then(|values| values.get(value))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// A pure matching step: `(source identifiers, index) → probe`
pub type Strategy = fn(&SourceItem, &DestinationIndex) -> Probe;

fn probe_kind(kind: IdKind, item: &SourceItem, index: &DestinationIndex) -> Probe {
    let Some(value) = item.ids.get(&kind) else {
        return Probe::Absent;
    };
    match index.lookup(item.kind, kind, value) {
        [] => Probe::NotFound,
        [only] => Probe::Unique(*only),
        many => Probe::Ambiguous(many.len()),
    }
}

pub fn by_primary_id(item: &SourceItem, index: &DestinationIndex) -> Probe {
    probe_kind(IdKind::Tmdb, item, index)
}

pub fn by_alternate_id(item: &SourceItem, index: &DestinationIndex) -> Probe {
    probe_kind(IdKind::Imdb, item, index)
}

pub fn by_series_id(item: &SourceItem, index: &DestinationIndex) -> Probe {
    if item.kind != MediaKind::Series {
        return Probe::Absent;
    }
    probe_kind(IdKind::Tvdb, item, index)
}

/// Strategies in precedence order
pub const STRATEGIES: [(IdKind, Strategy); 3] = [
    (IdKind::Tmdb, by_primary_id),
    (IdKind::Imdb, by_alternate_id),
    (IdKind::Tvdb, by_series_id),
];

/// Matcher over one destination snapshot
pub struct Matcher {
    index: DestinationIndex,
}

impl Matcher {
    pub fn new(destinations: &[DestinationItem]) -> Self {
        let index = DestinationIndex::build(destinations);
        tracing::debug!(destinations = destinations.len(), "Built destination index");
        Self { index }
    }

    /// Match one source item; yields at most one pairing
    pub fn match_item(&self, item: &SourceItem) -> MatchOutcome {
        let mut any_value = false;
        let mut any_ambiguous = false;

        for (kind, strategy) in STRATEGIES {
            match strategy(item, &self.index) {
                Probe::Absent => {}
                Probe::NotFound => any_value = true,
                Probe::Unique(destination) => {
                    return MatchOutcome::Matched {
                        destination,
                        via: kind,
                    }
                }
                Probe::Ambiguous(count) => {
                    any_value = true;
                    any_ambiguous = true;
                    tracing::debug!(
                        title = %item.title,
                        instance = %item.instance,
                        id_kind = %kind,
                        candidates = count,
                        "Identifier shared by several destination items, trying next kind"
                    );
                }
            }
        }

        let reason = if any_ambiguous {
            UnmatchedReason::Ambiguous
        } else if any_value {
            UnmatchedReason::NotFound
        } else {
            UnmatchedReason::NoIdentifier
        };
        MatchOutcome::Unmatched(reason)
    }
}
