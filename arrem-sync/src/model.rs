//! Domain types shared by the clients, matcher, differ and reconciler

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Tag names: case-preserving, deduplicated, deterministically ordered
pub type TagSet = BTreeSet<String>;

/// Kind of catalog entry. Matching never crosses kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Series,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Movie => f.write_str("movie"),
            MediaKind::Series => f.write_str("series"),
        }
    }
}

/// Cross-reference identifier kinds, declared in matching precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    /// Primary metadata database (TMDb)
    Tmdb,
    /// Alternate metadata database (IMDb)
    Imdb,
    /// Series database (TVDB), episodic content only
    Tvdb,
}

impl IdKind {
    pub const PRECEDENCE: [IdKind; 3] = [IdKind::Tmdb, IdKind::Imdb, IdKind::Tvdb];

    /// Parse a destination provider key (`Tmdb`, `IMDB`, ...)
    pub fn from_provider_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "tmdb" => Some(IdKind::Tmdb),
            "imdb" => Some(IdKind::Imdb),
            "tvdb" => Some(IdKind::Tvdb),
            _ => None,
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::Tmdb => f.write_str("tmdb"),
            IdKind::Imdb => f.write_str("imdb"),
            IdKind::Tvdb => f.write_str("tvdb"),
        }
    }
}

/// Identifier kind → value. Absent kinds are simply missing.
pub type ExternalIds = BTreeMap<IdKind, String>;

/// Normalize an identifier value; blank and zero values count as absent
pub fn normalize_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "0" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Catalog entry fetched from a source instance. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceItem {
    /// Source-local identifier
    pub id: i64,
    pub title: String,
    pub kind: MediaKind,
    pub tags: TagSet,
    pub ids: ExternalIds,
    /// Display name of the owning source instance
    pub instance: String,
}

/// Library entry fetched from the destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationItem {
    /// Destination-local identifier
    pub id: String,
    pub name: String,
    pub kind: MediaKind,
    pub ids: ExternalIds,
    pub tags: TagSet,
}
