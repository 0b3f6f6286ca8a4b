//! Radarr / Sonarr API v3 client
//!
//! # API Reference
//! - `GET /api/v3/movie` (Radarr) or `GET /api/v3/series` (Sonarr): full catalog
//! - `GET /api/v3/tag`: tag id → label table
//! - `GET /api/v3/system/status`: connectivity check
//!
//! Both services return their whole catalog in one response, so "pagination"
//! is a single request. Tag ids are resolved to labels here; callers never see
//! numeric tag ids.

use super::SourceClient;
use crate::error::ClientResult;
use crate::http::HttpTransport;
use crate::model::{normalize_id, ExternalIds, IdKind, MediaKind, SourceItem, TagSet};
use crate::retry::RetryPolicy;
use arrem_common::config::{SourceInstanceConfig, SourceType};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

const API_KEY_HEADER: &str = "x-api-key";

/// Catalog record as returned by `/movie` and `/series`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrRecord {
    id: i64,
    #[serde(default)]
    title: String,
    tmdb_id: Option<i64>,
    imdb_id: Option<String>,
    /// Sonarr only
    tvdb_id: Option<i64>,
    #[serde(default)]
    tags: Vec<i64>,
}

/// Tag definition from `/tag`
#[derive(Debug, Deserialize)]
struct ArrTag {
    id: i64,
    label: String,
}

/// Client bound to one Radarr or Sonarr instance
pub struct ArrClient {
    name: String,
    source_type: SourceType,
    transport: HttpTransport,
}

impl ArrClient {
    pub fn new(instance: &SourceInstanceConfig, retry: RetryPolicy) -> ClientResult<Self> {
        let transport = HttpTransport::new(
            instance.name.clone(),
            &instance.url,
            API_KEY_HEADER,
            &instance.api_key,
            instance.timeout,
            retry,
        )?;
        Ok(Self {
            name: instance.name.clone(),
            source_type: instance.source_type,
            transport,
        })
    }

    fn catalog_endpoint(&self) -> &'static str {
        match self.source_type {
            SourceType::Radarr => "api/v3/movie",
            SourceType::Sonarr => "api/v3/series",
        }
    }

    fn media_kind(&self) -> MediaKind {
        match self.source_type {
            SourceType::Radarr => MediaKind::Movie,
            SourceType::Sonarr => MediaKind::Series,
        }
    }

    async fn fetch_tag_labels(&self) -> ClientResult<HashMap<i64, String>> {
        let tags: Vec<ArrTag> = self.transport.get_json("api/v3/tag", &[]).await?;
        debug!(instance = %self.name, count = tags.len(), "Fetched tag definitions");
        Ok(tags.into_iter().map(|t| (t.id, t.label)).collect())
    }

    fn to_source_item(&self, record: ArrRecord, labels: &HashMap<i64, String>) -> SourceItem {
        let mut tags = TagSet::new();
        for tag_id in &record.tags {
            match labels.get(tag_id) {
                Some(label) if !label.trim().is_empty() => {
                    tags.insert(label.clone());
                }
                Some(_) => {}
                None => warn!(
                    instance = %self.name,
                    title = %record.title,
                    tag_id,
                    "Item references unknown tag id, skipping it"
                ),
            }
        }

        let mut ids = ExternalIds::new();
        let candidates = [
            (IdKind::Tmdb, record.tmdb_id.map(|v| v.to_string())),
            (IdKind::Imdb, record.imdb_id),
            (IdKind::Tvdb, record.tvdb_id.map(|v| v.to_string())),
        ];
        for (kind, raw) in candidates {
            if let Some(value) = raw.as_deref().and_then(normalize_id) {
                ids.insert(kind, value);
            }
        }

        SourceItem {
            id: record.id,
            title: record.title,
            kind: self.media_kind(),
            tags,
            ids,
            instance: self.name.clone(),
        }
    }
}

#[async_trait]
impl SourceClient for ArrClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn list_items(&self) -> ClientResult<Vec<SourceItem>> {
        let labels = self.fetch_tag_labels().await?;
        let records: Vec<ArrRecord> = self.transport.get_json(self.catalog_endpoint(), &[]).await?;

        let items: Vec<SourceItem> = records
            .into_iter()
            .map(|record| self.to_source_item(record, &labels))
            .collect();

        info!(
            instance = %self.name,
            source_type = %self.source_type,
            items = items.len(),
            "Retrieved catalog"
        );
        Ok(items)
    }

    async fn check_connectivity(&self) -> ClientResult<()> {
        let _: serde_json::Value = self.transport.get_json("api/v3/system/status", &[]).await?;
        info!(instance = %self.name, "Connection successful");
        Ok(())
    }
}
