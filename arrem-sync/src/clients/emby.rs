//! Emby media server client
//!
//! # API Reference
//! - `GET /emby/Items?IncludeItemTypes=Movie,Series&Recursive=true&Fields=Tags,ProviderIds`
//!   paginated with `StartIndex` / `Limit` until `TotalRecordCount`
//! - `GET /emby/Items?Ids=<id>`: single item
//! - `POST /emby/Items/<id>/Tags/Add`: add tags (already present tags are ignored
//!   by the server, which makes re-sending the full set idempotent)
//! - `GET /emby/System/Info`: connectivity check

use super::DestinationClient;
use crate::error::{ClientError, ClientResult};
use crate::http::HttpTransport;
use crate::model::{normalize_id, DestinationItem, ExternalIds, IdKind, MediaKind, TagSet};
use crate::retry::RetryPolicy;
use arrem_common::config::DestinationConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

const TOKEN_HEADER: &str = "x-emby-token";

/// Items requested per page
pub const PAGE_SIZE: usize = 500;

const ITEM_FIELDS: &str = "Tags,ProviderIds";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPage {
    #[serde(default)]
    items: Vec<EmbyItem>,
    total_record_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EmbyItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "Type", default)]
    item_type: String,
    #[serde(default)]
    provider_ids: HashMap<String, serde_json::Value>,
    #[serde(default)]
    tag_items: Vec<TagItem>,
    /// Older servers report plain tag names
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TagItem {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AddTagsRequest {
    tags: Vec<TagItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SystemInfo {
    #[serde(default)]
    server_name: Option<String>,
}

impl EmbyItem {
    /// `None` for item types the reconciler does not handle
    fn into_destination_item(self) -> Option<DestinationItem> {
        let kind = match self.item_type.to_ascii_lowercase().as_str() {
            "movie" => MediaKind::Movie,
            "series" => MediaKind::Series,
            _ => return None,
        };

        let mut ids = ExternalIds::new();
        for (key, value) in &self.provider_ids {
            let Some(id_kind) = IdKind::from_provider_key(key) else {
                continue;
            };
            let raw = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if let Some(normalized) = normalize_id(&raw) {
                ids.insert(id_kind, normalized);
            }
        }

        let tags: TagSet = self
            .tag_items
            .into_iter()
            .map(|t| t.name)
            .chain(self.tags)
            .filter(|t| !t.trim().is_empty())
            .collect();

        Some(DestinationItem {
            id: self.id,
            name: self.name,
            kind,
            ids,
            tags,
        })
    }
}

/// Client for one Emby server
pub struct EmbyClient {
    transport: HttpTransport,
}

impl EmbyClient {
    pub fn new(config: &DestinationConfig, retry: RetryPolicy) -> ClientResult<Self> {
        let mut transport = HttpTransport::new(
            "emby",
            &config.url,
            TOKEN_HEADER,
            &config.api_key,
            config.timeout,
            retry,
        )?;
        if let Some(per_second) = config.max_requests_per_second {
            transport = transport.with_rate_limit(per_second);
        }
        Ok(Self { transport })
    }

    async fn fetch_page(&self, start_index: usize) -> ClientResult<ItemsPage> {
        let query = [
            ("IncludeItemTypes", "Movie,Series".to_string()),
            ("Recursive", "true".to_string()),
            ("Fields", ITEM_FIELDS.to_string()),
            ("StartIndex", start_index.to_string()),
            ("Limit", PAGE_SIZE.to_string()),
        ];
        self.transport.get_json("emby/Items", &query).await
    }
}

#[async_trait]
impl DestinationClient for EmbyClient {
    async fn list_items(&self) -> ClientResult<Vec<DestinationItem>> {
        let mut items = Vec::new();
        let mut start_index = 0;

        loop {
            let page = self.fetch_page(start_index).await?;
            let page_len = page.items.len();
            start_index += page_len;
            items.extend(
                page.items
                    .into_iter()
                    .filter_map(EmbyItem::into_destination_item),
            );

            debug!(
                fetched = start_index,
                total = ?page.total_record_count,
                "Fetched library page"
            );

            let done = match page.total_record_count {
                Some(total) => start_index >= total || page_len == 0,
                None => page_len < PAGE_SIZE,
            };
            if done {
                break;
            }
        }

        info!(items = items.len(), "Retrieved destination library");
        Ok(items)
    }

    async fn get_item(&self, item_id: &str) -> ClientResult<Option<DestinationItem>> {
        let query = [
            ("Ids", item_id.to_string()),
            ("Fields", ITEM_FIELDS.to_string()),
        ];
        let page: ItemsPage = self.transport.get_json("emby/Items", &query).await?;
        Ok(page
            .items
            .into_iter()
            .find(|item| item.id == item_id)
            .and_then(EmbyItem::into_destination_item))
    }

    async fn apply_tags(&self, item_id: &str, tags: &TagSet) -> ClientResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        if item_id.is_empty() || item_id.contains('/') {
            return Err(ClientError::Client {
                status: 0,
                message: format!("invalid item id '{}'", item_id),
            });
        }

        let body = AddTagsRequest {
            tags: tags.iter().map(|name| TagItem { name: name.clone() }).collect(),
        };
        self.transport
            .post_json(&format!("emby/Items/{}/Tags/Add", item_id), &body)
            .await?;

        debug!(item_id, tags = ?tags, "Updated item tags");
        Ok(())
    }

    async fn check_connectivity(&self) -> ClientResult<String> {
        let info: SystemInfo = self.transport.get_json("emby/System/Info", &[]).await?;
        let server_name = info.server_name.unwrap_or_else(|| "Unknown".to_string());
        info!(server = %server_name, "Connected to Emby server");
        Ok(server_name)
    }
}
