//! Source and destination client contracts plus their HTTP implementations
//!
//! The reconciler only talks to the traits; the concrete Radarr/Sonarr and
//! Emby clients live in the submodules and are built from the validated
//! configuration by [`build_source_clients`] / [`build_destination_client`].

pub mod arr;
pub mod emby;

pub use arr::ArrClient;
pub use emby::EmbyClient;

use crate::error::ClientResult;
use crate::model::{DestinationItem, SourceItem, TagSet};
use crate::retry::RetryPolicy;
use arrem_common::config::{AppConfig, SourceType};
use async_trait::async_trait;
use std::sync::Arc;

/// Read-only catalog service owning the authoritative tags
///
/// Implementations resolve tag ids to names and paginate internally; callers
/// always see fully materialized items with tag names.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Display name of the instance this client is bound to
    fn name(&self) -> &str;

    fn source_type(&self) -> SourceType;

    /// Fetch every catalog item with resolved tag names
    async fn list_items(&self) -> ClientResult<Vec<SourceItem>>;

    /// Lightweight reachability and credential check (no mutation)
    async fn check_connectivity(&self) -> ClientResult<()>;
}

/// Media-server library receiving tag updates
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Fetch every library item with cross-reference ids and current tags
    async fn list_items(&self) -> ClientResult<Vec<DestinationItem>>;

    /// Read one item's current state; `None` if it no longer exists
    async fn get_item(&self, item_id: &str) -> ClientResult<Option<DestinationItem>>;

    /// Write the given tag set for one item. Applying the same set twice must
    /// leave the same state and return success.
    async fn apply_tags(&self, item_id: &str, tags: &TagSet) -> ClientResult<()>;

    /// Reachability and credential check; returns the server's display name
    async fn check_connectivity(&self) -> ClientResult<String>;
}

/// Build one source client per configured instance, preserving order
pub fn build_source_clients(config: &AppConfig) -> ClientResult<Vec<Arc<dyn SourceClient>>> {
    let retry = RetryPolicy::from(config.retry);
    config
        .sources
        .iter()
        .map(|instance| {
            let client = ArrClient::new(instance, retry)?;
            tracing::info!(
                instance = %instance.name,
                source_type = %instance.source_type,
                url = %instance.url,
                "Created source client"
            );
            Ok(Arc::new(client) as Arc<dyn SourceClient>)
        })
        .collect()
}

/// Build the destination client
pub fn build_destination_client(config: &AppConfig) -> ClientResult<Arc<dyn DestinationClient>> {
    let client = EmbyClient::new(&config.destination, RetryPolicy::from(config.retry))?;
    tracing::info!(url = %config.destination.url, "Created destination client");
    Ok(Arc::new(client))
}
