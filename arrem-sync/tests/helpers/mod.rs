//! Test helper utilities
//!
//! In-memory source and destination clients for driving the reconciler
//! without a network.

#![allow(dead_code)]

use arrem_common::config::SourceType;
use arrem_sync::clients::{DestinationClient, SourceClient};
use arrem_sync::error::{ClientError, ClientResult, ErrorKind};
use arrem_sync::model::{DestinationItem, ExternalIds, IdKind, MediaKind, SourceItem, TagSet};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn tags(names: &[&str]) -> TagSet {
    names.iter().map(|s| s.to_string()).collect()
}

pub fn ids(pairs: &[(IdKind, &str)]) -> ExternalIds {
    pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
}

pub fn movie(id: i64, title: &str, tag_names: &[&str], pairs: &[(IdKind, &str)]) -> SourceItem {
    SourceItem {
        id,
        title: title.to_string(),
        kind: MediaKind::Movie,
        tags: tags(tag_names),
        ids: ids(pairs),
        instance: String::new(),
    }
}

pub fn series(id: i64, title: &str, tag_names: &[&str], pairs: &[(IdKind, &str)]) -> SourceItem {
    SourceItem {
        kind: MediaKind::Series,
        ..movie(id, title, tag_names, pairs)
    }
}

pub fn library_item(
    id: &str,
    kind: MediaKind,
    tag_names: &[&str],
    pairs: &[(IdKind, &str)],
) -> DestinationItem {
    DestinationItem {
        id: id.to_string(),
        name: format!("Library {id}"),
        kind,
        ids: ids(pairs),
        tags: tags(tag_names),
    }
}

fn error_of(kind: ErrorKind) -> ClientError {
    match kind {
        ErrorKind::Connection => ClientError::Connection("connection refused".to_string()),
        ErrorKind::Auth => ClientError::Auth {
            status: 401,
            message: "Unauthorized".to_string(),
        },
        ErrorKind::Schema => ClientError::Schema("missing field `id`".to_string()),
        ErrorKind::RateLimited => ClientError::RateLimited { retry_after: None },
        ErrorKind::Server => ClientError::Server {
            status: 503,
            message: "Service Unavailable".to_string(),
        },
        ErrorKind::Client => ClientError::Client {
            status: 400,
            message: "Bad Request".to_string(),
        },
    }
}

// ============================================================================
// Source
// ============================================================================

pub struct FakeSource {
    name: String,
    source_type: SourceType,
    items: Vec<SourceItem>,
    failure: Option<ErrorKind>,
}

impl FakeSource {
    pub fn new(name: &str, source_type: SourceType, items: Vec<SourceItem>) -> Self {
        let items = items
            .into_iter()
            .map(|mut item| {
                item.instance = name.to_string();
                item
            })
            .collect();
        Self {
            name: name.to_string(),
            source_type,
            items,
            failure: None,
        }
    }

    pub fn failing(name: &str, source_type: SourceType, kind: ErrorKind) -> Self {
        Self {
            failure: Some(kind),
            ..Self::new(name, source_type, Vec::new())
        }
    }

    pub fn shared(self) -> Arc<dyn SourceClient> {
        Arc::new(self)
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn list_items(&self) -> ClientResult<Vec<SourceItem>> {
        match self.failure {
            Some(kind) => Err(error_of(kind)),
            None => Ok(self.items.clone()),
        }
    }

    async fn check_connectivity(&self) -> ClientResult<()> {
        match self.failure {
            Some(kind) => Err(error_of(kind)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Destination
// ============================================================================

type WriteDelay = Box<dyn Fn(&TagSet) -> Duration + Send + Sync>;

/// Library with replace-on-write semantics, recording every write
pub struct FakeDestination {
    items: Mutex<Vec<DestinationItem>>,
    list_failure: Option<ErrorKind>,
    failing_writes: HashSet<String>,
    writes: Mutex<Vec<(String, TagSet)>>,
    write_count: AtomicUsize,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    write_delay: Option<WriteDelay>,
}

impl FakeDestination {
    pub fn new(items: Vec<DestinationItem>) -> Self {
        Self {
            items: Mutex::new(items),
            list_failure: None,
            failing_writes: HashSet::new(),
            writes: Mutex::new(Vec::new()),
            write_count: AtomicUsize::new(0),
            cancel_after: Mutex::new(None),
            write_delay: None,
        }
    }

    pub fn unavailable(kind: ErrorKind) -> Self {
        Self {
            list_failure: Some(kind),
            ..Self::new(Vec::new())
        }
    }

    /// Writes to these item ids fail with a server error
    pub fn with_failing_writes(mut self, item_ids: &[&str]) -> Self {
        self.failing_writes = item_ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Hold each write for `delay(body)` before it replaces the stored tags
    pub fn with_write_delay(
        mut self,
        delay: impl Fn(&TagSet) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.write_delay = Some(Box::new(delay));
        self
    }

    /// Cancel `token` once `writes` writes have completed
    pub fn cancel_after(self, writes: usize, token: CancellationToken) -> Self {
        if let Ok(mut slot) = self.cancel_after.lock() {
            *slot = Some((writes, token));
        }
        self
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(String, TagSet)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn tags_of(&self, item_id: &str) -> TagSet {
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|item| item.id == item_id)
            .map(|item| item.tags.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<String, TagSet> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .map(|item| (item.id.clone(), item.tags.clone()))
            .collect()
    }

    /// Add a tag behind the reconciler's back
    pub fn add_tag_externally(&self, item_id: &str, tag: &str) {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.iter_mut().find(|item| item.id == item_id) {
            item.tags.insert(tag.to_string());
        }
    }
}

#[async_trait]
impl DestinationClient for FakeDestination {
    async fn list_items(&self) -> ClientResult<Vec<DestinationItem>> {
        match self.list_failure {
            Some(kind) => Err(error_of(kind)),
            None => Ok(self.items.lock().unwrap().clone()),
        }
    }

    async fn get_item(&self, item_id: &str) -> ClientResult<Option<DestinationItem>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|item| item.id == item_id)
            .cloned())
    }

    async fn apply_tags(&self, item_id: &str, tags: &TagSet) -> ClientResult<()> {
        if let Some(delay) = &self.write_delay {
            tokio::time::sleep(delay(tags)).await;
        }
        if self.failing_writes.contains(item_id) {
            return Err(error_of(ErrorKind::Server));
        }

        {
            let mut items = self.items.lock().unwrap();
            if let Some(item) = items.iter_mut().find(|item| item.id == item_id) {
                item.tags = tags.clone();
            }
        }
        self.writes
            .lock()
            .unwrap()
            .push((item_id.to_string(), tags.clone()));

        let done = self.write_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if done >= *limit {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn check_connectivity(&self) -> ClientResult<String> {
        match self.list_failure {
            Some(kind) => Err(error_of(kind)),
            None => Ok("Fake Emby".to_string()),
        }
    }
}
