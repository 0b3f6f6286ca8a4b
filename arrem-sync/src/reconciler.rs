//! Reconciliation run orchestration
//!
//! A run progresses through fixed phases:
//! START → FETCH → MATCH → DIFF → APPLY → REPORT → DONE
//!
//! - **Fetch**: destination library and every source catalog, concurrently.
//!   A failed source contributes zero items; a failed destination (or every
//!   source failing) aborts the run.
//! - **Match / Diff**: pure, no I/O. Deltas are planned against a working copy
//!   of each destination item's tags so several sources pointing at the same
//!   item converge on one union, sent as a single write.
//! - **Apply**: planned writes in fixed-size batches, at most
//!   `max_concurrent_writes` in flight. A failed write is recorded and the
//!   batch continues. Cancellation is honored between batches.
//! - **Report**: outcomes are finalized in source iteration order.

use crate::clients::{DestinationClient, SourceClient};
use crate::differ::{compute_delta, TagDelta};
use crate::error::{ClientError, ErrorKind, SyncError};
use crate::matcher::{MatchOutcome, Matcher};
use crate::model::{DestinationItem, SourceItem, TagSet};
use crate::summary::{InstanceFailure, InstanceReport, RunSummary, SyncOutcome, SyncStatus};
use arrem_common::config::AppConfig;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Run phase, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Fetch,
    Match,
    Diff,
    Apply,
    Report,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Start => "START",
            Phase::Fetch => "FETCH",
            Phase::Match => "MATCH",
            Phase::Diff => "DIFF",
            Phase::Apply => "APPLY",
            Phase::Report => "REPORT",
            Phase::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Tunables for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Compute and report deltas without calling `apply_tags`
    pub dry_run: bool,
    /// Writes per batch (≥ 1)
    pub batch_size: usize,
    /// In-flight writes within a batch (clamped to `1..=batch_size`)
    pub max_concurrent_writes: usize,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            batch_size: 50,
            max_concurrent_writes: 4,
        }
    }
}

impl From<&AppConfig> for ReconcilerOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            batch_size: config.batch_size,
            max_concurrent_writes: config.max_concurrent_writes,
        }
    }
}

/// Result of one connectivity probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityCheck {
    /// "emby" or the source instance name
    pub service: String,
    pub ok: bool,
    /// Server name on success, error text on failure
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectivityReport {
    pub checks: Vec<ConnectivityCheck>,
}

impl ConnectivityReport {
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }
}

/// One write per destination item, decided during DIFF
///
/// Every source item that adds tags to the same destination item shares the
/// write, so there is never more than one write in flight per item.
#[derive(Debug, Clone)]
struct PlannedWrite {
    /// Positions of the contributing outcomes, in source order
    outcome_indices: Vec<usize>,
    destination_id: String,
    /// Union of every contributor's delta
    additions: TagDelta,
}

/// Orchestrates one reconciliation run across all sources
pub struct Reconciler {
    sources: Vec<Arc<dyn SourceClient>>,
    destination: Arc<dyn DestinationClient>,
    options: ReconcilerOptions,
    cancel: CancellationToken,
    run_id: Uuid,
}

impl Reconciler {
    pub fn new(
        sources: Vec<Arc<dyn SourceClient>>,
        destination: Arc<dyn DestinationClient>,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            sources,
            destination,
            options: ReconcilerOptions {
                batch_size: options.batch_size.max(1),
                max_concurrent_writes: options
                    .max_concurrent_writes
                    .clamp(1, options.batch_size.max(1)),
                ..options
            },
            cancel: CancellationToken::new(),
            run_id: Uuid::new_v4(),
        }
    }

    /// Share a cancellation token with a signal handler
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.options
    }

    /// Execute a full run
    ///
    /// Item-level failures end up in the summary; only destination
    /// unavailability or every source failing is returned as an error.
    pub async fn run(&self) -> Result<RunSummary, SyncError> {
        let span = tracing::info_span!("sync_run", run_id = %self.run_id, dry_run = self.options.dry_run);
        self.run_phases().instrument(span).await
    }

    async fn run_phases(&self) -> Result<RunSummary, SyncError> {
        let mut summary = RunSummary::new(self.run_id, self.options.dry_run);
        enter(Phase::Start);
        info!(
            sources = self.sources.len(),
            batch_size = self.options.batch_size,
            max_concurrent_writes = self.options.max_concurrent_writes,
            "Starting sync run"
        );

        enter(Phase::Fetch);
        let (source_items, destination_items) = self.fetch(&mut summary).await?;
        summary.destination_items = destination_items.len();

        enter(Phase::Match);
        let matcher = Matcher::new(&destination_items);
        let matches: Vec<MatchOutcome> = source_items
            .iter()
            .map(|item| matcher.match_item(item))
            .collect();

        enter(Phase::Diff);
        let (mut outcomes, writes) = plan(&source_items, &destination_items, &matches);
        info!(
            items = outcomes.len(),
            pending_writes = writes.len(),
            "Planned tag updates"
        );

        enter(Phase::Apply);
        let interrupted = self.apply(&writes, &mut outcomes).await;

        enter(Phase::Report);
        summary.finish(outcomes, interrupted);
        info!(
            status = %summary.status,
            matched = summary.totals.matched,
            unmatched = summary.totals.unmatched(),
            applied = summary.totals.applied,
            no_op = summary.totals.no_op,
            failed = summary.totals.failed,
            not_attempted = summary.totals.not_attempted,
            elapsed_ms = summary.elapsed_ms(),
            "Sync run finished"
        );

        enter(Phase::Done);
        Ok(summary)
    }

    async fn fetch(
        &self,
        summary: &mut RunSummary,
    ) -> Result<(Vec<SourceItem>, Vec<DestinationItem>), SyncError> {
        if self.sources.is_empty() {
            return Err(SyncError::NoSources);
        }

        let source_fetches = join_all(self.sources.iter().map(|source| async move {
            let result = source.list_items().await;
            (source, result)
        }));
        let (destination_result, source_results) =
            tokio::join!(self.destination.list_items(), source_fetches);

        let destination_items = destination_result.map_err(|e| {
            error!(error = %e, kind = %e.kind(), "Destination library fetch failed");
            SyncError::DestinationUnavailable(e)
        })?;

        let mut source_items = Vec::new();
        let mut failures = Vec::new();
        for (source, result) in source_results {
            match result {
                Ok(items) => {
                    summary.record_instance(InstanceReport {
                        name: source.name().to_string(),
                        source_type: source.source_type(),
                        items: items.len(),
                        error: None,
                    });
                    source_items.extend(items);
                }
                Err(e) => {
                    warn!(
                        instance = %source.name(),
                        kind = %e.kind(),
                        error = %e,
                        "Source instance unavailable, continuing without its items"
                    );
                    let failure = InstanceFailure {
                        instance: source.name().to_string(),
                        kind: e.kind(),
                        message: e.to_string(),
                    };
                    summary.record_instance(InstanceReport {
                        name: source.name().to_string(),
                        source_type: source.source_type(),
                        items: 0,
                        error: Some(failure.clone()),
                    });
                    failures.push(failure);
                }
            }
        }

        if failures.len() == self.sources.len() {
            error!(failed = failures.len(), "Every source instance failed");
            return Err(SyncError::AllSourcesFailed(failures));
        }

        info!(
            source_items = source_items.len(),
            destination_items = destination_items.len(),
            degraded_sources = failures.len(),
            "Fetch complete"
        );
        Ok((source_items, destination_items))
    }

    /// Execute planned writes batch by batch; returns true when interrupted
    async fn apply(&self, writes: &[PlannedWrite], outcomes: &mut [SyncOutcome]) -> bool {
        let batch_count = writes.len().div_ceil(self.options.batch_size);

        for (batch_index, batch) in writes.chunks(self.options.batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                let remaining: usize = writes[batch_index * self.options.batch_size..]
                    .iter()
                    .map(|write| write.outcome_indices.len())
                    .sum();
                warn!(
                    completed_batches = batch_index,
                    batches = batch_count,
                    not_attempted = remaining,
                    "Sync cancelled, stopping before next batch"
                );
                return true;
            }

            let results: Vec<(&[usize], SyncStatus)> = stream::iter(batch)
                .map(|write| async move {
                    (write.outcome_indices.as_slice(), self.execute(write).await)
                })
                .buffered(self.options.max_concurrent_writes)
                .collect()
                .await;

            let failed = results
                .iter()
                .filter(|(_, status)| matches!(status, SyncStatus::Failed { .. }))
                .count();
            for (indices, status) in results {
                for &index in indices {
                    outcomes[index].status = status.clone();
                }
            }

            info!(
                batch = batch_index + 1,
                batches = batch_count,
                writes = batch.len(),
                failed,
                "Batch complete"
            );
        }
        false
    }

    async fn execute(&self, write: &PlannedWrite) -> SyncStatus {
        if self.options.dry_run {
            debug!(
                destination_id = %write.destination_id,
                additions = ?write.additions.additions,
                "Dry run, skipping write"
            );
            return SyncStatus::Applied;
        }

        // Re-read so tags added since FETCH survive a replacing write
        let current = match self.destination.get_item(&write.destination_id).await {
            Ok(Some(item)) => item.tags,
            Ok(None) => {
                return failed_write(
                    &write.destination_id,
                    ErrorKind::Client,
                    "destination item no longer exists".to_string(),
                )
            }
            Err(e) => return failed_from(&write.destination_id, &e),
        };

        let target = write.additions.apply_to(&current);

        match self
            .destination
            .apply_tags(&write.destination_id, &target)
            .await
        {
            Ok(()) => SyncStatus::Applied,
            Err(e) => failed_from(&write.destination_id, &e),
        }
    }

    /// Probe every configured service without mutating anything
    pub async fn check_connectivity(&self) -> ConnectivityReport {
        let destination = async {
            let result = self.destination.check_connectivity().await;
            ConnectivityCheck {
                service: "emby".to_string(),
                ok: result.is_ok(),
                detail: match result {
                    Ok(server) => server,
                    Err(e) => e.to_string(),
                },
            }
        };
        let sources = join_all(self.sources.iter().map(|source| async move {
            let result = source.check_connectivity().await;
            ConnectivityCheck {
                service: source.name().to_string(),
                ok: result.is_ok(),
                detail: match result {
                    Ok(()) => source.source_type().to_string(),
                    Err(e) => e.to_string(),
                },
            }
        }));

        let (destination, sources) = tokio::join!(destination, sources);
        let mut checks = vec![destination];
        checks.extend(sources);

        for check in checks.iter().filter(|c| !c.ok) {
            warn!(service = %check.service, detail = %check.detail, "Connectivity check failed");
        }
        ConnectivityReport { checks }
    }
}

fn enter(phase: Phase) {
    debug!(phase = %phase, "Entering phase");
}

fn failed_from(destination_id: &str, err: &ClientError) -> SyncStatus {
    failed_write(destination_id, err.kind(), err.to_string())
}

fn failed_write(destination_id: &str, kind: ErrorKind, message: String) -> SyncStatus {
    warn!(destination_id, kind = %kind, error = %message, "Tag write failed");
    SyncStatus::Failed { kind, message }
}

/// MATCH + DIFF: one outcome per source item plus the writes to perform
fn plan(
    source_items: &[SourceItem],
    destination_items: &[DestinationItem],
    matches: &[MatchOutcome],
) -> (Vec<SyncOutcome>, Vec<PlannedWrite>) {
    let mut working: HashMap<usize, TagSet> = HashMap::new();
    // destination position -> index into `writes`
    let mut write_slots: HashMap<usize, usize> = HashMap::new();
    let mut outcomes = Vec::with_capacity(source_items.len());
    let mut writes = Vec::new();

    for (item, outcome) in source_items.iter().zip(matches) {
        let mut record = SyncOutcome {
            instance: item.instance.clone(),
            source_id: item.id,
            title: item.title.clone(),
            kind: item.kind,
            destination_id: None,
            matched_by: None,
            delta: TagSet::new(),
            status: SyncStatus::NotAttempted,
        };

        match *outcome {
            MatchOutcome::Unmatched(reason) => {
                debug!(instance = %item.instance, title = %item.title, reason = %reason, "Unmatched");
                record.status = SyncStatus::SkippedUnmatched { reason };
            }
            MatchOutcome::Matched { destination, via } => {
                let target = &destination_items[destination];
                record.destination_id = Some(target.id.clone());
                record.matched_by = Some(via);

                let tags = working
                    .entry(destination)
                    .or_insert_with(|| target.tags.clone());
                let delta = compute_delta(&item.tags, tags);

                if delta.is_empty() {
                    record.status = SyncStatus::NoOp;
                } else {
                    tags.extend(delta.additions.iter().cloned());
                    debug!(
                        title = %item.title,
                        destination_id = %target.id,
                        additions = ?delta.additions,
                        "Planned tag additions"
                    );
                    let outcome_index = outcomes.len();
                    match write_slots.get(&destination) {
                        Some(&slot) => {
                            let write: &mut PlannedWrite = &mut writes[slot];
                            write.outcome_indices.push(outcome_index);
                            write
                                .additions
                                .additions
                                .extend(delta.additions.iter().cloned());
                        }
                        None => {
                            write_slots.insert(destination, writes.len());
                            writes.push(PlannedWrite {
                                outcome_indices: vec![outcome_index],
                                destination_id: target.id.clone(),
                                additions: delta.clone(),
                            });
                        }
                    }
                    record.delta = delta.additions;
                }
            }
        }
        outcomes.push(record);
    }

    (outcomes, writes)
}
