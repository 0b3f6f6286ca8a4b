//! Run summary: per-item outcomes, per-instance reports and aggregate counts
//!
//! One [`RunSummary`] is created when a run starts and finalized when it ends.
//! It is never persisted; the binary prints it as text or JSON.

use crate::error::ErrorKind;
use crate::matcher::UnmatchedReason;
use crate::model::{IdKind, MediaKind, TagSet};
use arrem_common::config::SourceType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Failures listed in the text report
pub const MAX_REPORTED_FAILURES: usize = 10;

/// Status of one source item at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    /// Delta written (or, in dry-run, would be written)
    Applied,
    /// Matched, destination already had every source tag
    NoOp,
    /// No destination pairing
    SkippedUnmatched { reason: UnmatchedReason },
    /// Destination write failed after retries
    Failed { kind: ErrorKind, message: String },
    /// Planned write skipped because the run was interrupted
    NotAttempted,
}

/// Outcome for one source item, in source iteration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub instance: String,
    pub source_id: i64,
    pub title: String,
    pub kind: MediaKind,
    pub destination_id: Option<String>,
    pub matched_by: Option<IdKind>,
    /// Tags added (or to be added) by this item
    pub delta: TagSet,
    #[serde(flatten)]
    pub status: SyncStatus,
}

/// A source instance whose fetch failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceFailure {
    pub instance: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for InstanceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.instance, self.kind, self.message)
    }
}

/// What one source instance contributed to the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceReport {
    pub name: String,
    pub source_type: SourceType,
    /// Items fetched; 0 when the fetch failed
    pub items: usize,
    pub error: Option<InstanceFailure>,
}

/// One failed item, as listed in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    pub instance: String,
    pub source_id: i64,
    pub title: String,
    pub destination_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregate counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    /// Source items seen across all healthy instances
    pub total: usize,
    pub matched: usize,
    pub unmatched_no_identifier: usize,
    pub unmatched_not_found: usize,
    pub unmatched_ambiguous: usize,
    pub applied: usize,
    pub no_op: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

impl RunTotals {
    pub fn unmatched(&self) -> usize {
        self.unmatched_no_identifier + self.unmatched_not_found + self.unmatched_ambiguous
    }

    fn tally(&mut self, outcome: &SyncOutcome) {
        self.total += 1;
        match &outcome.status {
            SyncStatus::SkippedUnmatched { reason } => match reason {
                UnmatchedReason::NoIdentifier => self.unmatched_no_identifier += 1,
                UnmatchedReason::NotFound => self.unmatched_not_found += 1,
                UnmatchedReason::Ambiguous => self.unmatched_ambiguous += 1,
            },
            status => {
                self.matched += 1;
                match status {
                    SyncStatus::Applied => self.applied += 1,
                    SyncStatus::NoOp => self.no_op += 1,
                    SyncStatus::Failed { .. } => self.failed += 1,
                    SyncStatus::NotAttempted => self.not_attempted += 1,
                    SyncStatus::SkippedUnmatched { .. } => {}
                }
            }
        }
    }
}

/// Overall result of a run that reached the end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// At least one source instance contributed nothing
    Degraded,
    /// At least one destination write failed
    CompletedWithFailures,
    /// Cancelled between batches
    Interrupted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => f.write_str("success"),
            RunStatus::Degraded => f.write_str("success with degraded sources"),
            RunStatus::CompletedWithFailures => f.write_str("completed with failures"),
            RunStatus::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Everything known about one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub interrupted: bool,
    pub status: RunStatus,
    pub destination_items: usize,
    pub instances: Vec<InstanceReport>,
    pub totals: RunTotals,
    pub outcomes: Vec<SyncOutcome>,
    pub failures: Vec<FailureDetail>,
}

impl RunSummary {
    pub fn new(run_id: Uuid, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            interrupted: false,
            status: RunStatus::Success,
            destination_items: 0,
            instances: Vec::new(),
            totals: RunTotals::default(),
            outcomes: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn record_instance(&mut self, report: InstanceReport) {
        self.instances.push(report);
    }

    pub fn degraded_instances(&self) -> impl Iterator<Item = &InstanceReport> {
        self.instances.iter().filter(|r| r.error.is_some())
    }

    /// Close the summary with the final outcomes
    pub fn finish(&mut self, outcomes: Vec<SyncOutcome>, interrupted: bool) {
        let mut totals = RunTotals::default();
        for outcome in &outcomes {
            totals.tally(outcome);
        }

        self.failures = outcomes
            .iter()
            .filter_map(|o| match &o.status {
                SyncStatus::Failed { kind, message } => Some(FailureDetail {
                    instance: o.instance.clone(),
                    source_id: o.source_id,
                    title: o.title.clone(),
                    destination_id: o.destination_id.clone(),
                    kind: *kind,
                    message: message.clone(),
                }),
                _ => None,
            })
            .collect();
        self.totals = totals;
        self.outcomes = outcomes;
        self.interrupted = interrupted;
        self.status = if interrupted {
            RunStatus::Interrupted
        } else if totals.failed > 0 {
            RunStatus::CompletedWithFailures
        } else if self.degraded_instances().next().is_some() {
            RunStatus::Degraded
        } else {
            RunStatus::Success
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
            .unwrap_or(0)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        let mode = if self.dry_run { " (dry run)" } else { "" };

        writeln!(f, "Sync run {}{}: {}", self.run_id, mode, self.status)?;
        writeln!(f, "  Destination items: {}", self.destination_items)?;
        for instance in &self.instances {
            match &instance.error {
                None => writeln!(
                    f,
                    "  Source {} [{}]: {} items",
                    instance.name, instance.source_type, instance.items
                )?,
                Some(err) => writeln!(
                    f,
                    "  Source {} [{}]: unavailable ({}: {})",
                    instance.name, instance.source_type, err.kind, err.message
                )?,
            }
        }

        let applied_label = if self.dry_run { "Would apply" } else { "Applied" };
        writeln!(f, "  Items:        {}", t.total)?;
        writeln!(f, "  Matched:      {}", t.matched)?;
        writeln!(
            f,
            "  Unmatched:    {} (no identifier {}, not found {}, ambiguous {})",
            t.unmatched(),
            t.unmatched_no_identifier,
            t.unmatched_not_found,
            t.unmatched_ambiguous
        )?;
        writeln!(f, "  {:<13} {}", format!("{}:", applied_label), t.applied)?;
        writeln!(f, "  No-op:        {}", t.no_op)?;
        writeln!(f, "  Failed:       {}", t.failed)?;
        if t.not_attempted > 0 {
            writeln!(f, "  Not attempted: {}", t.not_attempted)?;
        }

        if !self.failures.is_empty() {
            writeln!(f, "  Failures:")?;
            for failure in self.failures.iter().take(MAX_REPORTED_FAILURES) {
                writeln!(
                    f,
                    "    - {} #{} \"{}\" -> {}: {} ({})",
                    failure.instance,
                    failure.source_id,
                    failure.title,
                    failure.destination_id.as_deref().unwrap_or("-"),
                    failure.kind,
                    failure.message
                )?;
            }
            if self.failures.len() > MAX_REPORTED_FAILURES {
                writeln!(
                    f,
                    "    ... and {} more",
                    self.failures.len() - MAX_REPORTED_FAILURES
                )?;
            }
        }
        Ok(())
    }
}
