//! arrem-sync library interface
//!
//! Additive tag reconciliation from Radarr/Sonarr catalogs into an Emby
//! library. Exposed as a library so the integration tests can drive the
//! reconciler with in-memory clients.

pub mod clients;
pub mod differ;
pub mod error;
pub mod http;
pub mod matcher;
pub mod model;
pub mod reconciler;
pub mod retry;
pub mod summary;

pub use crate::error::{ClientError, ClientResult, ErrorKind, SyncError};
pub use crate::reconciler::{Reconciler, ReconcilerOptions};
pub use crate::summary::{RunStatus, RunSummary};
