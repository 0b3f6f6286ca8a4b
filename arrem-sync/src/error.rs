//! Error types for arrem-sync
//!
//! Two layers:
//! - [`ClientError`]: one failed interaction with a source or destination
//!   service. Every variant maps to an [`ErrorKind`] so the reconciler and
//!   the retry policy can tell transient failures from permanent ones.
//! - [`SyncError`]: run-level failures that abort a synchronization run.

use crate::summary::InstanceFailure;
use reqwest::StatusCode;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Coarse classification of a client failure, reported in the run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, DNS or timeout failure
    Connection,
    /// Credential rejected
    Auth,
    /// Response could not be parsed into the expected shape
    Schema,
    /// Server asked us to slow down
    RateLimited,
    /// 5xx response
    Server,
    /// 4xx response other than auth and rate limiting
    Client,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Auth => "auth",
            ErrorKind::Schema => "schema",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
        };
        f.write_str(name)
    }
}

/// Failure of a single request against a source or destination service
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network/DNS/timeout failure (retryable)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Credential rejected (never retried)
    #[error("Authentication rejected (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    /// Unexpected response shape, usually upstream API drift (never retried)
    #[error("Unexpected response shape: {0}")]
    Schema(String),

    /// HTTP 429, optionally carrying the server-specified delay
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx (retryable)
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// HTTP 4xx other than 401/403/429 (never retried)
    #[error("Request rejected {status}: {message}")]
    Client { status: u16, message: String },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connection(_) => ErrorKind::Connection,
            ClientError::Auth { .. } => ErrorKind::Auth,
            ClientError::Schema(_) => ErrorKind::Schema,
            ClientError::RateLimited { .. } => ErrorKind::RateLimited,
            ClientError::Server { .. } => ErrorKind::Server,
            ClientError::Client { .. } => ErrorKind::Client,
        }
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: StatusCode, body: String, retry_after: Option<Duration>) -> Self {
        let code = status.as_u16();
        let message = truncate(body);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth {
                status: code,
                message,
            },
            StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited { retry_after },
            s if s.is_server_error() => ClientError::Server {
                status: code,
                message,
            },
            _ => ClientError::Client {
                status: code,
                message,
            },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Schema(err.to_string())
        } else {
            // Timeouts, refused connections, DNS, broken bodies
            ClientError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Schema(err.to_string())
    }
}

/// Keep error bodies short enough for a log line
fn truncate(mut body: String) -> String {
    const MAX: usize = 300;
    if body.len() > MAX {
        let mut cut = MAX;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

/// Run-level failure: nothing useful could be reconciled
#[derive(Debug, Error)]
pub enum SyncError {
    /// The destination library could not be read
    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(#[source] ClientError),

    /// Every configured source instance failed to fetch
    #[error("All {} source instance(s) failed", .0.len())]
    AllSourcesFailed(Vec<InstanceFailure>),

    /// Reconciler built without any source clients
    #[error("No source instances configured")]
    NoSources,
}
