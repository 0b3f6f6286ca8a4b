//! Tracing subscriber setup
//!
//! `RUST_LOG` wins when present; otherwise the configured level applies to the
//! workspace crates and `warn` to everything else. Logs go to stderr so the
//! run report on stdout stays machine-readable.

use crate::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter used when `RUST_LOG` is not set
pub fn default_filter(level: &str) -> String {
    format!("warn,arrem_sync={level},arrem_common={level}")
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(level)))
        .map_err(|e| Error::Config(format!("invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| Error::Internal(format!("tracing already initialized: {}", e)))
}
