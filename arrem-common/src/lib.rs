//! # arrem-common
//!
//! Shared code for the arrem-sync workspace:
//! - Configuration loading, environment overrides and validation
//! - Common error type
//! - Logging initialization

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
