//! Configuration loading, environment overrides and validation
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`ARREM_` prefix, `.env` honored)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! The result is an immutable [`AppConfig`] that has been validated once, before
//! any client or reconciler is built.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix shared by every environment variable the tool reads
pub const ENV_PREFIX: &str = "ARREM_";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "ARREM_CONFIG";

pub const DEFAULT_DRY_RUN: bool = true;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_CONCURRENT_WRITES: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ============================================================================
// Source kinds
// ============================================================================

/// Catalog service kind of a source instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Movie catalog
    Radarr,
    /// Series catalog
    Sonarr,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Radarr => "radarr",
            SourceType::Sonarr => "sonarr",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "radarr" => Ok(SourceType::Radarr),
            "sonarr" => Ok(SourceType::Sonarr),
            other => Err(Error::Config(format!(
                "source type must be either 'radarr' or 'sonarr', got '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// TOML file layout
// ============================================================================

/// On-disk configuration file. Every field is optional so that the file can
/// be partial and environment variables can fill the gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub dry_run: Option<bool>,
    pub batch_size: Option<usize>,
    pub max_concurrent_writes: Option<usize>,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub destination: Option<DestinationSection>,
    #[serde(default)]
    pub sources: Vec<SourceSection>,
    #[serde(default)]
    pub retry: RetrySection,
}

/// `[logging]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

/// `[destination]` table (Emby server)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_requests_per_second: Option<u32>,
}

/// One `[[sources]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSection {
    #[serde(rename = "type")]
    pub source_type: String,
    pub url: String,
    pub api_key: String,
    pub name: Option<String>,
}

/// `[retry]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

// ============================================================================
// Validated configuration
// ============================================================================

/// Validated application configuration, immutable after startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Compute deltas without writing to the destination
    pub dry_run: bool,
    /// Number of destination writes per batch
    pub batch_size: usize,
    /// Upper bound on in-flight writes within one batch (never above batch_size)
    pub max_concurrent_writes: usize,
    /// Normalized log level (trace/debug/info/warn/error)
    pub log_level: String,
    pub destination: DestinationConfig,
    /// Ordered source instances; order drives outcome ordering in the summary
    pub sources: Vec<SourceInstanceConfig>,
    pub retry: RetrySettings,
}

/// Destination endpoint and credential
#[derive(Clone)]
pub struct DestinationConfig {
    /// Base URL without trailing slash
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_requests_per_second: Option<NonZeroU32>,
}

/// One source instance (type, endpoint, credential, display name)
#[derive(Clone)]
pub struct SourceInstanceConfig {
    pub source_type: SourceType,
    /// Base URL without trailing slash
    pub url: String,
    pub api_key: String,
    pub name: String,
    pub timeout: Duration,
}

/// Backoff settings shared by every client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

// Credentials stay out of Debug output so configs can be logged.
impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("max_requests_per_second", &self.max_requests_per_second)
            .finish()
    }
}

impl fmt::Debug for SourceInstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceInstanceConfig")
            .field("source_type", &self.source_type)
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Values supplied on the command line; `None` means "not given"
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub dry_run: Option<bool>,
    pub batch_size: Option<usize>,
    pub log_level: Option<String>,
}

// ============================================================================
// Loading
// ============================================================================

/// Load configuration from `.env`, the process environment and the TOML file
pub fn load(cli: &CliOverrides) -> Result<AppConfig> {
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment file {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }
    load_with(cli, |key| std::env::var(key).ok())
}

/// Load configuration using an injected environment lookup
pub fn load_with<F>(cli: &CliOverrides, env: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let toml_config = locate_and_read(cli.config_path.as_deref(), &env)?;
    resolve(toml_config, cli, &env)
}

/// Platform default config file location (`~/.config/arrem-sync/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("arrem-sync").join("config.toml"))
}

/// Read and parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

fn locate_and_read<F>(cli_path: Option<&Path>, env: &F) -> Result<TomlConfig>
where
    F: Fn(&str) -> Option<String>,
{
    // An explicitly named file must exist
    if let Some(path) = cli_path {
        return read_toml_config(path);
    }
    if let Some(path) = env(CONFIG_PATH_ENV).filter(|p| !p.trim().is_empty()) {
        return read_toml_config(Path::new(&path));
    }

    // The default location is optional
    match default_config_path() {
        Some(path) if path.exists() => read_toml_config(&path),
        Some(path) => {
            debug!(
                "No config file at {}, using environment and defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            warn!("Could not determine config directory, using environment and defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Collect numbered source instances `ARREM_ARR_<N>_*`, stopping at the first
/// index whose type, URL or key is missing
pub fn collect_numbered_sources<F>(env: &F) -> Vec<SourceSection>
where
    F: Fn(&str) -> Option<String>,
{
    let mut sources = Vec::new();
    for idx in 1.. {
        let get = |field: &str| {
            env(&format!("{}ARR_{}_{}", ENV_PREFIX, idx, field)).filter(|v| !v.trim().is_empty())
        };
        match (get("TYPE"), get("URL"), get("API_KEY")) {
            (Some(source_type), Some(url), Some(api_key)) => {
                let name = get("NAME");
                debug!(
                    "Configured source instance {}: {} ({})",
                    idx,
                    source_type,
                    name.as_deref().unwrap_or("unnamed")
                );
                sources.push(SourceSection {
                    source_type,
                    url,
                    api_key,
                    name,
                });
            }
            _ => break,
        }
    }
    sources
}

/// Merge CLI, environment and file values, then validate
pub fn resolve<F>(toml_config: TomlConfig, cli: &CliOverrides, env: &F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let env_var = |name: &str| env(&format!("{}{}", ENV_PREFIX, name));

    let dry_run = match (cli.dry_run, env_var("DRY_RUN")) {
        (Some(v), _) => v,
        (None, Some(raw)) => parse_bool(&raw).ok_or_else(|| {
            Error::Config(format!(
                "{}DRY_RUN must be one of true/false/1/0/yes/no/on/off, got '{}'",
                ENV_PREFIX, raw
            ))
        })?,
        (None, None) => toml_config.dry_run.unwrap_or(DEFAULT_DRY_RUN),
    };

    let batch_size = match (cli.batch_size, env_var("BATCH_SIZE")) {
        (Some(v), _) => v,
        (None, Some(raw)) => raw.trim().parse::<usize>().map_err(|_| {
            Error::Config(format!(
                "{}BATCH_SIZE must be a positive integer, got '{}'",
                ENV_PREFIX, raw
            ))
        })?,
        (None, None) => toml_config.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
    };
    if batch_size == 0 {
        return Err(Error::Config("batch_size must be at least 1".to_string()));
    }

    let max_concurrent_writes = toml_config
        .max_concurrent_writes
        .unwrap_or(DEFAULT_MAX_CONCURRENT_WRITES);
    if max_concurrent_writes == 0 {
        return Err(Error::Config(
            "max_concurrent_writes must be at least 1".to_string(),
        ));
    }

    let raw_level = cli
        .log_level
        .clone()
        .or_else(|| env_var("LOG_LEVEL"))
        .or_else(|| toml_config.logging.level.clone())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let log_level = normalize_log_level(&raw_level)?;

    let retry = resolve_retry(&toml_config.retry)?;

    let file_destination = toml_config.destination.unwrap_or_default();
    let timeout = Duration::from_secs(file_destination.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
    if timeout.is_zero() {
        return Err(Error::Config("timeout_secs must be at least 1".to_string()));
    }

    let destination_url = env_var("EMBY_URL")
        .or(file_destination.url)
        .ok_or_else(|| missing("destination url", "EMBY_URL"))?;
    let destination_key = env_var("EMBY_API_KEY")
        .or(file_destination.api_key)
        .ok_or_else(|| missing("destination api_key", "EMBY_API_KEY"))?;
    if !is_valid_key(&destination_key) {
        return Err(Error::Config(
            "destination api_key must not be blank or contain control/non-ASCII characters"
                .to_string(),
        ));
    }
    let max_requests_per_second = match file_destination.max_requests_per_second {
        Some(0) => {
            return Err(Error::Config(
                "max_requests_per_second must be at least 1 when set".to_string(),
            ))
        }
        Some(n) => NonZeroU32::new(n),
        None => None,
    };

    let destination = DestinationConfig {
        url: normalize_url(&destination_url, "destination")?,
        api_key: destination_key,
        timeout,
        max_requests_per_second,
    };

    // Numbered environment instances replace file-defined sources entirely
    let numbered = collect_numbered_sources(env);
    let raw_sources = if numbered.is_empty() {
        toml_config.sources
    } else {
        if !toml_config.sources.is_empty() {
            warn!(
                "Source instances found in both environment and config file; using environment ({} instance(s))",
                numbered.len()
            );
        }
        numbered
    };
    let sources = validate_sources(raw_sources, timeout)?;

    Ok(AppConfig {
        dry_run,
        batch_size,
        max_concurrent_writes: max_concurrent_writes.min(batch_size),
        log_level,
        destination,
        sources,
        retry,
    })
}

fn resolve_retry(section: &RetrySection) -> Result<RetrySettings> {
    let defaults = RetrySettings::default();
    let settings = RetrySettings {
        max_attempts: section.max_attempts.unwrap_or(defaults.max_attempts),
        initial_backoff: section
            .initial_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_backoff),
        max_backoff: section
            .max_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_backoff),
    };
    if settings.max_attempts == 0 {
        return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
    }
    if settings.max_backoff < settings.initial_backoff {
        return Err(Error::Config(
            "retry.max_backoff_ms must be >= retry.initial_backoff_ms".to_string(),
        ));
    }
    Ok(settings)
}

fn validate_sources(
    raw: Vec<SourceSection>,
    timeout: Duration,
) -> Result<Vec<SourceInstanceConfig>> {
    if raw.is_empty() {
        return Err(Error::Config(format!(
            "No source instances configured. Add [[sources]] entries to the config file or set \
             {p}ARR_1_TYPE, {p}ARR_1_URL, {p}ARR_1_API_KEY",
            p = ENV_PREFIX
        )));
    }

    let mut names = HashSet::new();
    let mut sources = Vec::with_capacity(raw.len());
    for (i, section) in raw.into_iter().enumerate() {
        let position = i + 1;
        let source_type: SourceType = section.source_type.parse()?;
        let name = section
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{}-{}", source_type, position));
        if !names.insert(name.clone()) {
            return Err(Error::Config(format!(
                "duplicate source instance name '{}'",
                name
            )));
        }
        if !is_valid_key(&section.api_key) {
            return Err(Error::Config(format!(
                "source '{}' api_key must not be blank or contain control/non-ASCII characters",
                name
            )));
        }
        sources.push(SourceInstanceConfig {
            source_type,
            url: normalize_url(&section.url, &name)?,
            api_key: section.api_key,
            name,
            timeout,
        });
    }
    Ok(sources)
}

fn missing(field: &str, env_name: &str) -> Error {
    Error::Config(format!(
        "{} is not configured. Set it in the config file or via {}{}",
        field, ENV_PREFIX, env_name
    ))
}

/// Validate an endpoint URL and strip the trailing slash
fn normalize_url(raw: &str, owner: &str) -> Result<String> {
    let trimmed = raw.trim();
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| Error::Config(format!("{} url '{}' is invalid: {}", owner, trimmed, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "{} url '{}' must use http or https",
            owner, trimmed
        )));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

/// Validate API key: non-blank and sendable as an HTTP header value
/// (visible ASCII, space or tab)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
        && key
            .bytes()
            .all(|b| b == b'\t' || (b' '..=b'~').contains(&b))
}

/// Parse a boolean the way environment variables are usually written
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Map a user-supplied level onto a `tracing` level name
pub fn normalize_log_level(raw: &str) -> Result<String> {
    let level = match raw.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" => "error".to_string(),
        other => other.to_string(),
    };
    if LOG_LEVELS.contains(&level.as_str()) {
        Ok(level)
    } else {
        Err(Error::Config(format!(
            "log level must be one of {}, got '{}'",
            LOG_LEVELS.join(", "),
            raw
        )))
    }
}
