//! Engine configuration: mirror lists, timeouts, size bounds, pool sizing.
//!
//! Configuration comes from the embedding application, either built in code
//! or loaded from process environment variables (`BOOKFETCH_*`). Every
//! constructor path ends in [`EngineConfig::validate`], so an engine is
//! never built from out-of-range knobs.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Default search mirrors, in failover order.
pub const DEFAULT_SEARCH_MIRRORS: [&str; 4] = [
    "http://libgen.rs",
    "http://libgen.is",
    "http://libgen.st",
    "https://libgen.fun",
];

/// Default download mirrors, in resolution order.
pub const DEFAULT_DOWNLOAD_MIRRORS: [&str; 3] =
    ["http://library.lol", "http://libgen.rs", "http://libgen.is"];

/// File extensions accepted by default, matching the formats the content
/// sniffer can recognize.
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 13] = [
    "pdf", "epub", "mobi", "azw3", "djvu", "txt", "doc", "docx", "rtf", "fb2", "lit", "pdb", "chm",
];

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";

/// Configuration error: a malformed environment value or an out-of-range
/// field caught by validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that does not parse.
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// A field failed range validation.
    #[error("invalid configuration: {field} {message}")]
    OutOfRange {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    fn env(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEnv {
            var,
            value: value.into(),
            reason: reason.into(),
        }
    }

    fn range(field: &'static str, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            field,
            message: message.into(),
        }
    }
}

/// All knobs the engine accepts. See module docs for provenance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ordered search mirror base URLs.
    pub search_mirrors: Vec<Url>,
    /// Ordered download mirror base URLs.
    pub download_mirrors: Vec<Url>,
    /// How long a cached search result stays fresh.
    pub cache_ttl: Duration,
    /// Timeout for a single search or resolution request.
    pub per_attempt_timeout: Duration,
    /// Overall wall-clock budget for one search across all mirrors.
    pub search_budget: Duration,
    /// Retries on the same mirror before failing over (attempts = retries + 1).
    pub retries_per_mirror: u32,
    /// Timeout for the metadata-only size probe.
    pub probe_timeout: Duration,
    /// Timeout for streaming one candidate's body.
    pub transfer_timeout: Duration,
    /// Smallest acceptable file, bytes.
    pub min_file_size: u64,
    /// Largest acceptable file, bytes.
    pub max_file_size: u64,
    /// Extensions (lowercase, no dot) a retrieved file may validate as.
    pub allowed_extensions: Vec<String>,
    /// Total in-flight HTTP requests across the whole engine.
    pub max_connections: usize,
    /// Idle keep-alive connections retained per host.
    pub max_keepalive_per_host: usize,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Socket read timeout.
    pub read_timeout: Duration,
    /// User-Agent header sent to mirrors.
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_mirrors: parse_default_urls(&DEFAULT_SEARCH_MIRRORS),
            download_mirrors: parse_default_urls(&DEFAULT_DOWNLOAD_MIRRORS),
            cache_ttl: Duration::from_secs(300),
            per_attempt_timeout: Duration::from_secs(10),
            search_budget: Duration::from_secs(30),
            retries_per_mirror: 2,
            probe_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(60),
            min_file_size: mb_to_bytes(0.1),
            max_file_size: mb_to_bytes(50.0),
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_connections: 100,
            max_keepalive_per_host: 20,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl EngineConfig {
    /// Builds a config from defaults overridden by `BOOKFETCH_*` environment
    /// variables, then validates it.
    ///
    /// Recognized variables: `BOOKFETCH_SEARCH_MIRRORS` and
    /// `BOOKFETCH_DOWNLOAD_MIRRORS` (comma-separated URLs),
    /// `BOOKFETCH_CACHE_TTL_SECS`, `BOOKFETCH_ATTEMPT_TIMEOUT_SECS`,
    /// `BOOKFETCH_SEARCH_BUDGET_SECS`, `BOOKFETCH_RETRIES_PER_MIRROR`,
    /// `BOOKFETCH_PROBE_TIMEOUT_SECS`, `BOOKFETCH_TRANSFER_TIMEOUT_SECS`,
    /// `BOOKFETCH_MIN_FILE_SIZE_MB`, `BOOKFETCH_MAX_FILE_SIZE_MB`,
    /// `BOOKFETCH_ALLOWED_EXTENSIONS` (comma-separated),
    /// `BOOKFETCH_MAX_CONNECTIONS`, `BOOKFETCH_MAX_KEEPALIVE_PER_HOST`,
    /// `BOOKFETCH_CONNECT_TIMEOUT_SECS`, `BOOKFETCH_READ_TIMEOUT_SECS`,
    /// `BOOKFETCH_USER_AGENT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = read_env("BOOKFETCH_SEARCH_MIRRORS") {
            config.search_mirrors = parse_url_list("BOOKFETCH_SEARCH_MIRRORS", &raw)?;
        }
        if let Some(raw) = read_env("BOOKFETCH_DOWNLOAD_MIRRORS") {
            config.download_mirrors = parse_url_list("BOOKFETCH_DOWNLOAD_MIRRORS", &raw)?;
        }
        if let Some(secs) = parse_env_u64("BOOKFETCH_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("BOOKFETCH_ATTEMPT_TIMEOUT_SECS")? {
            config.per_attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("BOOKFETCH_SEARCH_BUDGET_SECS")? {
            config.search_budget = Duration::from_secs(secs);
        }
        if let Some(count) = parse_env_u64("BOOKFETCH_RETRIES_PER_MIRROR")? {
            config.retries_per_mirror = u32::try_from(count).map_err(|_| {
                ConfigError::env(
                    "BOOKFETCH_RETRIES_PER_MIRROR",
                    count.to_string(),
                    "value too large",
                )
            })?;
        }
        if let Some(secs) = parse_env_u64("BOOKFETCH_PROBE_TIMEOUT_SECS")? {
            config.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("BOOKFETCH_TRANSFER_TIMEOUT_SECS")? {
            config.transfer_timeout = Duration::from_secs(secs);
        }
        if let Some(mb) = parse_env_f64("BOOKFETCH_MIN_FILE_SIZE_MB")? {
            config.min_file_size = mb_to_bytes(mb);
        }
        if let Some(mb) = parse_env_f64("BOOKFETCH_MAX_FILE_SIZE_MB")? {
            config.max_file_size = mb_to_bytes(mb);
        }
        if let Some(raw) = read_env("BOOKFETCH_ALLOWED_EXTENSIONS") {
            config.allowed_extensions = raw
                .split(',')
                .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect();
        }
        if let Some(count) = parse_env_u64("BOOKFETCH_MAX_CONNECTIONS")? {
            config.max_connections = usize::try_from(count).map_err(|_| {
                ConfigError::env(
                    "BOOKFETCH_MAX_CONNECTIONS",
                    count.to_string(),
                    "value too large",
                )
            })?;
        }
        if let Some(count) = parse_env_u64("BOOKFETCH_MAX_KEEPALIVE_PER_HOST")? {
            config.max_keepalive_per_host = usize::try_from(count).map_err(|_| {
                ConfigError::env(
                    "BOOKFETCH_MAX_KEEPALIVE_PER_HOST",
                    count.to_string(),
                    "value too large",
                )
            })?;
        }
        if let Some(secs) = parse_env_u64("BOOKFETCH_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("BOOKFETCH_READ_TIMEOUT_SECS")? {
            config.read_timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = read_env("BOOKFETCH_USER_AGENT") {
            config.user_agent = agent;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its valid range. Error messages name the
    /// field and the accepted range so misconfiguration is fixable from the
    /// message alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search_mirrors.is_empty() {
            return Err(ConfigError::range(
                "search_mirrors",
                "must list at least one mirror URL",
            ));
        }
        if self.download_mirrors.is_empty() {
            return Err(ConfigError::range(
                "download_mirrors",
                "must list at least one mirror URL",
            ));
        }
        for url in self.search_mirrors.iter().chain(&self.download_mirrors) {
            if url.host_str().is_none() {
                return Err(ConfigError::range(
                    "mirrors",
                    format!("mirror URL {url} has no host"),
                ));
            }
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::range("cache_ttl", "must be greater than 0"));
        }
        if self.per_attempt_timeout.is_zero() {
            return Err(ConfigError::range(
                "per_attempt_timeout",
                "must be greater than 0",
            ));
        }
        if self.search_budget < self.per_attempt_timeout {
            return Err(ConfigError::range(
                "search_budget",
                format!(
                    "must be at least the per-attempt timeout ({}s)",
                    self.per_attempt_timeout.as_secs()
                ),
            ));
        }
        if self.retries_per_mirror > 10 {
            return Err(ConfigError::range(
                "retries_per_mirror",
                "must be between 0 and 10",
            ));
        }
        if self.probe_timeout.is_zero() || self.transfer_timeout.is_zero() {
            return Err(ConfigError::range(
                "probe_timeout/transfer_timeout",
                "must be greater than 0",
            ));
        }
        if self.min_file_size >= self.max_file_size {
            return Err(ConfigError::range(
                "min_file_size",
                format!(
                    "must be below max_file_size ({} < {} required)",
                    self.min_file_size, self.max_file_size
                ),
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(ConfigError::range(
                "allowed_extensions",
                "must list at least one extension",
            ));
        }
        if self.max_connections == 0 || self.max_connections > 1000 {
            return Err(ConfigError::range(
                "max_connections",
                "must be between 1 and 1000",
            ));
        }
        if self.max_keepalive_per_host == 0 || self.max_keepalive_per_host > self.max_connections {
            return Err(ConfigError::range(
                "max_keepalive_per_host",
                format!("must be between 1 and max_connections ({})", self.max_connections),
            ));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(ConfigError::range(
                "connect_timeout/read_timeout",
                "must be greater than 0",
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::range("user_agent", "must not be empty"));
        }
        Ok(())
    }
}

fn mb_to_bytes(mb: f64) -> u64 {
    (mb * 1024.0 * 1024.0).round().max(0.0) as u64
}

fn parse_default_urls(urls: &[&str]) -> Vec<Url> {
    // Compile-time constants; a parse failure here is a defect in this file.
    urls.iter().filter_map(|u| Url::parse(u).ok()).collect()
}

fn read_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env_u64(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match read_env(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::env(var, raw, e.to_string())),
    }
}

fn parse_env_f64(var: &'static str) -> Result<Option<f64>, ConfigError> {
    match read_env(var) {
        None => Ok(None),
        Some(raw) => {
            let value = raw
                .trim()
                .parse::<f64>()
                .map_err(|e| ConfigError::env(var, raw.clone(), e.to_string()))?;
            if value.is_finite() && value >= 0.0 {
                Ok(Some(value))
            } else {
                Err(ConfigError::env(var, raw, "must be a non-negative number"))
            }
        }
    }
}

fn parse_url_list(var: &'static str, raw: &str) -> Result<Vec<Url>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| Url::parse(part).map_err(|e| ConfigError::env(var, part, e.to_string())))
        .collect()
}
