//! Configuration loading and resolution
//!
//! Settings are resolved with the following priority:
//! 1. Environment variables (highest priority)
//! 2. TOML config file
//! 3. Compiled defaults (fallback)
//!
//! A missing config file is not an error: a warning is logged and the
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "TRIALSCOPE_CONFIG";

/// Environment variable for the NCBI E-utilities API key (pubmed, pmc)
pub const NCBI_API_KEY_ENV: &str = "TRIALSCOPE_NCBI_API_KEY";

/// Environment variable for the openFDA API key
pub const OPENFDA_API_KEY_ENV: &str = "TRIALSCOPE_OPENFDA_API_KEY";

/// Environment variable overriding the log level
pub const LOG_LEVEL_ENV: &str = "TRIALSCOPE_LOG_LEVEL";

/// Names of the built-in sources, in fixed priority order
pub const BUILTIN_SOURCES: [&str; 5] = ["clinical_trials", "pubmed", "pmc", "openfda", "web_search"];

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Fan-out search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Instruction payload limits
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Per-source settings keyed by source name
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Fan-out search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Caller-level deadline for one `search_all` invocation
    #[serde(default = "default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,
    /// Result cache TTL; 0 disables the cache
    #[serde(default)]
    pub cache_ttl_secs: u64,
    /// Event bus buffer capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl SearchConfig {
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            overall_timeout_secs: default_overall_timeout_secs(),
            cache_ttl_secs: 0,
            event_capacity: default_event_capacity(),
        }
    }
}

/// Instruction payload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Maximum characters of the user section of a generated prompt
    #[serde(default = "default_prompt_max_chars")]
    pub max_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_chars: default_prompt_max_chars(),
        }
    }
}

/// Per-source settings
///
/// Every field is optional in TOML; unset fields fall back to the
/// source's compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Whether the source is registered at all
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Override of the provider base URL
    #[serde(default)]
    pub base_url: Option<String>,
    /// Provider API key (environment takes priority)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Hit count above which a search is considered over-broad
    #[serde(default)]
    pub max_hits: Option<usize>,
    /// Transport attempts before giving up
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Base delay of the exponential backoff between attempts
    #[serde(default)]
    pub backoff_base_ms: Option<u64>,
    /// Client-side request rate limit
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

impl SourceConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5790
}

fn default_overall_timeout_secs() -> u64 {
    60
}

fn default_event_capacity() -> usize {
    256
}

fn default_prompt_max_chars() -> usize {
    12_000
}

impl TomlConfig {
    /// Load configuration from the resolved config file path, then apply
    /// environment overrides.
    ///
    /// A missing file yields compiled defaults with a warning.
    pub fn load() -> Result<Self> {
        let mut config = match resolve_config_path() {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                read_toml_config(&path)?
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                TomlConfig::default()
            }
            None => {
                warn!("Could not determine config directory, using compiled defaults");
                TomlConfig::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (ENV beats TOML)
    pub fn apply_env_overrides(&mut self) {
        if let Some(level) = env_value(LOG_LEVEL_ENV) {
            self.logging.level = level;
        }

        if let Some(key) = env_value(NCBI_API_KEY_ENV) {
            for source in ["pubmed", "pmc"] {
                self.sources.entry(source.to_string()).or_default().api_key = Some(key.clone());
            }
        }

        if let Some(key) = env_value(OPENFDA_API_KEY_ENV) {
            self.sources.entry("openfda".to_string()).or_default().api_key = Some(key);
        }

        for source in BUILTIN_SOURCES {
            let var = format!("TRIALSCOPE_{}_BASE_URL", source.to_uppercase());
            if let Some(url) = env_value(&var) {
                self.sources.entry(source.to_string()).or_default().base_url = Some(url);
            }
        }
    }

    /// Settings for one source (defaults when not configured)
    pub fn source(&self, name: &str) -> SourceConfig {
        self.sources.get(name).cloned().unwrap_or_default()
    }
}

/// Read a non-empty, non-whitespace environment variable
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the config file path
///
/// `$TRIALSCOPE_CONFIG` if set, otherwise `<config_dir>/trialscope/config.toml`.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Some(path) = env_value(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("trialscope").join("config.toml"))
}

/// Parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.server.port, 5790);
        assert_eq!(config.search.overall_timeout(), Duration::from_secs(60));
        assert!(config.search.cache_ttl().is_none());
        assert!(config.source("pubmed").is_enabled());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [search]
            cache_ttl_secs = 300

            [sources.pubmed]
            max_hits = 25
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.search.overall_timeout_secs, 60);
        assert_eq!(config.search.cache_ttl(), Some(Duration::from_secs(300)));
        let pubmed = config.source("pubmed");
        assert_eq!(pubmed.max_hits, Some(25));
        assert!(!pubmed.is_enabled());
        assert_eq!(pubmed.timeout_secs, None);
    }

    #[test]
    fn test_unknown_source_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.source("nope"), SourceConfig::default());
    }
}
