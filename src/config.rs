//! Briefwire configuration management
//!
//! Two TOML files: `config.toml` (service configuration) and `feeds.toml`
//! (the ordered feed catalog, managed by [`crate::feeds::FeedRegistry`]).
//! String values of the form `${VAR}` are substituted from the environment
//! before deserialization.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main Briefwire configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM provider configuration
    #[serde(default)]
    pub ai: AiConfig,

    /// SMTP delivery configuration
    #[serde(default)]
    pub email: EmailConfig,

    /// Fetch/digest schedule configuration
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Digest filtering configuration
    #[serde(default)]
    pub filter: FilterConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Concurrency limits
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Admin surface configuration
    #[serde(default)]
    pub web: WebConfig,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Provider label (informational)
    pub provider: String,

    /// API key for the chat-completions endpoint
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Base URL of an OpenAI-compatible endpoint
    pub base_url: String,

    /// Default max output tokens per call
    pub max_tokens: u32,

    /// Default sampling temperature
    pub temperature: f32,

    /// Per-call HTTP timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
            base_url: "https://api.deepseek.com/v1".to_string(),
            max_tokens: 4096,
            temperature: 0.3,
            request_timeout_secs: 60,
        }
    }
}

/// SMTP delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Implicit TLS when true, STARTTLS otherwise
    pub use_ssl: bool,
    pub username: String,
    pub password: String,
    pub from_addr: String,
    pub from_name: String,
    pub to_addrs: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 465,
            use_ssl: true,
            username: String::new(),
            password: String::new(),
            from_addr: String::new(),
            from_name: "Briefwire".to_string(),
            to_addrs: Vec::new(),
        }
    }
}

/// Schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Fetch interval, e.g. "2h", "30m"
    pub fetch_interval: String,

    /// Wall-clock digest times, e.g. ["09:00", "21:00"]
    pub digest_times: Vec<String>,

    /// IANA timezone name for digest times
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fetch_interval: "2h".to_string(),
            digest_times: vec!["09:00".to_string(), "21:00".to_string()],
            timezone: "UTC".to_string(),
        }
    }
}

/// Digest filtering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Target number of top picks when the score threshold yields too few
    pub top_pick_count: usize,

    /// Minimum value score for quick reads
    pub min_score: f64,

    /// Cap on units considered per digest window
    pub max_articles_per_digest: usize,

    /// Override for the preset L3 root-category list (empty = built-in)
    #[serde(default)]
    pub root_categories: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            top_pick_count: 5,
            min_score: 5.0,
            max_articles_per_digest: 100,
            root_categories: Vec::new(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path; the vector index and trace directory are
    /// derived from it
    pub database_path: PathBuf,

    /// Articles older than this are swept
    pub article_retention_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/briefwire.db"),
            article_retention_days: 30,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub storage_path: PathBuf,
    pub retention_days: i64,
    /// Messages/responses longer than this are truncated before recording
    pub max_content_length: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_path: PathBuf::from("data/telemetry"),
            retention_days: 30,
            max_content_length: 10_000,
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Feed fetch worker pool width
    pub max_concurrent_fetches: usize,

    /// Full-text extraction pool width
    pub max_concurrent_extractions: usize,

    /// Concurrent article analyses
    pub max_concurrent_analyses: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 10,
            max_concurrent_extractions: 5,
            max_concurrent_analyses: 5,
        }
    }
}

/// Admin surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,

    /// Explicit CORS origin allowlist (no wildcard)
    pub allowed_origins: Vec<String>,

    /// Maximum concurrent WebSocket connections
    pub max_ws_connections: usize,

    /// WebSocket read timeout in seconds
    pub ws_read_timeout_secs: u64,

    /// WebSocket heartbeat interval in seconds
    pub ws_heartbeat_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18990,
            allowed_origins: vec!["http://127.0.0.1:18990".to_string()],
            max_ws_connections: 100,
            ws_read_timeout_secs: 30,
            ws_heartbeat_secs: 15,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, expanding `${VAR}` references.
    ///
    /// Missing credentials or an invalid timezone are fatal: the caller
    /// should not start the scheduler.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&raw)
    }

    /// Parse configuration from TOML text, expanding `${VAR}` references.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut value: toml::Value = toml::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        expand_env_vars(&mut value);
        let config: AppConfig = value
            .try_into()
            .map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the parts that must fail fast at startup.
    pub fn validate(&self) -> Result<()> {
        if self.schedule.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(Error::Config(format!(
                "invalid timezone: {}",
                self.schedule.timezone
            )));
        }
        crate::scheduler::parse_interval(&self.schedule.fetch_interval)?;
        for time in &self.schedule.digest_times {
            crate::scheduler::parse_wall_clock(time)?;
        }
        Ok(())
    }

    /// The fail-fast check for modes that actually call the model.
    pub fn require_api_key(&self) -> Result<()> {
        if self.ai.api_key.trim().is_empty() {
            return Err(Error::Config(
                "ai.api_key is not set (use api_key = \"${BRIEFWIRE_API_KEY}\")".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory that sibling data files (vector index, traces) live in.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .database_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Recursively substitute `${VAR}` string values from the environment.
///
/// A string that is exactly `${NAME}` is replaced with the variable's value,
/// or the empty string when unset, matching the config loader contract.
fn expand_env_vars(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                *s = std::env::var(name).unwrap_or_default();
            }
        }
        toml::Value::Array(items) => {
            for item in items {
                expand_env_vars(item);
            }
        }
        toml::Value::Table(table) => {
            for (_, v) in table.iter_mut() {
                expand_env_vars(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency.max_concurrent_fetches, 10);
        assert_eq!(config.telemetry.max_content_length, 10_000);
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("BRIEFWIRE_TEST_KEY", "sk-test-123");
        let config = AppConfig::from_toml(
            r#"
            [ai]
            api_key = "${BRIEFWIRE_TEST_KEY}"
            "#,
        )
        .unwrap();
        assert_eq!(config.ai.api_key, "sk-test-123");
    }

    #[test]
    fn test_env_expansion_unset_var_is_empty() {
        let config = AppConfig::from_toml(
            r#"
            [ai]
            api_key = "${BRIEFWIRE_DEFINITELY_UNSET}"
            "#,
        )
        .unwrap();
        assert!(config.ai.api_key.is_empty());
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_env_expansion_in_arrays() {
        std::env::set_var("BRIEFWIRE_TEST_ADDR", "ops@example.com");
        let config = AppConfig::from_toml(
            r#"
            [email]
            to_addrs = ["${BRIEFWIRE_TEST_ADDR}", "second@example.com"]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.email.to_addrs,
            vec!["ops@example.com", "second@example.com"]
        );
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [schedule]
            timezone = "Mars/Olympus_Mons"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [schedule]
            fetch_interval = "every tuesday"
            "#,
        );
        assert!(result.is_err());
    }
}
