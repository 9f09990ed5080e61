//! Configuration file parser for ~/.config/feedrelay/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning for each one
//! since they are usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::analysis::{KeywordTables, ScoreWeights};
use crate::feed::{FetchSettings, DEFAULT_WORKERS};
use crate::pipeline::DEFAULT_FRESHNESS_HOURS;
use crate::storage::{RetentionConfig, MAX_WINDOW_DAYS};

/// Env var that overrides `delivery.token`.
pub const WEBHOOK_TOKEN_ENV: &str = "FEEDRELAY_WEBHOOK_TOKEN";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but is outside its allowed range.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding the feed configuration and history documents.
    /// Defaults to `feedrelay.db` next to the config file.
    pub database_path: Option<PathBuf>,
    pub fetch: FetchConfig,
    pub history: HistoryConfig,
    pub delivery: DeliveryConfig,
    pub keywords: KeywordTables,
    pub scoring: ScoreWeights,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Concurrent feed downloads
    pub workers: usize,
    pub timeout_secs: u64,
    /// Articles older than this are not notified
    pub freshness_hours: i64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub max_feed_size_bytes: usize,
    pub user_agent: Option<String>,
    pub allow_private_hosts: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let settings = FetchSettings::default();
        Self {
            workers: DEFAULT_WORKERS,
            timeout_secs: settings.timeout.as_secs(),
            freshness_hours: DEFAULT_FRESHNESS_HOURS,
            max_retries: settings.max_retries,
            retry_base_delay_ms: 1000,
            max_feed_size_bytes: settings.max_feed_size,
            user_agent: None,
            allow_private_hosts: false,
        }
    }
}

/// Retention defaults for a newly created history document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
    pub retention_days: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        let retention = RetentionConfig::default();
        Self {
            max_entries: retention.max_history_size,
            retention_days: retention.cleanup_days,
        }
    }
}

/// SEC-015: Custom Debug impl masks `token` to prevent secret leakage
/// in logs, error messages, and debug output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Digest is printed to stdout when unset
    pub webhook_url: Option<String>,
    /// Bearer token (alternative to FEEDRELAY_WEBHOOK_TOKEN env var).
    /// Env var takes precedence over config file.
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            token: None,
            timeout_secs: 15,
        }
    }
}

impl std::fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("webhook_url", &self.webhook_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "database_path",
        "fetch",
        "history",
        "delivery",
        "keywords",
        "scoring",
    ];

    /// `~/.config/feedrelay`
    pub fn default_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("feedrelay"))
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    /// - Non-positive or out-of-range history/freshness windows → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            workers = config.fetch.workers,
            webhook = config.delivery.webhook_url.is_some(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let max_hours = MAX_WINDOW_DAYS * 24;
        if !(1..=max_hours).contains(&self.fetch.freshness_hours) {
            return Err(ConfigError::Invalid(format!(
                "fetch.freshness_hours must be between 1 and {max_hours}, got {}",
                self.fetch.freshness_hours
            )));
        }
        self.retention()
            .validate()
            .map_err(|reason| ConfigError::Invalid(format!("[history] {reason}")))
    }

    /// Database path, falling back to `feedrelay.db` in `config_dir`.
    pub fn database_path_in(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feedrelay.db"))
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        let defaults = FetchSettings::default();
        FetchSettings {
            timeout: Duration::from_secs(self.fetch.timeout_secs),
            max_retries: self.fetch.max_retries,
            retry_base_delay: Duration::from_millis(self.fetch.retry_base_delay_ms),
            max_feed_size: self.fetch.max_feed_size_bytes,
            user_agent: self.fetch.user_agent.clone().unwrap_or(defaults.user_agent),
            allow_private_hosts: self.fetch.allow_private_hosts,
        }
    }

    /// Falls back to the default window when `freshness_hours` is unusable.
    pub fn freshness(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.fetch.freshness_hours)
            .filter(|d| *d > chrono::Duration::zero() && d.num_days() <= MAX_WINDOW_DAYS)
            .unwrap_or_else(|| chrono::Duration::hours(DEFAULT_FRESHNESS_HOURS))
    }

    pub fn retention(&self) -> RetentionConfig {
        RetentionConfig {
            max_history_size: self.history.max_entries,
            cleanup_days: self.history.retention_days,
        }
    }

    /// Webhook token from the environment, else from the config file.
    pub fn webhook_token(&self) -> Option<SecretString> {
        self.webhook_token_with_env(std::env::var(WEBHOOK_TOKEN_ENV).ok())
    }

    fn webhook_token_with_env(&self, env_token: Option<String>) -> Option<SecretString> {
        env_token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.delivery.token.clone())
            .map(SecretString::from)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("feedrelay_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch.workers, 10);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.fetch.freshness_hours, 24);
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.history.max_entries, 1000);
        assert_eq!(config.history.retention_days, 30);
        assert_eq!(config.delivery.timeout_secs, 15);
        assert!(config.delivery.webhook_url.is_none());
        assert!(!config.fetch.allow_private_hosts);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedrelay_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.fetch.workers, 10);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.history.max_entries, 1000);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let (dir, path) = write_config(
            "full",
            r#"
database_path = "/var/lib/feedrelay/store.db"

[fetch]
workers = 4
timeout_secs = 10
freshness_hours = 48
max_retries = 1
retry_base_delay_ms = 250
user_agent = "custom-agent/1.0"

[history]
max_entries = 50
retention_days = 7

[delivery]
webhook_url = "https://hooks.example.com/notify"
token = "file-token"
timeout_secs = 5

[keywords]
trend = ["hype"]

[scoring]
base = 40.0
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/var/lib/feedrelay/store.db"))
        );
        assert_eq!(config.fetch.workers, 4);
        assert_eq!(config.freshness(), chrono::Duration::hours(48));
        assert_eq!(
            config.retention(),
            RetentionConfig {
                max_history_size: 50,
                cleanup_days: 7
            }
        );

        let settings = config.fetch_settings();
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.max_retries, 1);
        assert_eq!(settings.retry_base_delay, Duration::from_millis(250));
        assert_eq!(settings.user_agent, "custom-agent/1.0");

        assert_eq!(config.keywords.trend, vec!["hype".to_string()]);
        assert_eq!(config.keywords.tool, KeywordTables::default().tool);
        assert_eq!(config.scoring.base, 40.0);
        assert_eq!(config.delivery_timeout(), Duration::from_secs(5));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (dir, path) = write_config("unknown", "totally_fake_key = 1\n[fetch]\nworkers = 2\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.fetch.workers, 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "[fetch]\nworkers = \"many\"\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_out_of_range_windows_rejected() {
        for (name, content) in [
            ("neg_retention", "[history]\nretention_days = -1\n"),
            ("huge_retention", "[history]\nretention_days = 9223372036854775807\n"),
            ("zero_entries", "[history]\nmax_entries = 0\n"),
            ("zero_freshness", "[fetch]\nfreshness_hours = 0\n"),
            ("huge_freshness", "[fetch]\nfreshness_hours = 9223372036854775807\n"),
        ] {
            let (dir, path) = write_config(name, content);
            let err = Config::load(&path).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{name}: {err}");
            std::fs::remove_dir_all(&dir).ok();
        }
    }

    #[test]
    fn test_freshness_never_panics_on_unvalidated_values() {
        let mut config = Config::default();
        config.fetch.freshness_hours = i64::MAX;
        assert_eq!(config.freshness(), chrono::Duration::hours(24));
        config.fetch.freshness_hours = -3;
        assert_eq!(config.freshness(), chrono::Duration::hours(24));
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_env_token_takes_precedence() {
        let mut config = Config::default();
        config.delivery.token = Some("file-token".to_string());

        let token = config.webhook_token_with_env(Some("env-token".to_string())).unwrap();
        assert_eq!(token.expose_secret(), "env-token");

        let token = config.webhook_token_with_env(None).unwrap();
        assert_eq!(token.expose_secret(), "file-token");

        config.delivery.token = None;
        assert!(config.webhook_token_with_env(Some("  ".to_string())).is_none());
    }

    #[test]
    fn test_database_path_defaults_to_config_dir() {
        let config = Config::default();
        assert_eq!(
            config.database_path_in(Path::new("/home/u/.config/feedrelay")),
            PathBuf::from("/home/u/.config/feedrelay/feedrelay.db")
        );
    }

    // SEC-015: Debug output masks the token
    #[test]
    fn test_debug_masks_token() {
        let mut config = Config::default();
        config.delivery.token = Some("super-secret-key-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
