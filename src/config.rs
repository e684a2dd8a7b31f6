//! Configuration file parser for ~/.config/feedvoice/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::content::{CleanerConfig, MAX_INPUT_BYTES, MIN_CLEAN_CHARS};
use crate::feed::MAX_DOCUMENT_SIZE;
use crate::pipeline::{PipelineConfig, ENTRY_WORKERS, FEED_WORKERS, MAX_ENTRIES_PER_FEED};

/// Environment variable that overrides `api_token`.
pub const TOKEN_ENV_VAR: &str = "FEEDVOICE_TOKEN";

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

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
///
/// SEC-015: Custom Debug impl masks `api_token` to prevent secret leakage
/// in logs, error messages, and debug output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feeds processed concurrently.
    pub feed_workers: usize,

    /// Entries cleaned concurrently within one feed.
    pub entry_workers: usize,

    /// Hard ceiling for one feed fetch, in seconds.
    pub fetch_timeout_secs: u64,

    /// Entries kept per feed, in document order.
    pub max_entries_per_feed: usize,

    /// Raw entry bodies above this size are rejected without cleaning.
    pub max_input_bytes: usize,

    /// Cleaned text shorter than this (in characters) is discarded.
    pub min_clean_chars: usize,

    /// HTTP response body limit for feed documents.
    pub max_document_bytes: usize,

    /// OPML subscription file. Defaults to `feeds.opml` in the config directory.
    pub opml_path: Option<PathBuf>,

    /// SQLite database holding consumed entry ids.
    pub read_state_db: Option<PathBuf>,

    /// Bearer token sent with feed fetches (alternative to FEEDVOICE_TOKEN).
    /// Env var takes precedence over config file.
    pub api_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_workers: FEED_WORKERS,
            entry_workers: ENTRY_WORKERS,
            fetch_timeout_secs: 15,
            max_entries_per_feed: MAX_ENTRIES_PER_FEED,
            max_input_bytes: MAX_INPUT_BYTES,
            min_clean_chars: MIN_CLEAN_CHARS,
            max_document_bytes: MAX_DOCUMENT_SIZE,
            opml_path: None,
            read_state_db: None,
            api_token: None,
        }
    }
}

/// SEC-015: Mask api_token in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("feed_workers", &self.feed_workers)
            .field("entry_workers", &self.entry_workers)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("max_entries_per_feed", &self.max_entries_per_feed)
            .field("max_input_bytes", &self.max_input_bytes)
            .field("min_clean_chars", &self.min_clean_chars)
            .field("max_document_bytes", &self.max_document_bytes)
            .field("opml_path", &self.opml_path)
            .field("read_state_db", &self.read_state_db)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

const KNOWN_KEYS: &[&str] = &[
    "feed_workers",
    "entry_workers",
    "fetch_timeout_secs",
    "max_entries_per_feed",
    "max_input_bytes",
    "min_clean_chars",
    "max_document_bytes",
    "opml_path",
    "read_state_db",
    "api_token",
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    /// - Zero worker counts or timeout → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
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

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            feed_workers = config.feed_workers,
            entry_workers = config.entry_workers,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parses and validates TOML text. Blank text yields the defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        // Parse as a raw table first to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed_workers == 0 {
            return Err(ConfigError::Invalid("feed_workers must be at least 1".into()));
        }
        if self.entry_workers == 0 {
            return Err(ConfigError::Invalid("entry_workers must be at least 1".into()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_secs must be at least 1".into()));
        }
        if self.max_document_bytes == 0 {
            return Err(ConfigError::Invalid("max_document_bytes must be at least 1".into()));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            feed_workers: self.feed_workers,
            entry_workers: self.entry_workers,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_entries_per_feed: self.max_entries_per_feed,
        }
    }

    pub fn cleaner_config(&self) -> CleanerConfig {
        CleanerConfig {
            max_input_bytes: self.max_input_bytes,
            min_chars: self.min_clean_chars,
        }
    }

    /// The bearer token to send, FEEDVOICE_TOKEN first, then `api_token`.
    pub fn api_token(&self) -> Option<SecretString> {
        pick_token(std::env::var(TOKEN_ENV_VAR).ok(), self.api_token.as_deref())
    }
}

fn pick_token(env: Option<String>, file: Option<&str>) -> Option<SecretString> {
    env.filter(|t| !t.trim().is_empty())
        .or_else(|| file.filter(|t| !t.trim().is_empty()).map(str::to_string))
        .map(SecretString::from)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feed_workers, 5);
        assert_eq!(config.entry_workers, 5);
        assert_eq!(config.fetch_timeout_secs, 15);
        assert_eq!(config.max_entries_per_feed, 15);
        assert_eq!(config.max_input_bytes, 500_000);
        assert_eq!(config.min_clean_chars, 50);
        assert!(config.opml_path.is_none());
        assert!(config.api_token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedvoice_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.feed_workers, 5);
    }

    #[test]
    fn test_whitespace_only_returns_default() {
        let config = Config::from_toml("   \n  \n  ").unwrap();
        assert_eq!(config.entry_workers, 5);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::from_toml("entry_workers = 2\n").unwrap();
        assert_eq!(config.entry_workers, 2);
        assert_eq!(config.feed_workers, 5);
        assert_eq!(config.fetch_timeout_secs, 15);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
feed_workers = 3
entry_workers = 4
fetch_timeout_secs = 20
max_entries_per_feed = 10
max_input_bytes = 100000
min_clean_chars = 80
max_document_bytes = 2048
opml_path = "/tmp/feeds.opml"
read_state_db = "/tmp/read.db"
api_token = "test-token-123"
"#;
        let config = Config::from_toml(content).unwrap();
        assert_eq!(config.feed_workers, 3);
        assert_eq!(config.opml_path.as_deref(), Some(Path::new("/tmp/feeds.opml")));
        assert_eq!(config.read_state_db.as_deref(), Some(Path::new("/tmp/read.db")));
        assert_eq!(config.api_token.as_deref(), Some("test-token-123"));

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.feed_workers, 3);
        assert_eq!(pipeline.entry_workers, 4);
        assert_eq!(pipeline.fetch_timeout, Duration::from_secs(20));
        assert_eq!(pipeline.max_entries_per_feed, 10);

        let cleaner = config.cleaner_config();
        assert_eq!(cleaner.max_input_bytes, 100_000);
        assert_eq!(cleaner.min_chars, 80);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::from_toml("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::from_toml("feed_workers = \"five\"\n").is_err());
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::from_toml("feed_workers = 2\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.feed_workers, 2);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::from_toml("feed_workers = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(Config::from_toml("entry_workers = 0\n").is_err());
        assert!(Config::from_toml("fetch_timeout_secs = 0\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join("feedvoice_config_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "fetch_timeout_secs = 5\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.pipeline_config().fetch_timeout, Duration::from_secs(5));

        std::fs::remove_dir_all(&dir).ok();
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("feedvoice_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    // SEC-015: Debug output masks the token
    #[test]
    fn test_debug_masks_api_token() {
        let config = Config {
            api_token: Some("super-secret-token-12345".to_string()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-token-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_env_token_wins_over_file() {
        let token = pick_token(Some("from-env".into()), Some("from-file")).unwrap();
        assert_eq!(token.expose_secret(), "from-env");

        let token = pick_token(None, Some("from-file")).unwrap();
        assert_eq!(token.expose_secret(), "from-file");

        let token = pick_token(Some("  ".into()), Some("from-file")).unwrap();
        assert_eq!(token.expose_secret(), "from-file");

        assert!(pick_token(None, None).is_none());
    }
}
