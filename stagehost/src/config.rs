//! Service settings.
//!
//! Settings come from a TOML file. Every section and field is optional:
//!
//! ```toml
//! [listener]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [docroot]
//! path = "/srv/stagehost/www"
//!
//! [sessions]
//! root = "/var/lib/stagehost/sessions"
//! expiration_time_ms = 600000
//!
//! [logging]
//! directory = "/var/log/stagehost"
//! rotation = "daily"
//!
//! [plugins]
//! paths = ["/opt/stagehost/plugins"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "STAGEHOST_CONFIG";

/// Settings for the HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port; 0 picks a free port.
    pub port: u16,
    /// Async worker threads.
    pub min_threads: usize,
    /// Upper bound on threads running pipelines.
    pub max_threads: usize,
    /// Limit on receiving a request body. Pipeline runs are not bounded by it.
    pub read_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            min_threads: 4,
            max_threads: 16,
            read_timeout_ms: 300_000,
        }
    }
}

impl ListenerConfig {
    /// `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Body read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Settings for the static file fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocRootConfig {
    /// Directory served for unmatched paths; `None` disables the fallback.
    pub path: Option<PathBuf>,
    /// Total bytes the cache may hold.
    pub cache_size: usize,
    /// Files larger than this are never cached.
    pub max_cached_file_size: usize,
    /// Age after which a cached file is re-read.
    pub cache_time_ms: u64,
}

impl Default for DocRootConfig {
    fn default() -> Self {
        Self {
            path: None,
            cache_size: 16 * 1024 * 1024,
            max_cached_file_size: 1024 * 1024,
            cache_time_ms: 60_000,
        }
    }
}

impl DocRootConfig {
    /// Cache entry lifetime.
    #[must_use]
    pub const fn cache_time(&self) -> Duration {
        Duration::from_millis(self.cache_time_ms)
    }
}

/// Settings for request sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding one working directory per session.
    pub root: PathBuf,
    /// Cookie carrying the session id.
    pub cookie_name: String,
    /// Idle time after which a session expires.
    pub expiration_time_ms: u64,
    /// How often expired sessions are removed.
    pub sweep_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("stagehost-sessions"),
            cookie_name: "sessionid".to_string(),
            expiration_time_ms: 600_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl SessionConfig {
    /// Idle expiry.
    #[must_use]
    pub const fn expiration(&self) -> Duration {
        Duration::from_millis(self.expiration_time_ms)
    }

    /// Sweep period.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Log file rotation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// New file every minute.
    Minutely,
    /// New file every hour.
    Hourly,
    /// New file every day.
    #[default]
    Daily,
    /// A single file.
    Never,
}

/// Settings for the log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rolling log files; `None` logs to stderr only.
    pub directory: Option<PathBuf>,
    /// Log file name prefix.
    pub file_prefix: String,
    /// Rotation period.
    pub rotation: LogRotation,
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "stagehost.log".to_string(),
            rotation: LogRotation::Daily,
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Extra plugin directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Scanned after the built-in search paths.
    pub paths: Vec<PathBuf>,
}

/// All service settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener.
    pub listener: ListenerConfig,
    /// Static file fallback.
    pub docroot: DocRootConfig,
    /// Sessions.
    pub sessions: SessionConfig,
    /// Logging.
    pub logging: LoggingConfig,
    /// Plugins.
    pub plugins: PluginConfig,
}

impl ServiceConfig {
    /// Reads a settings file. A missing file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Reads a settings file, falling back to defaults on any failure.
    #[must_use]
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load settings, using defaults: {e}");
            Self::default()
        })
    }

    /// Parses settings text.
    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_file_is_all_defaults() {
        assert_eq!(ServiceConfig::from_toml("").unwrap(), ServiceConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = ServiceConfig::from_toml(
            r#"
            [listener]
            port = 9000
            max_threads = 2

            [docroot]
            path = "/srv/www"
            cache_time_ms = 5

            [logging]
            rotation = "hourly"
            json = true

            [plugins]
            paths = ["/a", "/b"]
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.listener.max_threads, 2);
        assert_eq!(config.listener.host, "127.0.0.1");
        assert_eq!(config.docroot.path, Some(PathBuf::from("/srv/www")));
        assert_eq!(config.docroot.cache_time(), Duration::from_millis(5));
        assert_eq!(config.logging.rotation, LogRotation::Hourly);
        assert!(config.logging.json);
        assert_eq!(config.plugins.paths.len(), 2);
        assert_eq!(config.sessions, SessionConfig::default());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServiceConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        assert_eq!(
            ServiceConfig::load_or_default(dir.path().join("missing.toml")),
            ServiceConfig::default()
        );
    }

    #[test]
    fn test_load_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[listener]\nport = \"eighty\"").unwrap();
        assert!(matches!(ServiceConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
