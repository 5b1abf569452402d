use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogRotation, LoggingConfig};

/// Builds the filter: `RUST_LOG` when set, the configured level otherwise.
#[must_use]
pub fn log_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Creates the rolling file appender, or `None` when no directory is configured.
#[must_use]
pub fn rolling_writer(config: &LoggingConfig) -> Option<RollingFileAppender> {
    let directory = config.directory.as_ref()?;
    let rotation = match config.rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    };
    Some(RollingFileAppender::new(rotation, directory, &config.file_prefix))
}

/// Installs the global subscriber.
///
/// Logs always go to stderr. With a configured directory they are also written
/// to rotating files through a background thread; keep the returned guard
/// alive until shutdown so buffered lines are flushed. Calling this twice
/// leaves the first subscriber in place.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let (file_writer, guard) = match rolling_writer(config) {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(log_filter(config));
    let result = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(file_writer.map(|w| fmt::layer().json().with_ansi(false).with_writer(w)))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!("Tracing subscriber already installed: {e}");
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_directory_no_writer() {
        assert!(rolling_writer(&LoggingConfig::default()).is_none());
    }

    #[test]
    fn test_rolling_writer_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: Some(dir.path().to_path_buf()),
            rotation: LogRotation::Never,
            ..LoggingConfig::default()
        };
        let mut writer = rolling_writer(&config).unwrap();
        std::io::Write::write_all(&mut writer, b"line\n").unwrap();
        std::io::Write::flush(&mut writer).unwrap();
        assert!(dir.path().join("stagehost.log").exists());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        assert!(init_tracing(&config).is_none());
        assert!(init_tracing(&config).is_none());
    }
}
