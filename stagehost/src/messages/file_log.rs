//! Severity-specific log file listener.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{Message, MessageHandler, Severity};

/// Appends rendered messages of one severity to a file.
///
/// The file is opened, appended to and closed for every message, so it can be
/// read or archived while the pipeline is still running.
#[derive(Debug, Clone)]
pub struct FileLogListener {
    path: PathBuf,
    severity: Severity,
}

impl FileLogListener {
    /// Creates a listener for `severity` writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, severity: Severity) -> Self {
        Self {
            path: path.into(),
            severity,
        }
    }

    /// Error log.
    #[must_use]
    pub fn errors(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Severity::Error)
    }

    /// Warning log.
    #[must_use]
    pub fn warnings(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Severity::Warning)
    }

    /// Status log.
    #[must_use]
    pub fn status(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Severity::Status)
    }

    /// The file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl MessageHandler for FileLogListener {
    fn on_message(&self, message: &Message) {
        if message.severity() != self.severity {
            return;
        }
        if let Err(e) = self.append(&message.render()) {
            warn!(path = %self.path.display(), error = %e, "Failed to append to log file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageOrigin;

    #[test]
    fn test_appends_only_matching_severity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run-err.log");
        let listener = FileLogListener::errors(&path);

        Message::error(MessageOrigin::Generic, -1, "one").dispatch(&listener);
        Message::warning(MessageOrigin::Generic, -2, "ignored").dispatch(&listener);
        Message::error(MessageOrigin::Generic, -3, "two").dispatch(&listener);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Error (-1): one\nError (-3): two\n");
    }

    #[test]
    fn test_missing_directory_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let listener = FileLogListener::status(dir.path().join("nope").join("x.log"));
        Message::status(MessageOrigin::Generic, "lost").dispatch(&listener);
        assert!(!listener.path().exists());
    }
}
