//! Aggregating listener.

use parking_lot::RwLock;

use super::{Message, MessageHandler, Severity};

/// Stores every message it receives.
#[derive(Debug, Default)]
pub struct MessageCollector {
    messages: RwLock<Vec<Message>>,
}

impl MessageCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    /// Returns collected messages of one severity.
    #[must_use]
    pub fn by_severity(&self, severity: Severity) -> Vec<Message> {
        self.messages
            .read()
            .iter()
            .filter(|m| m.severity() == severity)
            .cloned()
            .collect()
    }

    /// Error messages.
    #[must_use]
    pub fn errors(&self) -> Vec<Message> {
        self.by_severity(Severity::Error)
    }

    /// Warning messages.
    #[must_use]
    pub fn warnings(&self) -> Vec<Message> {
        self.by_severity(Severity::Warning)
    }

    /// Status messages.
    #[must_use]
    pub fn status_messages(&self) -> Vec<Message> {
        self.by_severity(Severity::Status)
    }

    /// Returns true if any error was collected.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.messages
            .read()
            .iter()
            .any(|m| m.severity() == Severity::Error)
    }

    /// All messages rendered one per line.
    #[must_use]
    pub fn log_text(&self) -> String {
        self.messages
            .read()
            .iter()
            .map(Message::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Returns the number of collected messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Drops all collected messages.
    pub fn clear(&self) {
        self.messages.write().clear();
    }
}

impl MessageHandler for MessageCollector {
    fn on_message(&self, message: &Message) {
        self.messages.write().push(message.clone());
    }
}
