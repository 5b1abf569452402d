//! Listener that builds the JSON message arrays of service responses.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{Message, MessageHandler, MessageOrigin, Severity};

/// One entry of an `Errors`/`Warnings` response array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageEntry {
    /// Error or warning code; 0 for status lines.
    pub code: i32,
    /// Message text.
    pub message: String,
    /// Label of the producing stage, or the pipeline name.
    pub filter_human_label: String,
    /// Pipeline index of the producing stage, or -1.
    pub filter_index: i64,
}

impl MessageEntry {
    /// The entry as a response object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "Code": self.code,
            "Message": self.message,
            "FilterHumanLabel": self.filter_human_label,
            "FilterIndex": self.filter_index,
        })
    }
}

impl From<&Message> for MessageEntry {
    fn from(message: &Message) -> Self {
        let (label, index) = match message.origin() {
            MessageOrigin::Stage(origin) => (
                origin.human_label.clone(),
                i64::try_from(origin.index).unwrap_or(i64::MAX),
            ),
            MessageOrigin::Pipeline { name } => (name.clone(), -1),
            MessageOrigin::Generic => (String::new(), -1),
        };
        Self {
            code: message.code().unwrap_or(0),
            message: message.text().to_string(),
            filter_human_label: label,
            filter_index: index,
        }
    }
}

#[derive(Debug, Default)]
struct Entries {
    errors: Vec<MessageEntry>,
    warnings: Vec<MessageEntry>,
    status: Vec<MessageEntry>,
}

/// Collects errors, warnings and status lines as serializable entries.
#[derive(Debug, Default)]
pub struct JsonResponseListener {
    entries: RwLock<Entries>,
}

impl JsonResponseListener {
    /// Creates an empty listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected errors.
    #[must_use]
    pub fn errors(&self) -> Vec<MessageEntry> {
        self.entries.read().errors.clone()
    }

    /// Collected warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<MessageEntry> {
        self.entries.read().warnings.clone()
    }

    /// Collected status lines.
    #[must_use]
    pub fn status(&self) -> Vec<MessageEntry> {
        self.entries.read().status.clone()
    }

    /// Errors as a JSON array.
    #[must_use]
    pub fn errors_json(&self) -> serde_json::Value {
        entries_json(&self.entries.read().errors)
    }

    /// Warnings as a JSON array.
    #[must_use]
    pub fn warnings_json(&self) -> serde_json::Value {
        entries_json(&self.entries.read().warnings)
    }

    /// Status lines as a JSON array.
    #[must_use]
    pub fn status_json(&self) -> serde_json::Value {
        entries_json(&self.entries.read().status)
    }
}

fn entries_json(entries: &[MessageEntry]) -> serde_json::Value {
    serde_json::Value::Array(entries.iter().map(MessageEntry::to_json).collect())
}

impl MessageHandler for JsonResponseListener {
    fn on_message(&self, message: &Message) {
        let entry = MessageEntry::from(message);
        let mut entries = self.entries.write();
        match message.severity() {
            Severity::Error => entries.errors.push(entry),
            Severity::Warning => entries.warnings.push(entry),
            Severity::Status => entries.status.push(entry),
            Severity::Progress => {}
        }
    }
}
