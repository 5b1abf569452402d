//! Immutable message values published on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::MessageHandler;

/// Message severity, independent of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A failure with a negative code.
    Error,
    /// A non-fatal condition with a code.
    Warning,
    /// A human-readable status line.
    Status,
    /// A percentage progress update.
    Progress,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Status => write!(f, "status"),
            Self::Progress => write!(f, "progress"),
        }
    }
}

/// The severity-specific payload of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    /// Error with its code.
    Error {
        /// Signed code; negative values are application error classes.
        code: i32,
    },
    /// Warning with its code.
    Warning {
        /// Signed code.
        code: i32,
    },
    /// Status line.
    Status,
    /// Progress update.
    Progress {
        /// Completion percentage, 0 to 100.
        percent: i32,
    },
}

impl MessageKind {
    /// Returns the severity of this kind.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Error { .. } => Severity::Error,
            Self::Warning { .. } => Severity::Warning,
            Self::Status => Severity::Status,
            Self::Progress { .. } => Severity::Progress,
        }
    }

    /// Returns the code carried by errors and warnings.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Error { code } | Self::Warning { code } => Some(*code),
            Self::Status | Self::Progress { .. } => None,
        }
    }
}

/// Identifies the stage that produced a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageOrigin {
    /// Registered class name of the stage.
    pub class_name: String,
    /// Label shown to users.
    pub human_label: String,
    /// Position of the stage within its pipeline.
    pub index: usize,
}

impl StageOrigin {
    /// Creates a stage origin.
    #[must_use]
    pub fn new(class_name: impl Into<String>, human_label: impl Into<String>, index: usize) -> Self {
        Self {
            class_name: class_name.into(),
            human_label: human_label.into(),
            index,
        }
    }
}

/// Where a message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Not tied to a stage or pipeline.
    Generic,
    /// Produced by a stage.
    Stage(StageOrigin),
    /// Produced by the pipeline engine.
    Pipeline {
        /// Display name of the pipeline.
        name: String,
    },
}

/// A message published on the [`super::MessageBus`].
///
/// Messages are created once and never mutated; listeners only borrow them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    kind: MessageKind,
    origin: MessageOrigin,
    text: String,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a message.
    #[must_use]
    pub fn new(kind: MessageKind, origin: MessageOrigin, text: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates an error message.
    #[must_use]
    pub fn error(origin: MessageOrigin, code: i32, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Error { code }, origin, text)
    }

    /// Creates a warning message.
    #[must_use]
    pub fn warning(origin: MessageOrigin, code: i32, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Warning { code }, origin, text)
    }

    /// Creates a status message.
    #[must_use]
    pub fn status(origin: MessageOrigin, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Status, origin, text)
    }

    /// Creates a progress message. The percentage is clamped to 0..=100.
    #[must_use]
    pub fn progress(origin: MessageOrigin, percent: i32, text: impl Into<String>) -> Self {
        Self::new(
            MessageKind::Progress {
                percent: percent.clamp(0, 100),
            },
            origin,
            text,
        )
    }

    /// The severity-specific payload.
    #[must_use]
    pub const fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// The message scope.
    #[must_use]
    pub const fn origin(&self) -> &MessageOrigin {
        &self.origin
    }

    /// The human-readable text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// When the message was created.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Shorthand for `kind().severity()`.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.kind.severity()
    }

    /// Code for errors and warnings.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        self.kind.code()
    }

    /// The stage origin, for stage-scoped messages.
    #[must_use]
    pub const fn stage(&self) -> Option<&StageOrigin> {
        match &self.origin {
            MessageOrigin::Stage(origin) => Some(origin),
            _ => None,
        }
    }

    /// Stage label, pipeline name, or empty for generic messages.
    #[must_use]
    pub fn prefix(&self) -> &str {
        match &self.origin {
            MessageOrigin::Generic => "",
            MessageOrigin::Stage(origin) => &origin.human_label,
            MessageOrigin::Pipeline { name } => name,
        }
    }

    /// Renders the message as a single log line.
    #[must_use]
    pub fn render(&self) -> String {
        let prefix = self.prefix();
        let body = if prefix.is_empty() {
            self.text.clone()
        } else {
            format!("{prefix}: {}", self.text)
        };
        match self.kind {
            MessageKind::Error { code } => format!("Error ({code}): {body}"),
            MessageKind::Warning { code } => format!("Warning ({code}): {body}"),
            MessageKind::Status => body,
            MessageKind::Progress { percent } => format!("{} {percent}%", self.text),
        }
    }

    /// Calls the one handler method matching this message's kind and scope.
    pub fn dispatch(&self, handler: &dyn MessageHandler) {
        match (&self.kind, &self.origin) {
            (MessageKind::Error { .. }, MessageOrigin::Generic) => handler.on_generic_error(self),
            (MessageKind::Warning { .. }, MessageOrigin::Generic) => {
                handler.on_generic_warning(self);
            }
            (MessageKind::Status, MessageOrigin::Generic) => handler.on_generic_status(self),
            (MessageKind::Progress { .. }, MessageOrigin::Generic) => {
                handler.on_generic_progress(self);
            }
            (MessageKind::Error { .. }, MessageOrigin::Stage(origin)) => {
                handler.on_stage_error(self, origin);
            }
            (MessageKind::Warning { .. }, MessageOrigin::Stage(origin)) => {
                handler.on_stage_warning(self, origin);
            }
            (MessageKind::Status, MessageOrigin::Stage(origin)) => {
                handler.on_stage_status(self, origin);
            }
            (MessageKind::Progress { .. }, MessageOrigin::Stage(origin)) => {
                handler.on_stage_progress(self, origin);
            }
            (MessageKind::Error { .. }, MessageOrigin::Pipeline { name }) => {
                handler.on_pipeline_error(self, name);
            }
            (MessageKind::Warning { .. }, MessageOrigin::Pipeline { name }) => {
                handler.on_pipeline_warning(self, name);
            }
            (MessageKind::Status, MessageOrigin::Pipeline { name }) => {
                handler.on_pipeline_status(self, name);
            }
            (MessageKind::Progress { .. }, MessageOrigin::Pipeline { name }) => {
                handler.on_pipeline_progress(self, name);
            }
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
