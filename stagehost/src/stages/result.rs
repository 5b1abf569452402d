//! Stage outcome types.

use serde::{Deserialize, Serialize};

/// Result of a stage's `validate` or `execute`.
pub type StageResult = Result<(), StageError>;

/// Error reported by a stage.
///
/// The engine publishes it as a stage-scoped error message carrying `code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Signed error code; always negative once constructed.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl StageError {
    /// Code used when a stage fails without choosing one.
    pub const GENERIC_CODE: i32 = -1;

    /// Creates a stage error. Non-negative codes are mapped to [`Self::GENERIC_CODE`].
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: if code < 0 { code } else { Self::GENERIC_CODE },
            message: message.into(),
        }
    }

    /// A required parameter has no usable value.
    #[must_use]
    pub fn missing_parameter(property: &str) -> Self {
        Self::new(-11000, format!("The '{property}' parameter must be set"))
    }

    /// Wraps an IO failure.
    #[must_use]
    pub fn io(code: i32, context: &str, err: &std::io::Error) -> Self {
        Self::new(code, format!("{context}: {err}"))
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}) {}", self.code, self.message)
    }
}

impl std::error::Error for StageError {}
