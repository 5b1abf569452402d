//! Per-call context handed to a stage.

use crate::cancellation::CancellationToken;
use crate::messages::{Message, MessageBus, MessageOrigin, StageOrigin};

/// What a stage sees while validating or executing.
///
/// Every message published through the context is stage-scoped and carries the
/// stage's pipeline index.
pub struct StageContext<'a> {
    bus: &'a MessageBus,
    cancel: &'a CancellationToken,
    origin: StageOrigin,
    error_code: i32,
    warning_code: i32,
}

impl<'a> StageContext<'a> {
    /// Creates a context for the stage at `origin.index`.
    #[must_use]
    pub fn new(bus: &'a MessageBus, cancel: &'a CancellationToken, origin: StageOrigin) -> Self {
        Self {
            bus,
            cancel,
            origin,
            error_code: 0,
            warning_code: 0,
        }
    }

    /// Identity of the running stage.
    #[must_use]
    pub const fn origin(&self) -> &StageOrigin {
        &self.origin
    }

    /// Pipeline index of the running stage.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.origin.index
    }

    /// Publishes an error and marks the stage failed.
    ///
    /// The first negative code sticks; later errors are still published.
    pub fn error(&mut self, code: i32, text: impl Into<String>) {
        let code = if code < 0 { code } else { -1 };
        if self.error_code >= 0 {
            self.error_code = code;
        }
        self.publish(Message::error(self.scope(), code, text));
    }

    /// Publishes a warning.
    pub fn warning(&mut self, code: i32, text: impl Into<String>) {
        if self.warning_code >= 0 {
            self.warning_code = code;
        }
        self.publish(Message::warning(self.scope(), code, text));
    }

    /// Publishes a status line.
    pub fn status(&self, text: impl Into<String>) {
        self.publish(Message::status(self.scope(), text));
    }

    /// Publishes a progress update.
    pub fn progress(&self, percent: i32, text: impl Into<String>) {
        self.publish(Message::progress(self.scope(), percent, text));
    }

    /// Returns true once the run has been cancelled. Poll at safe points.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The run's cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        self.cancel
    }

    /// First error code reported through [`error`](Self::error), or 0.
    #[must_use]
    pub const fn error_code(&self) -> i32 {
        self.error_code
    }

    /// First warning code reported through [`warning`](Self::warning), or 0.
    #[must_use]
    pub const fn warning_code(&self) -> i32 {
        self.warning_code
    }

    fn scope(&self) -> MessageOrigin {
        MessageOrigin::Stage(self.origin.clone())
    }

    fn publish(&self, message: Message) {
        self.bus.publish(&message);
    }
}

impl std::fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("origin", &self.origin)
            .field("error_code", &self.error_code)
            .field("warning_code", &self.warning_code)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
