//! Listener that forwards messages to `tracing`.

use tracing::{debug, error, info, warn, Level};

use super::{Message, MessageHandler, MessageOrigin};

/// Logs every message through the tracing framework.
///
/// Errors and warnings keep their own levels; status and progress lines use
/// the configured level.
#[derive(Debug, Clone)]
pub struct TracingListener {
    level: Level,
}

impl Default for TracingListener {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl TracingListener {
    /// Creates a listener logging status lines at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level listener.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn scope(message: &Message) -> (&str, i64) {
        match message.origin() {
            MessageOrigin::Stage(origin) => (
                origin.class_name.as_str(),
                i64::try_from(origin.index).unwrap_or(-1),
            ),
            MessageOrigin::Pipeline { name } => (name.as_str(), -1),
            MessageOrigin::Generic => ("", -1),
        }
    }
}

impl MessageHandler for TracingListener {
    fn on_error(&self, message: &Message) {
        let (source, index) = Self::scope(message);
        error!(
            code = message.code().unwrap_or_default(),
            source = %source,
            index,
            "{}", message.render()
        );
    }

    fn on_warning(&self, message: &Message) {
        let (source, index) = Self::scope(message);
        warn!(
            code = message.code().unwrap_or_default(),
            source = %source,
            index,
            "{}", message.render()
        );
    }

    fn on_message(&self, message: &Message) {
        let (source, index) = Self::scope(message);
        if self.level == Level::DEBUG {
            debug!(source = %source, index, "{}", message.render());
        } else {
            info!(source = %source, index, "{}", message.render());
        }
    }
}
