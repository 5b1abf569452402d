//! Per-kind message handler trait.

use super::{Message, StageOrigin};

/// A listener on the message bus.
///
/// [`Message::dispatch`] calls exactly one of the twelve scope-specific
/// methods. Each of those defaults to its severity-level method
/// (`on_error`, `on_warning`, `on_status`, `on_progress`), which in turn
/// defaults to [`on_message`](Self::on_message), a no-op. Implement only the
/// level you care about.
#[allow(unused_variables)]
pub trait MessageHandler: Send + Sync {
    /// Fallback for every message kind.
    fn on_message(&self, message: &Message) {}

    /// Any error message.
    fn on_error(&self, message: &Message) {
        self.on_message(message);
    }

    /// Any warning message.
    fn on_warning(&self, message: &Message) {
        self.on_message(message);
    }

    /// Any status message.
    fn on_status(&self, message: &Message) {
        self.on_message(message);
    }

    /// Any progress message.
    fn on_progress(&self, message: &Message) {
        self.on_message(message);
    }

    /// Error without a stage or pipeline scope.
    fn on_generic_error(&self, message: &Message) {
        self.on_error(message);
    }

    /// Warning without a stage or pipeline scope.
    fn on_generic_warning(&self, message: &Message) {
        self.on_warning(message);
    }

    /// Status without a stage or pipeline scope.
    fn on_generic_status(&self, message: &Message) {
        self.on_status(message);
    }

    /// Progress without a stage or pipeline scope.
    fn on_generic_progress(&self, message: &Message) {
        self.on_progress(message);
    }

    /// Error raised by a stage.
    fn on_stage_error(&self, message: &Message, origin: &StageOrigin) {
        self.on_error(message);
    }

    /// Warning raised by a stage.
    fn on_stage_warning(&self, message: &Message, origin: &StageOrigin) {
        self.on_warning(message);
    }

    /// Status reported by a stage.
    fn on_stage_status(&self, message: &Message, origin: &StageOrigin) {
        self.on_status(message);
    }

    /// Progress reported by a stage.
    fn on_stage_progress(&self, message: &Message, origin: &StageOrigin) {
        self.on_progress(message);
    }

    /// Error raised by the pipeline engine.
    fn on_pipeline_error(&self, message: &Message, pipeline: &str) {
        self.on_error(message);
    }

    /// Warning raised by the pipeline engine.
    fn on_pipeline_warning(&self, message: &Message, pipeline: &str) {
        self.on_warning(message);
    }

    /// Status reported by the pipeline engine.
    fn on_pipeline_status(&self, message: &Message, pipeline: &str) {
        self.on_status(message);
    }

    /// Progress reported by the pipeline engine.
    fn on_pipeline_progress(&self, message: &Message, pipeline: &str) {
        self.on_progress(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageOrigin;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct StageErrorsOnly {
        seen: Mutex<Vec<(usize, i32)>>,
    }

    impl MessageHandler for StageErrorsOnly {
        fn on_stage_error(&self, message: &Message, origin: &StageOrigin) {
            self.seen
                .lock()
                .push((origin.index, message.code().unwrap_or_default()));
        }
    }

    #[derive(Default)]
    struct Everything {
        count: Mutex<usize>,
    }

    impl MessageHandler for Everything {
        fn on_message(&self, _message: &Message) {
            *self.count.lock() += 1;
        }
    }

    fn sample() -> Vec<Message> {
        let stage = MessageOrigin::Stage(StageOrigin::new("A", "A", 1));
        let pipeline = MessageOrigin::Pipeline {
            name: "p".to_string(),
        };
        vec![
            Message::error(stage.clone(), -5, "e"),
            Message::warning(stage.clone(), -6, "w"),
            Message::status(stage.clone(), "s"),
            Message::progress(stage, 10, "p"),
            Message::error(pipeline.clone(), -9, "pe"),
            Message::status(pipeline, "ps"),
            Message::error(MessageOrigin::Generic, -1, "ge"),
            Message::progress(MessageOrigin::Generic, 50, "gp"),
        ]
    }

    #[test]
    fn test_handler_overrides_only_one_kind() {
        let handler = StageErrorsOnly::default();
        for msg in sample() {
            msg.dispatch(&handler);
        }
        assert_eq!(*handler.seen.lock(), vec![(1, -5)]);
    }

    #[test]
    fn test_fallback_receives_every_kind() {
        let handler = Everything::default();
        for msg in sample() {
            msg.dispatch(&handler);
        }
        assert_eq!(*handler.count.lock(), 8);
    }
}
