//! Typed message bus.
//!
//! Stages and the pipeline engine publish [`Message`] values; listeners
//! implement [`MessageHandler`] and override only the kinds they care about.
//!
//! - [`MessageCollector`] keeps everything in memory
//! - [`FileLogListener`] appends one severity to a file
//! - [`JsonResponseListener`] builds service response arrays
//! - [`TracingListener`] forwards to `tracing`

mod bus;
mod collector;
mod file_log;
mod handler;
mod json;
mod logging;
mod message;

pub use bus::{ListenerId, MessageBus};
pub use collector::MessageCollector;
pub use file_log::FileLogListener;
pub use handler::MessageHandler;
pub use json::{JsonResponseListener, MessageEntry};
pub use logging::TracingListener;
pub use message::{Message, MessageKind, MessageOrigin, Severity, StageOrigin};
