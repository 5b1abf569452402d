//! Cooperative cancellation for pipeline runs.
//!
//! A [`CancellationToken`] is shared between the driver of a pipeline and the
//! stages it runs. Stages poll it at safe points; nothing is ever terminated
//! preemptively.

mod token;

pub use token::CancellationToken;
