//! Log output setup for the binaries.

mod logging;

pub use logging::{init_tracing, log_filter, rolling_writer};
