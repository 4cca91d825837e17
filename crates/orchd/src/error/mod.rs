//! The error bus: normalized backend failures for external consumers.

mod orch;
mod sink;

pub use orch::{ErrorOrch, SAI_ERROR_NOTIFICATION_CHANNEL};
pub use sink::ErrorSink;
