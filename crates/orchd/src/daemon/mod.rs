//! Daemon wiring and the main loop.

mod orchdaemon;

pub use orchdaemon::{OrchDaemon, OrchDaemonConfig};
