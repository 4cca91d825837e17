//! orchd - the ASIC-side reconciliation daemon.
//!
//! Watches app-side intent tables on the bus, reconciles them against the
//! hardware abstraction layer, and publishes results and errors back:
//!
//! ```text
//! [APPL_DB] ──> Consumer inboxes ──> orchestrators ──> SwitchApi / bulkers
//!      ^                                   │
//!      └──── STATE_DB / COUNTERS_DB / ERROR_DB <───────┘
//! ```
//!
//! Orchestrator modules:
//!
//! - [`intfs`]: router interfaces, refcounted by routes and neighbors
//! - [`neigh`]: neighbors and their next-hop objects
//! - [`route`]: routes, next-hop groups, flow-counter binding
//! - [`nhg`]: index-keyed next-hop groups (plain and class-based)
//! - [`fg_nhg`]: fine-grained ECMP bucket programming
//! - [`srv6`]: SID lists and local SIDs
//! - [`ars`]: adaptive-routing profiles
//! - [`error`]: the error bus
//! - [`daemon`]: wiring and the main loop

pub mod ars;
pub mod context;
pub mod daemon;
pub mod error;
pub mod fg_nhg;
pub mod intfs;
pub mod neigh;
pub mod nhg;
pub mod route;
pub mod srv6;

/// Shared handle to a resource table; the daemon loop is single-threaded, so
/// the lock is only ever briefly contended by the notification feeds.
pub type Shared<T> = std::sync::Arc<std::sync::Mutex<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    std::sync::Arc::new(std::sync::Mutex::new(value))
}
