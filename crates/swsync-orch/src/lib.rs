//! The reconciliation engine shared by every swsync agent.
//!
//! An agent is a set of orchestrators multiplexed over one cooperative loop:
//!
//! 1. [`Consumer`]s subscribe to named tables and merge the delta stream
//!    into a latest-intent inbox per key
//! 2. the [`SelectorLoop`] blocks on all feeds at once and drains ready
//!    consumers in table-priority order
//! 3. each [`Orch`] settles, defers or rejects inbox entries per the
//!    [`TaskStatus`] taxonomy
//! 4. backend statuses map into that taxonomy through the idempotence rules
//!    in [`task`]
//!
//! Supporting pieces: [`SyncMap`] for refcounted resource tables,
//! [`Observable`] for cross-orchestrator events, [`Recorder`] for the audit
//! trail, [`SelectableTimer`] for periodic work and [`RingBuffer`] for the
//! optional deferred-execution offload.

mod consumer;
mod observable;
mod orch;
mod recorder;
mod ring;
mod select;
mod sync_map;
pub mod task;
mod timer;

pub use consumer::{Consumer, ConsumerConfig};
pub use observable::{Observable, SubscriptionHandle};
pub use orch::{Orch, OrchCore, DEFAULT_BATCH_SIZE};
pub use recorder::Recorder;
pub use ring::RingBuffer;
pub use select::SelectorLoop;
pub use sync_map::{RefCounted, SyncMap, SyncMapError};
pub use task::TaskStatus;
pub use timer::SelectableTimer;

// The delta unit is the bus's; re-exported so handlers need one import.
pub use swsync_bus::{FieldValues, KeyOpFieldsValues, Operation};
