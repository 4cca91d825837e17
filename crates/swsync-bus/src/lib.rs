//! Bus client abstraction.
//!
//! All intent and state in the system lives in a handful of logical
//! databases on a shared Redis instance. This crate provides:
//!
//! - [`DbId`]: the database identities and their key separators
//! - [`KeyOpFieldsValues`]: the per-key delta unit flowing to consumers
//! - [`Bus`]: typed get/set/del table accessors, per-table delta
//!   subscriptions and pub/sub notification channels
//! - [`MemoryBus`]: hermetic in-process implementation backing the tests
//! - [`RedisBus`]: the production implementation over the `redis` crate
//! - [`tables`]: the well-known table-name strings observers interop on

pub mod tables;

mod bus;
mod mem;
mod redis_bus;
mod types;

pub use bus::{Bus, BusError, BusResult, DeltaSubscription, NotificationSubscription};
pub use mem::MemoryBus;
pub use redis_bus::{RedisBus, RedisBusConfig};
pub use types::{DbId, FieldValues, KeyOpFieldsValues, Operation};
