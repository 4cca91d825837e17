//! Hardware abstraction layer for the swsync agents.
//!
//! The vendor driver is an external collaborator; this crate defines the
//! typed surface the reconcilers program against:
//!
//! - [`SaiStatus`] / [`SaiError`]: the backend status taxonomy and its
//!   mapping into the engine's retry/idempotence policy
//! - [`SaiObjectId`]: phantom-typed object ids so a next-hop id can never be
//!   passed where a router-interface id is expected
//! - [`api::SwitchApi`]: single-object create/set/remove primitives plus
//!   capability queries
//! - [`bulker::EntityBulker`] / [`bulker::ObjectBulker`]: batched entry and
//!   object operations with per-entry status handles
//! - [`mock::MockSwitch`]: the in-process backend used by every test

pub mod api;
pub mod bulker;
pub mod mock;

mod error;
mod types;

pub use error::{SaiError, SaiResult, SaiStatus};
pub use types::*;
