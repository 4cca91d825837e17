//! Router-interface reconciliation.

mod orch;
mod types;

pub use orch::IntfsOrch;
pub use types::{any_rif_subnet_contains, RifEntry, RifTable, DEFAULT_RIF_MTU};
