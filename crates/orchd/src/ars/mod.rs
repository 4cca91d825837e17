//! Adaptive routing and switching profiles.

mod orch;
mod types;

pub use orch::ArsOrch;
pub use types::{ArsProfile, LagPathSelectorMode, NhgPathSelectorMode};
