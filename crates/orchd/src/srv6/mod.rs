//! SRv6 reconciliation: segment lists and local SIDs.

mod orch;
mod types;

pub use orch::Srv6Orch;
pub use types::{parse_behavior, parse_my_sid_key, MySidEntry, SidListEntry, Srv6State};
