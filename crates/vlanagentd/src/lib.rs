//! vlanagentd - kernel-side reconciliation.
//!
//! Applies VLAN, bridge-member, interface-address and switch flood-control
//! intent to the Linux kernel through `ip`/`bridge` shell-outs, and mirrors
//! results onto the app bus for the ASIC-side consumers.
//!
//! Dependency ordering is enforced through the state bus: a member joins a
//! VLAN only once both the port and the VLAN publish `state=ok`; until then
//! the member entry stays in its inbox.

mod agent;
mod bridge;
mod commands;
mod exec;
mod tables;
mod types;

pub use agent::VlanAgent;
pub use bridge::BridgeMembership;
pub use commands::*;
pub use exec::{RecordingShell, ShellExecutor, SystemShell};
pub use tables::*;
pub use types::{FloodControl, TaggingMode};
