//! Table and field names for the kernel-side agent.

/// Config-side tables this daemon consumes.
pub const CFG_VLAN_TABLE: &str = "VLAN";
pub const CFG_VLAN_MEMBER_TABLE: &str = "VLAN_MEMBER";
pub const CFG_INTERFACE_TABLE: &str = "INTERFACE";
pub const CFG_SWITCH_TABLE: &str = "SWITCH";

/// The record key under `SWITCH` carrying flood-control intent. Configured
/// explicitly; the legacy spelling is accepted on read.
pub const SWITCH_FLOOD_CONTROL_KEY: &str = "FLOOD_CONTROL";
pub const SWITCH_FLOOD_CONTROL_LEGACY_KEY: &str = "SWITCH_ATTR";

/// Field names.
pub mod fields {
    pub const ADMIN_STATUS: &str = "admin_status";
    pub const MTU: &str = "mtu";
    pub const TAGGING_MODE: &str = "tagging_mode";
    /// Legacy inline member list from minigraph-era configs.
    pub const MEMBERS: &str = "members@";
    pub const UNICAST_FLOOD: &str = "unicast_flood";
    pub const MULTICAST_FLOOD: &str = "multicast_flood";
    pub const BROADCAST_FLOOD: &str = "broadcast_flood";
    pub const STATE: &str = "state";
}

/// Default MTU for members brought up by this daemon.
pub const DEFAULT_MEMBER_MTU: u32 = 9100;
