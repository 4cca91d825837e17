//! Well-known table names and channels.
//!
//! Exact strings are part of the interop surface; external observers key on
//! them.

// Config-side tables (CONFIG_DB, `TABLE|key`).
pub const CFG_VLAN_TABLE: &str = "VLAN";
pub const CFG_VLAN_MEMBER_TABLE: &str = "VLAN_MEMBER";
pub const CFG_PORT_TABLE: &str = "PORT";
pub const CFG_INTERFACE_TABLE: &str = "INTERFACE";
pub const CFG_SWITCH_TABLE: &str = "SWITCH";
pub const CFG_VRF_TABLE: &str = "VRF";
pub const CFG_ARS_PROFILE_TABLE: &str = "ARS_PROFILE";
pub const CFG_ARS_INTERFACE_TABLE: &str = "ARS_INTERFACE";
pub const CFG_ARS_OBJECT_TABLE: &str = "ARS_OBJECT";
pub const CFG_ARS_NEXTHOP_TABLE: &str = "ARS_NEXTHOP";
pub const CFG_FG_NHG_TABLE: &str = "FG_NHG";
pub const CFG_FG_NHG_PREFIX_TABLE: &str = "FG_NHG_PREFIX";
pub const CFG_FG_NHG_MEMBER_TABLE: &str = "FG_NHG_MEMBER";

// App-side tables (APPL_DB, `TABLE:key`).
pub const APP_ROUTE_TABLE: &str = "ROUTE_TABLE";
pub const APP_NEIGH_TABLE: &str = "NEIGH_TABLE";
pub const APP_INTF_TABLE: &str = "INTF_TABLE";
pub const APP_PORT_TABLE: &str = "PORT_TABLE";
pub const APP_LAG_TABLE: &str = "LAG_TABLE";
pub const APP_LAG_MEMBER_TABLE: &str = "LAG_MEMBER_TABLE";
pub const APP_VLAN_TABLE: &str = "VLAN_TABLE";
pub const APP_VLAN_MEMBER_TABLE: &str = "VLAN_MEMBER_TABLE";
pub const APP_NEXTHOP_GROUP_TABLE: &str = "NEXTHOP_GROUP_TABLE";
pub const APP_CLASS_BASED_NEXTHOP_GROUP_TABLE: &str = "CLASS_BASED_NEXT_HOP_GROUP_TABLE";
pub const APP_LABEL_ROUTE_TABLE: &str = "LABEL_ROUTE_TABLE";
pub const APP_SRV6_SID_LIST_TABLE: &str = "SRV6_SID_LIST_TABLE";
pub const APP_SRV6_MY_SID_TABLE: &str = "SRV6_MY_SID_TABLE";
pub const APP_BUFFER_POOL_TABLE: &str = "BUFFER_POOL_TABLE";
pub const APP_BUFFER_PROFILE_TABLE: &str = "BUFFER_PROFILE_TABLE";
pub const APP_BUFFER_PG_TABLE: &str = "BUFFER_PG_TABLE";
pub const APP_BUFFER_QUEUE_TABLE: &str = "BUFFER_QUEUE_TABLE";

// State-side tables (STATE_DB, `TABLE:key`).
pub const STATE_PORT_TABLE: &str = "PORT_TABLE";
pub const STATE_LAG_TABLE: &str = "LAG_TABLE";
pub const STATE_VLAN_TABLE: &str = "VLAN_TABLE";
pub const STATE_ROUTE_TABLE: &str = "ROUTE_TABLE";
pub const STATE_ARS_PROFILE_TABLE: &str = "ARS_PROFILE_TABLE";
pub const STATE_ARS_CAPABILITY_TABLE: &str = "ARS_CAPABILITY_TABLE";
pub const STATE_FG_ROUTE_TABLE: &str = "FG_ROUTE_TABLE";

// Counters-side tables (COUNTERS_DB, `TABLE:key`).
pub const COUNTERS_ROUTE_TO_COUNTER_TABLE: &str = "COUNTERS_ROUTE_NAME_MAP";
pub const COUNTERS_ROUTE_TO_PATTERN_TABLE: &str = "COUNTERS_ROUTE_TO_PATTERN_MAP";
pub const COUNTERS_RIF_NAME_MAP: &str = "COUNTERS_RIF_NAME_MAP";

// Error-side tables and channels (ERROR_DB).
pub const ERROR_TABLE_PREFIX: &str = "ERROR_";
pub const ERROR_CHANNEL_SUFFIX: &str = "_CHANNEL";
pub const ERROR_FLUSH_CHANNEL: &str = "FLUSH_ERROR_DB";

/// `ROUTE_TABLE` -> `ERROR_ROUTE_TABLE`.
pub fn error_table_name(app_table: &str) -> String {
    format!("{}{}", ERROR_TABLE_PREFIX, app_table)
}

/// `ROUTE_TABLE` -> `ERROR_ROUTE_TABLE_CHANNEL`.
pub fn error_channel_name(app_table: &str) -> String {
    format!(
        "{}{}{}",
        ERROR_TABLE_PREFIX, app_table, ERROR_CHANNEL_SUFFIX
    )
}

/// `ERROR_ROUTE_TABLE` -> `ROUTE_TABLE`.
pub fn app_table_of_error_table(error_table: &str) -> Option<&str> {
    error_table.strip_prefix(ERROR_TABLE_PREFIX)
}
