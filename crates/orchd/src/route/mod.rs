//! Route reconciliation: prefixes to next hops, groups and counters.

mod flow_counter;
mod nexthop;
mod nhg;
mod orch;
mod types;

pub use flow_counter::{FlowCounterState, RoutePattern, FLOW_COUNTER_ROUTE_PATTERN_TABLE};
pub use nexthop::NextHopKey;
pub use nhg::{NextHopGroupEntry, NextHopGroupKey, NextHopGroupMemberEntry, NextHopGroupTable};
pub use orch::RouteOrch;
pub use types::{parse_route_intent, RouteIntent, RouteNhg, RouteParseError, RouteTables};
