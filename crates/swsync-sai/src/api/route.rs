//! Route-entry and label-route-entry bulk surface.

use async_trait::async_trait;
use swsync_types::{IpPrefix, Label};

use crate::{CounterOid, RawObjectId, SaiStatus, VirtualRouterOid};

/// Identity of a route entry in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub vrf: VirtualRouterOid,
    pub prefix: IpPrefix,
}

impl RouteKey {
    pub fn new(vrf: VirtualRouterOid, prefix: IpPrefix) -> Self {
        Self { vrf, prefix }
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.vrf, self.prefix)
    }
}

/// Identity of an in-segment (label) entry in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelRouteKey {
    pub vrf: VirtualRouterOid,
    pub label: Label,
}

impl std::fmt::Display for LabelRouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.vrf, self.label)
    }
}

/// What to do with packets hitting the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketAction {
    #[default]
    Forward,
    Drop,
    Trap,
}

/// Attributes stageable on a route entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAttr {
    PacketAction(PacketAction),
    /// Raw id: a next hop, a next-hop group or a router interface.
    NextHopId(RawObjectId),
    /// `None` unbinds the flow counter.
    CounterId(Option<CounterOid>),
    /// Label-route pop count.
    PopCount(u8),
}

/// Batched entry operations; one status per staged op, in order.
///
/// Implementations must not reorder within a batch.
#[async_trait]
pub trait RouteBulkApi<K: Send + Sync>: Send + Sync {
    async fn bulk_create(&self, entries: &[(K, Vec<RouteAttr>)]) -> Vec<SaiStatus>;
    async fn bulk_set(&self, entries: &[(K, RouteAttr)]) -> Vec<SaiStatus>;
    async fn bulk_remove(&self, keys: &[K]) -> Vec<SaiStatus>;
}
