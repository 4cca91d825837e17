//! Neighbor table: next-hop objects and their flags.

use swsync_orch::{RefCounted, SyncMap};
use swsync_sai::NextHopOid;
use swsync_types::MacAddress;

use crate::route::NextHopKey;

/// One resolved (or synthesized) next hop.
#[derive(Debug)]
pub struct NeighborEntry {
    pub nh_id: NextHopOid,
    pub mac: MacAddress,
    /// The owning interface is operationally down; the next hop stays in
    /// group identities but is skipped from group membership.
    pub if_down: bool,
    /// Created on demand by the route path (MPLS/SRv6/overlay) rather than
    /// learned from the neighbor feed; torn down at refcount zero.
    pub synthetic: bool,
    ref_count: u32,
}

impl NeighborEntry {
    pub fn new(nh_id: NextHopOid, mac: MacAddress) -> Self {
        Self {
            nh_id,
            mac,
            if_down: false,
            synthetic: false,
            ref_count: 0,
        }
    }

    pub fn synthetic(nh_id: NextHopOid) -> Self {
        Self {
            nh_id,
            mac: MacAddress::ZERO,
            if_down: false,
            synthetic: true,
            ref_count: 0,
        }
    }
}

impl RefCounted for NeighborEntry {
    fn ref_count(&self) -> u32 {
        self.ref_count
    }

    fn inc_ref(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    fn dec_ref(&mut self) -> Option<u32> {
        self.ref_count = self.ref_count.checked_sub(1)?;
        Some(self.ref_count)
    }
}

/// (ip, alias) -> neighbor entry.
pub type NeighborTable = SyncMap<NextHopKey, NeighborEntry>;

/// Availability change emitted to the route orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEvent {
    pub key: NextHopKey,
    /// False while the owning interface is down.
    pub available: bool,
}
