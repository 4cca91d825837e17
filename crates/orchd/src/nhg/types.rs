//! Shared read surface of the index-keyed groups.

use swsync_orch::{RefCounted, SyncMap};
use swsync_sai::RawObjectId;

/// What the route path sees for one group index: the id to point routes at
/// and whether it is a temporary stand-in (`isTemp` in the read contract,
/// so routes know to keep retrying until promotion).
#[derive(Debug)]
pub struct NhgIndexEntry {
    pub group_oid: RawObjectId,
    pub is_temp: bool,
    ref_count: u32,
}

impl NhgIndexEntry {
    pub fn new(group_oid: RawObjectId, is_temp: bool) -> Self {
        Self {
            group_oid,
            is_temp,
            ref_count: 0,
        }
    }
}

impl RefCounted for NhgIndexEntry {
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

/// index string -> group entry. Owned by the group orchestrator; the route
/// orchestrator reads and refcounts.
pub type NhgIndexTable = SyncMap<String, NhgIndexEntry>;
