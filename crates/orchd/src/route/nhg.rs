//! Next-hop-group identity and the synced group table.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use swsync_orch::{RefCounted, SyncMap};
use swsync_sai::{NextHopGroupMemberOid, NextHopGroupOid};
use swsync_types::ParseError;

use super::nexthop::NextHopKey;

/// Canonical identity of an unordered next-hop multiset.
///
/// Backed by a sorted set, so permutation-equivalent groups serialize
/// identically and deduplicate to one backend object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NextHopGroupKey {
    nexthops: BTreeSet<NextHopKey>,
}

impl NextHopGroupKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(nexthop: NextHopKey) -> Self {
        let mut nexthops = BTreeSet::new();
        nexthops.insert(nexthop);
        Self { nexthops }
    }

    pub fn from_nexthops(nexthops: impl IntoIterator<Item = NextHopKey>) -> Self {
        Self {
            nexthops: nexthops.into_iter().collect(),
        }
    }

    pub fn add(&mut self, nexthop: NextHopKey) {
        self.nexthops.insert(nexthop);
    }

    pub fn remove(&mut self, nexthop: &NextHopKey) -> bool {
        self.nexthops.remove(nexthop)
    }

    pub fn contains(&self, nexthop: &NextHopKey) -> bool {
        self.nexthops.contains(nexthop)
    }

    pub fn len(&self) -> usize {
        self.nexthops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nexthops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NextHopKey> {
        self.nexthops.iter()
    }

    pub fn is_ecmp(&self) -> bool {
        self.nexthops.len() > 1
    }

    pub fn has_srv6(&self) -> bool {
        self.nexthops.iter().any(NextHopKey::is_srv6)
    }

    pub fn has_overlay(&self) -> bool {
        self.nexthops.iter().any(NextHopKey::is_overlay)
    }
}

impl fmt::Display for NextHopGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for nexthop in &self.nexthops {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{}", nexthop)?;
        }
        Ok(())
    }
}

impl FromStr for NextHopGroupKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::new());
        }
        let nexthops = s
            .split(',')
            .map(|part| part.trim().parse())
            .collect::<Result<BTreeSet<NextHopKey>, _>>()?;
        Ok(Self { nexthops })
    }
}

/// Backend ids of one group member.
#[derive(Debug, Clone, Copy)]
pub struct NextHopGroupMemberEntry {
    pub member_id: NextHopGroupMemberOid,
    /// 1-based position in the key's serialization order.
    pub seq_id: u32,
}

/// A live group: backend id, members and the route refcount.
#[derive(Debug)]
pub struct NextHopGroupEntry {
    pub group_id: NextHopGroupOid,
    ref_count: u32,
    pub members: HashMap<NextHopKey, NextHopGroupMemberEntry>,
}

impl NextHopGroupEntry {
    pub fn new(group_id: NextHopGroupOid) -> Self {
        Self {
            group_id,
            ref_count: 0,
            members: HashMap::new(),
        }
    }
}

impl RefCounted for NextHopGroupEntry {
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

/// Group table keyed by canonical group identity.
pub type NextHopGroupTable = SyncMap<NextHopGroupKey, NextHopGroupEntry>;
