//! Fine-grained group configuration and bucket state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use swsync_sai::{NextHopGroupMemberOid, NextHopGroupOid};
use swsync_types::{IpAddress, IpPrefix};


/// One hash bucket: the member currently mapped to it and its backend
/// member object.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub member: IpAddress,
    pub member_id: NextHopGroupMemberOid,
}

/// A configured fine-grained group.
#[derive(Debug, Default)]
pub struct FgNhgGroup {
    pub bucket_size: u32,
    /// Configured member addresses.
    pub members: BTreeSet<IpAddress>,
    /// Members currently active (present in the route's key and resolved).
    pub active: BTreeSet<IpAddress>,
    pub group_id: Option<NextHopGroupOid>,
    /// bucket index -> assignment; `None` before the first route syncs.
    pub buckets: Vec<Option<Bucket>>,
}

impl FgNhgGroup {
    pub fn new(bucket_size: u32) -> Self {
        Self {
            bucket_size,
            ..Self::default()
        }
    }

    /// Initial assignment: members round-robin across all buckets.
    pub fn assign_round_robin(active: &[IpAddress], bucket_size: u32) -> Vec<IpAddress> {
        let mut assignment = Vec::with_capacity(bucket_size as usize);
        for i in 0..bucket_size as usize {
            assignment.push(active[i % active.len()]);
        }
        assignment
    }

    /// Buckets owned by a member that left are redistributed round-robin
    /// among the survivors; all other buckets keep their mapping, so flows
    /// pinned to them are not re-hashed.
    pub fn redistribute(current: &[IpAddress], active: &[IpAddress]) -> Vec<IpAddress> {
        let mut next = current.to_vec();
        let mut cursor = 0usize;
        for slot in next.iter_mut() {
            if !active.contains(slot) {
                *slot = active[cursor % active.len()];
                cursor += 1;
            }
        }
        next
    }

    /// A returning member reclaims its fair share, pulling buckets
    /// round-robin from the most loaded members.
    pub fn rebalance_in(current: &[IpAddress], active: &[IpAddress]) -> Vec<IpAddress> {
        let mut next = current.to_vec();
        let target = next.len() / active.len();

        let mut loads: BTreeMap<IpAddress, usize> = BTreeMap::new();
        for member in active {
            loads.insert(*member, 0);
        }
        for slot in &next {
            *loads.entry(*slot).or_insert(0) += 1;
        }

        let starved: Vec<IpAddress> = active
            .iter()
            .filter(|m| loads.get(m).copied().unwrap_or(0) < target)
            .copied()
            .collect();
        for member in starved {
            while loads.get(&member).copied().unwrap_or(0) < target {
                // Take one bucket from the currently most loaded member.
                let Some((donor, _)) = loads
                    .iter()
                    .filter(|(m, _)| **m != member)
                    .max_by_key(|(_, count)| **count)
                    .map(|(m, c)| (*m, *c))
                else {
                    break;
                };
                let Some(slot) = next.iter_mut().find(|s| **s == donor) else {
                    break;
                };
                *slot = member;
                *loads.get_mut(&donor).expect("donor counted") -= 1;
                *loads.get_mut(&member).expect("member counted") += 1;
            }
        }
        next
    }
}

/// All fine-grained configuration plus the per-group runtime state.
#[derive(Default)]
pub struct FgNhgState {
    pub groups: HashMap<String, FgNhgGroup>,
    /// Configured prefix -> group name.
    pub prefixes: HashMap<IpPrefix, String>,
    /// Configured member address -> group name.
    pub member_index: HashMap<IpAddress, String>,
}

impl FgNhgState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_of_prefix(&self, prefix: &IpPrefix) -> Option<&String> {
        self.prefixes.get(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddress {
        s.parse().unwrap()
    }

    #[test]
    fn round_robin_initial_assignment() {
        let active = vec![ip("10.0.0.1"), ip("10.0.0.2")];
        let buckets = FgNhgGroup::assign_round_robin(&active, 6);
        assert_eq!(buckets.iter().filter(|b| **b == ip("10.0.0.1")).count(), 3);
        assert_eq!(buckets.iter().filter(|b| **b == ip("10.0.0.2")).count(), 3);
    }

    #[test]
    fn member_loss_keeps_surviving_buckets_pinned() {
        let active = vec![ip("10.0.0.1"), ip("10.0.0.2"), ip("10.0.0.3")];
        let buckets = FgNhgGroup::assign_round_robin(&active, 6);

        let survivors = vec![ip("10.0.0.1"), ip("10.0.0.3")];
        let after = FgNhgGroup::redistribute(&buckets, &survivors);

        for (before, after) in buckets.iter().zip(after.iter()) {
            if *before != ip("10.0.0.2") {
                // Untouched buckets keep their member.
                assert_eq!(before, after);
            } else {
                assert!(survivors.contains(after));
            }
        }
    }

    #[test]
    fn member_return_reclaims_fair_share() {
        let all = vec![ip("10.0.0.1"), ip("10.0.0.2")];
        let buckets = FgNhgGroup::assign_round_robin(&all, 8);
        let after_loss = FgNhgGroup::redistribute(&buckets, &[ip("10.0.0.1")]);
        assert!(after_loss.iter().all(|b| *b == ip("10.0.0.1")));

        let after_return = FgNhgGroup::rebalance_in(&after_loss, &all);
        let count_2 = after_return.iter().filter(|b| **b == ip("10.0.0.2")).count();
        assert_eq!(count_2, 4);
    }
}
