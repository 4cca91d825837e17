//! Fine-grained ECMP orchestrator and the route-facing bucket programming.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use swsync_bus::{tables, Bus, DbId, Operation};
use swsync_orch::{Consumer, ConsumerConfig, Orch, OrchCore, TaskStatus};
use swsync_sai::api::{MemberRequest, NextHopGroupType, SwitchApi};
use swsync_sai::{RawObjectId, VirtualRouterOid};
use swsync_types::{IpAddress, IpPrefix};

use super::types::{Bucket, FgNhgGroup, FgNhgState};
use crate::context::DEFAULT_VRF;
use crate::neigh::NeighborTable;
use crate::route::NextHopGroupKey;
use crate::Shared;

/// The fine-grained group name managing `prefix`, if any. Fine-grained
/// prefixes live in the default VRF.
pub fn managed_group(fg: &Shared<FgNhgState>, vrf_name: &str, prefix: &IpPrefix) -> Option<String> {
    if !vrf_name.is_empty() && vrf_name != DEFAULT_VRF {
        return None;
    }
    fg.lock().unwrap().group_of_prefix(prefix).cloned()
}

fn active_members(
    state: &FgNhgState,
    neighbors: &Shared<NeighborTable>,
    group_name: &str,
    nhg_key: &NextHopGroupKey,
) -> Vec<(IpAddress, swsync_sai::NextHopOid)> {
    let Some(group) = state.groups.get(group_name) else {
        return Vec::new();
    };
    let neighbors = neighbors.lock().unwrap();
    let mut resolved = Vec::new();
    for nh in nhg_key.iter() {
        if !group.members.contains(&nh.ip) {
            continue;
        }
        if let Some(entry) = neighbors.get(nh) {
            if !entry.if_down {
                resolved.push((nh.ip, entry.nh_id));
            }
        }
    }
    resolved
}

async fn publish_bucket_state(
    bus: &dyn Bus,
    prefix: &IpPrefix,
    buckets: &[Option<Bucket>],
) {
    let fields: Vec<(String, String)> = buckets
        .iter()
        .enumerate()
        .filter_map(|(i, bucket)| {
            bucket
                .as_ref()
                .map(|b| (i.to_string(), b.member.to_string()))
        })
        .collect();
    let _ = bus
        .set(
            DbId::State,
            tables::STATE_FG_ROUTE_TABLE,
            &prefix.to_string(),
            &fields,
        )
        .await;
}

/// Applies a fine-grained route SET: creates the group on first use, then
/// mutates the bucket->member mapping in place as membership churns, so the
/// group id (and every route pointing at it) stays stable.
#[allow(clippy::too_many_arguments)]
pub async fn fg_route_set(
    fg: &Shared<FgNhgState>,
    sai: &dyn SwitchApi,
    bus: &dyn Bus,
    neighbors: &Shared<NeighborTable>,
    group_name: &str,
    _vrf: VirtualRouterOid,
    prefix: &IpPrefix,
    nhg_key: &NextHopGroupKey,
) -> Result<RawObjectId, TaskStatus> {
    let resolved = {
        let state = fg.lock().unwrap();
        active_members(&state, neighbors, group_name, nhg_key)
    };
    if resolved.is_empty() {
        debug!("FgNhg: no active members for {} yet", prefix);
        return Err(TaskStatus::NeedRetry);
    }
    let active: Vec<IpAddress> = resolved.iter().map(|(ip, _)| *ip).collect();
    let oid_of = |ip: &IpAddress| resolved.iter().find(|(m, _)| m == ip).map(|(_, oid)| *oid);

    // Group creation on first use.
    let (group_id, bucket_size, current) = {
        let state = fg.lock().unwrap();
        let Some(group) = state.groups.get(group_name) else {
            return Err(TaskStatus::NeedRetry);
        };
        (
            group.group_id,
            group.bucket_size,
            group
                .buckets
                .iter()
                .map(|b| b.as_ref().map(|b| b.member))
                .collect::<Vec<_>>(),
        )
    };

    let group_id = match group_id {
        Some(id) => id,
        None => {
            let id = sai
                .create_next_hop_group(NextHopGroupType::FineGrained)
                .await
                .map_err(|e| {
                    error!("FgNhg: create group {} failed: {}", group_name, e);
                    TaskStatus::Failed
                })?;
            let assignment = FgNhgGroup::assign_round_robin(&active, bucket_size);
            let mut buckets = Vec::with_capacity(assignment.len());
            for (i, member) in assignment.iter().enumerate() {
                let nh = oid_of(member).expect("active member resolves");
                let results = sai
                    .create_next_hop_group_members(&[MemberRequest {
                        group: id,
                        next_hop: nh,
                        seq_id: i as u32 + 1,
                        weight: 1,
                    }])
                    .await;
                match results.into_iter().next() {
                    Some(Ok(member_id)) => buckets.push(Some(Bucket {
                        member: *member,
                        member_id,
                    })),
                    _ => {
                        error!("FgNhg: bucket {} create failed for {}", i, group_name);
                        return Err(TaskStatus::Failed);
                    }
                }
            }
            {
                let mut state = fg.lock().unwrap();
                if let Some(group) = state.groups.get_mut(group_name) {
                    group.group_id = Some(id);
                    group.buckets = buckets.clone();
                    group.active = active.iter().copied().collect();
                }
            }
            publish_bucket_state(bus, prefix, &buckets).await;
            info!("FgNhg: group {} created with {} buckets", group_name, bucket_size);
            return Ok(id.as_raw());
        }
    };

    // Membership unchanged: nothing to do.
    let previous_active: BTreeSet<IpAddress> = {
        let state = fg.lock().unwrap();
        state
            .groups
            .get(group_name)
            .map(|g| g.active.clone())
            .unwrap_or_default()
    };
    let new_active: BTreeSet<IpAddress> = active.iter().copied().collect();
    if previous_active == new_active {
        return Ok(group_id.as_raw());
    }

    // Rebalance: departures first (keeps surviving buckets pinned), then
    // returners reclaim their share. The redistribution is plain round
    // robin, same as the original behavior.
    let current_members: Vec<IpAddress> =
        current.iter().copied().map(|m| m.expect("synced")).collect();
    let mut next = FgNhgGroup::redistribute(&current_members, &active);
    next = FgNhgGroup::rebalance_in(&next, &active);

    let mut new_buckets = Vec::with_capacity(next.len());
    {
        let state = fg.lock().unwrap();
        let group = state.groups.get(group_name).expect("synced group");
        for bucket in &group.buckets {
            new_buckets.push(bucket.clone());
        }
    }
    for (i, member) in next.iter().enumerate() {
        let unchanged = new_buckets[i]
            .as_ref()
            .is_some_and(|b| b.member == *member);
        if unchanged {
            continue;
        }
        if let Some(old) = &new_buckets[i] {
            let _ = sai.remove_next_hop_group_members(&[old.member_id]).await;
        }
        let Some(nh) = oid_of(member) else { continue };
        let results = sai
            .create_next_hop_group_members(&[MemberRequest {
                group: group_id,
                next_hop: nh,
                seq_id: i as u32 + 1,
                weight: 1,
            }])
            .await;
        if let Some(Ok(member_id)) = results.into_iter().next() {
            new_buckets[i] = Some(Bucket {
                member: *member,
                member_id,
            });
        } else {
            warn!("FgNhg: bucket {} reprogram failed for {}", i, group_name);
        }
    }

    {
        let mut state = fg.lock().unwrap();
        if let Some(group) = state.groups.get_mut(group_name) {
            group.buckets = new_buckets.clone();
            group.active = new_active;
        }
    }
    publish_bucket_state(bus, prefix, &new_buckets).await;
    Ok(group_id.as_raw())
}

/// Fine-grained route removal: the group outlives routes (its lifecycle is
/// configuration-driven), only the published mapping goes.
pub async fn fg_route_del(
    fg: &Shared<FgNhgState>,
    _sai: &dyn SwitchApi,
    bus: &dyn Bus,
    _vrf: VirtualRouterOid,
    prefix: &IpPrefix,
) {
    let _ = fg;
    let _ = bus
        .del(DbId::State, tables::STATE_FG_ROUTE_TABLE, &prefix.to_string())
        .await;
}

/// Reconciles the three fine-grained configuration tables.
pub struct FgNhgOrch {
    core: OrchCore,
    sai: Arc<dyn SwitchApi>,
    fg: Shared<FgNhgState>,
}

impl FgNhgOrch {
    pub const PRIORITY: i32 = 40;

    pub fn new(sai: Arc<dyn SwitchApi>, fg: Shared<FgNhgState>) -> Self {
        let mut core = OrchCore::new("FgNhgOrch");
        for table in [
            tables::CFG_FG_NHG_TABLE,
            tables::CFG_FG_NHG_PREFIX_TABLE,
            tables::CFG_FG_NHG_MEMBER_TABLE,
        ] {
            core.add_consumer(Consumer::new(
                ConsumerConfig::new(table).with_priority(Self::PRIORITY),
            ));
        }
        Self { core, sai, fg }
    }

    async fn destroy_runtime_group(&self, name: &str) {
        let (group_id, member_ids) = {
            let mut state = self.fg.lock().unwrap();
            match state.groups.get_mut(name) {
                Some(group) => {
                    let ids: Vec<_> = group
                        .buckets
                        .iter()
                        .filter_map(|b| b.as_ref().map(|b| b.member_id))
                        .collect();
                    let id = group.group_id.take();
                    group.buckets.clear();
                    group.active.clear();
                    (id, ids)
                }
                None => (None, Vec::new()),
            }
        };
        if let Some(group_id) = group_id {
            if !member_ids.is_empty() {
                let _ = self.sai.remove_next_hop_group_members(&member_ids).await;
            }
            let _ = self.sai.remove_next_hop_group(group_id).await;
            info!("FgNhg: destroyed runtime group {}", name);
        }
    }

    async fn process(&mut self, table: &str, key: &str) -> TaskStatus {
        let Some(delta) = self
            .core
            .consumer(table)
            .and_then(|c| c.entry(key).cloned())
        else {
            return TaskStatus::Success;
        };
        match table {
            tables::CFG_FG_NHG_TABLE => match delta.op {
                Operation::Set => {
                    let Some(bucket_size) = delta
                        .get_field("bucket_size")
                        .and_then(|v| v.parse::<u32>().ok())
                        .filter(|v| *v > 0)
                    else {
                        error!("FgNhg: {} has no valid bucket_size", key);
                        return TaskStatus::Invalid;
                    };
                    let mut state = self.fg.lock().unwrap();
                    state
                        .groups
                        .entry(key.to_string())
                        .or_insert_with(|| FgNhgGroup::new(bucket_size))
                        .bucket_size = bucket_size;
                    TaskStatus::Success
                }
                Operation::Del => {
                    self.destroy_runtime_group(key).await;
                    let mut state = self.fg.lock().unwrap();
                    state.groups.remove(key);
                    state.prefixes.retain(|_, g| g != key);
                    state.member_index.retain(|_, g| g != key);
                    TaskStatus::Success
                }
            },
            tables::CFG_FG_NHG_PREFIX_TABLE => {
                let Ok(prefix) = key.parse::<IpPrefix>() else {
                    return TaskStatus::Invalid;
                };
                match delta.op {
                    Operation::Set => {
                        let Some(group) = delta.get_field("FG_NHG") else {
                            return TaskStatus::Invalid;
                        };
                        let mut state = self.fg.lock().unwrap();
                        if !state.groups.contains_key(group) {
                            return TaskStatus::NeedRetry;
                        }
                        state.prefixes.insert(prefix, group.to_string());
                        TaskStatus::Success
                    }
                    Operation::Del => {
                        self.fg.lock().unwrap().prefixes.remove(&prefix);
                        TaskStatus::Success
                    }
                }
            }
            _ => {
                let Ok(ip) = key.parse::<IpAddress>() else {
                    return TaskStatus::Invalid;
                };
                match delta.op {
                    Operation::Set => {
                        let Some(group) = delta.get_field("FG_NHG") else {
                            return TaskStatus::Invalid;
                        };
                        let mut state = self.fg.lock().unwrap();
                        if !state.groups.contains_key(group) {
                            return TaskStatus::NeedRetry;
                        }
                        state.member_index.insert(ip, group.to_string());
                        if let Some(g) = state.groups.get_mut(group) {
                            g.members.insert(ip);
                        }
                        TaskStatus::Success
                    }
                    Operation::Del => {
                        let mut state = self.fg.lock().unwrap();
                        if let Some(group) = state.member_index.remove(&ip) {
                            if let Some(g) = state.groups.get_mut(&group) {
                                g.members.remove(&ip);
                            }
                        }
                        TaskStatus::Success
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Orch for FgNhgOrch {
    fn core(&self) -> &OrchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OrchCore {
        &mut self.core
    }

    async fn do_task(&mut self, table: &str) {
        let keys = self
            .core
            .consumer(table)
            .map(Consumer::pending_keys)
            .unwrap_or_default();
        for key in keys {
            let status = self.process(table, &key).await;
            if status.is_settled() {
                if let Some(consumer) = self.core.consumer_mut(table) {
                    consumer.erase(&key);
                }
            }
        }
    }
}
