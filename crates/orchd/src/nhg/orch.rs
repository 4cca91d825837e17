//! Next-hop-group orchestrator: plain weighted groups and class-based
//! forwarding groups, both keyed by index.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use swsync_bus::{tables, KeyOpFieldsValues, Operation};
use swsync_orch::{Consumer, ConsumerConfig, Orch, OrchCore, RefCounted, TaskStatus};
use swsync_sai::api::{MemberRequest, NextHopGroupType, SwitchApi};
use swsync_sai::bulker::ObjectBulker;
use swsync_sai::{NextHopGroupMemberOid, NextHopGroupOid, NextHopOid, RawObjectId};

use super::types::{NhgIndexEntry, NhgIndexTable};
use crate::context::OrchContext;
use crate::neigh::NeighborTable;
use crate::route::{NextHopGroupKey, NextHopKey};
use crate::Shared;

/// A synced plain group.
struct SyncedNhg {
    key: NextHopGroupKey,
    group_id: NextHopGroupOid,
    /// Temporary single-member stand-in: `group_id` is unset and the index
    /// points straight at a member next hop.
    temp_member: Option<NextHopKey>,
    members: HashMap<NextHopKey, (NextHopGroupMemberOid, u32)>,
}

impl SyncedNhg {
    fn is_temp(&self) -> bool {
        self.temp_member.is_some()
    }
}

/// A synced class-based group: ordered member indices resolved to their
/// groups.
struct SyncedCbfNhg {
    member_indices: Vec<String>,
    group_id: NextHopGroupOid,
    member_ids: Vec<NextHopGroupMemberOid>,
}

/// Handles `NEXTHOP_GROUP_TABLE` (plain weighted groups) and
/// `CLASS_BASED_NEXT_HOP_GROUP_TABLE` (CBF groups).
///
/// State machine per group: absent -> temp or real on SET (temp when the
/// group budget is exhausted), temp -> real on any later cycle with
/// capacity, membership updates in place on real groups, absent again on
/// DEL once no route references the index.
pub struct NhgOrch {
    core: OrchCore,
    sai: Arc<dyn SwitchApi>,
    ctx: Arc<OrchContext>,
    neighbors: Shared<NeighborTable>,
    index: Shared<NhgIndexTable>,
    groups: HashMap<String, SyncedNhg>,
    cbf_groups: HashMap<String, SyncedCbfNhg>,
}

impl NhgOrch {
    pub const PRIORITY: i32 = 40;

    pub fn new(
        sai: Arc<dyn SwitchApi>,
        ctx: Arc<OrchContext>,
        neighbors: Shared<NeighborTable>,
        index: Shared<NhgIndexTable>,
    ) -> Self {
        let mut core = OrchCore::new("NhgOrch");
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(tables::APP_NEXTHOP_GROUP_TABLE).with_priority(Self::PRIORITY),
        ));
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(tables::APP_CLASS_BASED_NEXTHOP_GROUP_TABLE)
                .with_priority(Self::PRIORITY - 1),
        ));
        Self {
            core,
            sai,
            ctx,
            neighbors,
            index,
            groups: HashMap::new(),
            cbf_groups: HashMap::new(),
        }
    }

    fn parse_group_key(delta: &KeyOpFieldsValues) -> Option<NextHopGroupKey> {
        let ips: Vec<&str> = delta.get_field("nexthop")?.split(',').collect();
        let aliases: Vec<&str> = delta.get_field("ifname")?.split(',').collect();
        if ips.len() != aliases.len() {
            return None;
        }
        let weights: Vec<u32> = match delta.get_field("weight") {
            Some(w) if !w.is_empty() => {
                let parsed: Option<Vec<u32>> =
                    w.split(',').map(|x| x.parse().ok()).collect();
                let parsed = parsed?;
                if parsed.len() != ips.len() {
                    return None;
                }
                parsed
            }
            _ => Vec::new(),
        };

        let mut key = NextHopGroupKey::new();
        for (i, (ip, alias)) in ips.iter().zip(aliases.iter()).enumerate() {
            let mut nh = NextHopKey::new(ip.parse().ok()?, *alias);
            if let Some(weight) = weights.get(i) {
                nh = nh.with_weight(*weight);
            }
            key.add(nh);
        }
        Some(key)
    }

    fn seq_id_of(key: &NextHopGroupKey, member: &NextHopKey) -> u32 {
        key.iter()
            .position(|nh| nh == member)
            .map(|p| p as u32 + 1)
            .unwrap_or(0)
    }

    fn resolve_member(&self, nh: &NextHopKey) -> Option<(NextHopOid, bool)> {
        let neighbors = self.neighbors.lock().unwrap();
        if let Some(entry) = neighbors.get(nh) {
            return Some((entry.nh_id, entry.if_down));
        }
        if nh.weight > 0 {
            let plain = NextHopKey::new(nh.ip, nh.alias.clone());
            if let Some(entry) = neighbors.get(&plain) {
                return Some((entry.nh_id, entry.if_down));
            }
        }
        None
    }

    fn publish_index(&self, index: &str, oid: RawObjectId, is_temp: bool) {
        let mut table = self.index.lock().unwrap();
        match table.get_mut(&index.to_string()) {
            Some(entry) => {
                entry.group_oid = oid;
                entry.is_temp = is_temp;
            }
            None => {
                table.insert(index.to_string(), NhgIndexEntry::new(oid, is_temp));
            }
        }
    }

    /// Creates the full group; `Err(true)` defers (capacity or resolution),
    /// `Err(false)` fails hard.
    async fn sync_full_group(
        &mut self,
        index: &str,
        key: &NextHopGroupKey,
    ) -> Result<(), bool> {
        if !self.ctx.nhg_capacity_available() {
            return Err(true);
        }

        let mut resolved = Vec::new();
        for nh in key.iter() {
            match self.resolve_member(nh) {
                Some((nh_id, false)) => resolved.push((nh.clone(), nh_id)),
                Some((_, true)) => {} // IFDOWN: skipped, stays in the key
                None => return Err(true),
            }
        }
        if resolved.is_empty() {
            return Err(true);
        }

        let group_type = if self.sai.capabilities().ordered_ecmp {
            NextHopGroupType::OrderedEcmp
        } else {
            NextHopGroupType::Ecmp
        };
        let group_id = match self.sai.create_next_hop_group(group_type).await {
            Ok(id) => id,
            Err(e) if e.is_capacity() => return Err(true),
            Err(e) => {
                error!("NhgOrch: create group {} failed: {}", index, e);
                return Err(false);
            }
        };

        let mut bulker = ObjectBulker::new();
        let mut handles = Vec::new();
        for (nh, nh_id) in &resolved {
            let handle = bulker.create_member(MemberRequest {
                group: group_id,
                next_hop: *nh_id,
                seq_id: Self::seq_id_of(key, nh),
                weight: nh.weight.max(1),
            });
            handles.push((nh.clone(), handle));
        }
        bulker.flush(self.sai.as_ref()).await;

        let mut members = HashMap::new();
        let mut failed = false;
        for (nh, handle) in handles {
            if handle.status().is_success() {
                let seq = Self::seq_id_of(key, &nh);
                members.insert(nh, (handle.oid(), seq));
            } else {
                failed = true;
            }
        }
        if failed {
            let ids: Vec<_> = members.values().map(|(id, _)| *id).collect();
            let _ = self.sai.remove_next_hop_group_members(&ids).await;
            let _ = self.sai.remove_next_hop_group(group_id).await;
            return Err(false);
        }

        {
            let mut neighbors = self.neighbors.lock().unwrap();
            for nh in members.keys() {
                let _ = neighbors.inc_ref(nh);
            }
        }
        self.ctx.inc_nhg_count();
        self.groups.insert(
            index.to_string(),
            SyncedNhg {
                key: key.clone(),
                group_id,
                temp_member: None,
                members,
            },
        );
        self.publish_index(index, group_id.as_raw(), false);
        info!("NhgOrch: synced group {} ({})", index, group_id);
        Ok(())
    }

    /// Tears down a real group's backend objects.
    async fn destroy_group(&mut self, synced: SyncedNhg) {
        if synced.is_temp() {
            return;
        }
        let ids: Vec<_> = synced.members.values().map(|(id, _)| *id).collect();
        if !ids.is_empty() {
            let _ = self.sai.remove_next_hop_group_members(&ids).await;
        }
        if let Err(e) = self.sai.remove_next_hop_group(synced.group_id).await {
            warn!("NhgOrch: remove group {} failed: {}", synced.group_id, e);
        }
        self.ctx.dec_nhg_count();
        let mut neighbors = self.neighbors.lock().unwrap();
        for nh in synced.members.keys() {
            let _ = neighbors.dec_ref(nh);
        }
    }

    /// Single resolvable member stand-in while the budget is exhausted.
    fn try_temp_group(&mut self, index: &str, key: &NextHopGroupKey) -> bool {
        let chosen = key.iter().find_map(|nh| {
            self.resolve_member(nh)
                .filter(|(_, down)| !down)
                .map(|(nh_id, _)| (nh.clone(), nh_id))
        });
        let Some((member, nh_id)) = chosen else {
            return false;
        };
        {
            let mut neighbors = self.neighbors.lock().unwrap();
            let _ = neighbors.inc_ref(&member);
        }
        self.groups.insert(
            index.to_string(),
            SyncedNhg {
                key: key.clone(),
                group_id: NextHopGroupOid::NULL,
                temp_member: Some(member),
                members: HashMap::new(),
            },
        );
        self.publish_index(index, nh_id.as_raw(), true);
        info!("NhgOrch: temporary group for {} installed", index);
        true
    }

    async fn set_group(&mut self, index: &str, key: NextHopGroupKey) -> TaskStatus {
        // Same membership, already real: nothing to do.
        if let Some(existing) = self.groups.get(index) {
            if existing.key == key && !existing.is_temp() {
                return TaskStatus::Success;
            }
        }

        let previous = self.groups.remove(index);
        let had_temp_member = previous.as_ref().and_then(|g| g.temp_member.clone());

        match self.sync_full_group(index, &key).await {
            Ok(()) => {
                if let Some(previous) = previous {
                    if let Some(member) = had_temp_member {
                        let _ = self.neighbors.lock().unwrap().dec_ref(&member);
                    } else {
                        self.destroy_group(previous).await;
                    }
                }
                TaskStatus::Success
            }
            Err(true) => {
                match previous {
                    // Keep whatever was installed; retry the update.
                    Some(previous) => {
                        self.groups.insert(index.to_string(), previous);
                    }
                    None => {
                        let _ = self.try_temp_group(index, &key);
                    }
                }
                TaskStatus::NeedRetry
            }
            Err(false) => {
                if let Some(previous) = previous {
                    self.groups.insert(index.to_string(), previous);
                }
                TaskStatus::Failed
            }
        }
    }

    async fn del_group(&mut self, index: &str) -> TaskStatus {
        let refs = {
            let table = self.index.lock().unwrap();
            table.get(&index.to_string()).map(|e| e.ref_count())
        };
        match refs {
            None => return TaskStatus::Success,
            Some(0) => {}
            Some(refs) => {
                debug!("NhgOrch: {} still referenced ({}), deferring", index, refs);
                return TaskStatus::NeedRetry;
            }
        }

        if let Some(synced) = self.groups.remove(index) {
            if let Some(member) = &synced.temp_member {
                let _ = self.neighbors.lock().unwrap().dec_ref(member);
            } else {
                self.destroy_group(synced).await;
            }
        }
        self.index.lock().unwrap().remove(&index.to_string());
        info!("NhgOrch: removed group {}", index);
        TaskStatus::Success
    }

    // ------------------------------------------------------------------
    // Class-based groups
    // ------------------------------------------------------------------

    async fn set_cbf_group(&mut self, index: &str, delta: &KeyOpFieldsValues) -> TaskStatus {
        let Some(member_field) = delta.get_field("members") else {
            error!("NhgOrch: CBF {} missing members", index);
            return TaskStatus::Invalid;
        };
        let member_indices: Vec<String> =
            member_field.split(',').map(str::to_string).collect();
        if member_indices.is_empty() {
            return TaskStatus::Invalid;
        }

        if let Some(existing) = self.cbf_groups.get(index) {
            if existing.member_indices == member_indices {
                return TaskStatus::Success;
            }
        }

        // Every member group must be real before the CBF group forms.
        let mut member_oids = Vec::new();
        {
            let table = self.index.lock().unwrap();
            for member in &member_indices {
                match table.get(member) {
                    Some(entry) if !entry.is_temp => member_oids.push(entry.group_oid),
                    _ => {
                        debug!("NhgOrch: CBF {} waiting on member {}", index, member);
                        return TaskStatus::NeedRetry;
                    }
                }
            }
        }

        if self.cbf_groups.contains_key(index) {
            // Membership change: rebuild in place behind a fresh id.
            let old = self.cbf_groups.remove(index).expect("checked");
            self.remove_cbf_backend(old).await;
        } else if !self.ctx.nhg_capacity_available() {
            return TaskStatus::NeedRetry;
        }

        let group_id = match self
            .sai
            .create_next_hop_group(NextHopGroupType::ClassBased)
            .await
        {
            Ok(id) => id,
            Err(e) if e.is_capacity() => return TaskStatus::NeedRetry,
            Err(e) => {
                error!("NhgOrch: create CBF {} failed: {}", index, e);
                return TaskStatus::Failed;
            }
        };

        let mut bulker = ObjectBulker::new();
        let mut handles = Vec::new();
        for (position, oid) in member_oids.iter().enumerate() {
            handles.push(bulker.create_member(MemberRequest {
                group: group_id,
                next_hop: NextHopOid::from_raw(*oid),
                seq_id: position as u32 + 1,
                weight: 1,
            }));
        }
        bulker.flush(self.sai.as_ref()).await;

        let mut member_ids = Vec::new();
        for handle in handles {
            if handle.status().is_success() {
                member_ids.push(handle.oid());
            } else {
                let _ = self.sai.remove_next_hop_group_members(&member_ids).await;
                let _ = self.sai.remove_next_hop_group(group_id).await;
                return TaskStatus::Failed;
            }
        }

        // Member groups are held by the CBF group.
        {
            let mut table = self.index.lock().unwrap();
            for member in &member_indices {
                let _ = table.inc_ref(member);
            }
        }
        self.ctx.inc_nhg_count();
        self.cbf_groups.insert(
            index.to_string(),
            SyncedCbfNhg {
                member_indices,
                group_id,
                member_ids,
            },
        );
        self.publish_index(index, group_id.as_raw(), false);
        info!("NhgOrch: synced CBF group {}", index);
        TaskStatus::Success
    }

    async fn remove_cbf_backend(&mut self, group: SyncedCbfNhg) {
        if !group.member_ids.is_empty() {
            let _ = self.sai.remove_next_hop_group_members(&group.member_ids).await;
        }
        let _ = self.sai.remove_next_hop_group(group.group_id).await;
        self.ctx.dec_nhg_count();
        let mut table = self.index.lock().unwrap();
        for member in &group.member_indices {
            let _ = table.dec_ref(member);
        }
    }

    async fn del_cbf_group(&mut self, index: &str) -> TaskStatus {
        let refs = {
            let table = self.index.lock().unwrap();
            table.get(&index.to_string()).map(|e| e.ref_count())
        };
        match refs {
            None => return TaskStatus::Success,
            Some(0) => {}
            Some(_) => return TaskStatus::NeedRetry,
        }
        if let Some(group) = self.cbf_groups.remove(index) {
            self.remove_cbf_backend(group).await;
        }
        self.index.lock().unwrap().remove(&index.to_string());
        TaskStatus::Success
    }

    async fn drain(&mut self, table: &str) {
        let keys = self
            .core
            .consumer(table)
            .map(Consumer::pending_keys)
            .unwrap_or_default();
        for key in keys {
            let Some(delta) = self
                .core
                .consumer(table)
                .and_then(|c| c.entry(&key).cloned())
            else {
                continue;
            };
            let status = match (table, delta.op) {
                (tables::APP_NEXTHOP_GROUP_TABLE, Operation::Set) => {
                    match Self::parse_group_key(&delta) {
                        Some(group_key) => self.set_group(&key, group_key).await,
                        None => {
                            error!("NhgOrch: invalid group record {}", key);
                            TaskStatus::Invalid
                        }
                    }
                }
                (tables::APP_NEXTHOP_GROUP_TABLE, Operation::Del) => self.del_group(&key).await,
                (_, Operation::Set) => self.set_cbf_group(&key, &delta).await,
                (_, Operation::Del) => self.del_cbf_group(&key).await,
            };
            if status.is_settled() || status == TaskStatus::Failed {
                if let Some(consumer) = self.core.consumer_mut(table) {
                    consumer.erase(&key);
                }
            }
        }
    }
}

#[async_trait]
impl Orch for NhgOrch {
    fn core(&self) -> &OrchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OrchCore {
        &mut self.core
    }

    async fn do_task(&mut self, table: &str) {
        self.drain(table).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neigh::NeighborEntry;
    use swsync_bus::KeyOpFieldsValues;
    use swsync_sai::mock::MockSwitch;
    use swsync_sai::VirtualRouterOid;

    fn setup(max_groups: usize) -> (NhgOrch, Arc<MockSwitch>, Shared<NhgIndexTable>, Shared<NeighborTable>) {
        let sai = Arc::new(MockSwitch::new().with_max_nhg_count(max_groups));
        let ctx = Arc::new(OrchContext::new(
            "00:11:22:33:44:55".parse().unwrap(),
            VirtualRouterOid::from_raw(1),
            max_groups,
        ));
        let neighbors = crate::shared(NeighborTable::new());
        let index = crate::shared(NhgIndexTable::new());
        let orch = NhgOrch::new(sai.clone(), ctx, neighbors.clone(), index.clone());
        (orch, sai, index, neighbors)
    }

    fn seed_neighbor(neighbors: &Shared<NeighborTable>, ip: &str, alias: &str, raw: u64) {
        neighbors.lock().unwrap().insert(
            NextHopKey::new(ip.parse().unwrap(), alias),
            NeighborEntry::new(NextHopOid::from_raw(raw), "00:00:00:00:00:01".parse().unwrap()),
        );
    }

    fn group_set(key: &str, nexthop: &str, ifname: &str) -> KeyOpFieldsValues {
        KeyOpFieldsValues::set(
            key,
            vec![
                ("nexthop".to_string(), nexthop.to_string()),
                ("ifname".to_string(), ifname.to_string()),
            ],
        )
    }

    fn feed(orch: &mut NhgOrch, table: &str, delta: KeyOpFieldsValues) {
        orch.core_mut().consumer_mut(table).unwrap().merge(delta);
    }

    #[tokio::test]
    async fn set_creates_real_group() {
        let (mut orch, sai, index, neighbors) = setup(8);
        seed_neighbor(&neighbors, "10.1.1.2", "Ethernet4", 0x100);
        seed_neighbor(&neighbors, "10.1.2.2", "Ethernet5", 0x101);

        feed(
            &mut orch,
            tables::APP_NEXTHOP_GROUP_TABLE,
            group_set("g1", "10.1.1.2,10.1.2.2", "Ethernet4,Ethernet5"),
        );
        orch.do_task(tables::APP_NEXTHOP_GROUP_TABLE).await;

        assert_eq!(sai.group_count(), 1);
        let table = index.lock().unwrap();
        let entry = table.get(&"g1".to_string()).unwrap();
        assert!(!entry.is_temp);
    }

    #[tokio::test]
    async fn unresolved_members_defer() {
        let (mut orch, sai, _, _) = setup(8);
        feed(
            &mut orch,
            tables::APP_NEXTHOP_GROUP_TABLE,
            group_set("g1", "10.1.1.2", "Ethernet4"),
        );
        orch.do_task(tables::APP_NEXTHOP_GROUP_TABLE).await;

        assert_eq!(sai.group_count(), 0);
        assert!(orch
            .core()
            .consumer(tables::APP_NEXTHOP_GROUP_TABLE)
            .unwrap()
            .has_pending());
    }

    #[tokio::test]
    async fn capacity_exhaustion_installs_temp_then_promotes() {
        let (mut orch, sai, index, neighbors) = setup(1);
        seed_neighbor(&neighbors, "10.1.1.2", "Ethernet4", 0x100);
        seed_neighbor(&neighbors, "10.1.2.2", "Ethernet5", 0x101);

        // Burn the budget.
        feed(
            &mut orch,
            tables::APP_NEXTHOP_GROUP_TABLE,
            group_set("g0", "10.1.1.2,10.1.2.2", "Ethernet4,Ethernet5"),
        );
        orch.do_task(tables::APP_NEXTHOP_GROUP_TABLE).await;
        assert_eq!(sai.group_count(), 1);

        // Second group gets a temporary stand-in and stays pending.
        feed(
            &mut orch,
            tables::APP_NEXTHOP_GROUP_TABLE,
            group_set("g1", "10.1.1.2,10.1.2.2", "Ethernet4,Ethernet5"),
        );
        orch.do_task(tables::APP_NEXTHOP_GROUP_TABLE).await;
        {
            let table = index.lock().unwrap();
            let entry = table.get(&"g1".to_string()).unwrap();
            assert!(entry.is_temp);
            assert_eq!(entry.group_oid, 0x100);
        }
        assert!(orch
            .core()
            .consumer(tables::APP_NEXTHOP_GROUP_TABLE)
            .unwrap()
            .has_pending());

        // Freeing the budget promotes on the next sweep.
        feed(
            &mut orch,
            tables::APP_NEXTHOP_GROUP_TABLE,
            KeyOpFieldsValues::del("g0"),
        );
        orch.do_task(tables::APP_NEXTHOP_GROUP_TABLE).await;

        let table = index.lock().unwrap();
        assert!(table.get(&"g0".to_string()).is_none());
        let entry = table.get(&"g1".to_string()).unwrap();
        assert!(!entry.is_temp);
        assert_eq!(sai.group_count(), 1);
    }

    #[tokio::test]
    async fn referenced_group_defers_removal() {
        let (mut orch, sai, index, neighbors) = setup(8);
        seed_neighbor(&neighbors, "10.1.1.2", "Ethernet4", 0x100);
        seed_neighbor(&neighbors, "10.1.2.2", "Ethernet5", 0x101);
        feed(
            &mut orch,
            tables::APP_NEXTHOP_GROUP_TABLE,
            group_set("g1", "10.1.1.2,10.1.2.2", "Ethernet4,Ethernet5"),
        );
        orch.do_task(tables::APP_NEXTHOP_GROUP_TABLE).await;

        index.lock().unwrap().inc_ref(&"g1".to_string()).unwrap();
        feed(
            &mut orch,
            tables::APP_NEXTHOP_GROUP_TABLE,
            KeyOpFieldsValues::del("g1"),
        );
        orch.do_task(tables::APP_NEXTHOP_GROUP_TABLE).await;
        assert_eq!(sai.group_count(), 1);

        index.lock().unwrap().dec_ref(&"g1".to_string()).unwrap();
        orch.do_task(tables::APP_NEXTHOP_GROUP_TABLE).await;
        assert_eq!(sai.group_count(), 0);
    }

    #[tokio::test]
    async fn cbf_group_waits_for_members_then_forms() {
        let (mut orch, sai, index, neighbors) = setup(8);
        seed_neighbor(&neighbors, "10.1.1.2", "Ethernet4", 0x100);
        seed_neighbor(&neighbors, "10.1.2.2", "Ethernet5", 0x101);

        feed(
            &mut orch,
            tables::APP_CLASS_BASED_NEXTHOP_GROUP_TABLE,
            KeyOpFieldsValues::set(
                "cbf1",
                vec![("members".to_string(), "g1,g2".to_string())],
            ),
        );
        orch.do_task(tables::APP_CLASS_BASED_NEXTHOP_GROUP_TABLE).await;
        // Members not synced yet: entry waits.
        assert!(orch
            .core()
            .consumer(tables::APP_CLASS_BASED_NEXTHOP_GROUP_TABLE)
            .unwrap()
            .has_pending());

        feed(
            &mut orch,
            tables::APP_NEXTHOP_GROUP_TABLE,
            group_set("g1", "10.1.1.2,10.1.2.2", "Ethernet4,Ethernet5"),
        );
        feed(
            &mut orch,
            tables::APP_NEXTHOP_GROUP_TABLE,
            group_set("g2", "10.1.1.2", "Ethernet4"),
        );
        orch.do_task(tables::APP_NEXTHOP_GROUP_TABLE).await;
        orch.do_task(tables::APP_CLASS_BASED_NEXTHOP_GROUP_TABLE).await;

        assert_eq!(sai.group_count(), 3);
        let table = index.lock().unwrap();
        assert!(table.get(&"cbf1".to_string()).is_some());
        // CBF holds its members.
        assert_eq!(table.ref_count(&"g1".to_string()), Some(1));
        assert_eq!(table.ref_count(&"g2".to_string()), Some(1));
    }
}
