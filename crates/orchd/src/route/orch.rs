//! Route orchestrator.
//!
//! Translates `ROUTE_TABLE` intent into next-hop-group lifecycle plus
//! bulked route-entry operations: direct interface routes, blackholes,
//! single and ECMP next hops, index-referenced groups, fine-grained
//! prefixes, temporary groups under capacity pressure, and flow-counter
//! binding.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use swsync_bus::{tables, Bus, DbId, KeyOpFieldsValues, Operation};
use swsync_orch::task::{handle_create_status, handle_remove_status, handle_set_status};
use swsync_orch::{
    Consumer, ConsumerConfig, Orch, OrchCore, RefCounted, SelectableTimer, TaskStatus,
};
use swsync_sai::api::{
    LabelRouteKey, MemberRequest, NextHopData, NextHopGroupType, PacketAction, RouteAttr,
    RouteBulkApi, RouteKey, SwitchApi,
};
use swsync_sai::bulker::{EntityBulker, EntryStatus, ObjectBulker};
use swsync_sai::{NextHopGroupOid, RawObjectId, SaiStatus, VirtualRouterOid};
use swsync_types::IpPrefix;
use tokio::sync::mpsc::UnboundedReceiver;

use super::flow_counter::{
    FlowCounterState, PatternId, RoutePattern, FLOW_COUNTER_ROUTE_PATTERN_TABLE,
};
use super::nexthop::NextHopKey;
use super::nhg::{NextHopGroupEntry, NextHopGroupKey, NextHopGroupMemberEntry, NextHopGroupTable};
use super::types::{parse_route_intent, RouteNhg, RouteParseError, RouteTables};
use crate::context::OrchContext;
use crate::error::ErrorSink;
use crate::fg_nhg::{self, FgNhgState};
use crate::intfs::{any_rif_subnet_contains, RifTable};
use crate::neigh::{NeighborEvent, NeighborTable, APP_NEIGH_RESOLVE_TABLE};
use crate::nhg::NhgIndexTable;
use crate::srv6::Srv6State;
use crate::Shared;

/// Aliases the direct-route path settles without programming anything.
const PASSTHROUGH_ALIASES: [&str; 2] = ["unknown", "tun0"];

/// What got staged for one inbox entry, consumed after the flush.
enum PostKind {
    Add {
        new: RouteNhg,
        using_temp: bool,
    },
    Remove,
    DemoteDefault,
    /// Fine-grained membership was updated in place; nothing was staged.
    FineGrainedInPlace,
}

struct RoutePost {
    inbox_key: String,
    route_key: RouteKey,
    vrf_name: String,
    statuses: Vec<EntryStatus>,
    created: bool,
    kind: PostKind,
}

/// A staged flow-counter attribute op awaiting the flush.
struct CounterOp {
    pattern: PatternId,
    prefix: IpPrefix,
    counter: swsync_sai::CounterOid,
    status: EntryStatus,
    bind: bool,
}

enum GroupResolution {
    Id(RawObjectId),
    Temp(RawObjectId),
    Retry,
    Failed(SaiStatus),
}

/// The route reconciler.
pub struct RouteOrch {
    core: OrchCore,
    sai: Arc<dyn SwitchApi>,
    route_api: Arc<dyn RouteBulkApi<RouteKey>>,
    label_api: Arc<dyn RouteBulkApi<LabelRouteKey>>,
    bus: Arc<dyn Bus>,
    ctx: Arc<OrchContext>,
    errors: Arc<ErrorSink>,
    rifs: Shared<RifTable>,
    neighbors: Shared<NeighborTable>,
    nhg_index: Shared<NhgIndexTable>,
    fg: Shared<FgNhgState>,
    srv6: Shared<Srv6State>,
    synced_routes: RouteTables,
    synced_label_routes: std::collections::HashMap<swsync_types::Label, RouteNhg>,
    synced_nhgs: NextHopGroupTable,
    bulker: EntityBulker<RouteKey>,
    label_bulker: EntityBulker<LabelRouteKey>,
    flow_counters: FlowCounterState,
    counter_ops: Vec<CounterOp>,
    flex_timer: SelectableTimer,
    /// Routes pointed at a temporary single-member stand-in; retried every
    /// cycle until the real group fits.
    temp_routes: HashSet<RouteKey>,
    /// Groups whose refcount hit zero during finalization.
    groups_to_remove: Vec<NextHopGroupKey>,
    /// Synthetic next hops whose refcount hit zero during finalization.
    nexthops_to_remove: Vec<(NextHopKey, swsync_sai::NextHopOid)>,
    neighbor_events: Option<UnboundedReceiver<NeighborEvent>>,
}

impl RouteOrch {
    pub const PRIORITY: i32 = 30;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sai: Arc<dyn SwitchApi>,
        route_api: Arc<dyn RouteBulkApi<RouteKey>>,
        label_api: Arc<dyn RouteBulkApi<LabelRouteKey>>,
        bus: Arc<dyn Bus>,
        ctx: Arc<OrchContext>,
        errors: Arc<ErrorSink>,
        rifs: Shared<RifTable>,
        neighbors: Shared<NeighborTable>,
        nhg_index: Shared<NhgIndexTable>,
        fg: Shared<FgNhgState>,
        srv6: Shared<Srv6State>,
    ) -> Self {
        let mut core = OrchCore::new("RouteOrch");
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(tables::APP_ROUTE_TABLE).with_priority(Self::PRIORITY),
        ));
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(tables::APP_LABEL_ROUTE_TABLE).with_priority(Self::PRIORITY),
        ));
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(FLOW_COUNTER_ROUTE_PATTERN_TABLE)
                .with_priority(Self::PRIORITY + 1),
        ));
        Self {
            core,
            sai,
            route_api,
            label_api,
            bus,
            ctx,
            errors,
            rifs,
            neighbors,
            nhg_index,
            fg,
            srv6,
            synced_routes: RouteTables::new(),
            synced_label_routes: std::collections::HashMap::new(),
            synced_nhgs: NextHopGroupTable::new(),
            bulker: EntityBulker::new(),
            label_bulker: EntityBulker::new(),
            flow_counters: FlowCounterState::new(),
            counter_ops: Vec::new(),
            flex_timer: SelectableTimer::new(Duration::from_secs(1)),
            temp_routes: HashSet::new(),
            groups_to_remove: Vec::new(),
            nexthops_to_remove: Vec::new(),
            neighbor_events: None,
        }
    }

    pub fn subscribe_neighbor_events(&mut self, events: UnboundedReceiver<NeighborEvent>) {
        self.neighbor_events = Some(events);
    }

    pub fn has_next_hop_group(&self, key: &NextHopGroupKey) -> bool {
        self.synced_nhgs.contains_key(key)
    }

    pub fn next_hop_group_id(&self, key: &NextHopGroupKey) -> Option<NextHopGroupOid> {
        self.synced_nhgs.get(key).map(|e| e.group_id)
    }

    pub fn synced_route(&self, vrf: VirtualRouterOid, prefix: &IpPrefix) -> Option<&RouteNhg> {
        self.synced_routes.get(&vrf)?.get(prefix)
    }

    pub fn is_using_temp_nhg(&self, vrf: VirtualRouterOid, prefix: IpPrefix) -> bool {
        self.temp_routes.contains(&RouteKey::new(vrf, prefix))
    }

    pub fn group_ref_count(&self, key: &NextHopGroupKey) -> Option<u32> {
        self.synced_nhgs.ref_count(key)
    }

    pub fn group_member_count(&self, key: &NextHopGroupKey) -> Option<usize> {
        self.synced_nhgs.get(key).map(|e| e.members.len())
    }

    pub fn flow_counters(&self) -> &FlowCounterState {
        &self.flow_counters
    }

    // ------------------------------------------------------------------
    // Bootstrap
    // ------------------------------------------------------------------

    /// Installs the v4/v6 default drop routes and publishes their state.
    pub async fn init_default_routes(&mut self) {
        for prefix in [IpPrefix::default_v4(), IpPrefix::default_v6()] {
            let route_key = RouteKey::new(self.ctx.virtual_router(), prefix);
            self.bulker.create_entry(
                route_key,
                vec![RouteAttr::PacketAction(PacketAction::Drop)],
            );
            self.synced_routes
                .entry(self.ctx.virtual_router())
                .or_default()
                .insert(prefix, RouteNhg::blackhole());
            self.update_default_route_state(&prefix, false).await;
        }
        self.bulker.flush(self.route_api.as_ref()).await;
    }

    /// EUI-64 link-local /128 plus fe80::/10, both to CPU.
    pub async fn init_link_local_routes(&mut self) {
        let link_local =
            swsync_types::Ipv6Address::eui64_link_local(self.ctx.switch_mac());
        let host: IpPrefix =
            IpPrefix::host(swsync_types::IpAddress::V6(link_local));
        let scope: IpPrefix = "fe80::/10".parse().expect("static prefix");

        for prefix in [host, scope] {
            let route_key = RouteKey::new(self.ctx.virtual_router(), prefix);
            self.bulker.create_entry(
                route_key,
                vec![RouteAttr::PacketAction(PacketAction::Trap)],
            );
        }
        self.bulker.flush(self.route_api.as_ref()).await;
    }

    async fn update_default_route_state(&self, prefix: &IpPrefix, ok: bool) {
        let value = if ok { "ok" } else { "na" };
        let _ = self
            .bus
            .set(
                DbId::State,
                tables::STATE_ROUTE_TABLE,
                &prefix.to_string(),
                &vec![("state".to_string(), value.to_string())],
            )
            .await;
    }

    // ------------------------------------------------------------------
    // Next-hop resolution
    // ------------------------------------------------------------------

    /// Resolves one next hop to a backend id, synthesizing the object for
    /// overlay/MPLS/SRv6 paths. `None` means unresolved: resolution was
    /// requested and the entry must wait.
    async fn resolve_next_hop(&mut self, nh: &NextHopKey) -> Result<Option<RawObjectId>, SaiStatus> {
        {
            let neighbors = self.neighbors.lock().unwrap();
            if let Some(entry) = neighbors.get(nh) {
                if entry.if_down {
                    return Ok(None);
                }
                return Ok(Some(entry.nh_id.as_raw()));
            }
            // Weight variants share the neighbor object.
            if nh.weight > 0 {
                let plain = NextHopKey::new(nh.ip, nh.alias.clone());
                if let Some(entry) = neighbors.get(&plain) {
                    if entry.if_down {
                        return Ok(None);
                    }
                    return Ok(Some(entry.nh_id.as_raw()));
                }
            }
        }

        if nh.is_synthetic() {
            return self.synthesize_next_hop(nh).await.map(Some);
        }

        self.request_resolution(nh).await;
        Ok(None)
    }

    /// MPLS/overlay next hops are created on demand and refcounted in the
    /// neighbor table as synthetic entries. SRv6 paths resolve through the
    /// SID-list state instead and defer until it exists.
    async fn synthesize_next_hop(&mut self, nh: &NextHopKey) -> Result<RawObjectId, SaiStatus> {
        let data = if nh.is_srv6() {
            // SID lists are owned by the SRv6 orchestrator; an absent list
            // defers the route.
            let segment = nh.srv6_segment.as_deref().unwrap_or("");
            let source = nh.srv6_source.unwrap_or(swsync_types::Ipv6Address::UNSPECIFIED);
            let sid_list = {
                let srv6 = self.srv6.lock().unwrap();
                srv6.sid_list_id(segment)
            };
            match sid_list {
                Some(sid_list) => NextHopData::Srv6 {
                    sid_list,
                    source,
                },
                None => return Err(SaiStatus::NotExecuted),
            }
        } else if nh.is_mpls() {
            let rif = {
                let rifs = self.rifs.lock().unwrap();
                rifs.get(&nh.alias).map(|r| r.rif_id)
            };
            match rif {
                Some(rif) => NextHopData::Mpls {
                    rif,
                    ip: nh.ip,
                    labels: nh.labels.clone(),
                },
                None => return Err(SaiStatus::NotExecuted),
            }
        } else {
            NextHopData::Overlay {
                ip: nh.ip,
                vni: nh.vni,
                router_mac: nh.router_mac.unwrap_or(swsync_types::MacAddress::ZERO),
            }
        };

        let nh_id = self.sai.create_next_hop(data).await.map_err(|e| e.status())?;
        self.neighbors.lock().unwrap().insert(
            nh.clone(),
            crate::neigh::NeighborEntry::synthetic(nh_id),
        );
        // SRv6 next hops hold their segment list alive; encap tunnels
        // deduplicate per source address.
        if let Some(segment) = &nh.srv6_segment {
            let mut srv6 = self.srv6.lock().unwrap();
            let _ = srv6.sid_lists.inc_ref(segment);
            if let Some(source) = nh.srv6_source {
                *srv6.tunnel_sources.entry(source).or_insert(0) += 1;
            }
        }
        Ok(nh_id.as_raw())
    }

    fn release_srv6_refs(&self, nh: &NextHopKey) {
        let Some(segment) = &nh.srv6_segment else {
            return;
        };
        let mut srv6 = self.srv6.lock().unwrap();
        let _ = srv6.sid_lists.dec_ref(segment);
        if let Some(source) = nh.srv6_source {
            if let Some(count) = srv6.tunnel_sources.get_mut(&source) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    srv6.tunnel_sources.remove(&source);
                }
            }
        }
    }

    /// Asks the neighbor plane to resolve an address (ARP/ND).
    async fn request_resolution(&self, nh: &NextHopKey) {
        let key = format!("{}:{}", nh.alias, nh.ip);
        let _ = self
            .bus
            .set(DbId::Appl, APP_NEIGH_RESOLVE_TABLE, &key, &vec![])
            .await;
        debug!("RouteOrch: requested resolution of {}", key);
    }

    // ------------------------------------------------------------------
    // Group lifecycle
    // ------------------------------------------------------------------

    fn seq_id_of(key: &NextHopGroupKey, member: &NextHopKey) -> u32 {
        key.iter().position(|nh| nh == member).map(|p| p as u32 + 1).unwrap_or(0)
    }

    /// Creates the group with members for every resolvable, up next hop.
    /// Downed members are skipped but stay in the key.
    async fn add_next_hop_group(
        &mut self,
        key: &NextHopGroupKey,
    ) -> Result<NextHopGroupOid, SaiStatus> {
        if !self.ctx.nhg_capacity_available() {
            return Err(SaiStatus::InsufficientResources);
        }

        let mut resolved: Vec<(NextHopKey, RawObjectId)> = Vec::new();
        for nh in key.iter() {
            match self.resolve_next_hop(nh).await? {
                Some(id) => resolved.push((nh.clone(), id)),
                // IFDOWN members are skipped, fully unresolved ones defer.
                None => {
                    let known = self.neighbors.lock().unwrap().contains_key(nh);
                    if !known {
                        return Err(SaiStatus::NotExecuted);
                    }
                }
            }
        }
        if resolved.is_empty() {
            return Err(SaiStatus::NotExecuted);
        }

        let group_type = if self.sai.capabilities().ordered_ecmp {
            NextHopGroupType::OrderedEcmp
        } else {
            NextHopGroupType::Ecmp
        };
        let group_id = self
            .sai
            .create_next_hop_group(group_type)
            .await
            .map_err(|e| e.status())?;

        let mut member_bulker = ObjectBulker::new();
        let mut handles = Vec::new();
        for (nh, nh_id) in &resolved {
            let handle = member_bulker.create_member(MemberRequest {
                group: group_id,
                next_hop: swsync_sai::NextHopOid::from_raw(*nh_id),
                seq_id: Self::seq_id_of(key, nh),
                weight: nh.weight.max(1),
            });
            handles.push((nh.clone(), handle));
        }
        member_bulker.flush(self.sai.as_ref()).await;

        let mut entry = NextHopGroupEntry::new(group_id);
        let mut failed = false;
        for (nh, handle) in handles {
            if handle.status().is_success() {
                let seq_id = Self::seq_id_of(key, &nh);
                entry.members.insert(
                    nh,
                    NextHopGroupMemberEntry {
                        member_id: handle.oid(),
                        seq_id,
                    },
                );
            } else {
                failed = true;
            }
        }
        if failed {
            // Partial groups are torn down, not left half-programmed.
            let member_ids: Vec<_> = entry.members.values().map(|m| m.member_id).collect();
            let _ = self.sai.remove_next_hop_group_members(&member_ids).await;
            let _ = self.sai.remove_next_hop_group(group_id).await;
            return Err(SaiStatus::Failure);
        }

        for (nh, _) in &resolved {
            let _ = self.neighbors.lock().unwrap().inc_ref(nh);
        }
        self.synced_nhgs.insert(key.clone(), entry);
        self.ctx.inc_nhg_count();
        info!("RouteOrch: created group {} ({})", key, group_id);
        Ok(group_id)
    }

    /// Removes a zero-ref group: members, then the group, then the member
    /// next hops' references.
    async fn remove_next_hop_group(&mut self, key: &NextHopGroupKey) {
        let Some(entry) = self.synced_nhgs.get(key) else {
            return;
        };
        if entry.ref_count() != 0 {
            return;
        }
        let entry = self.synced_nhgs.remove(key).expect("checked above");

        let mut member_bulker = ObjectBulker::new();
        for member in entry.members.values() {
            member_bulker.remove_member(member.member_id);
        }
        member_bulker.flush(self.sai.as_ref()).await;

        if let Err(e) = self.sai.remove_next_hop_group(entry.group_id).await {
            warn!("RouteOrch: remove group {} failed: {}", key, e);
        }
        self.ctx.dec_nhg_count();

        // Release member next hops; synthetic ones die at zero refs.
        let mut to_delete = Vec::new();
        {
            let mut neighbors = self.neighbors.lock().unwrap();
            for nh in entry.members.keys() {
                if let Ok(refs) = neighbors.dec_ref(nh) {
                    if refs == 0 {
                        if let Some(e) = neighbors.get(nh) {
                            if e.synthetic {
                                to_delete.push((nh.clone(), e.nh_id));
                            }
                        }
                    }
                }
            }
            for (nh, _) in &to_delete {
                neighbors.remove(nh);
            }
        }
        for (nh, nh_id) in to_delete {
            debug!("RouteOrch: deleting synthetic next hop {}", nh);
            let _ = self.sai.remove_next_hop(nh_id).await;
            self.release_srv6_refs(&nh);
        }
        info!("RouteOrch: removed group {}", key);
    }

    async fn process_group_removals(&mut self) {
        let keys = std::mem::take(&mut self.groups_to_remove);
        for key in keys {
            self.remove_next_hop_group(&key).await;
        }
        let nexthops = std::mem::take(&mut self.nexthops_to_remove);
        for (nh, nh_id) in nexthops {
            debug!("RouteOrch: deleting synthetic next hop {}", nh);
            let _ = self.sai.remove_next_hop(nh_id).await;
            self.release_srv6_refs(&nh);
        }
    }

    /// Picks one resolvable member at random for the temporary stand-in.
    async fn temp_member(&mut self, key: &NextHopGroupKey) -> Option<(NextHopKey, RawObjectId)> {
        let mut candidates: Vec<NextHopKey> = Vec::new();
        {
            let neighbors = self.neighbors.lock().unwrap();
            for nh in key.iter() {
                if let Some(entry) = neighbors.get(nh) {
                    if !entry.if_down {
                        candidates.push(nh.clone());
                    }
                }
            }
        }
        let chosen = candidates.choose(&mut rand::thread_rng())?.clone();
        let id = self.resolve_next_hop(&chosen).await.ok().flatten()?;
        Some((chosen, id))
    }

    async fn resolve_group(
        &mut self,
        key: &NextHopGroupKey,
        posts: &mut Vec<RoutePost>,
    ) -> GroupResolution {
        if let Some(entry) = self.synced_nhgs.get(key) {
            return GroupResolution::Id(entry.group_id.as_raw());
        }
        match self.add_next_hop_group(key).await {
            Ok(id) => GroupResolution::Id(id.as_raw()),
            Err(status) if status.is_capacity() => {
                // A pending remove may free budget; flush eagerly and retry
                // once before falling back to a temporary group.
                if self.bulker.removing_entries_count() > 0 {
                    self.flush_and_finalize(posts).await;
                    self.process_group_removals().await;
                    if let Ok(id) = self.add_next_hop_group(key).await {
                        return GroupResolution::Id(id.as_raw());
                    }
                }
                match self.temp_member(key).await {
                    Some((_, id)) => GroupResolution::Temp(id),
                    None => GroupResolution::Retry,
                }
            }
            Err(SaiStatus::NotExecuted) => GroupResolution::Retry,
            Err(status) => GroupResolution::Failed(status),
        }
    }

    // ------------------------------------------------------------------
    // Refcounting
    // ------------------------------------------------------------------

    fn inc_route_refs(&mut self, nhg: &RouteNhg) {
        if let Some(index) = &nhg.nhg_index {
            let _ = self.nhg_index.lock().unwrap().inc_ref(index);
            return;
        }
        if nhg.fine_grained || nhg.blackhole {
            return;
        }
        match nhg.nhg_key.len() {
            0 => {}
            1 => {
                let nh = nhg.nhg_key.iter().next().expect("len checked");
                if nh.is_interface_nexthop() {
                    let _ = self.rifs.lock().unwrap().inc_ref(&nh.alias);
                } else {
                    let _ = self.neighbors.lock().unwrap().inc_ref(nh);
                }
            }
            _ => {
                let _ = self.synced_nhgs.inc_ref(&nhg.nhg_key);
            }
        }
    }

    fn dec_route_refs(&mut self, nhg: &RouteNhg) {
        if let Some(index) = &nhg.nhg_index {
            let _ = self.nhg_index.lock().unwrap().dec_ref(index);
            return;
        }
        if nhg.fine_grained || nhg.blackhole {
            return;
        }
        match nhg.nhg_key.len() {
            0 => {}
            1 => {
                let nh = nhg.nhg_key.iter().next().expect("len checked");
                if nh.is_interface_nexthop() {
                    let _ = self.rifs.lock().unwrap().dec_ref(&nh.alias);
                } else {
                    let mut neighbors = self.neighbors.lock().unwrap();
                    if let Ok(0) = neighbors.dec_ref(nh) {
                        let synthetic = neighbors
                            .get(nh)
                            .filter(|e| e.synthetic)
                            .map(|e| e.nh_id);
                        if let Some(nh_id) = synthetic {
                            neighbors.remove(nh);
                            self.nexthops_to_remove.push((nh.clone(), nh_id));
                        }
                    }
                }
            }
            _ => {
                if let Ok(0) = self.synced_nhgs.dec_ref(&nhg.nhg_key) {
                    self.groups_to_remove.push(nhg.nhg_key.clone());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Per-entry reconciliation
    // ------------------------------------------------------------------

    /// Stages ops for one SET. Returns the post record, or an immediate
    /// verdict.
    async fn prepare_set(
        &mut self,
        inbox_key: &str,
        delta: &swsync_bus::KeyOpFieldsValues,
        posts: &mut Vec<RoutePost>,
    ) -> Result<Option<RoutePost>, TaskStatus> {
        let intent = match parse_route_intent(delta) {
            Ok(intent) => intent,
            Err(RouteParseError::GroupExcludesDirect) => {
                error!("RouteOrch: {}: nexthop_group with direct fields", inbox_key);
                return Err(TaskStatus::Invalid);
            }
            Err(e) => {
                error!("RouteOrch: {}: {}", inbox_key, e);
                return Err(TaskStatus::Invalid);
            }
        };
        let Some(vrf) = self.ctx.resolve_vrf(&intent.vrf_name) else {
            return Err(TaskStatus::NeedRetry);
        };
        let prefix = intent.prefix.network();
        let route_key = RouteKey::new(vrf, prefix);
        let existing = self.synced_route(vrf, &prefix).cloned();

        // Management-plane routes: drop any prior hardware entry, settle.
        if intent.skip_class {
            if existing.is_some() {
                let status = self.bulker.remove_entry(route_key);
                return Ok(Some(RoutePost {
                    inbox_key: inbox_key.to_string(),
                    route_key,
                    vrf_name: intent.vrf_name,
                    statuses: vec![status],
                    created: false,
                    kind: PostKind::Remove,
                }));
            }
            return Err(TaskStatus::Success);
        }

        // Resolve the forwarding target.
        let (nh_id, new_nhg, using_temp): (RawObjectId, RouteNhg, bool) = if let Some(index) =
            &intent.nhg_index
        {
            let looked_up = {
                let table = self.nhg_index.lock().unwrap();
                table.get(index).map(|e| (e.group_oid, e.is_temp))
            };
            let Some((oid, is_temp)) = looked_up else {
                debug!("RouteOrch: {}: group index {} not ready", inbox_key, index);
                return Err(TaskStatus::NeedRetry);
            };
            let mut nhg = RouteNhg::indexed(index.clone());
            nhg.blackhole = false;
            (oid, nhg, is_temp)
        } else if intent.blackhole {
            (0, RouteNhg::blackhole(), false)
        } else if let Some(group_name) =
            fg_nhg::managed_group(&self.fg, &intent.vrf_name, &prefix)
        {
            match fg_nhg::fg_route_set(
                &self.fg,
                self.sai.as_ref(),
                self.bus.as_ref(),
                &self.neighbors,
                &group_name,
                vrf,
                &prefix,
                &intent.nexthops,
            )
            .await
            {
                Ok(oid) => {
                    if existing.as_ref().is_some_and(|old| old.fine_grained) {
                        // Membership was mutated in place behind a stable
                        // group id; the route entry itself is untouched.
                        return Ok(Some(RoutePost {
                            inbox_key: inbox_key.to_string(),
                            route_key,
                            vrf_name: intent.vrf_name,
                            statuses: vec![],
                            created: false,
                            kind: PostKind::FineGrainedInPlace,
                        }));
                    }
                    (oid, RouteNhg::fine_grained(intent.nexthops.clone()), false)
                }
                Err(status) => return Err(status),
            }
        } else if intent.nexthops.len() == 1 {
            let nh = intent.nexthops.iter().next().expect("len checked").clone();
            if nh.is_interface_nexthop() {
                // Direct interface route.
                if PASSTHROUGH_ALIASES.contains(&nh.alias.as_str())
                    || nh.alias.starts_with("Vrf")
                    || prefix.address().is_link_local()
                    || prefix.address().is_multicast()
                {
                    return Err(TaskStatus::Success);
                }
                if prefix.is_full_mask()
                    && any_rif_subnet_contains(&self.rifs.lock().unwrap(), prefix.address())
                {
                    return Err(TaskStatus::Success);
                }
                let rif = {
                    let rifs = self.rifs.lock().unwrap();
                    rifs.get(&nh.alias).map(|r| r.rif_id)
                };
                match rif {
                    Some(rif) => (
                        rif.as_raw(),
                        RouteNhg::owned(intent.nexthops.clone()),
                        false,
                    ),
                    None => return Err(TaskStatus::NeedRetry),
                }
            } else {
                match self.resolve_next_hop(&nh).await {
                    Ok(Some(id)) => (id, RouteNhg::owned(intent.nexthops.clone()), false),
                    Ok(None) => return Err(TaskStatus::NeedRetry),
                    Err(SaiStatus::NotExecuted) => return Err(TaskStatus::NeedRetry),
                    Err(status) => {
                        self.errors
                            .report(
                                tables::APP_ROUTE_TABLE,
                                inbox_key,
                                "create",
                                status,
                                &delta.fvs,
                            )
                            .await;
                        return Err(TaskStatus::Failed);
                    }
                }
            }
        } else {
            match self.resolve_group(&intent.nexthops, posts).await {
                GroupResolution::Id(id) => {
                    (id, RouteNhg::owned(intent.nexthops.clone()), false)
                }
                GroupResolution::Temp(id) => {
                    // Install the stand-in; keep only the chosen member
                    // refcounted via the single-member route nhg below.
                    let member = {
                        let neighbors = self.neighbors.lock().unwrap();
                        intent
                            .nexthops
                            .iter()
                            .find(|nh| {
                                neighbors.get(nh).map(|e| e.nh_id.as_raw()) == Some(id)
                            })
                            .cloned()
                    };
                    let nhg = match member {
                        Some(member) => RouteNhg::owned(NextHopGroupKey::single(member)),
                        None => RouteNhg::owned(intent.nexthops.clone()),
                    };
                    (id, nhg, true)
                }
                GroupResolution::Retry => return Err(TaskStatus::NeedRetry),
                GroupResolution::Failed(status) => {
                    self.errors
                        .report(
                            tables::APP_ROUTE_TABLE,
                            inbox_key,
                            "create",
                            status,
                            &delta.fvs,
                        )
                        .await;
                    return Err(TaskStatus::Failed);
                }
            }
        };

        // Nothing changed: idempotent SET.
        if let Some(old) = &existing {
            if *old == new_nhg && !using_temp && !self.temp_routes.contains(&route_key) {
                return Err(TaskStatus::Success);
            }
        }

        let is_drop = new_nhg.blackhole;
        let action = if is_drop {
            PacketAction::Drop
        } else {
            PacketAction::Forward
        };
        let is_default_in_default_vrf =
            prefix.is_default() && vrf == self.ctx.virtual_router();

        let mut statuses = Vec::new();
        let created;
        if existing.is_none() || self.bulker.bulk_entry_pending_removal(&route_key) {
            let mut attrs = vec![RouteAttr::PacketAction(action)];
            if !is_drop {
                attrs.push(RouteAttr::NextHopId(nh_id));
            }
            statuses.push(self.bulker.create_entry(route_key, attrs));
            created = true;
        } else {
            let was_drop = existing.as_ref().is_some_and(|old| old.blackhole);
            // The default route in the default VRF always refreshes both
            // attributes: a DEL/SET pair in one batch can leave a stale
            // cached packet action otherwise.
            if was_drop != is_drop || is_default_in_default_vrf {
                statuses.push(
                    self.bulker
                        .set_entry_attribute(route_key, RouteAttr::PacketAction(action)),
                );
                statuses.push(
                    self.bulker
                        .set_entry_attribute(route_key, RouteAttr::NextHopId(nh_id)),
                );
            } else {
                statuses.push(
                    self.bulker
                        .set_entry_attribute(route_key, RouteAttr::NextHopId(nh_id)),
                );
            }
            created = false;
        }

        Ok(Some(RoutePost {
            inbox_key: inbox_key.to_string(),
            route_key,
            vrf_name: intent.vrf_name,
            statuses,
            created,
            kind: PostKind::Add {
                new: new_nhg,
                using_temp,
            },
        }))
    }

    async fn prepare_del(&mut self, inbox_key: &str) -> Result<Option<RoutePost>, TaskStatus> {
        let (vrf_name, prefix) = super::types::parse_route_key(inbox_key)
            .map_err(|_| TaskStatus::Invalid)?;
        let Some(vrf) = self.ctx.resolve_vrf(&vrf_name) else {
            // Unknown VRF: nothing can be installed under it.
            return Err(TaskStatus::Success);
        };
        let prefix = prefix.network();
        let route_key = RouteKey::new(vrf, prefix);

        if self.synced_route(vrf, &prefix).is_none() {
            return Err(TaskStatus::Success);
        }

        if fg_nhg::managed_group(&self.fg, &vrf_name, &prefix).is_some() {
            fg_nhg::fg_route_del(&self.fg, self.sai.as_ref(), self.bus.as_ref(), vrf, &prefix)
                .await;
        }

        if prefix.is_default() && vrf == self.ctx.virtual_router() {
            // Default routes demote to DROP instead of disappearing.
            let statuses = vec![
                self.bulker
                    .set_entry_attribute(route_key, RouteAttr::PacketAction(PacketAction::Drop)),
                self.bulker
                    .set_entry_attribute(route_key, RouteAttr::NextHopId(0)),
            ];
            return Ok(Some(RoutePost {
                inbox_key: inbox_key.to_string(),
                route_key,
                vrf_name,
                statuses,
                created: false,
                kind: PostKind::DemoteDefault,
            }));
        }

        let status = self.bulker.remove_entry(route_key);
        Ok(Some(RoutePost {
            inbox_key: inbox_key.to_string(),
            route_key,
            vrf_name,
            statuses: vec![status],
            created: false,
            kind: PostKind::Remove,
        }))
    }

    // ------------------------------------------------------------------
    // Post-flush finalization
    // ------------------------------------------------------------------

    fn post_verdict(post: &RoutePost) -> TaskStatus {
        let mapper = |status: SaiStatus| match post.kind {
            PostKind::Add { .. } | PostKind::DemoteDefault => {
                if post.created {
                    handle_create_status(status)
                } else {
                    handle_set_status(status)
                }
            }
            PostKind::Remove => handle_remove_status(status),
            PostKind::FineGrainedInPlace => TaskStatus::Success,
        };
        post.statuses
            .iter()
            .map(|s| mapper(s.get()))
            .find(|v| *v != TaskStatus::Success)
            .unwrap_or(TaskStatus::Success)
    }

    async fn finalize(&mut self, post: RoutePost) {
        let verdict = Self::post_verdict(&post);
        let RoutePost {
            inbox_key,
            route_key,
            vrf_name,
            kind,
            ..
        } = post;
        let vrf = route_key.vrf;
        let prefix = route_key.prefix;

        let final_verdict = match (&kind, verdict) {
            (_, TaskStatus::NeedRetry) => TaskStatus::NeedRetry,
            (_, TaskStatus::Failed) => {
                let fields = self
                    .core
                    .consumer(tables::APP_ROUTE_TABLE)
                    .and_then(|c| c.entry(&inbox_key))
                    .map(|e| e.fvs.clone())
                    .unwrap_or_default();
                let op = match &kind {
                    PostKind::Remove => "remove",
                    _ => "set",
                };
                self.errors
                    .report(tables::APP_ROUTE_TABLE, &inbox_key, op, SaiStatus::Failure, &fields)
                    .await;
                // Routes erase after publishing the failure.
                TaskStatus::Failed
            }
            (PostKind::Add { new, using_temp, .. }, TaskStatus::Success) => {
                let old = self
                    .synced_routes
                    .get(&vrf)
                    .and_then(|t| t.get(&prefix))
                    .cloned();
                let changed = old.as_ref() != Some(new);
                if changed {
                    self.inc_route_refs(&new.clone());
                    if let Some(old) = old.clone() {
                        self.dec_route_refs(&old);
                    }
                    self.synced_routes
                        .entry(vrf)
                        .or_default()
                        .insert(prefix, new.clone());
                }
                if old.is_none() {
                    self.flow_counters.cache_route_add(&vrf_name, &prefix);
                }
                if prefix.is_default() && vrf == self.ctx.virtual_router() {
                    self.update_default_route_state(&prefix, !new.blackhole).await;
                }
                self.errors.clear(tables::APP_ROUTE_TABLE, &inbox_key).await;
                if *using_temp {
                    self.temp_routes.insert(route_key);
                    // Stays in the inbox to chase the real group.
                    TaskStatus::NeedRetry
                } else {
                    self.temp_routes.remove(&route_key);
                    TaskStatus::Success
                }
            }
            (PostKind::Remove, TaskStatus::Success) => {
                if let Some(old) = self
                    .synced_routes
                    .get_mut(&vrf)
                    .and_then(|t| t.remove(&prefix))
                {
                    self.dec_route_refs(&old);
                }
                if let Some(table) = self.synced_routes.get(&vrf) {
                    if table.is_empty() && vrf != self.ctx.virtual_router() {
                        self.synced_routes.remove(&vrf);
                    }
                }
                self.temp_routes.remove(&route_key);
                self.flow_counters.cache_route_remove(&vrf_name, &prefix);
                self.errors.clear(tables::APP_ROUTE_TABLE, &inbox_key).await;
                TaskStatus::Success
            }
            (PostKind::DemoteDefault, TaskStatus::Success) => {
                if let Some(table) = self.synced_routes.get_mut(&vrf) {
                    if let Some(old) = table.insert(prefix, RouteNhg::blackhole()) {
                        self.dec_route_refs(&old);
                    }
                }
                self.update_default_route_state(&prefix, false).await;
                TaskStatus::Success
            }
            (PostKind::FineGrainedInPlace, _) => TaskStatus::Success,
            (_, other) => other,
        };

        match final_verdict {
            TaskStatus::NeedRetry => {}
            _ => {
                if let Some(consumer) = self.core.consumer_mut(tables::APP_ROUTE_TABLE) {
                    consumer.erase(&inbox_key);
                }
            }
        }
    }

    async fn flush_and_finalize(&mut self, posts: &mut Vec<RoutePost>) {
        self.bulker.flush(self.route_api.as_ref()).await;
        for post in posts.drain(..) {
            self.finalize(post).await;
        }
        self.finalize_counter_ops().await;
    }

    // ------------------------------------------------------------------
    // Flow-counter binding
    // ------------------------------------------------------------------

    async fn process_flow_counter_binding(&mut self) {
        if !self.sai.capabilities().route_flow_counters {
            return;
        }
        let (mut binds, unbinds) = self.flow_counters.take_pending();

        for (pattern, prefix) in unbinds {
            let within_cap = self.flow_counters.bound_count(&pattern)
                == self
                    .flow_counters
                    .pattern(&pattern)
                    .map(|p| p.max_match_count)
                    .unwrap_or(0);
            if let Some(counter) = self.flow_counters.remove_bound(&pattern, &prefix) {
                if let Some(vrf) = self.ctx.resolve_vrf(&pattern.0) {
                    let status = self.bulker.set_entry_attribute(
                        RouteKey::new(vrf, prefix),
                        RouteAttr::CounterId(None),
                    );
                    self.counter_ops.push(CounterOp {
                        pattern: pattern.clone(),
                        prefix,
                        counter,
                        status,
                        bind: false,
                    });
                }
                // An in-cap unbind frees a slot for a waiter.
                if within_cap {
                    if let Some(waiter) = self.flow_counters.pop_unbound(&pattern) {
                        binds.push((pattern.clone(), waiter));
                    }
                }
            } else {
                self.flow_counters.remove_unbound(&pattern, &prefix);
            }
        }

        for (pattern, prefix) in binds {
            if self.flow_counters.is_bound(&pattern, &prefix) {
                continue;
            }
            if !self.flow_counters.has_headroom(&pattern) {
                self.flow_counters.add_unbound(&pattern, prefix);
                continue;
            }
            let Some(vrf) = self.ctx.resolve_vrf(&pattern.0) else {
                self.flow_counters.add_unbound(&pattern, prefix);
                continue;
            };
            let counter = match self.sai.create_counter().await {
                Ok(counter) => counter,
                Err(e) => {
                    warn!("RouteOrch: counter allocation failed: {}", e);
                    self.flow_counters.add_unbound(&pattern, prefix);
                    continue;
                }
            };
            let status = self.bulker.set_entry_attribute(
                RouteKey::new(vrf, prefix),
                RouteAttr::CounterId(Some(counter)),
            );
            self.flow_counters.insert_bound(&pattern, prefix, counter);
            self.counter_ops.push(CounterOp {
                pattern,
                prefix,
                counter,
                status,
                bind: true,
            });
        }
    }

    async fn finalize_counter_ops(&mut self) {
        let ops = std::mem::take(&mut self.counter_ops);
        for op in ops {
            let ok = op.status.get().is_success();
            if op.bind {
                if !ok {
                    self.flow_counters.remove_bound(&op.pattern, &op.prefix);
                    self.flow_counters.add_unbound(&op.pattern, op.prefix);
                    let _ = self.sai.remove_counter(op.counter).await;
                }
            } else {
                // The route may already be gone; the counter goes either way.
                let _ = self.sai.remove_counter(op.counter).await;
                let key = FlowCounterState::map_key(&op.pattern, &op.prefix);
                let _ = self
                    .bus
                    .del(DbId::Counters, tables::COUNTERS_ROUTE_TO_COUNTER_TABLE, &key)
                    .await;
                let _ = self
                    .bus
                    .del(DbId::Counters, tables::COUNTERS_ROUTE_TO_PATTERN_TABLE, &key)
                    .await;
            }
        }
    }

    /// Periodic promotion of freshly bound counters into the public maps.
    pub async fn promote_flex_counters(&mut self) {
        for (pattern, prefix, counter) in self.flow_counters.take_flex_batch() {
            let key = FlowCounterState::map_key(&pattern, &prefix);
            let _ = self
                .bus
                .set(
                    DbId::Counters,
                    tables::COUNTERS_ROUTE_TO_COUNTER_TABLE,
                    &key,
                    &vec![("counter_oid".to_string(), counter.to_string())],
                )
                .await;
            let _ = self
                .bus
                .set(
                    DbId::Counters,
                    tables::COUNTERS_ROUTE_TO_PATTERN_TABLE,
                    &key,
                    &vec![(
                        "pattern".to_string(),
                        FlowCounterState::map_key(&pattern, &pattern.1),
                    )],
                )
                .await;
        }
    }

    fn do_pattern_table(&mut self) {
        let keys = self
            .core
            .consumer(FLOW_COUNTER_ROUTE_PATTERN_TABLE)
            .map(Consumer::pending_keys)
            .unwrap_or_default();
        for key in keys {
            let Some(entry) = self
                .core
                .consumer_mut(FLOW_COUNTER_ROUTE_PATTERN_TABLE)
                .and_then(|c| c.erase(&key))
            else {
                continue;
            };
            // `<prefix>` or `<vrf>|<prefix>`.
            let (vrf_name, prefix_str) = match key.split_once('|') {
                Some((vrf, prefix)) => (vrf.to_string(), prefix),
                None => (String::new(), key.as_str()),
            };
            let Ok(prefix) = prefix_str.parse::<IpPrefix>() else {
                error!("RouteOrch: bad flow-counter pattern key {}", key);
                continue;
            };
            let id: PatternId = (vrf_name.clone(), prefix);
            match entry.op {
                Operation::Set => {
                    let max = entry
                        .get_field("max_match_count")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(30usize);
                    match self
                        .flow_counters
                        .set_pattern(RoutePattern::new(vrf_name.clone(), prefix, max))
                    {
                        Ok(update) => {
                            for p in update.to_bind {
                                self.flow_counters.cache_route_add(&vrf_name, &p);
                            }
                            for p in update.to_unbind {
                                self.flow_counters.cache_route_remove(&vrf_name, &p);
                            }
                            // Newly configured pattern: sweep synced routes.
                            if let Some(vrf) = self.ctx.resolve_vrf(&vrf_name) {
                                let matching: Vec<IpPrefix> = self
                                    .synced_routes
                                    .get(&vrf)
                                    .map(|t| t.keys().copied().collect())
                                    .unwrap_or_default();
                                for p in matching {
                                    if self
                                        .flow_counters
                                        .find_match(&vrf_name, &p)
                                        .as_ref()
                                        == Some(&id)
                                    {
                                        self.flow_counters.cache_route_add(&vrf_name, &p);
                                    }
                                }
                            }
                        }
                        Err(e) => error!("RouteOrch: pattern {} rejected: {}", key, e),
                    }
                }
                Operation::Del => {
                    // The pattern is gone: unbind directly, the lifecycle
                    // hooks can no longer match these prefixes.
                    let bound = self.flow_counters.remove_pattern(&id);
                    if let Some(vrf) = self.ctx.resolve_vrf(&vrf_name) {
                        for (prefix, counter) in bound {
                            let status = self.bulker.set_entry_attribute(
                                RouteKey::new(vrf, prefix),
                                RouteAttr::CounterId(None),
                            );
                            self.counter_ops.push(CounterOp {
                                pattern: id.clone(),
                                prefix,
                                counter,
                                status,
                                bind: false,
                            });
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Neighbor availability
    // ------------------------------------------------------------------

    /// Invalidates/revalidates a member across all groups containing it
    /// without touching group identity or the routes pointing at it.
    async fn apply_neighbor_event(&mut self, event: NeighborEvent) {
        let groups: Vec<NextHopGroupKey> = self
            .synced_nhgs
            .keys()
            .filter(|key| {
                key.iter()
                    .any(|nh| nh.ip == event.key.ip && nh.alias == event.key.alias)
            })
            .cloned()
            .collect();

        for group_key in groups {
            let members: Vec<NextHopKey> = group_key
                .iter()
                .filter(|nh| nh.ip == event.key.ip && nh.alias == event.key.alias)
                .cloned()
                .collect();
            for member in members {
                if event.available {
                    self.validate_group_member(&group_key, &member).await;
                } else {
                    self.invalidate_group_member(&group_key, &member).await;
                }
            }
        }
    }

    async fn invalidate_group_member(&mut self, group_key: &NextHopGroupKey, member: &NextHopKey) {
        let member_id = {
            let Some(entry) = self.synced_nhgs.get_mut(group_key) else {
                return;
            };
            match entry.members.remove(member) {
                Some(m) => m.member_id,
                None => return,
            }
        };
        let _ = self.sai.remove_next_hop_group_members(&[member_id]).await;
        debug!("RouteOrch: invalidated {} in {}", member, group_key);
    }

    async fn validate_group_member(&mut self, group_key: &NextHopGroupKey, member: &NextHopKey) {
        let already = self
            .synced_nhgs
            .get(group_key)
            .is_some_and(|e| e.members.contains_key(member));
        if already {
            return;
        }
        let nh_id = {
            let neighbors = self.neighbors.lock().unwrap();
            match neighbors.get(member) {
                Some(entry) if !entry.if_down => entry.nh_id,
                _ => return,
            }
        };
        let group_id = match self.synced_nhgs.get(group_key) {
            Some(entry) => entry.group_id,
            None => return,
        };
        let seq_id = Self::seq_id_of(group_key, member);
        let results = self
            .sai
            .create_next_hop_group_members(&[MemberRequest {
                group: group_id,
                next_hop: nh_id,
                seq_id,
                weight: member.weight.max(1),
            }])
            .await;
        if let Some(Ok(member_id)) = results.into_iter().next() {
            if let Some(entry) = self.synced_nhgs.get_mut(group_key) {
                entry
                    .members
                    .insert(member.clone(), NextHopGroupMemberEntry { member_id, seq_id });
            }
            debug!("RouteOrch: revalidated {} in {}", member, group_key);
        }
    }

    async fn drain_neighbor_events(&mut self) {
        loop {
            let event = match self.neighbor_events.as_mut() {
                Some(rx) => match rx.try_recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
                None => break,
            };
            self.apply_neighbor_event(event).await;
        }
    }

    // ------------------------------------------------------------------
    // Label routes (in-segment entries), mirroring the IP path with their
    // own bulker.
    // ------------------------------------------------------------------

    async fn do_label_route_table(&mut self) {
        let keys = self
            .core
            .consumer(tables::APP_LABEL_ROUTE_TABLE)
            .map(Consumer::pending_keys)
            .unwrap_or_default();
        // (inbox key, label, staged statuses, new nhg or None for DEL)
        let mut posts: Vec<(String, swsync_types::Label, Vec<EntryStatus>, Option<RouteNhg>)> =
            Vec::new();

        for key in keys {
            let Some(delta) = self
                .core
                .consumer(tables::APP_LABEL_ROUTE_TABLE)
                .and_then(|c| c.entry(&key).cloned())
            else {
                continue;
            };
            let Ok(label) = key.parse::<swsync_types::Label>() else {
                warn!("RouteOrch: bad label key {}", key);
                if let Some(consumer) = self.core.consumer_mut(tables::APP_LABEL_ROUTE_TABLE) {
                    consumer.erase(&key);
                }
                continue;
            };
            let route_key = LabelRouteKey {
                vrf: self.ctx.virtual_router(),
                label,
            };

            match delta.op {
                Operation::Del => {
                    if !self.synced_label_routes.contains_key(&label) {
                        if let Some(consumer) =
                            self.core.consumer_mut(tables::APP_LABEL_ROUTE_TABLE)
                        {
                            consumer.erase(&key);
                        }
                        continue;
                    }
                    let status = self.label_bulker.remove_entry(route_key);
                    posts.push((key, label, vec![status], None));
                }
                Operation::Set => {
                    let synthetic = KeyOpFieldsValues {
                        key: key.clone(),
                        op: Operation::Set,
                        fvs: delta.fvs.clone(),
                    };
                    let intent = match parse_route_intent(&KeyOpFieldsValues {
                        // Label keys are not prefixes; parse the fields only.
                        key: "0.0.0.0/0".to_string(),
                        ..synthetic
                    }) {
                        Ok(intent) => intent,
                        Err(e) => {
                            error!("RouteOrch: label {}: {}", key, e);
                            if let Some(consumer) =
                                self.core.consumer_mut(tables::APP_LABEL_ROUTE_TABLE)
                            {
                                consumer.erase(&key);
                            }
                            continue;
                        }
                    };

                    let resolved: Option<RawObjectId> = if intent.blackhole {
                        Some(0)
                    } else if intent.nexthops.len() == 1 {
                        let nh = intent.nexthops.iter().next().expect("len checked");
                        match self.resolve_next_hop(&nh.clone()).await {
                            Ok(id) => id,
                            Err(_) => None,
                        }
                    } else {
                        let mut scratch = Vec::new();
                        match self.resolve_group(&intent.nexthops, &mut scratch).await {
                            GroupResolution::Id(id) | GroupResolution::Temp(id) => Some(id),
                            _ => None,
                        }
                    };
                    let Some(nh_id) = resolved else {
                        continue; // stays pending
                    };

                    let pop_count = delta
                        .get_field("mpls_pop")
                        .and_then(|v| v.parse::<u8>().ok())
                        .unwrap_or(1);

                    let mut statuses = Vec::new();
                    if self.synced_label_routes.contains_key(&label)
                        && !self.label_bulker.bulk_entry_pending_removal(&route_key)
                    {
                        statuses.push(
                            self.label_bulker
                                .set_entry_attribute(route_key, RouteAttr::NextHopId(nh_id)),
                        );
                    } else {
                        let mut attrs = vec![RouteAttr::PopCount(pop_count)];
                        if intent.blackhole {
                            attrs.push(RouteAttr::PacketAction(PacketAction::Drop));
                        } else {
                            attrs.push(RouteAttr::PacketAction(PacketAction::Forward));
                            attrs.push(RouteAttr::NextHopId(nh_id));
                        }
                        statuses.push(self.label_bulker.create_entry(route_key, attrs));
                    }
                    let nhg = if intent.blackhole {
                        RouteNhg::blackhole()
                    } else {
                        RouteNhg::owned(intent.nexthops.clone())
                    };
                    posts.push((key, label, statuses, Some(nhg)));
                }
            }
        }

        self.label_bulker.flush(self.label_api.as_ref()).await;

        for (inbox_key, label, statuses, new) in posts {
            let created = new.is_some() && !self.synced_label_routes.contains_key(&label);
            let verdict = statuses
                .iter()
                .map(|s| match &new {
                    Some(_) if created => handle_create_status(s.get()),
                    Some(_) => handle_set_status(s.get()),
                    None => handle_remove_status(s.get()),
                })
                .find(|v| *v != TaskStatus::Success)
                .unwrap_or(TaskStatus::Success);
            match verdict {
                TaskStatus::NeedRetry => continue,
                TaskStatus::Success => match new {
                    Some(nhg) => {
                        let old = self.synced_label_routes.insert(label, nhg.clone());
                        if old.as_ref() != Some(&nhg) {
                            self.inc_route_refs(&nhg);
                            if let Some(old) = old {
                                self.dec_route_refs(&old);
                            }
                        }
                    }
                    None => {
                        if let Some(old) = self.synced_label_routes.remove(&label) {
                            self.dec_route_refs(&old);
                        }
                    }
                },
                _ => {
                    let fields = self
                        .core
                        .consumer(tables::APP_LABEL_ROUTE_TABLE)
                        .and_then(|c| c.entry(&inbox_key))
                        .map(|e| e.fvs.clone())
                        .unwrap_or_default();
                    self.errors
                        .report(
                            tables::APP_LABEL_ROUTE_TABLE,
                            &inbox_key,
                            if new.is_some() { "set" } else { "remove" },
                            SaiStatus::Failure,
                            &fields,
                        )
                        .await;
                }
            }
            if let Some(consumer) = self.core.consumer_mut(tables::APP_LABEL_ROUTE_TABLE) {
                consumer.erase(&inbox_key);
            }
        }
        self.process_group_removals().await;
    }

    async fn do_route_table(&mut self) {
        self.drain_neighbor_events().await;
        self.process_flow_counter_binding().await;

        let keys = self
            .core
            .consumer(tables::APP_ROUTE_TABLE)
            .map(Consumer::pending_keys)
            .unwrap_or_default();
        let mut posts: Vec<RoutePost> = Vec::new();

        for key in keys {
            let Some(delta) = self
                .core
                .consumer(tables::APP_ROUTE_TABLE)
                .and_then(|c| c.entry(&key).cloned())
            else {
                continue;
            };
            let result = match delta.op {
                Operation::Set => self.prepare_set(&key, &delta, &mut posts).await,
                Operation::Del => self.prepare_del(&key).await,
            };
            match result {
                Ok(Some(post)) => posts.push(post),
                Ok(None) => {}
                Err(TaskStatus::NeedRetry) => {}
                Err(verdict) => {
                    // Invalid / immediate-success / failed: settled now.
                    if verdict == TaskStatus::Invalid {
                        warn!("RouteOrch: dropping invalid entry {}", key);
                    }
                    if let Some(consumer) = self.core.consumer_mut(tables::APP_ROUTE_TABLE)
                    {
                        consumer.erase(&key);
                    }
                }
            }
        }

        self.flush_and_finalize(&mut posts).await;
        self.process_group_removals().await;
    }
}

#[async_trait]
impl Orch for RouteOrch {
    fn core(&self) -> &OrchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OrchCore {
        &mut self.core
    }

    async fn do_task(&mut self, table: &str) {
        match table {
            tables::APP_ROUTE_TABLE => self.do_route_table().await,
            tables::APP_LABEL_ROUTE_TABLE => self.do_label_route_table().await,
            FLOW_COUNTER_ROUTE_PATTERN_TABLE => {
                self.do_pattern_table();
                // Pattern changes may have queued binds; run them through
                // the bulker immediately.
                self.process_flow_counter_binding().await;
                if !self.bulker.is_empty() {
                    self.bulker.flush(self.route_api.as_ref()).await;
                    self.finalize_counter_ops().await;
                }
            }
            _ => {}
        }
    }

    async fn on_timer(&mut self) {
        self.drain_neighbor_events().await;
        if self.flex_timer.due() {
            self.promote_flex_counters().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intfs::RifTable;
    use crate::neigh::NeighborTable;
    use crate::nhg::NhgIndexTable;
    use swsync_bus::MemoryBus;
    use swsync_sai::api::PacketAction;
    use swsync_sai::mock::MockSwitch;

    fn orch_with_backend() -> (RouteOrch, Arc<MockSwitch>, Arc<OrchContext>) {
        let backend = Arc::new(MockSwitch::new());
        let bus = Arc::new(MemoryBus::new());
        let ctx = Arc::new(OrchContext::new(
            "00:11:22:33:44:55".parse().unwrap(),
            VirtualRouterOid::from_raw(1),
            128,
        ));
        let errors = Arc::new(ErrorSink::new(bus.clone()));
        let sai: Arc<dyn SwitchApi> = backend.clone();
        let route_api: Arc<dyn RouteBulkApi<RouteKey>> = backend.clone();
        let label_api: Arc<dyn RouteBulkApi<LabelRouteKey>> = backend.clone();
        let orch = RouteOrch::new(
            sai,
            route_api,
            label_api,
            bus,
            ctx.clone(),
            errors,
            crate::shared(RifTable::new()),
            crate::shared(NeighborTable::new()),
            crate::shared(NhgIndexTable::new()),
            crate::shared(FgNhgState::new()),
            crate::shared(Srv6State::new()),
        );
        (orch, backend, ctx)
    }

    fn feed(orch: &mut RouteOrch, delta: KeyOpFieldsValues) {
        orch.core
            .consumer_mut(tables::APP_ROUTE_TABLE)
            .unwrap()
            .merge(delta);
    }

    #[tokio::test]
    async fn bootstrap_installs_drop_defaults_and_link_locals() {
        let (mut orch, backend, ctx) = orch_with_backend();
        orch.init_default_routes().await;
        orch.init_link_local_routes().await;

        let v4 = RouteKey::new(ctx.virtual_router(), IpPrefix::default_v4());
        let v6 = RouteKey::new(ctx.virtual_router(), IpPrefix::default_v6());
        assert_eq!(backend.route_action(&v4), Some(PacketAction::Drop));
        assert_eq!(backend.route_action(&v6), Some(PacketAction::Drop));

        let scope = RouteKey::new(ctx.virtual_router(), "fe80::/10".parse().unwrap());
        assert_eq!(backend.route_action(&scope), Some(PacketAction::Trap));
        let eui64 = RouteKey::new(
            ctx.virtual_router(),
            "fe80::211:22ff:fe33:4455/128".parse().unwrap(),
        );
        assert_eq!(backend.route_action(&eui64), Some(PacketAction::Trap));
    }

    #[tokio::test]
    async fn blackhole_route_programs_drop_without_next_hop() {
        let (mut orch, backend, ctx) = orch_with_backend();
        feed(
            &mut orch,
            KeyOpFieldsValues::set(
                "10.66.0.0/16",
                vec![("blackhole".to_string(), "true".to_string())],
            ),
        );
        orch.do_task(tables::APP_ROUTE_TABLE).await;

        let key = RouteKey::new(ctx.virtual_router(), "10.66.0.0/16".parse().unwrap());
        assert_eq!(backend.route_action(&key), Some(PacketAction::Drop));
        assert_eq!(backend.route_next_hop(&key), None);
        assert!(orch.synced_route(ctx.virtual_router(), &key.prefix).unwrap().blackhole);

        // DEL removes the entry outright (non-default prefix).
        feed(&mut orch, KeyOpFieldsValues::del("10.66.0.0/16"));
        orch.do_task(tables::APP_ROUTE_TABLE).await;
        assert!(!backend.has_route(&key));
    }

    #[tokio::test]
    async fn default_route_del_demotes_to_drop() {
        let (mut orch, backend, ctx) = orch_with_backend();
        orch.init_default_routes().await;

        feed(&mut orch, KeyOpFieldsValues::del("0.0.0.0/0"));
        orch.do_task(tables::APP_ROUTE_TABLE).await;

        // The entry survives as a drop, never disappearing.
        let key = RouteKey::new(ctx.virtual_router(), IpPrefix::default_v4());
        assert!(backend.has_route(&key));
        assert_eq!(backend.route_action(&key), Some(PacketAction::Drop));
        assert!(orch
            .synced_route(ctx.virtual_router(), &IpPrefix::default_v4())
            .unwrap()
            .blackhole);
    }

    #[tokio::test]
    async fn unknown_vrf_defers_the_entry() {
        let (mut orch, backend, _) = orch_with_backend();
        feed(
            &mut orch,
            KeyOpFieldsValues::set(
                "Vrf-blue:10.1.0.0/16",
                vec![
                    ("nexthop".to_string(), "10.1.1.2".to_string()),
                    ("ifname".to_string(), "Ethernet4".to_string()),
                ],
            ),
        );
        orch.do_task(tables::APP_ROUTE_TABLE).await;

        assert_eq!(backend.route_count(), 0);
        assert!(orch
            .core
            .consumer(tables::APP_ROUTE_TABLE)
            .unwrap()
            .has_pending());
    }
}
