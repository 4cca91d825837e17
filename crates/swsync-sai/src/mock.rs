//! In-process backend used by the test suites.
//!
//! Tracks live objects so tests can assert on programmed state, enforces the
//! group-capacity limit, and supports one-shot failure injection per
//! operation kind.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use swsync_types::{IpAddress, Ipv6Address, MacAddress};

use crate::api::route::{LabelRouteKey, RouteAttr, RouteBulkApi, RouteKey};
use crate::api::{
    ArsProfileData, MemberRequest, NextHopData, NextHopGroupType, SidBehavior, SwitchApi,
    SwitchCapabilities,
};
use crate::{
    ArsProfileOid, CounterOid, NextHopGroupMemberOid, NextHopGroupOid, NextHopOid, RawObjectId,
    RouterInterfaceOid, SaiError, SaiResult, SaiStatus, Srv6SidListOid, VirtualRouterOid,
};

#[derive(Debug, Clone, Default)]
struct RouteState {
    action: Option<crate::api::PacketAction>,
    next_hop: Option<RawObjectId>,
    counter: Option<CounterOid>,
}

#[derive(Debug, Clone)]
struct MemberState {
    group: NextHopGroupOid,
    next_hop: NextHopOid,
    seq_id: u32,
    weight: u32,
}

#[derive(Default)]
struct State {
    rifs: BTreeMap<RawObjectId, (VirtualRouterOid, String, u32)>,
    neighbors: BTreeMap<(RawObjectId, IpAddress), MacAddress>,
    next_hops: BTreeMap<RawObjectId, NextHopData>,
    groups: BTreeMap<RawObjectId, NextHopGroupType>,
    members: BTreeMap<RawObjectId, MemberState>,
    counters: BTreeMap<RawObjectId, ()>,
    sid_lists: BTreeMap<RawObjectId, Vec<Ipv6Address>>,
    my_sids: BTreeMap<Ipv6Address, (SidBehavior, Option<VirtualRouterOid>)>,
    ars_profiles: BTreeMap<RawObjectId, ArsProfileData>,
    routes: HashMap<RouteKey, RouteState>,
    label_routes: HashMap<LabelRouteKey, RouteState>,
    injected: HashMap<&'static str, VecDeque<SaiStatus>>,
    ops: Vec<String>,
}

/// Mock switch backend with live-object tracking and failure injection.
pub struct MockSwitch {
    capabilities: SwitchCapabilities,
    next_oid: AtomicU64,
    state: Mutex<State>,
}

impl MockSwitch {
    pub fn new() -> Self {
        Self {
            capabilities: SwitchCapabilities::default(),
            next_oid: AtomicU64::new(0x1000),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_max_nhg_count(mut self, max: usize) -> Self {
        self.capabilities.max_next_hop_group_count = max;
        self
    }

    pub fn with_ordered_ecmp(mut self) -> Self {
        self.capabilities.ordered_ecmp = true;
        self
    }

    pub fn with_ars(mut self) -> Self {
        self.capabilities.ars_supported = true;
        self
    }

    /// Queues a failure for the next call of the named operation
    /// (e.g. `"create_next_hop_group"`).
    pub fn inject_failure(&self, op: &'static str, status: SaiStatus) {
        let mut state = self.state.lock().unwrap();
        state.injected.entry(op).or_default().push_back(status);
    }

    fn alloc(&self) -> RawObjectId {
        self.next_oid.fetch_add(1, Ordering::SeqCst)
    }

    fn take_injected(state: &mut State, op: &'static str) -> Option<SaiStatus> {
        state.injected.get_mut(op).and_then(VecDeque::pop_front)
    }

    fn record(state: &mut State, op: String) {
        state.ops.push(op);
    }

    // Test accessors.

    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn route_count(&self) -> usize {
        self.state.lock().unwrap().routes.len()
    }

    pub fn has_route(&self, key: &RouteKey) -> bool {
        self.state.lock().unwrap().routes.contains_key(key)
    }

    pub fn route_next_hop(&self, key: &RouteKey) -> Option<RawObjectId> {
        self.state.lock().unwrap().routes.get(key)?.next_hop
    }

    pub fn route_action(&self, key: &RouteKey) -> Option<crate::api::PacketAction> {
        self.state.lock().unwrap().routes.get(key)?.action
    }

    pub fn route_counter(&self, key: &RouteKey) -> Option<CounterOid> {
        self.state.lock().unwrap().routes.get(key)?.counter
    }

    pub fn label_route_count(&self) -> usize {
        self.state.lock().unwrap().label_routes.len()
    }

    pub fn group_count(&self) -> usize {
        self.state.lock().unwrap().groups.len()
    }

    pub fn group_member_seq_ids(&self, group: NextHopGroupOid) -> Vec<u32> {
        let state = self.state.lock().unwrap();
        let mut seqs: Vec<u32> = state
            .members
            .values()
            .filter(|m| m.group == group)
            .map(|m| m.seq_id)
            .collect();
        seqs.sort_unstable();
        seqs
    }

    pub fn group_member_count(&self, group: NextHopGroupOid) -> usize {
        let state = self.state.lock().unwrap();
        state.members.values().filter(|m| m.group == group).count()
    }

    pub fn next_hop_count(&self) -> usize {
        self.state.lock().unwrap().next_hops.len()
    }

    pub fn neighbor_count(&self) -> usize {
        self.state.lock().unwrap().neighbors.len()
    }

    pub fn rif_count(&self) -> usize {
        self.state.lock().unwrap().rifs.len()
    }

    pub fn counter_count(&self) -> usize {
        self.state.lock().unwrap().counters.len()
    }

    pub fn my_sid_count(&self) -> usize {
        self.state.lock().unwrap().my_sids.len()
    }

    pub fn sid_list_count(&self) -> usize {
        self.state.lock().unwrap().sid_lists.len()
    }

    pub fn ars_profile_count(&self) -> usize {
        self.state.lock().unwrap().ars_profiles.len()
    }
}

impl Default for MockSwitch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwitchApi for MockSwitch {
    fn capabilities(&self) -> SwitchCapabilities {
        self.capabilities.clone()
    }

    async fn create_router_interface(
        &self,
        vrf: VirtualRouterOid,
        alias: &str,
        mtu: u32,
    ) -> SaiResult<RouterInterfaceOid> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = Self::take_injected(&mut state, "create_router_interface") {
            return Err(SaiError::Status(status));
        }
        let oid = self.alloc();
        state.rifs.insert(oid, (vrf, alias.to_string(), mtu));
        Self::record(&mut state, format!("create_rif {}", alias));
        Ok(RouterInterfaceOid::from_raw(oid))
    }

    async fn remove_router_interface(&self, rif: RouterInterfaceOid) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.rifs.remove(&rif.as_raw()).is_none() {
            return Err(SaiError::Status(SaiStatus::ItemNotFound));
        }
        Self::record(&mut state, format!("remove_rif {}", rif));
        Ok(())
    }

    async fn create_neighbor(
        &self,
        rif: RouterInterfaceOid,
        ip: IpAddress,
        mac: MacAddress,
    ) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = Self::take_injected(&mut state, "create_neighbor") {
            return Err(SaiError::Status(status));
        }
        if state.neighbors.insert((rif.as_raw(), ip), mac).is_some() {
            return Err(SaiError::Status(SaiStatus::ItemAlreadyExists));
        }
        Self::record(&mut state, format!("create_neighbor {}", ip));
        Ok(())
    }

    async fn remove_neighbor(&self, rif: RouterInterfaceOid, ip: IpAddress) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.neighbors.remove(&(rif.as_raw(), ip)).is_none() {
            return Err(SaiError::Status(SaiStatus::ItemNotFound));
        }
        Self::record(&mut state, format!("remove_neighbor {}", ip));
        Ok(())
    }

    async fn create_next_hop(&self, data: NextHopData) -> SaiResult<NextHopOid> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = Self::take_injected(&mut state, "create_next_hop") {
            return Err(SaiError::Status(status));
        }
        let oid = self.alloc();
        state.next_hops.insert(oid, data);
        Self::record(&mut state, format!("create_next_hop 0x{:x}", oid));
        Ok(NextHopOid::from_raw(oid))
    }

    async fn remove_next_hop(&self, nh: NextHopOid) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.next_hops.remove(&nh.as_raw()).is_none() {
            return Err(SaiError::Status(SaiStatus::ItemNotFound));
        }
        Self::record(&mut state, format!("remove_next_hop {}", nh));
        Ok(())
    }

    async fn create_next_hop_group(
        &self,
        group_type: NextHopGroupType,
    ) -> SaiResult<NextHopGroupOid> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = Self::take_injected(&mut state, "create_next_hop_group") {
            return Err(SaiError::Status(status));
        }
        if state.groups.len() >= self.capabilities.max_next_hop_group_count {
            return Err(SaiError::Status(SaiStatus::InsufficientResources));
        }
        let oid = self.alloc();
        state.groups.insert(oid, group_type);
        Self::record(&mut state, format!("create_nhg 0x{:x}", oid));
        Ok(NextHopGroupOid::from_raw(oid))
    }

    async fn remove_next_hop_group(&self, group: NextHopGroupOid) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.members.values().any(|m| m.group == group) {
            return Err(SaiError::Status(SaiStatus::ObjectInUse));
        }
        if state.groups.remove(&group.as_raw()).is_none() {
            return Err(SaiError::Status(SaiStatus::ItemNotFound));
        }
        Self::record(&mut state, format!("remove_nhg {}", group));
        Ok(())
    }

    async fn create_next_hop_group_members(
        &self,
        requests: &[MemberRequest],
    ) -> Vec<SaiResult<NextHopGroupMemberOid>> {
        let mut state = self.state.lock().unwrap();
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            if let Some(status) = Self::take_injected(&mut state, "create_member") {
                results.push(Err(SaiError::Status(status)));
                continue;
            }
            if !state.groups.contains_key(&request.group.as_raw()) {
                results.push(Err(SaiError::Status(SaiStatus::InvalidObjectId)));
                continue;
            }
            let oid = self.alloc();
            state.members.insert(
                oid,
                MemberState {
                    group: request.group,
                    next_hop: request.next_hop,
                    seq_id: request.seq_id,
                    weight: request.weight,
                },
            );
            results.push(Ok(NextHopGroupMemberOid::from_raw(oid)));
        }
        Self::record(&mut state, format!("create_members x{}", requests.len()));
        results
    }

    async fn remove_next_hop_group_members(
        &self,
        members: &[NextHopGroupMemberOid],
    ) -> Vec<SaiResult<()>> {
        let mut state = self.state.lock().unwrap();
        let results = members
            .iter()
            .map(|oid| {
                if state.members.remove(&oid.as_raw()).is_some() {
                    Ok(())
                } else {
                    Err(SaiError::Status(SaiStatus::ItemNotFound))
                }
            })
            .collect();
        Self::record(&mut state, format!("remove_members x{}", members.len()));
        results
    }

    async fn create_counter(&self) -> SaiResult<CounterOid> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = Self::take_injected(&mut state, "create_counter") {
            return Err(SaiError::Status(status));
        }
        let oid = self.alloc();
        state.counters.insert(oid, ());
        Ok(CounterOid::from_raw(oid))
    }

    async fn remove_counter(&self, counter: CounterOid) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.counters.remove(&counter.as_raw()).is_none() {
            return Err(SaiError::Status(SaiStatus::ItemNotFound));
        }
        Ok(())
    }

    async fn create_srv6_sid_list(&self, segments: &[Ipv6Address]) -> SaiResult<Srv6SidListOid> {
        let mut state = self.state.lock().unwrap();
        let oid = self.alloc();
        state.sid_lists.insert(oid, segments.to_vec());
        Ok(Srv6SidListOid::from_raw(oid))
    }

    async fn remove_srv6_sid_list(&self, sid_list: Srv6SidListOid) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.sid_lists.remove(&sid_list.as_raw()).is_none() {
            return Err(SaiError::Status(SaiStatus::ItemNotFound));
        }
        Ok(())
    }

    async fn create_my_sid_entry(
        &self,
        sid: Ipv6Address,
        behavior: SidBehavior,
        vrf: Option<VirtualRouterOid>,
    ) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.my_sids.insert(sid, (behavior, vrf)).is_some() {
            return Err(SaiError::Status(SaiStatus::ItemAlreadyExists));
        }
        Ok(())
    }

    async fn remove_my_sid_entry(&self, sid: Ipv6Address) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.my_sids.remove(&sid).is_none() {
            return Err(SaiError::Status(SaiStatus::ItemNotFound));
        }
        Ok(())
    }

    async fn create_ars_profile(&self, data: &ArsProfileData) -> SaiResult<ArsProfileOid> {
        let mut state = self.state.lock().unwrap();
        if !self.capabilities.ars_supported {
            return Err(SaiError::Status(SaiStatus::NotSupported));
        }
        let oid = self.alloc();
        state.ars_profiles.insert(oid, data.clone());
        Ok(ArsProfileOid::from_raw(oid))
    }

    async fn set_ars_profile(
        &self,
        profile: ArsProfileOid,
        data: &ArsProfileData,
    ) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.ars_profiles.get_mut(&profile.as_raw()) {
            Some(existing) => {
                *existing = data.clone();
                Ok(())
            }
            None => Err(SaiError::Status(SaiStatus::ItemNotFound)),
        }
    }

    async fn remove_ars_profile(&self, profile: ArsProfileOid) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.ars_profiles.remove(&profile.as_raw()).is_none() {
            return Err(SaiError::Status(SaiStatus::ItemNotFound));
        }
        Ok(())
    }
}

fn apply_attr(entry: &mut RouteState, attr: &RouteAttr) {
    match attr {
        RouteAttr::PacketAction(action) => entry.action = Some(*action),
        RouteAttr::NextHopId(id) => entry.next_hop = Some(*id),
        RouteAttr::CounterId(counter) => entry.counter = *counter,
        RouteAttr::PopCount(_) => {}
    }
}

#[async_trait]
impl RouteBulkApi<RouteKey> for MockSwitch {
    async fn bulk_create(&self, entries: &[(RouteKey, Vec<RouteAttr>)]) -> Vec<SaiStatus> {
        let mut state = self.state.lock().unwrap();
        let mut statuses = Vec::with_capacity(entries.len());
        for (key, attrs) in entries {
            if let Some(status) = Self::take_injected(&mut state, "create_route") {
                statuses.push(status);
                continue;
            }
            if state.routes.contains_key(key) {
                statuses.push(SaiStatus::ItemAlreadyExists);
                continue;
            }
            let mut entry = RouteState::default();
            for attr in attrs {
                apply_attr(&mut entry, attr);
            }
            state.routes.insert(*key, entry);
            statuses.push(SaiStatus::Success);
        }
        Self::record(&mut state, format!("bulk_create_routes x{}", entries.len()));
        statuses
    }

    async fn bulk_set(&self, entries: &[(RouteKey, RouteAttr)]) -> Vec<SaiStatus> {
        let mut state = self.state.lock().unwrap();
        let mut statuses = Vec::with_capacity(entries.len());
        for (key, attr) in entries {
            if let Some(status) = Self::take_injected(&mut state, "set_route") {
                statuses.push(status);
                continue;
            }
            match state.routes.get_mut(key) {
                Some(entry) => {
                    apply_attr(entry, attr);
                    statuses.push(SaiStatus::Success);
                }
                None => statuses.push(SaiStatus::ItemNotFound),
            }
        }
        Self::record(&mut state, format!("bulk_set_routes x{}", entries.len()));
        statuses
    }

    async fn bulk_remove(&self, keys: &[RouteKey]) -> Vec<SaiStatus> {
        let mut state = self.state.lock().unwrap();
        let statuses = keys
            .iter()
            .map(|key| {
                if state.routes.remove(key).is_some() {
                    SaiStatus::Success
                } else {
                    SaiStatus::ItemNotFound
                }
            })
            .collect();
        Self::record(&mut state, format!("bulk_remove_routes x{}", keys.len()));
        statuses
    }
}

#[async_trait]
impl RouteBulkApi<LabelRouteKey> for MockSwitch {
    async fn bulk_create(&self, entries: &[(LabelRouteKey, Vec<RouteAttr>)]) -> Vec<SaiStatus> {
        let mut state = self.state.lock().unwrap();
        let mut statuses = Vec::with_capacity(entries.len());
        for (key, attrs) in entries {
            if state.label_routes.contains_key(key) {
                statuses.push(SaiStatus::ItemAlreadyExists);
                continue;
            }
            let mut entry = RouteState::default();
            for attr in attrs {
                apply_attr(&mut entry, attr);
            }
            state.label_routes.insert(*key, entry);
            statuses.push(SaiStatus::Success);
        }
        statuses
    }

    async fn bulk_set(&self, entries: &[(LabelRouteKey, RouteAttr)]) -> Vec<SaiStatus> {
        let mut state = self.state.lock().unwrap();
        entries
            .iter()
            .map(|(key, attr)| match state.label_routes.get_mut(key) {
                Some(entry) => {
                    apply_attr(entry, attr);
                    SaiStatus::Success
                }
                None => SaiStatus::ItemNotFound,
            })
            .collect()
    }

    async fn bulk_remove(&self, keys: &[LabelRouteKey]) -> Vec<SaiStatus> {
        let mut state = self.state.lock().unwrap();
        keys.iter()
            .map(|key| {
                if state.label_routes.remove(key).is_some() {
                    SaiStatus::Success
                } else {
                    SaiStatus::ItemNotFound
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn group_capacity_enforced() {
        let mock = MockSwitch::new().with_max_nhg_count(1);

        let first = mock.create_next_hop_group(NextHopGroupType::Ecmp).await;
        assert!(first.is_ok());

        let second = mock.create_next_hop_group(NextHopGroupType::Ecmp).await;
        let err = second.unwrap_err();
        assert!(err.is_capacity());

        mock.remove_next_hop_group(first.unwrap()).await.unwrap();
        assert!(mock
            .create_next_hop_group(NextHopGroupType::Ecmp)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn group_with_members_is_in_use() {
        let mock = MockSwitch::new();
        let group = mock
            .create_next_hop_group(NextHopGroupType::Ecmp)
            .await
            .unwrap();
        let nh = mock
            .create_next_hop(NextHopData::Ip {
                rif: RouterInterfaceOid::from_raw(1),
                ip: "10.0.0.1".parse().unwrap(),
            })
            .await
            .unwrap();
        let results = mock
            .create_next_hop_group_members(&[MemberRequest {
                group,
                next_hop: nh,
                seq_id: 1,
                weight: 1,
            }])
            .await;
        let member = results.into_iter().next().unwrap().unwrap();

        let err = mock.remove_next_hop_group(group).await.unwrap_err();
        assert_eq!(err.status(), SaiStatus::ObjectInUse);

        mock.remove_next_hop_group_members(&[member]).await;
        assert!(mock.remove_next_hop_group(group).await.is_ok());
    }

    #[tokio::test]
    async fn failure_injection_is_one_shot() {
        let mock = MockSwitch::new();
        mock.inject_failure("create_next_hop", SaiStatus::TableFull);

        let data = NextHopData::Ip {
            rif: RouterInterfaceOid::from_raw(1),
            ip: "10.0.0.1".parse().unwrap(),
        };
        assert!(mock.create_next_hop(data.clone()).await.is_err());
        assert!(mock.create_next_hop(data).await.is_ok());
    }
}
