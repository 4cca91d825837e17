//! Backend API traits.
//!
//! [`SwitchApi`] covers the single-object surface (next hops, groups,
//! members, router interfaces, neighbors, counters, SRv6 objects) together
//! with the capability queries the reconcilers gate on. Bulked entry
//! operations (routes, label routes) go through [`route::RouteBulkApi`] and
//! friends, driven by the bulkers in [`crate::bulker`].

pub mod route;

use async_trait::async_trait;
use swsync_types::{IpAddress, Ipv6Address, LabelStack, MacAddress};

use crate::{
    ArsProfileOid, CounterOid, NextHopGroupMemberOid, NextHopGroupOid, NextHopOid,
    RouterInterfaceOid, SaiResult, Srv6SidListOid, VirtualRouterOid,
};

pub use route::{LabelRouteKey, PacketAction, RouteAttr, RouteBulkApi, RouteKey};

/// What a next-hop object forwards through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextHopData {
    /// Plain IP next hop out of a router interface.
    Ip {
        rif: RouterInterfaceOid,
        ip: IpAddress,
    },
    /// MPLS push next hop.
    Mpls {
        rif: RouterInterfaceOid,
        ip: IpAddress,
        labels: LabelStack,
    },
    /// SRv6 encapsulation next hop through a segment list.
    Srv6 {
        sid_list: Srv6SidListOid,
        source: Ipv6Address,
    },
    /// Overlay (VNI) tunnel next hop.
    Overlay {
        ip: IpAddress,
        vni: u32,
        router_mac: MacAddress,
    },
}

/// Group discipline; ECMP flavors are chosen from the switch capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextHopGroupType {
    Ecmp,
    OrderedEcmp,
    /// Explicitly programmed hash buckets (fine-grained ECMP).
    FineGrained,
    /// Selects among member groups by traffic class.
    ClassBased,
}

/// A staged next-hop-group member create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRequest {
    pub group: NextHopGroupOid,
    pub next_hop: NextHopOid,
    pub seq_id: u32,
    pub weight: u32,
}

/// SRv6 local-SID endpoint behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum SidBehavior {
    End,
    EndX,
    EndT,
    EndDx4,
    EndDx6,
    EndDt4,
    EndDt6,
    EndDt46,
    EndB6Encaps,
    EndB6EncapsRed,
    EndB6Insert,
    EndB6InsertRed,
    Udx4,
    Udx6,
    Udt4,
    Udt6,
    Udt46,
    Un,
    Ua,
}

impl SidBehavior {
    /// Behaviors that terminate into a VRF and therefore need one resolved.
    pub fn requires_vrf(&self) -> bool {
        matches!(
            self,
            SidBehavior::EndT
                | SidBehavior::EndDt4
                | SidBehavior::EndDt6
                | SidBehavior::EndDt46
                | SidBehavior::Udt4
                | SidBehavior::Udt6
                | SidBehavior::Udt46
        )
    }
}

/// ARS profile programming parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArsProfileData {
    pub algorithm: String,
    pub max_flows: u32,
    pub sample_interval: u32,
    pub ipv4_enable: bool,
    pub ipv6_enable: bool,
}

/// Capability set reported by the switch at start.
#[derive(Debug, Clone)]
pub struct SwitchCapabilities {
    pub max_next_hop_group_count: usize,
    pub ordered_ecmp: bool,
    pub route_flow_counters: bool,
    pub ars_supported: bool,
}

impl Default for SwitchCapabilities {
    fn default() -> Self {
        Self {
            max_next_hop_group_count: 1024,
            ordered_ecmp: false,
            route_flow_counters: true,
            ars_supported: false,
        }
    }
}

/// Single-object backend surface.
///
/// Every method maps to one vendor call; callers own batching policy and
/// reference counting.
#[async_trait]
pub trait SwitchApi: Send + Sync {
    fn capabilities(&self) -> SwitchCapabilities;

    async fn create_router_interface(
        &self,
        vrf: VirtualRouterOid,
        alias: &str,
        mtu: u32,
    ) -> SaiResult<RouterInterfaceOid>;
    async fn remove_router_interface(&self, rif: RouterInterfaceOid) -> SaiResult<()>;

    async fn create_neighbor(
        &self,
        rif: RouterInterfaceOid,
        ip: IpAddress,
        mac: MacAddress,
    ) -> SaiResult<()>;
    async fn remove_neighbor(&self, rif: RouterInterfaceOid, ip: IpAddress) -> SaiResult<()>;

    async fn create_next_hop(&self, data: NextHopData) -> SaiResult<NextHopOid>;
    async fn remove_next_hop(&self, nh: NextHopOid) -> SaiResult<()>;

    async fn create_next_hop_group(
        &self,
        group_type: NextHopGroupType,
    ) -> SaiResult<NextHopGroupOid>;
    async fn remove_next_hop_group(&self, group: NextHopGroupOid) -> SaiResult<()>;

    /// Bulk member create; one status per request, in order.
    async fn create_next_hop_group_members(
        &self,
        requests: &[MemberRequest],
    ) -> Vec<SaiResult<NextHopGroupMemberOid>>;
    /// Bulk member remove; one status per id, in order.
    async fn remove_next_hop_group_members(
        &self,
        members: &[NextHopGroupMemberOid],
    ) -> Vec<SaiResult<()>>;

    async fn create_counter(&self) -> SaiResult<CounterOid>;
    async fn remove_counter(&self, counter: CounterOid) -> SaiResult<()>;

    async fn create_srv6_sid_list(&self, segments: &[Ipv6Address]) -> SaiResult<Srv6SidListOid>;
    async fn remove_srv6_sid_list(&self, sid_list: Srv6SidListOid) -> SaiResult<()>;

    async fn create_my_sid_entry(
        &self,
        sid: Ipv6Address,
        behavior: SidBehavior,
        vrf: Option<VirtualRouterOid>,
    ) -> SaiResult<()>;
    async fn remove_my_sid_entry(&self, sid: Ipv6Address) -> SaiResult<()>;

    async fn create_ars_profile(&self, data: &ArsProfileData) -> SaiResult<ArsProfileOid>;
    async fn set_ars_profile(&self, profile: ArsProfileOid, data: &ArsProfileData)
        -> SaiResult<()>;
    async fn remove_ars_profile(&self, profile: ArsProfileOid) -> SaiResult<()>;
}
