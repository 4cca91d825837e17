//! End-to-end route reconciliation scenarios against the in-process
//! backend and bus.

use std::sync::Arc;

use orchd::context::OrchContext;
use orchd::error::ErrorSink;
use orchd::fg_nhg::FgNhgState;
use orchd::intfs::{RifEntry, RifTable};
use orchd::neigh::{NeighOrch, NeighborTable};
use orchd::nhg::NhgIndexTable;
use orchd::route::{NextHopGroupKey, RouteOrch, FLOW_COUNTER_ROUTE_PATTERN_TABLE};
use orchd::srv6::Srv6State;
use orchd::{shared, Shared};
use swsync_bus::{tables, Bus, DbId, KeyOpFieldsValues, MemoryBus};
use swsync_orch::Orch;
use swsync_sai::api::route::{LabelRouteKey, RouteBulkApi, RouteKey};
use swsync_sai::api::SwitchApi;
use swsync_sai::mock::MockSwitch;
use swsync_sai::{NextHopGroupOid, RouterInterfaceOid, VirtualRouterOid};
use swsync_types::IpPrefix;

struct Harness {
    backend: Arc<MockSwitch>,
    bus: Arc<MemoryBus>,
    ctx: Arc<OrchContext>,
    rifs: Shared<RifTable>,
    neighbors: Shared<NeighborTable>,
    neigh_orch: NeighOrch,
    route_orch: RouteOrch,
}

impl Harness {
    fn new(max_groups: usize) -> Self {
        let backend = Arc::new(MockSwitch::new().with_max_nhg_count(max_groups));
        let bus = Arc::new(MemoryBus::new());
        let ctx = Arc::new(OrchContext::new(
            "00:11:22:33:44:55".parse().unwrap(),
            VirtualRouterOid::from_raw(1),
            max_groups,
        ));
        let errors = Arc::new(ErrorSink::new(bus.clone()));
        let rifs = shared(RifTable::new());
        let neighbors = shared(NeighborTable::new());
        let nhg_index = shared(NhgIndexTable::new());
        let fg = shared(FgNhgState::new());
        let srv6 = shared(Srv6State::new());

        let mut neigh_orch = NeighOrch::new(
            backend.clone(),
            errors.clone(),
            rifs.clone(),
            neighbors.clone(),
        );
        let sai: Arc<dyn SwitchApi> = backend.clone();
        let route_api: Arc<dyn RouteBulkApi<RouteKey>> = backend.clone();
        let label_api: Arc<dyn RouteBulkApi<LabelRouteKey>> = backend.clone();
        let mut route_orch = RouteOrch::new(
            sai,
            route_api,
            label_api,
            bus.clone(),
            ctx.clone(),
            errors,
            rifs.clone(),
            neighbors.clone(),
            nhg_index,
            fg,
            srv6,
        );
        let (_, events) = neigh_orch.events.subscribe();
        route_orch.subscribe_neighbor_events(events);

        Self {
            backend,
            bus,
            ctx,
            rifs,
            neighbors,
            neigh_orch,
            route_orch,
        }
    }

    fn seed_rif(&self, alias: &str, prefix: Option<&str>) {
        let raw = 0x1000 + self.rifs.lock().unwrap().len() as u64;
        let mut entry = RifEntry::new(
            RouterInterfaceOid::from_raw(raw),
            self.ctx.virtual_router(),
            9100,
        );
        if let Some(prefix) = prefix {
            entry.ip_prefixes.insert(prefix.parse().unwrap());
        }
        self.rifs.lock().unwrap().insert(alias.to_string(), entry);
    }

    async fn resolve_neighbor(&mut self, alias: &str, ip: &str, mac: &str) {
        self.feed_neigh(KeyOpFieldsValues::set(
            format!("{}:{}", alias, ip),
            vec![("neigh".to_string(), mac.to_string())],
        ));
        self.neigh_orch.do_task(tables::APP_NEIGH_TABLE).await;
    }

    fn feed_route(&mut self, delta: KeyOpFieldsValues) {
        self.route_orch
            .core_mut()
            .consumer_mut(tables::APP_ROUTE_TABLE)
            .unwrap()
            .merge(delta);
    }

    fn feed_neigh(&mut self, delta: KeyOpFieldsValues) {
        self.neigh_orch
            .core_mut()
            .consumer_mut(tables::APP_NEIGH_TABLE)
            .unwrap()
            .merge(delta);
    }

    fn feed_port_state(&mut self, alias: &str, oper: &str) {
        self.neigh_orch
            .core_mut()
            .consumer_mut(tables::STATE_PORT_TABLE)
            .unwrap()
            .merge(KeyOpFieldsValues::set(
                alias,
                vec![("oper_status".to_string(), oper.to_string())],
            ));
    }

    fn feed_pattern(&mut self, delta: KeyOpFieldsValues) {
        self.route_orch
            .core_mut()
            .consumer_mut(FLOW_COUNTER_ROUTE_PATTERN_TABLE)
            .unwrap()
            .merge(delta);
    }

    fn route_key(&self, prefix: &str) -> RouteKey {
        RouteKey::new(self.ctx.virtual_router(), prefix.parse().unwrap())
    }

    fn route_pending(&self) -> bool {
        self.route_orch
            .core()
            .consumer(tables::APP_ROUTE_TABLE)
            .unwrap()
            .has_pending()
    }

    async fn run_route_cycle(&mut self) {
        self.route_orch.do_task(tables::APP_ROUTE_TABLE).await;
    }
}

fn route_set(key: &str, pairs: &[(&str, &str)]) -> KeyOpFieldsValues {
    KeyOpFieldsValues::set(
        key,
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect(),
    )
}

// Scenario: direct route whose next hop resolves only after a neighbor
// round-trip.
#[tokio::test]
async fn route_waits_for_neighbor_resolution() {
    let mut h = Harness::new(128);
    h.seed_rif("Vlan1", Some("10.1.1.1/24"));

    h.feed_route(route_set(
        "10.2.0.0/16",
        &[("nexthop", "10.1.1.2"), ("ifname", "Vlan1")],
    ));
    h.run_route_cycle().await;

    // Unresolved: a resolution request was issued, nothing programmed, the
    // entry is still staged.
    assert!(h
        .bus
        .get(DbId::Appl, "NEIGH_RESOLVE_TABLE", "Vlan1:10.1.1.2")
        .await
        .unwrap()
        .is_some());
    assert!(!h.backend.has_route(&h.route_key("10.2.0.0/16")));
    assert!(h.route_pending());

    // The neighbor arrives; the next wake-up settles the route.
    h.resolve_neighbor("Vlan1", "10.1.1.2", "00:00:0a:0b:0c:0d").await;
    h.run_route_cycle().await;

    let key = h.route_key("10.2.0.0/16");
    assert!(h.backend.has_route(&key));
    assert!(h.backend.route_next_hop(&key).is_some());
    assert!(!h.route_pending());
    assert!(h
        .bus
        .get(DbId::Error, "ERROR_ROUTE_TABLE", "10.2.0.0/16")
        .await
        .unwrap()
        .is_none());
}

// Scenario: ECMP group with a port flap; group id and route pointer stay
// stable while membership shrinks and grows.
#[tokio::test]
async fn ecmp_group_survives_port_flap() {
    let mut h = Harness::new(128);
    h.seed_rif("Ethernet4", None);
    h.seed_rif("Ethernet5", None);
    h.resolve_neighbor("Ethernet4", "10.1.1.2", "00:00:0a:0b:0c:01").await;
    h.resolve_neighbor("Ethernet5", "10.1.2.2", "00:00:0a:0b:0c:02").await;

    h.feed_route(route_set(
        "10.3.0.0/24",
        &[
            ("nexthop", "10.1.1.2,10.1.2.2"),
            ("ifname", "Ethernet4,Ethernet5"),
        ],
    ));
    h.run_route_cycle().await;

    let group_key: NextHopGroupKey =
        "10.1.1.2@Ethernet4,10.1.2.2@Ethernet5".parse().unwrap();
    let group_id = h.route_orch.next_hop_group_id(&group_key).unwrap();
    assert_eq!(h.route_orch.group_ref_count(&group_key), Some(1));
    assert_eq!(h.backend.group_member_seq_ids(group_id), vec![1, 2]);
    let route_key = h.route_key("10.3.0.0/24");
    let pointer = h.backend.route_next_hop(&route_key).unwrap();
    assert_eq!(pointer, group_id.as_raw());

    // Port down: one member leaves, identity stays.
    h.feed_port_state("Ethernet5", "down");
    h.neigh_orch.do_task(tables::STATE_PORT_TABLE).await;
    h.route_orch.on_timer().await;

    assert_eq!(h.backend.group_member_count(group_id), 1);
    assert_eq!(h.route_orch.next_hop_group_id(&group_key), Some(group_id));
    assert_eq!(h.backend.route_next_hop(&route_key), Some(group_id.as_raw()));

    // Port up: the member returns with its original sequence id.
    h.feed_port_state("Ethernet5", "up");
    h.neigh_orch.do_task(tables::STATE_PORT_TABLE).await;
    h.route_orch.on_timer().await;
    assert_eq!(h.backend.group_member_seq_ids(group_id), vec![1, 2]);
}

// Scenario: group capacity exhaustion falls back to a temporary stand-in
// and promotes once an old group frees the budget.
#[tokio::test]
async fn capacity_exhaustion_uses_temp_group_then_promotes() {
    let mut h = Harness::new(2);
    for (alias, ip) in [
        ("Ethernet4", "10.1.1.2"),
        ("Ethernet5", "10.1.2.2"),
        ("Ethernet6", "10.1.3.2"),
        ("Ethernet7", "10.1.4.2"),
    ] {
        h.seed_rif(alias, None);
        h.resolve_neighbor(alias, ip, "00:00:0a:0b:0c:0d").await;
    }

    h.feed_route(route_set(
        "10.1.0.0/24",
        &[
            ("nexthop", "10.1.1.2,10.1.2.2"),
            ("ifname", "Ethernet4,Ethernet5"),
        ],
    ));
    h.feed_route(route_set(
        "10.2.0.0/24",
        &[
            ("nexthop", "10.1.1.2,10.1.3.2"),
            ("ifname", "Ethernet4,Ethernet6"),
        ],
    ));
    h.run_route_cycle().await;
    assert_eq!(h.backend.group_count(), 2);

    // Third distinct set: no capacity left.
    h.feed_route(route_set(
        "10.4.0.0/24",
        &[
            ("nexthop", "10.1.3.2,10.1.4.2"),
            ("ifname", "Ethernet6,Ethernet7"),
        ],
    ));
    h.run_route_cycle().await;

    let vrf = h.ctx.virtual_router();
    let prefix: IpPrefix = "10.4.0.0/24".parse().unwrap();
    assert!(h.route_orch.is_using_temp_nhg(vrf, prefix));
    assert!(h.route_pending());
    // The route exists, pointed at a single resolvable member.
    let temp_pointer = h.backend.route_next_hop(&h.route_key("10.4.0.0/24")).unwrap();
    assert!(temp_pointer != 0);
    assert_eq!(h.backend.group_count(), 2);

    // Removing an old route frees a slot; the same cycle promotes.
    h.feed_route(KeyOpFieldsValues::del("10.1.0.0/24"));
    h.run_route_cycle().await;

    assert!(!h.route_orch.is_using_temp_nhg(vrf, prefix));
    assert!(!h.route_pending());
    assert_eq!(h.backend.group_count(), 2);
    let promoted = h.backend.route_next_hop(&h.route_key("10.4.0.0/24")).unwrap();
    let new_group: NextHopGroupKey =
        "10.1.3.2@Ethernet6,10.1.4.2@Ethernet7".parse().unwrap();
    assert_eq!(
        h.route_orch.next_hop_group_id(&new_group),
        Some(NextHopGroupOid::from_raw(promoted))
    );
}

// Scenario: flow-counter binding under a pattern cap, slot reuse on route
// deletion, and the promotion tick.
#[tokio::test]
async fn flow_counter_binding_under_cap() {
    let mut h = Harness::new(128);
    h.seed_rif("Ethernet4", None);
    h.resolve_neighbor("Ethernet4", "10.1.1.2", "00:00:0a:0b:0c:01").await;

    h.feed_pattern(KeyOpFieldsValues::set(
        "10.0.0.0/8",
        vec![("max_match_count".to_string(), "2".to_string())],
    ));
    h.route_orch.do_task(FLOW_COUNTER_ROUTE_PATTERN_TABLE).await;

    for prefix in ["10.1.0.0/16", "10.2.0.0/16", "10.3.0.0/16"] {
        h.feed_route(route_set(
            prefix,
            &[("nexthop", "10.1.1.2"), ("ifname", "Ethernet4")],
        ));
    }
    h.run_route_cycle().await;
    // Bind pass runs at the next cycle, sharing the route bulker.
    h.run_route_cycle().await;

    let pattern = ("".to_string(), "10.0.0.0/8".parse::<IpPrefix>().unwrap());
    assert_eq!(h.route_orch.flow_counters().bound_count(&pattern), 2);
    assert_eq!(h.route_orch.flow_counters().unbound_len(&pattern), 1);
    assert_eq!(h.backend.counter_count(), 2);

    // Promotion tick publishes the public maps.
    h.route_orch.promote_flex_counters().await;
    let bound_maps = h
        .bus
        .keys(DbId::Counters, tables::COUNTERS_ROUTE_TO_COUNTER_TABLE)
        .await
        .unwrap();
    assert_eq!(bound_maps.len(), 2);

    // Deleting a bound route frees the slot for the waiter.
    h.feed_route(KeyOpFieldsValues::del("10.1.0.0/16"));
    h.run_route_cycle().await;
    h.run_route_cycle().await;

    assert_eq!(h.route_orch.flow_counters().bound_count(&pattern), 2);
    assert_eq!(h.route_orch.flow_counters().unbound_len(&pattern), 0);
    assert!(h
        .route_orch
        .flow_counters()
        .is_bound(&pattern, &"10.3.0.0/16".parse().unwrap()));

    h.route_orch.promote_flex_counters().await;
    let key = h.route_key("10.3.0.0/16");
    assert!(h.backend.route_counter(&key).is_some());
}

// Refcount balance: matching SET/DEL history leaves no groups and no
// neighbor references.
#[tokio::test]
async fn refcounts_balance_after_churn() {
    let mut h = Harness::new(128);
    h.seed_rif("Ethernet4", None);
    h.seed_rif("Ethernet5", None);
    h.resolve_neighbor("Ethernet4", "10.1.1.2", "00:00:0a:0b:0c:01").await;
    h.resolve_neighbor("Ethernet5", "10.1.2.2", "00:00:0a:0b:0c:02").await;

    let ecmp = &[
        ("nexthop", "10.1.1.2,10.1.2.2"),
        ("ifname", "Ethernet4,Ethernet5"),
    ];
    // Two routes share one group.
    h.feed_route(route_set("10.5.0.0/24", ecmp));
    h.feed_route(route_set("10.6.0.0/24", ecmp));
    h.run_route_cycle().await;

    let group_key: NextHopGroupKey =
        "10.1.1.2@Ethernet4,10.1.2.2@Ethernet5".parse().unwrap();
    assert_eq!(h.route_orch.group_ref_count(&group_key), Some(2));

    h.feed_route(KeyOpFieldsValues::del("10.5.0.0/24"));
    h.feed_route(KeyOpFieldsValues::del("10.6.0.0/24"));
    h.run_route_cycle().await;

    assert_eq!(h.route_orch.group_ref_count(&group_key), None);
    assert_eq!(h.backend.group_count(), 0);
    assert_eq!(h.backend.route_count(), 0);
    // Neighbors are back to zero references.
    assert_eq!(h.neighbors.lock().unwrap().total_refs(), 0);
}

// Idempotence: applying the same SET twice leaves the second a no-op; DEL
// of a missing key settles.
#[tokio::test]
async fn set_and_del_are_idempotent() {
    let mut h = Harness::new(128);
    h.seed_rif("Ethernet4", None);
    h.resolve_neighbor("Ethernet4", "10.1.1.2", "00:00:0a:0b:0c:01").await;

    let delta = route_set(
        "10.8.0.0/24",
        &[("nexthop", "10.1.1.2"), ("ifname", "Ethernet4")],
    );
    h.feed_route(delta.clone());
    h.run_route_cycle().await;
    let ops_after_first = h.backend.ops().len();

    h.feed_route(delta);
    h.run_route_cycle().await;
    // Second application: no new backend mutations beyond the flush pass.
    assert_eq!(h.backend.ops().len(), ops_after_first);
    assert!(!h.route_pending());

    h.feed_route(KeyOpFieldsValues::del("10.9.9.0/24"));
    h.run_route_cycle().await;
    assert!(!h.route_pending());
}

// The nexthop_group field excludes direct nexthop/ifname fields.
#[tokio::test]
async fn contradictory_group_reference_is_invalid() {
    let mut h = Harness::new(128);
    h.feed_route(route_set(
        "10.9.0.0/24",
        &[("nexthop_group", "g1"), ("ifname", "Ethernet4")],
    ));
    h.run_route_cycle().await;

    assert!(!h.route_pending());
    assert_eq!(h.backend.route_count(), 0);
}
