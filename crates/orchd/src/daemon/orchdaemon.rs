//! The orchestration daemon: constructs every orchestrator, wires bus
//! subscriptions into the selector, bootstraps baseline routes and runs the
//! cooperative loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use swsync_bus::{tables, Bus, BusResult, DbId};
use swsync_orch::{Recorder, SelectorLoop};
use swsync_sai::api::route::{LabelRouteKey, RouteBulkApi, RouteKey};
use swsync_sai::api::SwitchApi;
use swsync_sai::VirtualRouterOid;
use swsync_types::MacAddress;

use crate::ars::ArsOrch;
use crate::context::OrchContext;
use crate::error::{ErrorOrch, ErrorSink, SAI_ERROR_NOTIFICATION_CHANNEL};
use crate::fg_nhg::{FgNhgOrch, FgNhgState};
use crate::intfs::{IntfsOrch, RifTable};
use crate::neigh::{NeighOrch, NeighborTable};
use crate::nhg::{NhgIndexTable, NhgOrch};
use crate::route::RouteOrch;
use crate::srv6::{Srv6Orch, Srv6State};

/// Daemon parameters from the CLI.
#[derive(Debug, Clone)]
pub struct OrchDaemonConfig {
    pub switch_mac: MacAddress,
    pub batch_size: usize,
    /// Per-delta audit recording.
    pub record: bool,
    pub record_dir: PathBuf,
    pub select_timeout: Duration,
}

impl Default for OrchDaemonConfig {
    fn default() -> Self {
        Self {
            switch_mac: MacAddress::ZERO,
            batch_size: swsync_orch::DEFAULT_BATCH_SIZE,
            record: true,
            record_dir: PathBuf::from("."),
            select_timeout: Duration::from_secs(1),
        }
    }
}

/// The assembled daemon.
pub struct OrchDaemon {
    selector: SelectorLoop,
}

impl OrchDaemon {
    /// Builds every orchestrator, subscribes their tables and bootstraps
    /// baseline state.
    pub async fn build(
        bus: Arc<dyn Bus>,
        sai: Arc<dyn SwitchApi>,
        route_api: Arc<dyn RouteBulkApi<RouteKey>>,
        label_api: Arc<dyn RouteBulkApi<LabelRouteKey>>,
        config: OrchDaemonConfig,
    ) -> BusResult<Self> {
        let capabilities = sai.capabilities();
        let ctx = Arc::new(OrchContext::new(
            config.switch_mac,
            VirtualRouterOid::from_raw(1),
            capabilities.max_next_hop_group_count,
        ));
        let errors = Arc::new(ErrorSink::new(bus.clone()));

        let rifs = crate::shared(RifTable::new());
        let neighbors = crate::shared(NeighborTable::new());
        let nhg_index = crate::shared(NhgIndexTable::new());
        let fg = crate::shared(FgNhgState::new());
        let srv6_state = crate::shared(Srv6State::new());

        let mut intfs_orch = IntfsOrch::new(sai.clone(), bus.clone(), ctx.clone(), rifs.clone());
        let mut neigh_orch = NeighOrch::new(
            sai.clone(),
            errors.clone(),
            rifs.clone(),
            neighbors.clone(),
        );
        let mut nhg_orch = NhgOrch::new(
            sai.clone(),
            ctx.clone(),
            neighbors.clone(),
            nhg_index.clone(),
        );
        let mut fg_orch = FgNhgOrch::new(sai.clone(), fg.clone());
        let mut srv6_orch = Srv6Orch::new(sai.clone(), ctx.clone(), srv6_state.clone());
        let mut ars_orch = ArsOrch::new(sai.clone(), bus.clone());
        let mut route_orch = RouteOrch::new(
            sai.clone(),
            route_api,
            label_api,
            bus.clone(),
            ctx.clone(),
            errors,
            rifs,
            neighbors,
            nhg_index,
            fg,
            srv6_state,
        );
        let mut error_orch = ErrorOrch::new(bus.clone());

        // Routes listen to neighbor availability for member churn.
        let (_, events) = neigh_orch.events.subscribe();
        route_orch.subscribe_neighbor_events(events);

        let mut selector = SelectorLoop::new(config.select_timeout);
        let notify = selector.notify_handle();

        let recorder: Option<Arc<Recorder>> = if config.record {
            match Recorder::open(&config.record_dir, "orchd") {
                Ok(recorder) => Some(Arc::new(recorder)),
                Err(e) => {
                    log::warn!("audit recording disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        // Table subscriptions, per database side.
        use swsync_orch::Orch;
        let batch_size = config.batch_size;
        async fn wire(
            bus: &Arc<dyn Bus>,
            notify: &Arc<tokio::sync::Notify>,
            recorder: &Option<Arc<Recorder>>,
            batch_size: usize,
            orch: &mut dyn Orch,
            subs: &[(DbId, &str)],
        ) -> BusResult<()> {
            for (db, table) in subs {
                let subscription = bus.subscribe(*db, table, notify.clone()).await?;
                if let Some(consumer) = orch.core_mut().consumer_mut(table) {
                    consumer.attach_subscription(subscription);
                    consumer.set_batch_size(batch_size);
                    if let Some(recorder) = recorder {
                        consumer.attach_recorder(recorder.clone());
                    }
                }
            }
            Ok(())
        }

        wire(
            &bus,
            &notify,
            &recorder,
            batch_size,
            &mut intfs_orch,
            &[(DbId::Appl, tables::APP_INTF_TABLE)],
        )
        .await?;
        wire(
            &bus,
            &notify,
            &recorder,
            batch_size,
            &mut neigh_orch,
            &[
                (DbId::Appl, tables::APP_NEIGH_TABLE),
                (DbId::State, tables::STATE_PORT_TABLE),
            ],
        )
        .await?;
        wire(
            &bus,
            &notify,
            &recorder,
            batch_size,
            &mut nhg_orch,
            &[
                (DbId::Appl, tables::APP_NEXTHOP_GROUP_TABLE),
                (DbId::Appl, tables::APP_CLASS_BASED_NEXTHOP_GROUP_TABLE),
            ],
        )
        .await?;
        wire(
            &bus,
            &notify,
            &recorder,
            batch_size,
            &mut fg_orch,
            &[
                (DbId::Config, tables::CFG_FG_NHG_TABLE),
                (DbId::Config, tables::CFG_FG_NHG_PREFIX_TABLE),
                (DbId::Config, tables::CFG_FG_NHG_MEMBER_TABLE),
            ],
        )
        .await?;
        wire(
            &bus,
            &notify,
            &recorder,
            batch_size,
            &mut srv6_orch,
            &[
                (DbId::Appl, tables::APP_SRV6_SID_LIST_TABLE),
                (DbId::Appl, tables::APP_SRV6_MY_SID_TABLE),
            ],
        )
        .await?;
        wire(
            &bus,
            &notify,
            &recorder,
            batch_size,
            &mut ars_orch,
            &[
                (DbId::Config, tables::CFG_ARS_PROFILE_TABLE),
                (DbId::Config, tables::CFG_ARS_INTERFACE_TABLE),
                (DbId::Config, tables::CFG_ARS_OBJECT_TABLE),
                (DbId::Config, tables::CFG_ARS_NEXTHOP_TABLE),
            ],
        )
        .await?;
        wire(
            &bus,
            &notify,
            &recorder,
            batch_size,
            &mut route_orch,
            &[
                (DbId::Appl, tables::APP_ROUTE_TABLE),
                (DbId::Appl, tables::APP_LABEL_ROUTE_TABLE),
                // The flow-counter pattern table lives on the state bus.
                (DbId::State, crate::route::FLOW_COUNTER_ROUTE_PATTERN_TABLE),
            ],
        )
        .await?;

        // Error-bus channels.
        let notifications = bus
            .subscribe_channel(SAI_ERROR_NOTIFICATION_CHANNEL, notify.clone())
            .await?;
        let flushes = bus
            .subscribe_channel(tables::ERROR_FLUSH_CHANNEL, notify.clone())
            .await?;
        error_orch.attach_channels(notifications, flushes);

        // Bootstrap.
        route_orch.init_default_routes().await;
        route_orch.init_link_local_routes().await;
        ars_orch.publish_capability().await;
        info!(
            "orchd: bootstrap complete (max groups {})",
            ctx.max_nhg_count()
        );

        selector.register(Box::new(intfs_orch));
        selector.register(Box::new(neigh_orch));
        selector.register(Box::new(nhg_orch));
        selector.register(Box::new(fg_orch));
        selector.register(Box::new(srv6_orch));
        selector.register(Box::new(ars_orch));
        selector.register(Box::new(route_orch));
        selector.register(Box::new(error_orch));

        Ok(Self { selector })
    }

    /// Runs forever; shutdown is process termination.
    pub async fn run(mut self) -> ! {
        info!("orchd: entering main loop");
        self.selector.run().await
    }

    /// One wait + drain cycle, exposed for tests.
    pub async fn run_once(&mut self) -> bool {
        self.selector.run_once().await
    }
}
