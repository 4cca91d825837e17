//! Router-interface orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, warn};
use swsync_bus::{tables, Bus, DbId, Operation};
use swsync_orch::{Consumer, ConsumerConfig, Orch, OrchCore, TaskStatus};
use swsync_sai::api::SwitchApi;
use swsync_types::IpPrefix;

use super::types::{RifEntry, RifTable, DEFAULT_RIF_MTU};
use crate::context::OrchContext;
use crate::Shared;

/// Reconciles `INTF_TABLE`: owns the router-interface table, creating the
/// backend object on the first reference and destroying it once no
/// refcount and no address covers it.
pub struct IntfsOrch {
    core: OrchCore,
    sai: Arc<dyn SwitchApi>,
    bus: Arc<dyn Bus>,
    ctx: Arc<OrchContext>,
    rifs: Shared<RifTable>,
}

impl IntfsOrch {
    pub const PRIORITY: i32 = 60;

    pub fn new(
        sai: Arc<dyn SwitchApi>,
        bus: Arc<dyn Bus>,
        ctx: Arc<OrchContext>,
        rifs: Shared<RifTable>,
    ) -> Self {
        let mut core = OrchCore::new("IntfsOrch");
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(tables::APP_INTF_TABLE).with_priority(Self::PRIORITY),
        ));
        Self {
            core,
            sai,
            bus,
            ctx,
            rifs,
        }
    }

    /// `alias` or `alias:prefix` (IPv6 prefixes keep their colons, so the
    /// split is on the first separator only).
    fn parse_key(key: &str) -> (String, Option<IpPrefix>) {
        match key.split_once(':') {
            Some((alias, rest)) => match rest.parse::<IpPrefix>() {
                Ok(prefix) => (alias.to_string(), Some(prefix)),
                Err(_) => (key.to_string(), None),
            },
            None => (key.to_string(), None),
        }
    }

    async fn ensure_rif(
        &mut self,
        alias: &str,
        vrf_name: &str,
        mtu: u32,
    ) -> Result<(), TaskStatus> {
        if self.rifs.lock().unwrap().contains_key(&alias.to_string()) {
            return Ok(());
        }
        let Some(vrf) = self.ctx.resolve_vrf(vrf_name) else {
            debug!("IntfsOrch: VRF {} not ready for {}", vrf_name, alias);
            return Err(TaskStatus::NeedRetry);
        };
        let rif_id = self
            .sai
            .create_router_interface(vrf, alias, mtu)
            .await
            .map_err(|e| {
                error!("IntfsOrch: create rif {} failed: {}", alias, e);
                TaskStatus::Failed
            })?;
        self.rifs
            .lock()
            .unwrap()
            .insert(alias.to_string(), RifEntry::new(rif_id, vrf, mtu));

        // Publish the OID -> name mapping the error bus resolves through.
        let _ = self
            .bus
            .set(
                DbId::Counters,
                tables::COUNTERS_RIF_NAME_MAP,
                &rif_id.to_string(),
                &vec![("name".to_string(), alias.to_string())],
            )
            .await;
        Ok(())
    }

    async fn remove_rif_if_unused(&mut self, alias: &str) {
        let removable = {
            let rifs = self.rifs.lock().unwrap();
            rifs.get(&alias.to_string()).is_some_and(RifEntry::removable)
        };
        if !removable {
            return;
        }
        let rif_id = {
            let mut rifs = self.rifs.lock().unwrap();
            rifs.remove(&alias.to_string()).map(|e| e.rif_id)
        };
        if let Some(rif_id) = rif_id {
            if let Err(e) = self.sai.remove_router_interface(rif_id).await {
                warn!("IntfsOrch: remove rif {} failed: {}", alias, e);
            }
            let _ = self
                .bus
                .del(
                    DbId::Counters,
                    tables::COUNTERS_RIF_NAME_MAP,
                    &rif_id.to_string(),
                )
                .await;
        }
    }

    async fn process_entry(&mut self, key: &str) -> TaskStatus {
        let Some(entry) = self
            .core
            .consumer(tables::APP_INTF_TABLE)
            .and_then(|c| c.entry(key).cloned())
        else {
            return TaskStatus::Success;
        };
        let (alias, prefix) = Self::parse_key(key);

        match (entry.op, prefix) {
            (Operation::Set, None) => {
                let vrf_name = entry.get_field("vrf_name").unwrap_or("").to_string();
                let mtu = entry
                    .get_field("mtu")
                    .and_then(|m| m.parse().ok())
                    .unwrap_or(DEFAULT_RIF_MTU);
                match self.ensure_rif(&alias, &vrf_name, mtu).await {
                    Ok(()) => TaskStatus::Success,
                    Err(status) => status,
                }
            }
            (Operation::Set, Some(prefix)) => {
                if let Err(status) = self.ensure_rif(&alias, "", DEFAULT_RIF_MTU).await {
                    return status;
                }
                let mut rifs = self.rifs.lock().unwrap();
                if let Some(rif) = rifs.get_mut(&alias) {
                    rif.ip_prefixes.insert(prefix);
                }
                TaskStatus::Success
            }
            (Operation::Del, Some(prefix)) => {
                {
                    let mut rifs = self.rifs.lock().unwrap();
                    if let Some(rif) = rifs.get_mut(&alias) {
                        rif.ip_prefixes.remove(&prefix);
                    }
                }
                self.remove_rif_if_unused(&alias).await;
                TaskStatus::Success
            }
            (Operation::Del, None) => {
                let exists = self.rifs.lock().unwrap().contains_key(&alias);
                if !exists {
                    return TaskStatus::Success;
                }
                let removable = {
                    let rifs = self.rifs.lock().unwrap();
                    rifs.get(&alias).is_some_and(RifEntry::removable)
                };
                if !removable {
                    // Routes or neighbors still hold it.
                    return TaskStatus::NeedRetry;
                }
                self.remove_rif_if_unused(&alias).await;
                TaskStatus::Success
            }
        }
    }
}

#[async_trait]
impl Orch for IntfsOrch {
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
            let status = self.process_entry(&key).await;
            if status.is_settled() || status == TaskStatus::Failed {
                if let Some(consumer) = self.core.consumer_mut(table) {
                    consumer.erase(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swsync_bus::{KeyOpFieldsValues, MemoryBus};
    use swsync_sai::mock::MockSwitch;
    use swsync_sai::VirtualRouterOid;

    fn setup() -> (IntfsOrch, Arc<MockSwitch>, Shared<RifTable>) {
        let sai = Arc::new(MockSwitch::new());
        let bus = Arc::new(MemoryBus::new());
        let ctx = Arc::new(OrchContext::new(
            "00:11:22:33:44:55".parse().unwrap(),
            VirtualRouterOid::from_raw(1),
            128,
        ));
        let rifs = crate::shared(RifTable::new());
        let orch = IntfsOrch::new(sai.clone(), bus, ctx, rifs.clone());
        (orch, sai, rifs)
    }

    fn feed(orch: &mut IntfsOrch, delta: KeyOpFieldsValues) {
        orch.core_mut()
            .consumer_mut(tables::APP_INTF_TABLE)
            .unwrap()
            .merge(delta);
    }

    #[tokio::test]
    async fn ip_set_creates_rif_and_records_prefix() {
        let (mut orch, sai, rifs) = setup();
        feed(&mut orch, KeyOpFieldsValues::set("Vlan1:10.1.1.1/24", vec![]));
        orch.do_task(tables::APP_INTF_TABLE).await;

        assert_eq!(sai.rif_count(), 1);
        let table = rifs.lock().unwrap();
        let rif = table.get(&"Vlan1".to_string()).unwrap();
        assert!(rif.ip_prefixes.contains(&"10.1.1.1/24".parse().unwrap()));
    }

    #[tokio::test]
    async fn last_ip_del_removes_rif() {
        let (mut orch, sai, _rifs) = setup();
        feed(&mut orch, KeyOpFieldsValues::set("Vlan1:10.1.1.1/24", vec![]));
        orch.do_task(tables::APP_INTF_TABLE).await;

        feed(&mut orch, KeyOpFieldsValues::del("Vlan1:10.1.1.1/24"));
        orch.do_task(tables::APP_INTF_TABLE).await;
        assert_eq!(sai.rif_count(), 0);
    }

    #[tokio::test]
    async fn referenced_rif_survives_del() {
        let (mut orch, sai, rifs) = setup();
        feed(&mut orch, KeyOpFieldsValues::set("Vlan1:10.1.1.1/24", vec![]));
        orch.do_task(tables::APP_INTF_TABLE).await;

        rifs.lock().unwrap().inc_ref(&"Vlan1".to_string()).unwrap();

        feed(&mut orch, KeyOpFieldsValues::del("Vlan1:10.1.1.1/24"));
        orch.do_task(tables::APP_INTF_TABLE).await;
        // Prefix is gone but the interface is still held.
        assert_eq!(sai.rif_count(), 1);
    }

    #[tokio::test]
    async fn unknown_vrf_defers() {
        let (mut orch, sai, _) = setup();
        feed(
            &mut orch,
            KeyOpFieldsValues::set(
                "Ethernet8",
                vec![("vrf_name".to_string(), "Vrf-missing".to_string())],
            ),
        );
        orch.do_task(tables::APP_INTF_TABLE).await;

        assert_eq!(sai.rif_count(), 0);
        // Entry stays for retry.
        assert!(orch
            .core()
            .consumer(tables::APP_INTF_TABLE)
            .unwrap()
            .has_pending());
    }
}
