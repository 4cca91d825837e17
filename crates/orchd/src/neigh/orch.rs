//! Neighbor orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use swsync_bus::{tables, Operation};
use swsync_orch::{Consumer, ConsumerConfig, Observable, Orch, OrchCore, RefCounted, TaskStatus};
use swsync_sai::api::{NextHopData, SwitchApi};
use swsync_types::{IpAddress, MacAddress};

use super::types::{NeighborEntry, NeighborEvent, NeighborTable};
use crate::error::ErrorSink;
use crate::intfs::RifTable;
use crate::route::NextHopKey;
use crate::Shared;

/// Table the route path writes to when it needs the kernel to resolve an
/// address (picked up by the neighbor sidecar).
pub const APP_NEIGH_RESOLVE_TABLE: &str = "NEIGH_RESOLVE_TABLE";

/// Reconciles `NEIGH_TABLE`: owns the neighbor/next-hop table, creates the
/// backend neighbor plus next-hop pair on SET, and tracks interface
/// oper-status so group membership can skip downed members. Also watches
/// the state-side `PORT_TABLE` for oper status.
pub struct NeighOrch {
    core: OrchCore,
    sai: Arc<dyn SwitchApi>,
    errors: Arc<ErrorSink>,
    rifs: Shared<RifTable>,
    neighbors: Shared<NeighborTable>,
    pub events: Observable<NeighborEvent>,
}

impl NeighOrch {
    pub const PRIORITY: i32 = 50;

    pub fn new(
        sai: Arc<dyn SwitchApi>,
        errors: Arc<ErrorSink>,
        rifs: Shared<RifTable>,
        neighbors: Shared<NeighborTable>,
    ) -> Self {
        let mut core = OrchCore::new("NeighOrch");
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(tables::APP_NEIGH_TABLE).with_priority(Self::PRIORITY),
        ));
        core.add_consumer(Consumer::new(
            // State-side port oper status feeds the IFDOWN flag.
            ConsumerConfig::new(tables::STATE_PORT_TABLE).with_priority(Self::PRIORITY + 1),
        ));
        Self {
            core,
            sai,
            errors,
            rifs,
            neighbors,
            events: Observable::new(),
        }
    }

    /// `<alias>:<ip>`; IPv6 addresses keep their colons.
    fn parse_key(key: &str) -> Option<(String, IpAddress)> {
        let (alias, ip) = key.split_once(':')?;
        Some((alias.to_string(), ip.parse().ok()?))
    }

    async fn add_neighbor(&mut self, key: &str, nh_key: NextHopKey, mac: MacAddress) -> TaskStatus {
        if self.neighbors.lock().unwrap().contains_key(&nh_key) {
            // Refresh: the MAC may have moved.
            let mut neighbors = self.neighbors.lock().unwrap();
            if let Some(entry) = neighbors.get_mut(&nh_key) {
                entry.mac = mac;
            }
            return TaskStatus::Success;
        }

        let rif = {
            let rifs = self.rifs.lock().unwrap();
            rifs.get(&nh_key.alias).map(|r| r.rif_id)
        };
        let Some(rif) = rif else {
            debug!("NeighOrch: rif {} not ready for {}", nh_key.alias, key);
            return TaskStatus::NeedRetry;
        };

        if let Err(e) = self.sai.create_neighbor(rif, nh_key.ip, mac).await {
            error!("NeighOrch: create neighbor {} failed: {}", key, e);
            self.errors
                .report(
                    tables::APP_NEIGH_TABLE,
                    key,
                    "create",
                    e.status(),
                    &vec![("neigh".to_string(), mac.to_string())],
                )
                .await;
            // Neighbors retry on failure.
            return TaskStatus::NeedRetry;
        }

        let nh_id = match self
            .sai
            .create_next_hop(NextHopData::Ip {
                rif,
                ip: nh_key.ip,
            })
            .await
        {
            Ok(nh_id) => nh_id,
            Err(e) => {
                error!("NeighOrch: create next hop {} failed: {}", key, e);
                let _ = self.sai.remove_neighbor(rif, nh_key.ip).await;
                self.errors
                    .report(
                        tables::APP_NEIGH_TABLE,
                        key,
                        "create",
                        e.status(),
                        &vec![("neigh".to_string(), mac.to_string())],
                    )
                    .await;
                return TaskStatus::NeedRetry;
            }
        };

        {
            let mut rifs = self.rifs.lock().unwrap();
            let _ = rifs.inc_ref(&nh_key.alias);
        }
        self.neighbors
            .lock()
            .unwrap()
            .insert(nh_key.clone(), NeighborEntry::new(nh_id, mac));
        self.errors.clear(tables::APP_NEIGH_TABLE, key).await;
        self.events.notify(NeighborEvent {
            key: nh_key,
            available: true,
        });
        info!("NeighOrch: neighbor {} resolved", key);
        TaskStatus::Success
    }

    async fn remove_neighbor(&mut self, key: &str, nh_key: NextHopKey) -> TaskStatus {
        let (nh_id, refs) = {
            let neighbors = self.neighbors.lock().unwrap();
            match neighbors.get(&nh_key) {
                Some(entry) => (entry.nh_id, entry.ref_count()),
                None => return TaskStatus::Success,
            }
        };
        if refs > 0 {
            debug!("NeighOrch: {} still referenced ({}), deferring", key, refs);
            return TaskStatus::NeedRetry;
        }

        self.events.notify(NeighborEvent {
            key: nh_key.clone(),
            available: false,
        });

        if let Err(e) = self.sai.remove_next_hop(nh_id).await {
            error!("NeighOrch: remove next hop {} failed: {}", key, e);
        }
        let rif = {
            let rifs = self.rifs.lock().unwrap();
            rifs.get(&nh_key.alias).map(|r| r.rif_id)
        };
        if let Some(rif) = rif {
            if let Err(e) = self.sai.remove_neighbor(rif, nh_key.ip).await {
                debug!("NeighOrch: remove neighbor {}: {}", key, e);
            }
            let mut rifs = self.rifs.lock().unwrap();
            let _ = rifs.dec_ref(&nh_key.alias);
        }
        self.neighbors.lock().unwrap().remove(&nh_key);
        self.errors.clear(tables::APP_NEIGH_TABLE, key).await;
        TaskStatus::Success
    }

    /// Port oper status: flips the IFDOWN flag on every neighbor out of the
    /// port and emits availability events for the group owners.
    fn apply_port_oper_status(&mut self, alias: &str, up: bool) {
        let affected: Vec<NextHopKey> = {
            let mut neighbors = self.neighbors.lock().unwrap();
            let keys: Vec<NextHopKey> = neighbors
                .iter()
                .filter(|(k, e)| k.alias == alias && e.if_down == up)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                if let Some(entry) = neighbors.get_mut(key) {
                    entry.if_down = !up;
                }
            }
            keys
        };
        for key in affected {
            self.events.notify(NeighborEvent {
                key,
                available: up,
            });
        }
    }

    async fn do_neigh_table(&mut self) {
        let keys = self
            .core
            .consumer(tables::APP_NEIGH_TABLE)
            .map(Consumer::pending_keys)
            .unwrap_or_default();
        for key in keys {
            let Some(entry) = self
                .core
                .consumer(tables::APP_NEIGH_TABLE)
                .and_then(|c| c.entry(&key).cloned())
            else {
                continue;
            };
            let status = match Self::parse_key(&key) {
                Some((alias, ip)) => {
                    let nh_key = NextHopKey::new(ip, alias);
                    match entry.op {
                        Operation::Set => {
                            match entry.get_field("neigh").and_then(|m| m.parse().ok()) {
                                Some(mac) => self.add_neighbor(&key, nh_key, mac).await,
                                None => {
                                    error!("NeighOrch: {} missing/bad neigh field", key);
                                    TaskStatus::Invalid
                                }
                            }
                        }
                        Operation::Del => self.remove_neighbor(&key, nh_key).await,
                    }
                }
                None => {
                    error!("NeighOrch: malformed key {}", key);
                    TaskStatus::Invalid
                }
            };
            if status.is_settled() {
                if let Some(consumer) = self.core.consumer_mut(tables::APP_NEIGH_TABLE) {
                    consumer.erase(&key);
                }
            }
        }
    }

    fn do_port_state_table(&mut self) {
        let keys = self
            .core
            .consumer(tables::STATE_PORT_TABLE)
            .map(Consumer::pending_keys)
            .unwrap_or_default();
        for key in keys {
            let entry = self
                .core
                .consumer_mut(tables::STATE_PORT_TABLE)
                .and_then(|c| c.erase(&key));
            let Some(entry) = entry else { continue };
            if entry.op.is_set() {
                if let Some(oper) = entry.get_field("oper_status") {
                    self.apply_port_oper_status(&key, oper.eq_ignore_ascii_case("up"));
                }
            }
        }
    }
}

#[async_trait]
impl Orch for NeighOrch {
    fn core(&self) -> &OrchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OrchCore {
        &mut self.core
    }

    async fn do_task(&mut self, table: &str) {
        match table {
            tables::APP_NEIGH_TABLE => self.do_neigh_table().await,
            _ => self.do_port_state_table(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swsync_bus::{KeyOpFieldsValues, MemoryBus};
    use swsync_sai::mock::MockSwitch;
    use swsync_sai::{RouterInterfaceOid, VirtualRouterOid};

    fn setup() -> (NeighOrch, Arc<MockSwitch>, Shared<NeighborTable>, Shared<RifTable>) {
        let sai = Arc::new(MockSwitch::new());
        let bus = Arc::new(MemoryBus::new());
        let errors = Arc::new(ErrorSink::new(bus));
        let rifs = crate::shared(RifTable::new());
        let neighbors = crate::shared(NeighborTable::new());
        let orch = NeighOrch::new(sai.clone(), errors, rifs.clone(), neighbors.clone());
        (orch, sai, neighbors, rifs)
    }

    fn seed_rif(rifs: &Shared<RifTable>, alias: &str) {
        rifs.lock().unwrap().insert(
            alias.to_string(),
            crate::intfs::RifEntry::new(
                RouterInterfaceOid::from_raw(0x10),
                VirtualRouterOid::from_raw(1),
                9100,
            ),
        );
    }

    fn feed(orch: &mut NeighOrch, table: &str, delta: KeyOpFieldsValues) {
        orch.core_mut().consumer_mut(table).unwrap().merge(delta);
    }

    #[tokio::test]
    async fn set_creates_neighbor_and_next_hop() {
        let (mut orch, sai, neighbors, rifs) = setup();
        seed_rif(&rifs, "Ethernet4");
        feed(
            &mut orch,
            tables::APP_NEIGH_TABLE,
            KeyOpFieldsValues::set(
                "Ethernet4:10.1.1.2",
                vec![("neigh".to_string(), "00:00:0a:0b:0c:0d".to_string())],
            ),
        );
        orch.do_task(tables::APP_NEIGH_TABLE).await;

        assert_eq!(sai.neighbor_count(), 1);
        assert_eq!(sai.next_hop_count(), 1);
        let key = NextHopKey::new("10.1.1.2".parse().unwrap(), "Ethernet4");
        assert!(neighbors.lock().unwrap().contains_key(&key));
        // The neighbor holds its interface.
        assert_eq!(rifs.lock().unwrap().ref_count(&"Ethernet4".to_string()), Some(1));
    }

    #[tokio::test]
    async fn set_without_rif_defers() {
        let (mut orch, sai, _, _) = setup();
        feed(
            &mut orch,
            tables::APP_NEIGH_TABLE,
            KeyOpFieldsValues::set(
                "Ethernet4:10.1.1.2",
                vec![("neigh".to_string(), "00:00:0a:0b:0c:0d".to_string())],
            ),
        );
        orch.do_task(tables::APP_NEIGH_TABLE).await;

        assert_eq!(sai.neighbor_count(), 0);
        assert!(orch
            .core()
            .consumer(tables::APP_NEIGH_TABLE)
            .unwrap()
            .has_pending());
    }

    #[tokio::test]
    async fn referenced_neighbor_defers_removal() {
        let (mut orch, sai, neighbors, rifs) = setup();
        seed_rif(&rifs, "Ethernet4");
        feed(
            &mut orch,
            tables::APP_NEIGH_TABLE,
            KeyOpFieldsValues::set(
                "Ethernet4:10.1.1.2",
                vec![("neigh".to_string(), "00:00:0a:0b:0c:0d".to_string())],
            ),
        );
        orch.do_task(tables::APP_NEIGH_TABLE).await;

        let key = NextHopKey::new("10.1.1.2".parse().unwrap(), "Ethernet4");
        neighbors.lock().unwrap().inc_ref(&key).unwrap();

        feed(
            &mut orch,
            tables::APP_NEIGH_TABLE,
            KeyOpFieldsValues::del("Ethernet4:10.1.1.2"),
        );
        orch.do_task(tables::APP_NEIGH_TABLE).await;
        assert_eq!(sai.neighbor_count(), 1);

        neighbors.lock().unwrap().dec_ref(&key).unwrap();
        orch.do_task(tables::APP_NEIGH_TABLE).await;
        assert_eq!(sai.neighbor_count(), 0);
        assert_eq!(sai.next_hop_count(), 0);
    }

    #[tokio::test]
    async fn port_flap_toggles_if_down_and_notifies() {
        let (mut orch, _, neighbors, rifs) = setup();
        seed_rif(&rifs, "Ethernet5");
        feed(
            &mut orch,
            tables::APP_NEIGH_TABLE,
            KeyOpFieldsValues::set(
                "Ethernet5:10.1.2.2",
                vec![("neigh".to_string(), "00:00:0a:0b:0c:0e".to_string())],
            ),
        );
        orch.do_task(tables::APP_NEIGH_TABLE).await;

        let (_, mut events) = orch.events.subscribe();
        feed(
            &mut orch,
            tables::STATE_PORT_TABLE,
            KeyOpFieldsValues::set(
                "Ethernet5",
                vec![("oper_status".to_string(), "down".to_string())],
            ),
        );
        orch.do_task(tables::STATE_PORT_TABLE).await;

        let key = NextHopKey::new("10.1.2.2".parse().unwrap(), "Ethernet5");
        assert!(neighbors.lock().unwrap().get(&key).unwrap().if_down);
        let event = events.try_recv().unwrap();
        assert_eq!(event, NeighborEvent { key: key.clone(), available: false });

        feed(
            &mut orch,
            tables::STATE_PORT_TABLE,
            KeyOpFieldsValues::set(
                "Ethernet5",
                vec![("oper_status".to_string(), "up".to_string())],
            ),
        );
        orch.do_task(tables::STATE_PORT_TABLE).await;
        assert!(!neighbors.lock().unwrap().get(&key).unwrap().if_down);
        assert!(events.try_recv().unwrap().available);
    }
}
