//! SRv6 orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use swsync_bus::{tables, Operation};
use swsync_orch::{Consumer, ConsumerConfig, Orch, OrchCore, RefCounted, TaskStatus};
use swsync_sai::api::SwitchApi;
use swsync_types::Ipv6Address;

use super::types::{parse_behavior, parse_my_sid_key, MySidEntry, SidListEntry, Srv6State};
use crate::context::OrchContext;
use crate::Shared;

/// Reconciles `SRV6_SID_LIST_TABLE` and `SRV6_MY_SID_TABLE`: owns the
/// segment-list and local-SID tables. Routes reference SID lists by name
/// through the shared state; a list disappears only at refcount zero.
pub struct Srv6Orch {
    core: OrchCore,
    sai: Arc<dyn SwitchApi>,
    ctx: Arc<OrchContext>,
    state: Shared<Srv6State>,
}

impl Srv6Orch {
    pub const PRIORITY: i32 = 45;

    pub fn new(sai: Arc<dyn SwitchApi>, ctx: Arc<OrchContext>, state: Shared<Srv6State>) -> Self {
        let mut core = OrchCore::new("Srv6Orch");
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(tables::APP_SRV6_SID_LIST_TABLE).with_priority(Self::PRIORITY),
        ));
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(tables::APP_SRV6_MY_SID_TABLE).with_priority(Self::PRIORITY),
        ));
        Self {
            core,
            sai,
            ctx,
            state,
        }
    }

    async fn set_sid_list(&mut self, name: &str, path: &str) -> TaskStatus {
        if self.state.lock().unwrap().sid_lists.contains_key(&name.to_string()) {
            // Path changes would re-create; unchanged lists settle.
            return TaskStatus::Success;
        }
        let segments: Result<Vec<Ipv6Address>, _> =
            path.split(',').map(|s| s.trim().parse()).collect();
        let Ok(segments) = segments else {
            error!("Srv6Orch: bad segment path for {}", name);
            return TaskStatus::Invalid;
        };
        if segments.is_empty() {
            return TaskStatus::Invalid;
        }

        match self.sai.create_srv6_sid_list(&segments).await {
            Ok(oid) => {
                self.state
                    .lock()
                    .unwrap()
                    .sid_lists
                    .insert(name.to_string(), SidListEntry::new(oid, segments));
                info!("Srv6Orch: SID list {} programmed", name);
                TaskStatus::Success
            }
            Err(e) => {
                error!("Srv6Orch: create SID list {} failed: {}", name, e);
                TaskStatus::Failed
            }
        }
    }

    async fn del_sid_list(&mut self, name: &str) -> TaskStatus {
        let (oid, refs) = {
            let state = self.state.lock().unwrap();
            match state.sid_lists.get(&name.to_string()) {
                Some(entry) => (entry.oid, entry.ref_count()),
                None => return TaskStatus::Success,
            }
        };
        if refs > 0 {
            debug!("Srv6Orch: SID list {} still referenced, deferring", name);
            return TaskStatus::NeedRetry;
        }
        if let Err(e) = self.sai.remove_srv6_sid_list(oid).await {
            error!("Srv6Orch: remove SID list {} failed: {}", name, e);
        }
        self.state.lock().unwrap().sid_lists.remove(&name.to_string());
        TaskStatus::Success
    }

    async fn set_my_sid(
        &mut self,
        key: &str,
        action: Option<&str>,
        vrf: Option<&str>,
    ) -> TaskStatus {
        if self.state.lock().unwrap().my_sids.contains_key(key) {
            return TaskStatus::Success;
        }
        let Ok((_, _, _, _, sid)) = parse_my_sid_key(key) else {
            error!("Srv6Orch: malformed MY_SID key {}", key);
            return TaskStatus::Invalid;
        };
        let Some(behavior) = action.and_then(parse_behavior) else {
            error!("Srv6Orch: {}: unknown action {:?}", key, action);
            return TaskStatus::Invalid;
        };

        // T/DT variants terminate into a VRF; the VRF must resolve first.
        let vrf_oid = if behavior.requires_vrf() {
            let name = vrf.unwrap_or("");
            match self.ctx.resolve_vrf(name) {
                Some(oid) => Some(oid),
                None => {
                    debug!("Srv6Orch: {} waiting on VRF {}", key, name);
                    return TaskStatus::NeedRetry;
                }
            }
        } else {
            None
        };

        match self.sai.create_my_sid_entry(sid, behavior, vrf_oid).await {
            Ok(()) => {
                self.state.lock().unwrap().my_sids.insert(
                    key.to_string(),
                    MySidEntry {
                        sid,
                        behavior,
                        vrf_name: vrf.map(str::to_string),
                    },
                );
                info!("Srv6Orch: local SID {} programmed ({:?})", key, behavior);
                TaskStatus::Success
            }
            Err(e) => {
                error!("Srv6Orch: create local SID {} failed: {}", key, e);
                TaskStatus::Failed
            }
        }
    }

    async fn del_my_sid(&mut self, key: &str) -> TaskStatus {
        let entry = self.state.lock().unwrap().my_sids.get(key).cloned();
        let Some(entry) = entry else {
            return TaskStatus::Success;
        };
        if let Err(e) = self.sai.remove_my_sid_entry(entry.sid).await {
            error!("Srv6Orch: remove local SID {} failed: {}", key, e);
        }
        self.state.lock().unwrap().my_sids.remove(key);
        TaskStatus::Success
    }
}

#[async_trait]
impl Orch for Srv6Orch {
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
            let Some(delta) = self
                .core
                .consumer(table)
                .and_then(|c| c.entry(&key).cloned())
            else {
                continue;
            };
            let status = match (table, delta.op) {
                (tables::APP_SRV6_SID_LIST_TABLE, Operation::Set) => {
                    let path = delta.get_field("path").unwrap_or("");
                    self.set_sid_list(&key, path).await
                }
                (tables::APP_SRV6_SID_LIST_TABLE, Operation::Del) => {
                    self.del_sid_list(&key).await
                }
                (_, Operation::Set) => {
                    self.set_my_sid(&key, delta.get_field("action"), delta.get_field("vrf"))
                        .await
                }
                (_, Operation::Del) => self.del_my_sid(&key).await,
            };
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
    use swsync_bus::KeyOpFieldsValues;
    use swsync_sai::mock::MockSwitch;
    use swsync_sai::VirtualRouterOid;

    fn setup() -> (Srv6Orch, Arc<MockSwitch>, Shared<Srv6State>, Arc<OrchContext>) {
        let sai = Arc::new(MockSwitch::new());
        let ctx = Arc::new(OrchContext::new(
            "00:11:22:33:44:55".parse().unwrap(),
            VirtualRouterOid::from_raw(1),
            128,
        ));
        let state = crate::shared(Srv6State::new());
        let orch = Srv6Orch::new(sai.clone(), ctx.clone(), state.clone());
        (orch, sai, state, ctx)
    }

    fn feed(orch: &mut Srv6Orch, table: &str, delta: KeyOpFieldsValues) {
        orch.core_mut().consumer_mut(table).unwrap().merge(delta);
    }

    #[tokio::test]
    async fn sid_list_lifecycle_with_refcount_gate() {
        let (mut orch, sai, state, _) = setup();
        feed(
            &mut orch,
            tables::APP_SRV6_SID_LIST_TABLE,
            KeyOpFieldsValues::set(
                "seg1",
                vec![("path".to_string(), "fc00:1::,fc00:2::".to_string())],
            ),
        );
        orch.do_task(tables::APP_SRV6_SID_LIST_TABLE).await;
        assert_eq!(sai.sid_list_count(), 1);
        assert!(state.lock().unwrap().sid_list_id("seg1").is_some());

        // A route holds the list: DEL defers.
        state
            .lock()
            .unwrap()
            .sid_lists
            .inc_ref(&"seg1".to_string())
            .unwrap();
        feed(
            &mut orch,
            tables::APP_SRV6_SID_LIST_TABLE,
            KeyOpFieldsValues::del("seg1"),
        );
        orch.do_task(tables::APP_SRV6_SID_LIST_TABLE).await;
        assert_eq!(sai.sid_list_count(), 1);

        state
            .lock()
            .unwrap()
            .sid_lists
            .dec_ref(&"seg1".to_string())
            .unwrap();
        orch.do_task(tables::APP_SRV6_SID_LIST_TABLE).await;
        assert_eq!(sai.sid_list_count(), 0);
    }

    #[tokio::test]
    async fn my_sid_behaviors() {
        let (mut orch, sai, _, ctx) = setup();

        // Plain END needs no VRF.
        feed(
            &mut orch,
            tables::APP_SRV6_MY_SID_TABLE,
            KeyOpFieldsValues::set(
                "32:16:16:0:fc00:1:1::",
                vec![("action".to_string(), "end".to_string())],
            ),
        );
        orch.do_task(tables::APP_SRV6_MY_SID_TABLE).await;
        assert_eq!(sai.my_sid_count(), 1);

        // DT4 waits for its VRF, then programs.
        feed(
            &mut orch,
            tables::APP_SRV6_MY_SID_TABLE,
            KeyOpFieldsValues::set(
                "32:16:16:0:fc00:1:2::",
                vec![
                    ("action".to_string(), "end.dt4".to_string()),
                    ("vrf".to_string(), "Vrf-red".to_string()),
                ],
            ),
        );
        orch.do_task(tables::APP_SRV6_MY_SID_TABLE).await;
        assert_eq!(sai.my_sid_count(), 1);

        ctx.register_vrf("Vrf-red", VirtualRouterOid::from_raw(2));
        orch.do_task(tables::APP_SRV6_MY_SID_TABLE).await;
        assert_eq!(sai.my_sid_count(), 2);
    }

    #[tokio::test]
    async fn invalid_action_is_dropped() {
        let (mut orch, sai, _, _) = setup();
        feed(
            &mut orch,
            tables::APP_SRV6_MY_SID_TABLE,
            KeyOpFieldsValues::set(
                "32:16:16:0:fc00:1:3::",
                vec![("action".to_string(), "end.bogus".to_string())],
            ),
        );
        orch.do_task(tables::APP_SRV6_MY_SID_TABLE).await;
        assert_eq!(sai.my_sid_count(), 0);
        assert!(!orch
            .core()
            .consumer(tables::APP_SRV6_MY_SID_TABLE)
            .unwrap()
            .has_pending());
    }
}
