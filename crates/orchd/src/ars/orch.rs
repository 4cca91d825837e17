//! ARS orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use swsync_bus::{tables, Bus, DbId, Operation};
use swsync_orch::{Consumer, ConsumerConfig, Orch, OrchCore, TaskStatus};
use swsync_sai::api::SwitchApi;
use swsync_sai::ArsProfileOid;

use super::types::ArsProfile;
use crate::Shared;

/// Reconciles adaptive-routing configuration: `ARS_PROFILE` programs the
/// backend profile object, `ARS_INTERFACE`/`ARS_OBJECT`/`ARS_NEXTHOP` are
/// tracked as bindings against a named profile and gated on it existing.
/// Publishes per-profile state and the switch capability at start.
pub struct ArsOrch {
    core: OrchCore,
    sai: Arc<dyn SwitchApi>,
    bus: Arc<dyn Bus>,
    profiles: HashMap<String, (ArsProfileOid, ArsProfile)>,
    /// Binding table -> (key -> profile name).
    bindings: Shared<HashMap<(String, String), String>>,
}

impl ArsOrch {
    pub const PRIORITY: i32 = 20;

    pub fn new(sai: Arc<dyn SwitchApi>, bus: Arc<dyn Bus>) -> Self {
        let mut core = OrchCore::new("ArsOrch");
        for table in [
            tables::CFG_ARS_PROFILE_TABLE,
            tables::CFG_ARS_INTERFACE_TABLE,
            tables::CFG_ARS_OBJECT_TABLE,
            tables::CFG_ARS_NEXTHOP_TABLE,
        ] {
            core.add_consumer(Consumer::new(
                ConsumerConfig::new(table).with_priority(Self::PRIORITY),
            ));
        }
        Self {
            core,
            sai,
            bus,
            profiles: HashMap::new(),
            bindings: crate::shared(HashMap::new()),
        }
    }

    /// Publishes whether the switch supports ARS at all.
    pub async fn publish_capability(&self) {
        let supported = self.sai.capabilities().ars_supported;
        let _ = self
            .bus
            .set(
                DbId::State,
                tables::STATE_ARS_CAPABILITY_TABLE,
                "switch",
                &vec![("supported".to_string(), supported.to_string())],
            )
            .await;
    }

    async fn publish_profile_state(&self, name: &str, profile: &ArsProfile) {
        let _ = self
            .bus
            .set(
                DbId::State,
                tables::STATE_ARS_PROFILE_TABLE,
                name,
                &vec![
                    ("state".to_string(), "ok".to_string()),
                    ("algorithm".to_string(), profile.algorithm.clone()),
                    ("max_flows".to_string(), profile.max_flows.to_string()),
                ],
            )
            .await;
    }

    async fn set_profile(&mut self, name: &str, delta: &swsync_bus::KeyOpFieldsValues) -> TaskStatus {
        if !self.sai.capabilities().ars_supported {
            warn!("ArsOrch: switch has no ARS support, dropping profile {}", name);
            return TaskStatus::Invalid;
        }
        let Some(profile) = ArsProfile::from_record(name, delta) else {
            error!("ArsOrch: invalid profile record {}", name);
            return TaskStatus::Invalid;
        };

        match self.profiles.get(name) {
            Some((oid, existing)) if *existing != profile => {
                let oid = *oid;
                if let Err(e) = self.sai.set_ars_profile(oid, &profile.to_backend()).await {
                    error!("ArsOrch: update profile {} failed: {}", name, e);
                    return TaskStatus::Failed;
                }
                self.profiles.insert(name.to_string(), (oid, profile.clone()));
            }
            Some(_) => return TaskStatus::Success,
            None => match self.sai.create_ars_profile(&profile.to_backend()).await {
                Ok(oid) => {
                    self.profiles.insert(name.to_string(), (oid, profile.clone()));
                }
                Err(e) => {
                    error!("ArsOrch: create profile {} failed: {}", name, e);
                    return TaskStatus::Failed;
                }
            },
        }
        self.publish_profile_state(name, &profile).await;
        info!("ArsOrch: profile {} synced", name);
        TaskStatus::Success
    }

    async fn del_profile(&mut self, name: &str) -> TaskStatus {
        let in_use = {
            let bindings = self.bindings.lock().unwrap();
            bindings.values().any(|p| p == name)
        };
        if in_use {
            return TaskStatus::NeedRetry;
        }
        if let Some((oid, _)) = self.profiles.remove(name) {
            if let Err(e) = self.sai.remove_ars_profile(oid).await {
                warn!("ArsOrch: remove profile {} failed: {}", name, e);
            }
            let _ = self
                .bus
                .del(DbId::State, tables::STATE_ARS_PROFILE_TABLE, name)
                .await;
        }
        TaskStatus::Success
    }

    fn set_binding(&mut self, table: &str, key: &str, profile: Option<&str>) -> TaskStatus {
        let Some(profile) = profile else {
            return TaskStatus::Invalid;
        };
        if !self.profiles.contains_key(profile) {
            return TaskStatus::NeedRetry;
        }
        self.bindings
            .lock()
            .unwrap()
            .insert((table.to_string(), key.to_string()), profile.to_string());
        TaskStatus::Success
    }

    fn del_binding(&mut self, table: &str, key: &str) -> TaskStatus {
        self.bindings
            .lock()
            .unwrap()
            .remove(&(table.to_string(), key.to_string()));
        TaskStatus::Success
    }
}

#[async_trait]
impl Orch for ArsOrch {
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
                (tables::CFG_ARS_PROFILE_TABLE, Operation::Set) => {
                    self.set_profile(&key, &delta).await
                }
                (tables::CFG_ARS_PROFILE_TABLE, Operation::Del) => self.del_profile(&key).await,
                (_, Operation::Set) => {
                    let profile = delta
                        .get_field("ars_profile")
                        .or_else(|| delta.get_field("profile"));
                    self.set_binding(table, &key, profile)
                }
                (_, Operation::Del) => self.del_binding(table, &key),
            };
            if status.is_settled() || status == TaskStatus::Failed {
                if let Some(consumer) = self.core.consumer_mut(table) {
                    consumer.erase(&key);
                }
            }
        }
    }
}
