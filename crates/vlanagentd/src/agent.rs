//! The VLAN/interface/switch reconciler.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use swsync_bus::{Bus, DbId, KeyOpFieldsValues, Operation};
use swsync_cfgagent_common::CfgAgentResult;
use swsync_orch::{Consumer, ConsumerConfig, Orch, OrchCore, TaskStatus};
use swsync_types::{MacAddress, VlanId};
use tracing::{debug, error, info, instrument, warn};

use crate::bridge::BridgeMembership;
use crate::commands::{
    build_add_member_vid_cmd, build_add_vlan_cmd, build_attach_port_cmd,
    build_detach_port_cmd, build_flood_control_cmd, build_init_bridge_cmd,
    build_ip_address_add_cmd, build_ip_address_del_cmd, build_member_up_cmd,
    build_remove_member_vid_cmd, build_remove_vlan_cmd, build_set_vlan_admin_cmd,
    build_set_vlan_mtu_cmd, LAG_PREFIX,
};
use crate::exec::ShellExecutor;
use crate::tables::{
    fields, CFG_INTERFACE_TABLE, CFG_SWITCH_TABLE, CFG_VLAN_MEMBER_TABLE, CFG_VLAN_TABLE,
    DEFAULT_MEMBER_MTU, SWITCH_FLOOD_CONTROL_KEY, SWITCH_FLOOD_CONTROL_LEGACY_KEY,
};
use crate::types::{FloodControl, TaggingMode};

// App/state-side tables this agent publishes to.
const APP_VLAN_TABLE: &str = "VLAN_TABLE";
const APP_VLAN_MEMBER_TABLE: &str = "VLAN_MEMBER_TABLE";
const STATE_VLAN_TABLE: &str = "VLAN_TABLE";
const STATE_PORT_TABLE: &str = "PORT_TABLE";
const STATE_LAG_TABLE: &str = "LAG_TABLE";

/// Reconciles VLAN, bridge-member, interface-address and flood-control
/// intent into the kernel, sequencing VLANs before members before
/// addresses.
pub struct VlanAgent {
    core: OrchCore,
    bus: Arc<dyn Bus>,
    shell: Arc<dyn ShellExecutor>,
    switch_mac: Option<MacAddress>,
    vlans: HashSet<u16>,
    bridge: BridgeMembership,
    flood: FloodControl,
}

impl VlanAgent {
    pub fn new(bus: Arc<dyn Bus>, shell: Arc<dyn ShellExecutor>) -> Self {
        let mut core = OrchCore::new("VlanAgent");
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(CFG_VLAN_TABLE).with_priority(60),
        ));
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(CFG_VLAN_MEMBER_TABLE).with_priority(50),
        ));
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(CFG_INTERFACE_TABLE).with_priority(40),
        ));
        core.add_consumer(Consumer::new(
            ConsumerConfig::new(CFG_SWITCH_TABLE).with_priority(30),
        ));
        Self {
            core,
            bus,
            shell,
            switch_mac: None,
            vlans: HashSet::new(),
            bridge: BridgeMembership::new(),
            flood: FloodControl::default(),
        }
    }

    pub fn set_switch_mac(&mut self, mac: MacAddress) {
        self.switch_mac = Some(mac);
    }

    pub fn bridge(&self) -> &BridgeMembership {
        &self.bridge
    }

    async fn exec(&self, cmd: &str) -> CfgAgentResult<()> {
        let result = self.shell.exec(cmd).await?;
        if !result.success() {
            return Err(swsync_cfgagent_common::CfgAgentError::ShellFailed {
                command: cmd.to_string(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }
        Ok(())
    }

    /// Startup: tear down any stray dot1Q bridge and recreate it with VLAN
    /// filtering enabled and the default VLAN removed.
    #[instrument(skip(self))]
    pub async fn init_bridge(&mut self) -> CfgAgentResult<()> {
        let Some(mac) = self.switch_mac else {
            return Err(swsync_cfgagent_common::CfgAgentError::InvalidEntry(
                "switch MAC not known".to_string(),
            ));
        };
        self.exec(&build_init_bridge_cmd(&mac.to_string())).await?;
        info!("dot1Q bridge initialized");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dependency gating via the state bus
    // ------------------------------------------------------------------

    async fn state_ok(&self, table: &str, key: &str) -> bool {
        matches!(
            self.bus
                .get_field(DbId::State, table, key, fields::STATE)
                .await,
            Ok(Some(value)) if value == "ok"
        )
    }

    async fn port_state_ok(&self, alias: &str) -> bool {
        let table = if alias.starts_with(LAG_PREFIX) {
            STATE_LAG_TABLE
        } else {
            STATE_PORT_TABLE
        };
        self.state_ok(table, alias).await
    }

    async fn vlan_state_ok(&self, vid: u16) -> bool {
        self.state_ok(STATE_VLAN_TABLE, &format!("Vlan{}", vid)).await
    }

    // ------------------------------------------------------------------
    // VLAN
    // ------------------------------------------------------------------

    #[instrument(skip(self, delta))]
    async fn process_vlan_set(&mut self, key: &str, delta: &KeyOpFieldsValues) -> TaskStatus {
        let Some(mac) = self.switch_mac else {
            debug!("switch MAC unknown, deferring {}", key);
            return TaskStatus::NeedRetry;
        };
        let Ok(vid) = VlanId::from_alias(key) else {
            error!("invalid VLAN key {}", key);
            return TaskStatus::Invalid;
        };
        let vid = vid.as_u16();

        if !self.vlans.contains(&vid) {
            if let Err(e) = self.exec(&build_add_vlan_cmd(vid, &mac.to_string())).await {
                error!("VLAN {} create failed: {}", vid, e);
                return TaskStatus::Failed;
            }
            self.vlans.insert(vid);
        }

        let mut published = Vec::new();
        if let Some(admin) = delta.get_field(fields::ADMIN_STATUS) {
            if admin != "up" && admin != "down" {
                error!("VLAN {}: invalid admin_status {}", vid, admin);
                return TaskStatus::Invalid;
            }
            if self.exec(&build_set_vlan_admin_cmd(vid, admin)).await.is_err() {
                return TaskStatus::Failed;
            }
            published.push((fields::ADMIN_STATUS.to_string(), admin.to_string()));
        }
        if let Some(mtu) = delta.get_field(fields::MTU) {
            match mtu.parse::<u32>() {
                Ok(mtu_value) => {
                    if self.exec(&build_set_vlan_mtu_cmd(vid, mtu_value)).await.is_err() {
                        // A member MTU constraint can refuse this; retry.
                        return TaskStatus::NeedRetry;
                    }
                    published.push((fields::MTU.to_string(), mtu.to_string()));
                }
                Err(_) => {
                    error!("VLAN {}: invalid mtu {}", vid, mtu);
                    return TaskStatus::Invalid;
                }
            }
        }

        let _ = self
            .bus
            .set(DbId::Appl, APP_VLAN_TABLE, key, &published)
            .await;
        let _ = self
            .bus
            .set(
                DbId::State,
                STATE_VLAN_TABLE,
                key,
                &vec![(fields::STATE.to_string(), "ok".to_string())],
            )
            .await;
        info!("VLAN {} realized", vid);

        // Legacy inline member list: synthesize untagged member SETs into
        // the member inbox; the caller drives that consumer right after.
        if let Some(members) = delta.get_field(fields::MEMBERS) {
            let synthesized: Vec<KeyOpFieldsValues> = members
                .split(',')
                .filter(|port| !port.is_empty())
                .map(|port| {
                    KeyOpFieldsValues::set(
                        format!("{}|{}", key, port),
                        vec![(
                            fields::TAGGING_MODE.to_string(),
                            TaggingMode::Untagged.as_str().to_string(),
                        )],
                    )
                })
                .collect();
            if let Some(consumer) = self.core.consumer_mut(CFG_VLAN_MEMBER_TABLE) {
                for entry in synthesized {
                    consumer.merge(entry);
                }
            }
        }
        TaskStatus::Success
    }

    async fn process_vlan_del(&mut self, key: &str) -> TaskStatus {
        let Ok(vid) = VlanId::from_alias(key) else {
            return TaskStatus::Invalid;
        };
        let vid = vid.as_u16();
        if !self.vlans.contains(&vid) {
            return TaskStatus::Success;
        }
        if !self.bridge.members_of(vid).is_empty() {
            // Members leave first.
            debug!("VLAN {} still has members, deferring removal", vid);
            return TaskStatus::NeedRetry;
        }
        if let Err(e) = self.exec(&build_remove_vlan_cmd(vid)).await {
            warn!("VLAN {} removal: {}", vid, e);
        }
        self.vlans.remove(&vid);
        let _ = self.bus.del(DbId::Appl, APP_VLAN_TABLE, key).await;
        let _ = self.bus.del(DbId::State, STATE_VLAN_TABLE, key).await;
        TaskStatus::Success
    }

    // ------------------------------------------------------------------
    // VLAN member
    // ------------------------------------------------------------------

    fn parse_member_key(key: &str) -> Option<(u16, String)> {
        let (vlan, port) = key.split_once('|')?;
        let vid = VlanId::from_alias(vlan).ok()?;
        Some((vid.as_u16(), port.to_string()))
    }

    async fn apply_flood_control_to_port(&self, port: &str) -> CfgAgentResult<()> {
        for (file, enabled) in [
            ("flood", self.flood.unicast),
            ("mcast_flood", self.flood.multicast),
            ("bcast_flood", self.flood.broadcast),
        ] {
            self.exec(&build_flood_control_cmd(port, file, enabled)).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, delta))]
    async fn process_member_set(&mut self, key: &str, delta: &KeyOpFieldsValues) -> TaskStatus {
        let Some((vid, port)) = Self::parse_member_key(key) else {
            error!("invalid member key {}", key);
            return TaskStatus::Invalid;
        };

        // The one dependency-retry point with no error: both the VLAN and
        // the port must be realized before the kernel is touched.
        if !self.vlan_state_ok(vid).await || !self.port_state_ok(&port).await {
            debug!("member {} waiting on state=ok", key);
            return TaskStatus::NeedRetry;
        }

        let tagging: TaggingMode = match delta.get_field(fields::TAGGING_MODE) {
            Some(mode) => match mode.parse() {
                Ok(tagging) => tagging,
                Err(()) => {
                    error!("member {}: invalid tagging_mode {}", key, mode);
                    return TaskStatus::Invalid;
                }
            },
            None => TaggingMode::Untagged,
        };

        if self.bridge.is_member(&port, vid) {
            return TaskStatus::Success;
        }

        // First membership attaches the port to the bridge.
        if !self.bridge.is_attached(&port) {
            if let Err(e) = self.exec(&build_attach_port_cmd(&port)).await {
                error!("member {}: attach failed: {}", key, e);
                return TaskStatus::Failed;
            }
        }
        if let Err(e) = self
            .exec(&build_add_member_vid_cmd(vid, &port, tagging.bridge_args()))
            .await
        {
            error!("member {}: vid add failed: {}", key, e);
            return TaskStatus::Failed;
        }
        if self.apply_flood_control_to_port(&port).await.is_err() {
            warn!("member {}: flood control apply failed", key);
        }
        if let Err(e) = self.exec(&build_member_up_cmd(&port, DEFAULT_MEMBER_MTU)).await {
            warn!("member {}: bring-up failed: {}", key, e);
        }

        self.bridge.add(&port, vid);
        let app_key = format!("Vlan{}:{}", vid, port);
        let _ = self
            .bus
            .set(
                DbId::Appl,
                APP_VLAN_MEMBER_TABLE,
                &app_key,
                &vec![(
                    fields::TAGGING_MODE.to_string(),
                    tagging.as_str().to_string(),
                )],
            )
            .await;
        info!("member {} realized ({})", key, tagging.as_str());
        TaskStatus::Success
    }

    async fn process_member_del(&mut self, key: &str) -> TaskStatus {
        let Some((vid, port)) = Self::parse_member_key(key) else {
            return TaskStatus::Invalid;
        };
        if !self.bridge.is_member(&port, vid) {
            return TaskStatus::Success;
        }
        if let Err(e) = self.exec(&build_remove_member_vid_cmd(vid, &port)).await {
            warn!("member {}: vid del failed: {}", key, e);
        }
        // The membership table, not shell parsing, decides the detach.
        if self.bridge.remove(&port, vid) {
            if let Err(e) = self.exec(&build_detach_port_cmd(&port)).await {
                warn!("member {}: detach failed: {}", key, e);
            }
        }
        let app_key = format!("Vlan{}:{}", vid, port);
        let _ = self.bus.del(DbId::Appl, APP_VLAN_MEMBER_TABLE, &app_key).await;
        TaskStatus::Success
    }

    // ------------------------------------------------------------------
    // Interface addresses
    // ------------------------------------------------------------------

    async fn process_interface(&mut self, key: &str, op: Operation) -> TaskStatus {
        let Some((alias, prefix)) = key.split_once('|') else {
            // Interface-level records carry no kernel action here.
            return TaskStatus::Success;
        };
        if prefix.parse::<swsync_types::IpPrefix>().is_err() {
            error!("interface {}: bad prefix", key);
            return TaskStatus::Invalid;
        }
        let cmd = match op {
            Operation::Set => build_ip_address_add_cmd(alias, prefix),
            Operation::Del => build_ip_address_del_cmd(alias, prefix),
        };
        match self.exec(&cmd).await {
            Ok(()) => TaskStatus::Success,
            Err(e) => {
                error!("interface {}: {}", key, e);
                TaskStatus::Failed
            }
        }
    }

    // ------------------------------------------------------------------
    // Switch flood control
    // ------------------------------------------------------------------

    fn parse_flood_field(value: &str) -> Option<bool> {
        match value {
            "enabled" | "true" | "1" => Some(true),
            "disabled" | "false" | "0" => Some(false),
            _ => None,
        }
    }

    async fn process_switch(&mut self, key: &str, delta: &KeyOpFieldsValues) -> TaskStatus {
        if key != SWITCH_FLOOD_CONTROL_KEY && key != SWITCH_FLOOD_CONTROL_LEGACY_KEY {
            debug!("ignoring switch record {}", key);
            return TaskStatus::Success;
        }
        let mut flood = self.flood;
        for (field, slot) in [
            (fields::UNICAST_FLOOD, &mut flood.unicast),
            (fields::MULTICAST_FLOOD, &mut flood.multicast),
            (fields::BROADCAST_FLOOD, &mut flood.broadcast),
        ] {
            if let Some(value) = delta.get_field(field) {
                match Self::parse_flood_field(value) {
                    Some(enabled) => *slot = enabled,
                    None => {
                        error!("flood control: invalid {} value {}", field, value);
                        return TaskStatus::Invalid;
                    }
                }
            }
        }
        self.flood = flood;
        for port in self.bridge.attached_ports() {
            if self.apply_flood_control_to_port(&port).await.is_err() {
                warn!("flood control apply failed on {}", port);
            }
        }
        TaskStatus::Success
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    async fn drain_table(&mut self, table: &str) {
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
                (CFG_VLAN_TABLE, Operation::Set) => self.process_vlan_set(&key, &delta).await,
                (CFG_VLAN_TABLE, Operation::Del) => self.process_vlan_del(&key).await,
                (CFG_VLAN_MEMBER_TABLE, Operation::Set) => {
                    self.process_member_set(&key, &delta).await
                }
                (CFG_VLAN_MEMBER_TABLE, Operation::Del) => self.process_member_del(&key).await,
                (CFG_INTERFACE_TABLE, op) => self.process_interface(&key, op).await,
                (CFG_SWITCH_TABLE, Operation::Set) => self.process_switch(&key, &delta).await,
                (CFG_SWITCH_TABLE, Operation::Del) => TaskStatus::Success,
                _ => TaskStatus::Invalid,
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
impl Orch for VlanAgent {
    fn core(&self) -> &OrchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OrchCore {
        &mut self.core
    }

    async fn do_task(&mut self, table: &str) {
        self.drain_table(table).await;
        // Inline member fan-out from a VLAN record lands in the member
        // inbox; drive it immediately rather than waiting for a wake-up.
        if table == CFG_VLAN_TABLE
            && self
                .core
                .consumer(CFG_VLAN_MEMBER_TABLE)
                .is_some_and(Consumer::has_pending)
        {
            self.drain_table(CFG_VLAN_MEMBER_TABLE).await;
        }
    }
}
