//! Error-bus orchestrator: backend failure notifications in, normalized
//! error records out.

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;
use swsync_bus::{tables, Bus, DbId, FieldValues, NotificationSubscription};
use swsync_orch::{Orch, OrchCore};
use swsync_sai::SaiStatus;

/// Backend-side channel carrying per-object failure records.
pub const SAI_ERROR_NOTIFICATION_CHANNEL: &str = "ERROR_NOTIFICATIONS";

/// Consumes the backend failure channel, resolves backend identifiers into
/// app-visible ones through the bus OID->name maps, normalizes the status
/// spelling and maintains `ERROR_<app-table>` plus its notification
/// channel. Also honors `FLUSH_ERROR_DB` (`ALL` or a table name).
pub struct ErrorOrch {
    core: OrchCore,
    bus: Arc<dyn Bus>,
    notifications: Option<NotificationSubscription>,
    flushes: Option<NotificationSubscription>,
}

impl ErrorOrch {
    pub const PRIORITY: i32 = 10;

    /// App tables with error-bus support.
    const SUPPORTED: [&'static str; 2] = [tables::APP_ROUTE_TABLE, tables::APP_NEIGH_TABLE];

    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            core: OrchCore::new("ErrorOrch"),
            bus,
            notifications: None,
            flushes: None,
        }
    }

    pub fn attach_channels(
        &mut self,
        notifications: NotificationSubscription,
        flushes: NotificationSubscription,
    ) {
        self.notifications = Some(notifications);
        self.flushes = Some(flushes);
    }

    fn string_field<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
        record.get(field).and_then(Value::as_str)
    }

    /// Translates backend identifiers in the record into the app-visible
    /// `(table, key, extra fields)` form. Unsupported object types are
    /// dropped.
    async fn map_to_error_db_format(
        &self,
        record: &Value,
    ) -> Option<(&'static str, String, FieldValues)> {
        let object_type = Self::string_field(record, "object_type")?;
        match object_type {
            "route" => {
                let key = Self::string_field(record, "key")?.to_string();
                let mut fields = FieldValues::new();
                if let Some(nexthop) = Self::string_field(record, "nexthop") {
                    fields.push(("nexthop".to_string(), nexthop.to_string()));
                }
                Some((tables::APP_ROUTE_TABLE, key, fields))
            }
            "neighbor" => {
                let rif_oid = Self::string_field(record, "rif_oid")?;
                let ip = Self::string_field(record, "ip")?;
                // Backend OID -> interface alias via the counters map.
                let alias = self
                    .bus
                    .get_field(DbId::Counters, tables::COUNTERS_RIF_NAME_MAP, rif_oid, "name")
                    .await
                    .ok()
                    .flatten()?;
                let mut fields = FieldValues::new();
                if let Some(mac) = Self::string_field(record, "neigh") {
                    fields.push(("neigh".to_string(), mac.to_string()));
                }
                Some((tables::APP_NEIGH_TABLE, format!("{}:{}", alias, ip), fields))
            }
            other => {
                warn!("ErrorOrch: unsupported object type {}", other);
                None
            }
        }
    }

    async fn handle_notification(&mut self, payload: &str) {
        let record: Value = match serde_json::from_str(payload) {
            Ok(record) => record,
            Err(e) => {
                warn!("ErrorOrch: bad notification payload: {}", e);
                return;
            }
        };
        let operation = Self::string_field(&record, "operation")
            .unwrap_or("unknown")
            .to_string();
        let rc = Self::string_field(&record, "rc")
            .and_then(SaiStatus::from_status_name)
            .unwrap_or(SaiStatus::Failure);

        let Some((app_table, key, extra)) = self.map_to_error_db_format(&record).await else {
            return;
        };
        let error_table = tables::error_table_name(app_table);
        let channel = tables::error_channel_name(app_table);

        if rc.is_success() {
            // Success after failure: retire the record. A successful remove
            // retires it as well.
            let _ = self.bus.del(DbId::Error, &error_table, &key).await;
        } else {
            let mut fields: FieldValues = vec![
                ("operation".to_string(), operation.clone()),
                ("rc".to_string(), rc.rc_name().to_string()),
            ];
            fields.extend(extra);
            if let Err(e) = self.bus.set(DbId::Error, &error_table, &key, &fields).await {
                warn!("ErrorOrch: error db write failed: {}", e);
                return;
            }
        }

        let event = serde_json::json!({
            "op": format!("oper_{}", app_table),
            "key": key,
            "operation": operation,
            "rc": rc.rc_name(),
        });
        let _ = self.bus.publish(&channel, &event.to_string()).await;
    }

    async fn flush_error_db(&mut self, scope: &str) {
        let error_tables: Vec<String> = if scope == "ALL" {
            Self::SUPPORTED
                .iter()
                .map(|t| tables::error_table_name(t))
                .collect()
        } else if let Some(app) = tables::app_table_of_error_table(scope) {
            vec![tables::error_table_name(app)]
        } else {
            vec![tables::error_table_name(scope)]
        };

        for table in error_tables {
            match self.bus.keys(DbId::Error, &table).await {
                Ok(keys) => {
                    info!("ErrorOrch: flushing {} entries from {}", keys.len(), table);
                    for key in keys {
                        let _ = self.bus.del(DbId::Error, &table, &key).await;
                    }
                }
                Err(e) => warn!("ErrorOrch: flush scan of {} failed: {}", table, e),
            }
        }
    }

    /// Drains both channels; called from the selector tick.
    pub async fn drain(&mut self) {
        loop {
            let payload = match self.notifications.as_mut() {
                Some(sub) => match sub.rx.try_recv() {
                    Ok(payload) => Some(payload),
                    Err(_) => None,
                },
                None => None,
            };
            match payload {
                Some(payload) => self.handle_notification(&payload).await,
                None => break,
            }
        }
        loop {
            let scope = match self.flushes.as_mut() {
                Some(sub) => match sub.rx.try_recv() {
                    Ok(scope) => Some(scope),
                    Err(_) => None,
                },
                None => None,
            };
            match scope {
                Some(scope) => self.flush_error_db(scope.trim()).await,
                None => break,
            }
        }
    }
}

#[async_trait]
impl Orch for ErrorOrch {
    fn core(&self) -> &OrchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OrchCore {
        &mut self.core
    }

    async fn do_task(&mut self, _table: &str) {}

    async fn on_timer(&mut self) {
        self.drain().await;
    }
}
