//! In-process error reporting used by the reconcilers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use log::warn;
use swsync_bus::{tables, Bus, DbId, FieldValues};
use swsync_sai::SaiStatus;

/// Writes normalized failure records to `ERROR_<app-table>` and fans them
/// out on the per-table channel.
///
/// Success after a prior failure removes the record and publishes
/// `SWSS_RC_SUCCESS` on the same channel, so clears are cheap for keys that
/// never failed.
pub struct ErrorSink {
    bus: Arc<dyn Bus>,
    failed: Mutex<HashSet<(String, String)>>,
}

impl ErrorSink {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            failed: Mutex::new(HashSet::new()),
        }
    }

    fn notification(key: &str, operation: &str, rc: &str) -> String {
        serde_json::json!({
            "key": key,
            "operation": operation,
            "rc": rc,
        })
        .to_string()
    }

    /// Records a failure: `{operation, rc, original fields}` under the
    /// application key.
    pub async fn report(
        &self,
        app_table: &str,
        key: &str,
        operation: &str,
        rc: SaiStatus,
        fields: &FieldValues,
    ) {
        let error_table = tables::error_table_name(app_table);
        let mut record: FieldValues = vec![
            ("operation".to_string(), operation.to_string()),
            ("rc".to_string(), rc.rc_name().to_string()),
        ];
        record.extend(fields.iter().cloned());

        if let Err(e) = self.bus.set(DbId::Error, &error_table, key, &record).await {
            warn!("error bus write failed for {}:{}: {}", error_table, key, e);
            return;
        }
        let channel = tables::error_channel_name(app_table);
        let _ = self
            .bus
            .publish(&channel, &Self::notification(key, operation, rc.rc_name()))
            .await;

        self.failed
            .lock()
            .unwrap()
            .insert((app_table.to_string(), key.to_string()));
    }

    /// Clears the record after a success, if one was outstanding.
    pub async fn clear(&self, app_table: &str, key: &str) {
        let was_failed = self
            .failed
            .lock()
            .unwrap()
            .remove(&(app_table.to_string(), key.to_string()));
        if !was_failed {
            return;
        }
        let error_table = tables::error_table_name(app_table);
        let _ = self.bus.del(DbId::Error, &error_table, key).await;
        let channel = tables::error_channel_name(app_table);
        let _ = self
            .bus
            .publish(
                &channel,
                &Self::notification(key, "clear", SaiStatus::Success.rc_name()),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swsync_bus::MemoryBus;

    #[tokio::test]
    async fn report_then_clear_round_trip() {
        let bus = Arc::new(MemoryBus::new());
        let sink = ErrorSink::new(bus.clone());

        sink.report(
            tables::APP_ROUTE_TABLE,
            "10.0.0.0/24",
            "create",
            SaiStatus::TableFull,
            &vec![("nexthop".to_string(), "10.1.1.2".to_string())],
        )
        .await;

        let record = bus
            .get(DbId::Error, "ERROR_ROUTE_TABLE", "10.0.0.0/24")
            .await
            .unwrap()
            .unwrap();
        assert!(record.contains(&("rc".to_string(), "SWSS_RC_FULL".to_string())));
        assert!(record.contains(&("operation".to_string(), "create".to_string())));
        assert!(record.contains(&("nexthop".to_string(), "10.1.1.2".to_string())));

        sink.clear(tables::APP_ROUTE_TABLE, "10.0.0.0/24").await;
        assert!(bus
            .get(DbId::Error, "ERROR_ROUTE_TABLE", "10.0.0.0/24")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn clear_without_failure_is_silent() {
        let bus = Arc::new(MemoryBus::new());
        let sink = ErrorSink::new(bus.clone());

        let notify = std::sync::Arc::new(tokio::sync::Notify::new());
        let mut sub = bus
            .subscribe_channel("ERROR_ROUTE_TABLE_CHANNEL", notify)
            .await
            .unwrap();

        sink.clear(tables::APP_ROUTE_TABLE, "10.0.0.0/24").await;
        assert!(sub.rx.try_recv().is_err());
    }
}
