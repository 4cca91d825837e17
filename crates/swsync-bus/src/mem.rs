//! Hermetic in-process bus used by the test suites.
//!
//! Same contract as the Redis-backed bus: field-merging `set`, delta fan-out
//! to table subscribers, payload fan-out to channel subscribers, and the
//! shared-notify wakeup discipline.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Notify;

use crate::bus::{
    validate_set, Bus, BusResult, DeltaSubscription, NotificationSubscription,
};
use crate::types::{DbId, FieldValues, KeyOpFieldsValues};

type TableKey = (DbId, String, String);

#[derive(Default)]
struct Inner {
    entries: BTreeMap<TableKey, BTreeMap<String, String>>,
    table_subs: HashMap<(DbId, String), Vec<(UnboundedSender<KeyOpFieldsValues>, Arc<Notify>)>>,
    channel_subs: HashMap<String, Vec<(UnboundedSender<String>, Arc<Notify>)>>,
}

/// In-memory bus.
#[derive(Default, Clone)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn fan_out(inner: &mut Inner, db: DbId, table: &str, delta: KeyOpFieldsValues) {
        if let Some(subs) = inner.table_subs.get_mut(&(db, table.to_string())) {
            subs.retain(|(tx, notify)| {
                let alive = tx.send(delta.clone()).is_ok();
                if alive {
                    notify.notify_one();
                }
                alive
            });
        }
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn get(&self, db: DbId, table: &str, key: &str) -> BusResult<Option<FieldValues>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entries
            .get(&(db, table.to_string(), key.to_string()))
            .map(|fields| fields.iter().map(|(f, v)| (f.clone(), v.clone())).collect()))
    }

    async fn set(&self, db: DbId, table: &str, key: &str, fvs: &FieldValues) -> BusResult<()> {
        validate_set(table, fvs)?;
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .entries
            .entry((db, table.to_string(), key.to_string()))
            .or_default();
        for (field, value) in fvs {
            entry.insert(field.clone(), value.clone());
        }
        Self::fan_out(
            &mut inner,
            db,
            table,
            KeyOpFieldsValues::set(key, fvs.clone()),
        );
        Ok(())
    }

    async fn del(&self, db: DbId, table: &str, key: &str) -> BusResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .entries
            .remove(&(db, table.to_string(), key.to_string()));
        Self::fan_out(&mut inner, db, table, KeyOpFieldsValues::del(key));
        Ok(())
    }

    async fn keys(&self, db: DbId, table: &str) -> BusResult<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entries
            .keys()
            .filter(|(d, t, _)| *d == db && t == table)
            .map(|(_, _, k)| k.clone())
            .collect())
    }

    async fn subscribe(
        &self,
        db: DbId,
        table: &str,
        notify: Arc<Notify>,
    ) -> BusResult<DeltaSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner
            .table_subs
            .entry((db, table.to_string()))
            .or_default()
            .push((tx, notify.clone()));
        Ok(DeltaSubscription { rx, notify })
    }

    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(subs) = inner.channel_subs.get_mut(channel) {
            subs.retain(|(tx, notify)| {
                let alive = tx.send(payload.to_string()).is_ok();
                if alive {
                    notify.notify_one();
                }
                alive
            });
        }
        Ok(())
    }

    async fn subscribe_channel(
        &self,
        channel: &str,
        notify: Arc<Notify>,
    ) -> BusResult<NotificationSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner
            .channel_subs
            .entry(channel.to_string())
            .or_default()
            .push((tx, notify.clone()));
        Ok(NotificationSubscription { rx, notify })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Operation;
    use pretty_assertions::assert_eq;

    fn fvs(pairs: &[(&str, &str)]) -> FieldValues {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn set_merges_fields() {
        let bus = MemoryBus::new();
        bus.set(DbId::Config, "VLAN", "Vlan100", &fvs(&[("admin_status", "up")]))
            .await
            .unwrap();
        bus.set(DbId::Config, "VLAN", "Vlan100", &fvs(&[("mtu", "9100")]))
            .await
            .unwrap();

        let entry = bus.get(DbId::Config, "VLAN", "Vlan100").await.unwrap().unwrap();
        assert_eq!(entry.len(), 2);
        assert!(entry.contains(&("admin_status".into(), "up".into())));
    }

    #[tokio::test]
    async fn subscription_sees_deltas_in_order() {
        let bus = MemoryBus::new();
        let notify = Arc::new(Notify::new());
        let mut sub = bus
            .subscribe(DbId::Appl, "ROUTE_TABLE", notify)
            .await
            .unwrap();

        bus.set(DbId::Appl, "ROUTE_TABLE", "10.0.0.0/24", &fvs(&[("nexthop", "10.1.1.2")]))
            .await
            .unwrap();
        bus.del(DbId::Appl, "ROUTE_TABLE", "10.0.0.0/24").await.unwrap();

        let first = sub.rx.try_recv().unwrap();
        assert_eq!(first.op, Operation::Set);
        let second = sub.rx.try_recv().unwrap();
        assert_eq!(second.op, Operation::Del);
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn route_publish_rejects_contradiction() {
        let bus = MemoryBus::new();
        let result = bus
            .set(
                DbId::Appl,
                "ROUTE_TABLE",
                "10.0.0.0/24",
                &fvs(&[("nexthop_group", "g1"), ("ifname", "Ethernet0")]),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn channel_fan_out() {
        let bus = MemoryBus::new();
        let notify = Arc::new(Notify::new());
        let mut sub = bus
            .subscribe_channel("ERROR_ROUTE_TABLE_CHANNEL", notify)
            .await
            .unwrap();

        bus.publish("ERROR_ROUTE_TABLE_CHANNEL", "{\"rc\":\"SWSS_RC_FULL\"}")
            .await
            .unwrap();

        assert_eq!(
            sub.rx.try_recv().unwrap(),
            "{\"rc\":\"SWSS_RC_FULL\"}".to_string()
        );
    }
}
