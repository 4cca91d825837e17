//! Per-table inbox holding the latest pending delta for every key.

use std::collections::BTreeMap;
use std::sync::Arc;

use swsync_bus::{DeltaSubscription, KeyOpFieldsValues, Operation};

use crate::recorder::Recorder;

/// Configuration for a [`Consumer`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub table_name: String,
    /// Higher priority tables drain first on the same wake-up.
    pub priority: i32,
    pub batch_size: usize,
}

impl ConsumerConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            priority: 0,
            batch_size: crate::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// One table's inbox plus the feed that sources its deltas.
///
/// The inbox keeps exactly one pending delta per key, the "latest intent":
///
/// - first delta for a key inserts
/// - a DEL replaces whatever is staged (DEL wins)
/// - a SET over a staged DEL replaces it (last writer wins)
/// - a SET over a staged SET merges field-wise, new values winning; fields
///   only present in the old record survive
///
/// Entries leave the inbox only when the handler settles or rejects them;
/// deferred entries stay for the next wake-up, so memory is bounded by live
/// keys, not by event volume.
pub struct Consumer {
    config: ConsumerConfig,
    subscription: Option<DeltaSubscription>,
    to_sync: BTreeMap<String, KeyOpFieldsValues>,
    recorder: Option<Arc<Recorder>>,
}

impl Consumer {
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            subscription: None,
            to_sync: BTreeMap::new(),
            recorder: None,
        }
    }

    pub fn with_subscription(mut self, subscription: DeltaSubscription) -> Self {
        self.subscription = Some(subscription);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Wires the delta feed after construction (daemon bootstrap).
    pub fn attach_subscription(&mut self, subscription: DeltaSubscription) {
        self.subscription = Some(subscription);
    }

    pub fn attach_recorder(&mut self, recorder: Arc<Recorder>) {
        self.recorder = Some(recorder);
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.config.batch_size = batch_size;
    }

    /// Drains up to `batch_size` deltas from the feed into the inbox.
    /// Returns how many were popped.
    pub fn pop(&mut self) -> usize {
        let Some(subscription) = self.subscription.as_mut() else {
            return 0;
        };
        let mut popped = 0;
        while popped < self.config.batch_size {
            match subscription.rx.try_recv() {
                Ok(delta) => {
                    if let Some(recorder) = &self.recorder {
                        recorder.record(&self.config.table_name, &delta);
                    }
                    Self::merge_into(&mut self.to_sync, delta);
                    popped += 1;
                }
                Err(_) => break,
            }
        }
        popped
    }

    /// Applies the inbox merge rule for one delta.
    pub fn merge(&mut self, delta: KeyOpFieldsValues) {
        Self::merge_into(&mut self.to_sync, delta);
    }

    fn merge_into(to_sync: &mut BTreeMap<String, KeyOpFieldsValues>, delta: KeyOpFieldsValues) {
        match to_sync.get_mut(&delta.key) {
            None => {
                to_sync.insert(delta.key.clone(), delta);
            }
            Some(existing) => match (existing.op, delta.op) {
                // DEL wins; a staged SET is dropped. A SET over a staged DEL
                // also replaces: the inbox holds the last intent.
                (_, Operation::Del) | (Operation::Del, Operation::Set) => {
                    *existing = delta;
                }
                (Operation::Set, Operation::Set) => {
                    for (field, value) in delta.fvs {
                        match existing.fvs.iter_mut().find(|(f, _)| *f == field) {
                            Some(slot) => slot.1 = value,
                            None => existing.fvs.push((field, value)),
                        }
                    }
                }
            },
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.to_sync.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.to_sync.len()
    }

    /// Keys currently staged; handlers iterate these and erase what they
    /// settle.
    pub fn pending_keys(&self) -> Vec<String> {
        self.to_sync.keys().cloned().collect()
    }

    pub fn entry(&self, key: &str) -> Option<&KeyOpFieldsValues> {
        self.to_sync.get(key)
    }

    /// Removes a settled (or rejected) entry.
    pub fn erase(&mut self, key: &str) -> Option<KeyOpFieldsValues> {
        self.to_sync.remove(key)
    }

    pub fn dump_pending(&self) -> Vec<String> {
        self.to_sync
            .values()
            .map(|e| format!("{} {} {:?}", e.key, e.op.as_str(), e.fvs))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fvs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    fn consumer() -> Consumer {
        Consumer::new(ConsumerConfig::new("ROUTE_TABLE"))
    }

    #[test]
    fn insert_then_merge_sets() {
        let mut c = consumer();
        c.merge(KeyOpFieldsValues::set(
            "10.0.0.0/24",
            fvs(&[("nexthop", "10.1.1.2"), ("ifname", "Ethernet0")]),
        ));
        c.merge(KeyOpFieldsValues::set(
            "10.0.0.0/24",
            fvs(&[("nexthop", "10.1.1.3")]),
        ));

        assert_eq!(c.pending_count(), 1);
        let entry = c.entry("10.0.0.0/24").unwrap();
        assert_eq!(entry.get_field("nexthop"), Some("10.1.1.3"));
        // Fields only present in the old record survive.
        assert_eq!(entry.get_field("ifname"), Some("Ethernet0"));
    }

    #[test]
    fn del_absorbs_staged_set() {
        let mut c = consumer();
        c.merge(KeyOpFieldsValues::set(
            "10.0.0.0/24",
            fvs(&[("nexthop", "10.1.1.2")]),
        ));
        c.merge(KeyOpFieldsValues::del("10.0.0.0/24"));

        assert_eq!(c.pending_count(), 1);
        assert!(c.entry("10.0.0.0/24").unwrap().op.is_del());
    }

    #[test]
    fn set_replaces_staged_del() {
        let mut c = consumer();
        c.merge(KeyOpFieldsValues::del("10.0.0.0/24"));
        c.merge(KeyOpFieldsValues::set(
            "10.0.0.0/24",
            fvs(&[("nexthop", "10.1.1.2")]),
        ));

        let entry = c.entry("10.0.0.0/24").unwrap();
        assert!(entry.op.is_set());
        assert_eq!(entry.get_field("nexthop"), Some("10.1.1.2"));
    }

    #[test]
    fn inbox_monotonicity_matches_last_delta() {
        // Any delta sequence must leave the same entry as the last delta
        // alone would (SET fields merged from prior SETs only).
        let mut c = consumer();
        c.merge(KeyOpFieldsValues::set("k", fvs(&[("a", "1")])));
        c.merge(KeyOpFieldsValues::del("k"));
        c.merge(KeyOpFieldsValues::set("k", fvs(&[("b", "2")])));

        let entry = c.entry("k").unwrap();
        assert!(entry.op.is_set());
        assert_eq!(entry.fvs, fvs(&[("b", "2")]));
        assert_eq!(entry.get_field("a"), None);
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let mut c = consumer();
        c.merge(KeyOpFieldsValues::set("k", fvs(&[("exotic_field", "x")])));
        c.merge(KeyOpFieldsValues::set("k", fvs(&[("nexthop", "10.1.1.1")])));

        let entry = c.entry("k").unwrap();
        assert_eq!(entry.get_field("exotic_field"), Some("x"));
    }

    #[test]
    fn erase_settles_entries() {
        let mut c = consumer();
        c.merge(KeyOpFieldsValues::set("a", vec![]));
        c.merge(KeyOpFieldsValues::set("b", vec![]));
        assert_eq!(c.pending_keys(), vec!["a".to_string(), "b".to_string()]);

        c.erase("a");
        assert_eq!(c.pending_count(), 1);
        assert!(c.entry("a").is_none());
    }

    #[tokio::test]
    async fn pop_respects_batch_size() {
        use std::sync::Arc;
        use swsync_bus::{Bus, DbId, MemoryBus};
        use tokio::sync::Notify;

        let bus = MemoryBus::new();
        let sub = bus
            .subscribe(DbId::Appl, "ROUTE_TABLE", Arc::new(Notify::new()))
            .await
            .unwrap();
        let mut c = Consumer::new(
            ConsumerConfig::new("ROUTE_TABLE").with_batch_size(2),
        )
        .with_subscription(sub);

        for i in 0..5 {
            bus.set(DbId::Appl, "ROUTE_TABLE", &format!("10.0.{}.0/24", i), &vec![])
                .await
                .unwrap();
        }

        assert_eq!(c.pop(), 2);
        assert_eq!(c.pop(), 2);
        assert_eq!(c.pop(), 1);
        assert_eq!(c.pop(), 0);
        assert_eq!(c.pending_count(), 5);
    }
}
