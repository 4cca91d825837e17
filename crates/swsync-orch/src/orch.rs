//! The orchestrator trait and its consumer map.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::consumer::Consumer;

/// Default pop batch size per dispatch.
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Owns an orchestrator's consumers, keyed by table name.
pub struct OrchCore {
    name: String,
    consumers: BTreeMap<String, Consumer>,
}

impl OrchCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consumers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_consumer(&mut self, consumer: Consumer) {
        self.consumers
            .insert(consumer.table_name().to_string(), consumer);
    }

    pub fn consumer(&self, table: &str) -> Option<&Consumer> {
        self.consumers.get(table)
    }

    pub fn consumer_mut(&mut self, table: &str) -> Option<&mut Consumer> {
        self.consumers.get_mut(table)
    }

    /// `(table, priority)` for every consumer; the selector orders draining
    /// across orchestrators with these.
    pub fn tables(&self) -> Vec<(String, i32)> {
        self.consumers
            .values()
            .map(|c| (c.table_name().to_string(), c.priority()))
            .collect()
    }

    /// Tables whose inbox still holds entries (deferred or unprocessed).
    pub fn tables_with_pending(&self) -> Vec<String> {
        self.consumers
            .values()
            .filter(|c| c.has_pending())
            .map(|c| c.table_name().to_string())
            .collect()
    }

    /// Pops the feed into the inbox; true if the inbox is non-empty after.
    pub fn pop(&mut self, table: &str) -> bool {
        match self.consumers.get_mut(table) {
            Some(consumer) => {
                consumer.pop();
                consumer.has_pending()
            }
            None => false,
        }
    }

    pub fn dump_pending(&self) -> Vec<String> {
        self.consumers
            .values()
            .flat_map(|c| {
                let table = c.table_name().to_string();
                c.dump_pending()
                    .into_iter()
                    .map(move |line| format!("{}: {}", table, line))
            })
            .collect()
    }
}

/// An orchestrator: a set of consumers plus the typed handler that settles
/// their inboxes.
///
/// The engine drives the protocol:
///
/// 1. `execute(table)` pops up to the batch size from the feed, merges into
///    the inbox and, if anything is pending, calls `do_task(table)`
/// 2. the timeout sweep calls `drain_all()` so deferred entries make forward
///    progress without a new bus event
/// 3. `on_timer()` runs time-based work each selector tick
///
/// `do_task` decides per entry: settle and erase, leave for retry, or
/// declare invalid and erase. Handlers must be order-independent across keys
/// except where an explicit dependency rule says otherwise.
#[async_trait]
pub trait Orch: Send {
    fn core(&self) -> &OrchCore;
    fn core_mut(&mut self) -> &mut OrchCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Handler for one table's pending inbox.
    async fn do_task(&mut self, table: &str);

    /// Pop + merge + dispatch for one ready table.
    async fn execute(&mut self, table: &str) {
        if self.core_mut().pop(table) {
            self.do_task(table).await;
        }
    }

    /// Forward progress on all deferred entries.
    async fn drain_all(&mut self) {
        for table in self.core().tables_with_pending() {
            self.do_task(&table).await;
        }
    }

    /// Periodic hook from the selector's timeout branch.
    async fn on_timer(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ConsumerConfig;
    use crate::KeyOpFieldsValues;

    struct CountingOrch {
        core: OrchCore,
        handled: Vec<String>,
    }

    #[async_trait]
    impl Orch for CountingOrch {
        fn core(&self) -> &OrchCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut OrchCore {
            &mut self.core
        }

        async fn do_task(&mut self, table: &str) {
            self.handled.push(table.to_string());
            if let Some(consumer) = self.core.consumer_mut(table) {
                for key in consumer.pending_keys() {
                    consumer.erase(&key);
                }
            }
        }
    }

    fn orch_with_tables(tables: &[(&str, i32)]) -> CountingOrch {
        let mut core = OrchCore::new("test");
        for (table, priority) in tables {
            core.add_consumer(Consumer::new(
                ConsumerConfig::new(*table).with_priority(*priority),
            ));
        }
        CountingOrch {
            core,
            handled: vec![],
        }
    }

    #[tokio::test]
    async fn execute_skips_empty_inbox() {
        let mut orch = orch_with_tables(&[("A", 0)]);
        orch.execute("A").await;
        assert!(orch.handled.is_empty());
    }

    #[tokio::test]
    async fn drain_all_visits_only_pending() {
        let mut orch = orch_with_tables(&[("A", 0), ("B", 0)]);
        orch.core_mut()
            .consumer_mut("B")
            .unwrap()
            .merge(KeyOpFieldsValues::set("k", vec![]));

        orch.drain_all().await;
        assert_eq!(orch.handled, vec!["B".to_string()]);
        assert!(orch.core().tables_with_pending().is_empty());
    }
}
