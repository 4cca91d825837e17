//! The wait-on-many primitive driving each daemon's main loop.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::Notify;

use crate::orch::Orch;

/// Blocks on every consumer feed at once and drains ready orchestrators.
///
/// All subscriptions share one [`Notify`]; a ping means "some feed has
/// data". Each wake-up drains every registered table in descending priority
/// order, fully, before waiting again. The timeout branch (default 1s) runs
/// the deferred-entry sweep and the per-orchestrator timers, which is what
/// retries dependency-deferred work even when the bus is quiet.
pub struct SelectorLoop {
    notify: Arc<Notify>,
    orchs: Vec<Box<dyn Orch>>,
    timeout: Duration,
}

impl SelectorLoop {
    pub fn new(timeout: Duration) -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            orchs: Vec::new(),
            timeout,
        }
    }

    /// The notify handle to thread into every bus subscription.
    pub fn notify_handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn register(&mut self, orch: Box<dyn Orch>) {
        self.orchs.push(orch);
    }

    pub fn orchs_mut(&mut self) -> &mut [Box<dyn Orch>] {
        &mut self.orchs
    }

    /// `(priority, orch index, table)` across all orchestrators, highest
    /// priority first.
    fn dispatch_order(&self) -> Vec<(i32, usize, String)> {
        let mut order: Vec<(i32, usize, String)> = self
            .orchs
            .iter()
            .enumerate()
            .flat_map(|(idx, orch)| {
                orch.core()
                    .tables()
                    .into_iter()
                    .map(move |(table, priority)| (priority, idx, table))
            })
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        order
    }

    /// One wait + drain cycle. Returns true if it woke on an event, false
    /// on timeout.
    pub async fn run_once(&mut self) -> bool {
        let woke = tokio::time::timeout(self.timeout, self.notify.notified())
            .await
            .is_ok();

        if woke {
            for (_, idx, table) in self.dispatch_order() {
                self.orchs[idx].execute(&table).await;
            }
        } else {
            debug!("selector timeout: sweeping deferred entries");
            for orch in &mut self.orchs {
                orch.drain_all().await;
            }
        }

        for orch in &mut self.orchs {
            orch.on_timer().await;
        }

        woke
    }

    /// The daemon steady state; never returns.
    pub async fn run(&mut self) -> ! {
        loop {
            self.run_once().await;
        }
    }
}
