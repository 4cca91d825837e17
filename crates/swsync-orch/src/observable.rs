//! Typed change events between orchestrators.
//!
//! Some reconcilers both emit and consume change events (routes emit
//! next-hop changes, the neighbor orchestrator emits availability). The
//! subject holds an [`Observable`] per event kind; observers subscribe for a
//! receiver and cancel by handle.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Cancellation handle returned by [`Observable::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// A fan-out of typed events.
pub struct Observable<E> {
    next_handle: u64,
    subscribers: Vec<(SubscriptionHandle, UnboundedSender<E>)>,
}

impl<E: Clone> Observable<E> {
    pub fn new() -> Self {
        Self {
            next_handle: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> (SubscriptionHandle, UnboundedReceiver<E>) {
        let handle = SubscriptionHandle(self.next_handle);
        self.next_handle += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push((handle, tx));
        (handle, rx)
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(h, _)| *h != handle);
        before != self.subscribers.len()
    }

    /// Sends the event to every live subscriber, dropping dead ones.
    pub fn notify(&mut self, event: E) {
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<E: Clone> Default for Observable<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_and_cancel() {
        let mut observable: Observable<u32> = Observable::new();
        let (h1, mut rx1) = observable.subscribe();
        let (_h2, mut rx2) = observable.subscribe();

        observable.notify(7);
        assert_eq!(rx1.try_recv().unwrap(), 7);
        assert_eq!(rx2.try_recv().unwrap(), 7);

        assert!(observable.unsubscribe(h1));
        assert!(!observable.unsubscribe(h1));
        observable.notify(8);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), 8);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut observable: Observable<u32> = Observable::new();
        let (_h, rx) = observable.subscribe();
        drop(rx);
        observable.notify(1);
        assert_eq!(observable.subscriber_count(), 0);
    }
}
