//! Single-producer/single-consumer deferred-execution ring.
//!
//! Optional offload decoupling bus draining from backend calls: the
//! producer enqueues closures instead of running handlers inline; a
//! dedicated consumer thread pops and runs them in FIFO order. A full ring
//! pushes back (`push` returns the job) and the producer falls back to
//! inline execution.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Slots {
    jobs: VecDeque<Job>,
    closed: bool,
}

/// Bounded FIFO of deferred closures.
pub struct RingBuffer {
    capacity: usize,
    slots: Mutex<Slots>,
    cond: Condvar,
    /// Set while the consumer is parked waiting for work; the producer only
    /// signals the condvar when it observes the consumer idle.
    idle: AtomicBool,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            slots: Mutex::new(Slots {
                jobs: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            idle: AtomicBool::new(true),
        })
    }

    /// Enqueues a job. Returns the job back if the ring is full so the
    /// caller can run it inline.
    pub fn push(&self, job: Job) -> Result<(), Job> {
        let mut slots = self.slots.lock().unwrap();
        if slots.closed || slots.jobs.len() >= self.capacity {
            return Err(job);
        }
        slots.jobs.push_back(job);
        drop(slots);
        if self.idle.load(Ordering::Acquire) {
            self.cond.notify_one();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire) && self.is_empty()
    }

    /// Starts the consumer thread; it drains until `shutdown()`.
    pub fn start_consumer(self: &Arc<Self>) -> JoinHandle<()> {
        let ring = Arc::clone(self);
        std::thread::spawn(move || loop {
            let job = {
                let mut slots = ring.slots.lock().unwrap();
                loop {
                    if let Some(job) = slots.jobs.pop_front() {
                        ring.idle.store(false, Ordering::Release);
                        break Some(job);
                    }
                    if slots.closed {
                        break None;
                    }
                    ring.idle.store(true, Ordering::Release);
                    slots = ring.cond.wait(slots).unwrap();
                }
            };
            match job {
                Some(job) => job(),
                None => break,
            }
            if ring.slots.lock().unwrap().jobs.is_empty() {
                ring.idle.store(true, Ordering::Release);
            }
        })
    }

    /// Lets the consumer drain what is queued, then exit.
    pub fn shutdown(&self) {
        let mut slots = self.slots.lock().unwrap();
        slots.closed = true;
        drop(slots);
        self.cond.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fifo_order_preserved() {
        let ring = RingBuffer::new(16);
        let handle = ring.start_consumer();

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8 {
            let order = order.clone();
            ring.push(Box::new(move || order.lock().unwrap().push(i)))
                .map_err(|_| ())
                .unwrap();
        }

        ring.shutdown();
        handle.join().unwrap();
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn full_ring_pushes_back() {
        let ring = RingBuffer::new(1);
        // No consumer running: the second push must be refused.
        assert!(ring.push(Box::new(|| {})).is_ok());
        let rejected = ring.push(Box::new(|| {}));
        assert!(rejected.is_err());
        // The producer falls back to inline execution.
        if let Err(job) = rejected {
            job();
        }
    }

    #[test]
    fn shutdown_drains_pending_jobs() {
        let ring = RingBuffer::new(16);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = counter.clone();
            ring.push(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .map_err(|_| ())
            .unwrap();
        }

        let handle = ring.start_consumer();
        ring.shutdown();
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
