//! Period tracking for time-based orchestrator work.

use std::time::{Duration, Instant};

/// Fires when its period has elapsed; polled from the selector tick.
///
/// The selector calls `on_timer` roughly once per select timeout, so the
/// effective resolution is that timeout.
pub struct SelectableTimer {
    period: Duration,
    last_fire: Instant,
    forced: bool,
}

impl SelectableTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_fire: Instant::now(),
            forced: false,
        }
    }

    /// True once per elapsed period; resets the clock when it fires.
    pub fn due(&mut self) -> bool {
        if self.forced || self.last_fire.elapsed() >= self.period {
            self.forced = false;
            self.last_fire = Instant::now();
            true
        } else {
            false
        }
    }

    /// Makes the next `due()` fire immediately (tests, eager flushes).
    pub fn force(&mut self) {
        self.forced = true;
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_after_period() {
        let mut timer = SelectableTimer::new(Duration::from_millis(0));
        assert!(timer.due());

        let mut slow = SelectableTimer::new(Duration::from_secs(3600));
        assert!(!slow.due());
    }

    #[test]
    fn force_fires_once() {
        let mut timer = SelectableTimer::new(Duration::from_secs(3600));
        timer.force();
        assert!(timer.due());
        assert!(!timer.due());
    }
}
