use std::thread;
use std::time::{Duration, Instant};

/// Minimum write cycle time every supported device guarantees.
pub const BASELINE_WRITE_DELAY: Duration = Duration::from_millis(5);

/// Interval between acknowledge polls while waiting out a write cycle.
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Tracks the most recent write and holds off bus traffic until the device
/// has finished its internal write cycle.
#[derive(Clone, Debug, Default)]
pub struct WriteCycleGate {
    last_write: Option<Instant>,
    extra_delay_ms: u8,
}

impl WriteCycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the most recent write transaction, if any.
    pub fn last_write(&self) -> Option<Instant> {
        self.last_write
    }

    /// Additional write cycle time on top of the baseline, in milliseconds.
    pub fn extra_delay_ms(&self) -> u8 {
        self.extra_delay_ms
    }

    pub fn set_extra_delay_ms(&mut self, ms: u8) {
        self.extra_delay_ms = ms;
    }

    /// Total time after a write before the device is assumed ready.
    pub fn write_delay(&self) -> Duration {
        BASELINE_WRITE_DELAY + Duration::from_millis(self.extra_delay_ms as u64)
    }

    /// Forget any previous write.
    pub fn reset(&mut self) {
        self.last_write = None;
    }

    /// Record that a write transaction has just completed.
    pub fn mark_written(&mut self) {
        self.last_write = Some(Instant::now());
    }

    /// Block until the device can be expected to respond again.
    ///
    /// Returns once the full write delay has elapsed since the last write,
    /// or earlier as soon as `probe` reports that the device acknowledged.
    /// Between probes the thread sleeps briefly so other work can run.
    pub fn await_ready<F: FnMut() -> bool>(&self, mut probe: F) {
        let last_write = match self.last_write {
            Some(t) => t,
            None => return,
        };
        let delay = self.write_delay();
        while last_write.elapsed() <= delay {
            if probe() {
                log::trace!("Device ready after {:?}", last_write.elapsed());
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
        log::trace!("Write delay of {:?} elapsed without acknowledge", delay);
    }
}

#[test]
fn test_no_prior_write_does_not_probe() {
    let gate = WriteCycleGate::new();
    let mut probes = 0;
    gate.await_ready(|| { probes += 1; true });
    assert_eq!(probes, 0);
    assert!(gate.last_write().is_none());
}

#[test]
fn test_returns_early_on_acknowledge() {
    let mut gate = WriteCycleGate::new();
    gate.mark_written();
    let mut probes = 0;
    gate.await_ready(|| { probes += 1; probes == 3 });
    assert_eq!(probes, 3);
}

#[test]
fn test_waits_full_delay_without_acknowledge() {
    let mut gate = WriteCycleGate::new();
    gate.set_extra_delay_ms(2);
    assert_eq!(gate.write_delay(), Duration::from_millis(7));
    gate.mark_written();
    let t0 = Instant::now();
    gate.await_ready(|| false);
    assert!(t0.elapsed() >= Duration::from_millis(6));
    assert!(gate.last_write().unwrap().elapsed() > gate.write_delay());
}
