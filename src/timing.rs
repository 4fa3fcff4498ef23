//! Time provider for protocol drivers.
//!
//! Wraps the platform's monotonic microsecond clock and adds the wall clock
//! used to timestamp climate samples.
//!
//! `wait` busy-spins for durations under one millisecond, where an OS sleep
//! would overshoot the bit timings of DHT and HX711, and delegates to the
//! platform otherwise.

use core::hint::spin_loop;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::app::ports::Platform;

/// Below this a wait is a busy-spin.
pub const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct TimeProvider {
    platform: Arc<dyn Platform>,
}

impl TimeProvider {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Monotonic microseconds from the platform clock.
    pub fn now_micros(&self) -> u64 {
        self.platform.now_micros()
    }

    pub fn wall_clock(&self) -> SystemTime {
        self.platform.wall_clock()
    }

    /// Wall clock as Unix seconds. Clocks set before 1970 read as 0.
    pub fn unix_timestamp(&self) -> i64 {
        self.wall_clock()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64)
    }

    /// Block for `duration`.
    pub fn wait(&self, duration: Duration) {
        if duration < SPIN_THRESHOLD {
            self.spin(duration.as_micros() as u64);
            return;
        }
        self.platform.delay_ms(duration.as_millis() as u64);
        let remainder = u64::from(duration.subsec_micros() % 1000);
        if remainder > 0 {
            self.spin(remainder);
        }
    }

    /// Yield the CPU for at least `duration`. Unlike [`wait`](Self::wait)
    /// this never spins, so it suits polling loops of unknown length.
    pub fn sleep(&self, duration: Duration) {
        self.platform.sleep_us(duration.as_micros() as u64);
    }

    /// Block until the monotonic clock reaches `deadline_us`.
    pub fn wait_until(&self, deadline_us: u64) {
        let now = self.now_micros();
        if deadline_us > now {
            self.wait(Duration::from_micros(deadline_us - now));
        }
    }

    fn spin(&self, micros: u64) {
        let start = self.now_micros();
        while self.now_micros().saturating_sub(start) < micros {
            spin_loop();
        }
    }
}
