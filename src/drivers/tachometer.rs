//! Fan tachometer driver.
//!
//! A fan's open-collector tach line toggles a fixed number of times per
//! revolution. `read` arms both-edge detection for a fixed window, counts
//! edges in an atomic counter shared with the interrupt callback, then
//! disarms:
//!
//! ```text
//!   rpm = 60 · (edges / 2) / pulses_per_revolution / window_secs
//! ```
//!
//! Each pulse contributes a rising and a falling edge, hence the halving.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

use crate::drivers::gpio::{Edge, Function, PinHandle};
use crate::drivers::lock_unpoisoned;
use crate::error::{Error, Result};
use crate::timing::TimeProvider;

/// Counting window per read.
pub const SAMPLE_WINDOW: Duration = Duration::from_millis(500);
/// Typical PC fan: two hall pulses per revolution.
pub const DEFAULT_PULSES_PER_REVOLUTION: u32 = 2;

pub struct Tachometer {
    pin: Mutex<PinHandle>,
    pulses_per_revolution: u32,
    time: TimeProvider,
}

impl Tachometer {
    pub fn new(mut pin: PinHandle, pulses_per_revolution: u32) -> Result<Self> {
        if pulses_per_revolution == 0 {
            return Err(Error::InvalidArgument("pulses per revolution must be positive"));
        }
        pin.set_mode(Function::Input);
        let time = TimeProvider::new(pin.platform().clone());
        Ok(Self {
            pin: Mutex::new(pin),
            pulses_per_revolution,
            time,
        })
    }

    pub fn pulses_per_revolution(&self) -> u32 {
        self.pulses_per_revolution
    }

    /// Measure the current speed in RPM. Blocks for [`SAMPLE_WINDOW`].
    ///
    /// Concurrent reads on one tachometer are serialised.
    pub fn read(&self) -> Result<f64> {
        let mut pin = lock_unpoisoned(&self.pin);

        let edges = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&edges);
        pin.set_edge_detection(
            Edge::Both,
            Box::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        )?;
        self.time.wait(SAMPLE_WINDOW);
        pin.clear_edge_detection();

        let count = edges.load(Ordering::Acquire);
        let rpm = rpm_from_edges(count, self.pulses_per_revolution, SAMPLE_WINDOW);
        debug!("Tachometer: pin {} counted {} edges -> {:.1} RPM", pin.id(), count, rpm);
        Ok(rpm)
    }
}

/// Convert an edge count over `window` into revolutions per minute.
pub fn rpm_from_edges(edges: u64, pulses_per_revolution: u32, window: Duration) -> f64 {
    let pulses = edges as f64 / 2.0;
    60.0 * pulses / f64::from(pulses_per_revolution) / window.as_secs_f64()
}
