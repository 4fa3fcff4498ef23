//! Pin registry and exclusively-owned pin handles.
//!
//! The registry is process-wide: a 64-bit claimed bitmap plus one lock per
//! pin that serialises the claim test-and-set and the release. Neither is
//! ever torn down.
//!
//! ```text
//!   claim(id) ──▶ lock[id] ──▶ bit clear? ──▶ set bit ──▶ PinHandle
//!                                   │
//!                                   └──▶ None (already owned)
//!   drop(PinHandle) ──▶ reset pin ──▶ lock[id] ──▶ clear bit
//! ```
//!
//! A [`PinHandle`] is move-only. Drivers take ownership of the handles they
//! need, so dropping a driver returns its pins to the pool.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

pub use crate::app::ports::{Edge, EdgeCallback, Function, Level, Resistor};
use crate::app::ports::Platform;
use crate::drivers::lock_unpoisoned;
use crate::error::{Error, Result};
use crate::pins::{NUM_PINS, PinId};

static CLAIM_LOCKS: [Mutex<()>; NUM_PINS] = [const { Mutex::new(()) }; NUM_PINS];
static CLAIMED: AtomicU64 = AtomicU64::new(0);

fn bit(id: PinId) -> u64 {
    1 << id
}

/// Snapshot of the pins nobody currently owns. Not transactional: a pin
/// listed here may be claimed by another thread before the caller gets to it.
pub fn available_ids() -> BTreeSet<PinId> {
    let claimed = CLAIMED.load(Ordering::Acquire);
    (0..NUM_PINS as PinId)
        .filter(|&id| claimed & bit(id) == 0)
        .collect()
}

/// Exclusive capability to drive one pin.
pub struct PinHandle {
    id: PinId,
    platform: Arc<dyn Platform>,
    function: Function,
    resistor: Resistor,
    edge: Edge,
}

impl PinHandle {
    /// Claim `id` for exclusive use.
    ///
    /// Returns `Ok(None)` if another handle already owns the pin. A fresh
    /// handle starts in input mode.
    pub fn claim(id: PinId, platform: Arc<dyn Platform>) -> Result<Option<Self>> {
        if id as usize >= NUM_PINS {
            return Err(Error::OutOfRange("pin id"));
        }
        {
            let _guard = lock_unpoisoned(&CLAIM_LOCKS[id as usize]);
            if CLAIMED.load(Ordering::Acquire) & bit(id) != 0 {
                return Ok(None);
            }
            CLAIMED.fetch_or(bit(id), Ordering::AcqRel);
        }
        platform.set_mode(id, Function::Input);
        debug!("GPIO: claimed pin {}", id);
        Ok(Some(Self {
            id,
            platform,
            function: Function::Input,
            resistor: Resistor::Off,
            edge: Edge::None,
        }))
    }

    /// Like [`claim`](Self::claim) but treats an owned pin as an error.
    pub fn acquire(id: PinId, platform: Arc<dyn Platform>) -> Result<Self> {
        Self::claim(id, platform)?.ok_or(Error::ResourceUnavailable(id))
    }

    pub fn id(&self) -> PinId {
        self.id
    }

    pub fn function(&self) -> Function {
        self.function
    }

    pub fn resistor(&self) -> Resistor {
        self.resistor
    }

    pub fn edge(&self) -> Edge {
        self.edge
    }

    /// Backend this pin talks to; drivers use it for PWM and timing.
    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn set_mode(&mut self, function: Function) {
        self.platform.set_mode(self.id, function);
        self.function = function;
    }

    pub fn set_resistor(&mut self, resistor: Resistor) {
        self.platform.set_resistor(self.id, resistor);
        self.resistor = resistor;
    }

    /// Arm `callback` for `edge`. `Edge::None` disarms instead.
    pub fn set_edge_detection(&mut self, edge: Edge, callback: EdgeCallback) -> Result<()> {
        if edge == Edge::None {
            self.clear_edge_detection();
            return Ok(());
        }
        self.platform.set_edge_interrupt(self.id, edge, callback)?;
        self.edge = edge;
        Ok(())
    }

    pub fn clear_edge_detection(&mut self) {
        self.platform.clear_edge_interrupt(self.id);
        self.edge = Edge::None;
    }

    pub fn write(&mut self, level: Level) -> Result<()> {
        if self.function == Function::Input {
            return Err(Error::InvalidOperation("write to a pin in input mode"));
        }
        if level == Level::Invalid {
            return Err(Error::InvalidOperation("cannot drive an invalid level"));
        }
        self.platform.write(self.id, level);
        Ok(())
    }

    pub fn read(&self) -> Result<Level> {
        if self.function == Function::Output {
            return Err(Error::InvalidOperation("read from a pin in output mode"));
        }
        Ok(Level::from_raw(self.platform.read(self.id)))
    }
}

impl Drop for PinHandle {
    fn drop(&mut self) {
        if self.edge != Edge::None {
            self.platform.clear_edge_interrupt(self.id);
        }
        self.platform.set_mode(self.id, Function::Input);
        self.platform.set_resistor(self.id, Resistor::Off);

        let _guard = lock_unpoisoned(&CLAIM_LOCKS[self.id as usize]);
        CLAIMED.fetch_and(!bit(self.id), Ordering::AcqRel);
        debug!("GPIO: released pin {}", self.id);
    }
}

impl core::fmt::Debug for PinHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PinHandle")
            .field("id", &self.id)
            .field("function", &self.function)
            .field("resistor", &self.resistor)
            .field("edge", &self.edge)
            .finish_non_exhaustive()
    }
}

// ───────────────────────────────────────────────────────────────
// embedded-hal digital traits
// ───────────────────────────────────────────────────────────────

impl embedded_hal::digital::ErrorType for PinHandle {
    type Error = Error;
}

impl embedded_hal::digital::OutputPin for PinHandle {
    fn set_low(&mut self) -> Result<()> {
        self.write(Level::Low)
    }

    fn set_high(&mut self) -> Result<()> {
        self.write(Level::High)
    }
}

impl embedded_hal::digital::InputPin for PinHandle {
    fn is_high(&mut self) -> Result<bool> {
        Ok(self.read()? == Level::High)
    }

    fn is_low(&mut self) -> Result<bool> {
        Ok(self.read()? == Level::Low)
    }
}
