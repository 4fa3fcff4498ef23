//! HX711 24-bit load-cell amplifier.
//!
//! Two wires: DOUT (data / ready) and PD_SCK (clock / power).
//!
//! - Holding PD_SCK high for more than 60 µs powers the chip down; pulling it
//!   low powers it up.
//! - DOUT low means a conversion is ready. 24 clock pulses shift it out MSB
//!   first, then 1–3 extra pulses select channel and gain for the *next*
//!   conversion.
//! - The word is 24-bit two's complement.
//! - Power-up resets the selection to channel A, gain 128. With any other
//!   gain the first conversion after power-up is shifted out and discarded.
//!
//! Only the bit shift itself runs at real-time priority; waiting for a
//! conversion sleeps at normal priority.
//!
//! Mass is `(raw_average - tare) * kg_per_raw_unit`, with both constants
//! fixed by a one-time interactive calibration.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use embedded_hal::digital::{InputPin, OutputPin};
use heapless::Vec as FixedVec;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::app::ports::CalibrationPrompt;
use crate::drivers::gpio::{Function, PinHandle};
use crate::drivers::lock_unpoisoned;
use crate::drivers::priority::PriorityGuard;
use crate::error::{Error, Result};
use crate::sensors::filter::filtered_mean;
use crate::timing::TimeProvider;

/// Samples averaged per reading.
pub const SAMPLES_PER_READ: usize = 8;
/// Upper bound for [`Hx711::read_raw_averaged`].
pub const MAX_RAW_SAMPLES: usize = 32;
/// Longest wait for DOUT to signal a ready conversion (10 Hz output rate).
pub const READY_TIMEOUT: Duration = Duration::from_millis(500);
const READY_POLL: Duration = Duration::from_micros(10);
const CLOCK_HALF_PERIOD: Duration = Duration::from_micros(1);
/// PD_SCK high time that reliably powers the chip down.
const POWER_DOWN_HOLD: Duration = Duration::from_micros(100);
/// Range of a 24-bit two's-complement conversion.
const RAW_MIN: i32 = -(1 << 23);
const RAW_MAX: i32 = (1 << 23) - 1;

/// Input channel and gain for the next conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gain {
    /// Channel A, gain 128.
    A128,
    /// Channel B, gain 32.
    B32,
    /// Channel A, gain 64.
    A64,
}

impl Gain {
    /// Clock pulses after the 24 data bits.
    pub fn pulses(self) -> u32 {
        match self {
            Self::A128 => 1,
            Self::B32 => 2,
            Self::A64 => 3,
        }
    }
}

/// Result of a calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub tare: i32,
    pub kg_per_raw_unit: f64,
    pub gain: Gain,
}

impl Calibration {
    /// Tare within the 24-bit conversion range and a finite non-zero factor.
    pub fn is_valid(&self) -> bool {
        (RAW_MIN..=RAW_MAX).contains(&self.tare)
            && self.kg_per_raw_unit.is_finite()
            && self.kg_per_raw_unit != 0.0
    }

    /// Mass in kilograms for an averaged raw reading.
    pub fn mass_kg(&self, raw: i32) -> f64 {
        (i64::from(raw) - i64::from(self.tare)) as f64 * self.kg_per_raw_unit
    }
}

struct Lines {
    dout: PinHandle,
    sck: PinHandle,
}

pub struct Hx711 {
    lines: Mutex<Lines>,
    gain: Gain,
    calibration: OnceLock<Calibration>,
    time: TimeProvider,
}

/// Sign-extend a 24-bit two's-complement word.
pub fn sign_extend_24(word: u32) -> i32 {
    ((word << 8) as i32) >> 8
}

impl Hx711 {
    /// Take over the two lines. The amplifier starts powered down.
    pub fn new(mut dout: PinHandle, mut sck: PinHandle, gain: Gain) -> Result<Self> {
        dout.set_mode(Function::Input);
        sck.set_mode(Function::Output);
        let time = TimeProvider::new(Arc::clone(sck.platform()));
        let hx = Self {
            lines: Mutex::new(Lines { dout, sck }),
            gain,
            calibration: OnceLock::new(),
            time,
        };
        hx.power_down(&mut lock_unpoisoned(&hx.lines))?;
        Ok(hx)
    }

    /// Restore a previously stored calibration instead of prompting.
    pub fn with_calibration(self, calibration: Calibration) -> Result<Self> {
        if calibration.gain != self.gain || !calibration.is_valid() {
            return Err(Error::InvalidArgument("calibration does not match this amplifier"));
        }
        self.calibration
            .set(calibration)
            .map_err(|_| Error::InvalidOperation("already calibrated"))?;
        Ok(self)
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration.get().copied()
    }

    /// Interactive calibration with an operator and a reference weight.
    pub fn calibrate(&self, prompt: &mut dyn CalibrationPrompt) -> Result<Calibration> {
        if self.calibration.get().is_some() {
            return Err(Error::InvalidOperation("already calibrated"));
        }
        prompt.announce("Calibrating load cell");

        prompt.confirm("Remove all weight from the scale, then press Enter")?;
        let tare = self.read_raw_averaged(SAMPLES_PER_READ)?;

        prompt.confirm("Place a known weight on the scale, then press Enter")?;
        let reference_kg = prompt.reference_mass_kg()?;
        if !reference_kg.is_finite() || reference_kg <= 0.0 {
            return Err(Error::OutOfRange("reference mass"));
        }
        let loaded = self.read_raw_averaged(SAMPLES_PER_READ)?;
        if loaded == tare {
            return Err(Error::InvalidArgument("reference weight did not change the reading"));
        }

        let calibration = Calibration {
            tare,
            kg_per_raw_unit: reference_kg / (i64::from(loaded) - i64::from(tare)) as f64,
            gain: self.gain,
        };
        self.calibration
            .set(calibration)
            .map_err(|_| Error::InvalidOperation("already calibrated"))?;
        info!(
            "HX711: calibrated (tare={}, {:.3e} kg/unit)",
            calibration.tare, calibration.kg_per_raw_unit
        );
        prompt.announce("Calibration complete");
        Ok(calibration)
    }

    /// Mass on the scale in kilograms.
    pub fn read(&self) -> Result<f64> {
        let calibration = self.calibration.get().ok_or(Error::CalibrationRequired)?;
        let raw = self.read_raw_averaged(SAMPLES_PER_READ)?;
        let kg = calibration.mass_kg(raw);
        debug!("HX711: raw {} -> {:.3} kg", raw, kg);
        Ok(kg)
    }

    /// Outlier-filtered average of `samples` raw conversions.
    ///
    /// The amplifier is powered up for the duration of the read only.
    pub fn read_raw_averaged(&self, samples: usize) -> Result<i32> {
        if samples == 0 || samples > MAX_RAW_SAMPLES {
            return Err(Error::InvalidArgument("sample count must be 1..=32"));
        }
        let mut lines = lock_unpoisoned(&self.lines);

        lines.sck.set_low()?;
        let collected = self
            .latch_gain(&mut lines)
            .and_then(|()| self.collect(&mut lines, samples));
        let powered_down = self.power_down(&mut lines);
        let raw = collected?;
        powered_down?;

        let mean = filtered_mean(&raw).ok_or(Error::ReadFailed { attempts: 0 })?;
        Ok(mean.round() as i32)
    }

    /// Discard the power-up conversion unless it already used our gain.
    fn latch_gain(&self, lines: &mut Lines) -> Result<()> {
        if self.gain != Gain::A128 {
            self.read_raw(lines)?;
        }
        Ok(())
    }

    fn collect(&self, lines: &mut Lines, samples: usize) -> Result<FixedVec<f64, MAX_RAW_SAMPLES>> {
        let mut raw = FixedVec::new();
        for _ in 0..samples {
            let value = self.read_raw(lines)?;
            if raw.push(f64::from(value)).is_err() {
                break;
            }
        }
        Ok(raw)
    }

    /// One conversion; the chip must be powered up.
    fn read_raw(&self, lines: &mut Lines) -> Result<i32> {
        self.wait_ready(lines)?;
        let platform = Arc::clone(lines.sck.platform());
        let _rt = PriorityGuard::elevate(platform.as_ref());
        let mut word = 0u32;
        for _ in 0..24 {
            self.time.wait(CLOCK_HALF_PERIOD);
            lines.sck.set_high()?;
            self.time.wait(CLOCK_HALF_PERIOD);
            let bit = lines.dout.is_high()?;
            lines.sck.set_low()?;
            word = word << 1 | u32::from(bit);
        }
        for _ in 0..self.gain.pulses() {
            lines.sck.set_high()?;
            self.time.wait(CLOCK_HALF_PERIOD);
            lines.sck.set_low()?;
            self.time.wait(CLOCK_HALF_PERIOD);
        }
        Ok(sign_extend_24(word))
    }

    fn wait_ready(&self, lines: &mut Lines) -> Result<()> {
        let start = self.time.now_micros();
        let timeout = READY_TIMEOUT.as_micros() as u64;
        while !lines.dout.is_low()? {
            if self.time.now_micros().saturating_sub(start) > timeout {
                return Err(Error::ProtocolTimeout("conversion ready"));
            }
            self.time.sleep(READY_POLL);
        }
        Ok(())
    }

    fn power_down(&self, lines: &mut Lines) -> Result<()> {
        lines.sck.set_high()?;
        self.time.wait(POWER_DOWN_HOLD);
        Ok(())
    }
}
