//! DHT11 / DHT22 single-wire temperature and humidity sensor.
//!
//! One exchange on the data line:
//!
//! ```text
//!  host  ─┐  20 ms  ┌ 40 µs ┐ release
//!         └─────────┘       ╎
//!  sensor                   ╎ ~30 µs HI ┐ 80 µs LO ┌ 80 µs HI ┐ 40 × (50 µs LO + 27|70 µs HI)
//! ```
//!
//! A bit is a one when its high phase lasts longer than 48.5 µs. Each phase
//! must end within 100 µs or the exchange is abandoned. The 40 bits form
//! five bytes: humidity (2), temperature (2) and an 8-bit additive checksum.
//!
//! A public [`Dht::read`] takes ten samples and returns their outlier-filtered
//! mean; each sample retries failed exchanges a bounded number of times.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use heapless::Vec as FixedVec;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::ClimateSensor;
use crate::climate::ClimateSample;
use crate::drivers::gpio::{Function, Level, PinHandle};
use crate::drivers::lock_unpoisoned;
use crate::drivers::priority::PriorityGuard;
use crate::error::{Error, Result};
use crate::sensors::filter::filtered_mean;
use crate::timing::TimeProvider;

/// Host start signal: line held low.
pub const RESET_PULSE: Duration = Duration::from_millis(20);
/// Host start signal: line held high before release.
pub const RELEASE_WAIT: Duration = Duration::from_micros(40);
/// Upper bound of every protocol phase.
pub const PHASE_TIMEOUT_US: u64 = 100;
/// High phases longer than this encode a one.
pub const BIT_THRESHOLD_US: f64 = 48.5;

pub const MAX_ATTEMPTS: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_millis(200);
pub const SAMPLES_PER_READ: usize = 10;
pub const SAMPLE_SPACING: Duration = Duration::from_millis(100);

const FRAME_BITS: usize = 40;

/// Sensor variant; decides how the frame is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhtKind {
    /// Integer humidity and temperature.
    Dht11,
    /// 0.1 resolution, signed temperature.
    Dht22,
}

/// Decode a raw frame, verifying its checksum.
pub fn decode(kind: DhtKind, frame: &[u8; 5]) -> Result<ClimateSample> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return Err(Error::ChecksumMismatch { expected: frame[4], actual: sum });
    }
    Ok(match kind {
        DhtKind::Dht11 => ClimateSample::new(f64::from(frame[2]), f64::from(frame[0])),
        DhtKind::Dht22 => {
            let humidity = u16::from_be_bytes([frame[0], frame[1]]);
            let magnitude = f64::from(u16::from_be_bytes([frame[2] & 0x7F, frame[3]])) * 0.1;
            let temperature = if frame[2] & 0x80 != 0 { -magnitude } else { magnitude };
            ClimateSample::new(temperature, f64::from(humidity) * 0.1)
        }
    })
}

pub struct Dht {
    kind: DhtKind,
    pin: Mutex<PinHandle>,
    time: TimeProvider,
}

impl Dht {
    pub fn new(kind: DhtKind, mut pin: PinHandle) -> Self {
        pin.set_mode(Function::Input);
        let time = TimeProvider::new(Arc::clone(pin.platform()));
        Self { kind, pin: Mutex::new(pin), time }
    }

    pub fn kind(&self) -> DhtKind {
        self.kind
    }

    /// Smoothed reading over [`SAMPLES_PER_READ`] samples.
    ///
    /// Fails as soon as one sample exhausts its retries.
    pub fn read(&self) -> Result<ClimateSample> {
        let mut pin = lock_unpoisoned(&self.pin);
        let mut samples: FixedVec<ClimateSample, SAMPLES_PER_READ> = FixedVec::new();
        for i in 0..SAMPLES_PER_READ {
            if i > 0 {
                self.time.wait(SAMPLE_SPACING);
            }
            let sample = self.sample(&mut pin)?;
            if samples.push(sample).is_err() {
                break;
            }
        }
        let smoothed = filtered_mean(&samples).ok_or(Error::ReadFailed { attempts: 0 })?;
        debug!(
            "DHT: pin {} -> {:.1} °C, {:.1} %RH",
            pin.id(),
            smoothed.temperature,
            smoothed.humidity
        );
        Ok(smoothed)
    }

    /// One sample, retrying timeouts and checksum failures.
    pub fn read_once(&self) -> Result<ClimateSample> {
        let mut pin = lock_unpoisoned(&self.pin);
        self.sample(&mut pin)
    }

    fn sample(&self, pin: &mut PinHandle) -> Result<ClimateSample> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.exchange(pin).and_then(|frame| decode(self.kind, &frame)) {
                Ok(sample) => return Ok(sample),
                Err(e @ (Error::ProtocolTimeout(_) | Error::ChecksumMismatch { .. })) => {
                    warn!("DHT: pin {} attempt {}/{}: {}", pin.id(), attempt, MAX_ATTEMPTS, e);
                    if attempt < MAX_ATTEMPTS {
                        self.time.wait(RETRY_DELAY);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        error!("DHT: pin {} gave no valid frame in {} attempts", pin.id(), MAX_ATTEMPTS);
        Err(Error::ReadFailed { attempts: MAX_ATTEMPTS })
    }

    /// Start signal plus 40-bit transfer, at real-time priority.
    fn exchange(&self, pin: &mut PinHandle) -> Result<[u8; 5]> {
        let platform = Arc::clone(pin.platform());
        let _rt = PriorityGuard::elevate(platform.as_ref());

        pin.set_mode(Function::Output);
        pin.write(Level::Low)?;
        self.time.wait(RESET_PULSE);
        pin.write(Level::High)?;
        self.time.wait(RELEASE_WAIT);
        pin.set_mode(Function::Input);

        self.hold(pin, Level::High, "response")?;
        self.hold(pin, Level::Low, "ack low")?;
        self.hold(pin, Level::High, "ack high")?;

        let mut frame = [0u8; 5];
        for bit in 0..FRAME_BITS {
            self.hold(pin, Level::Low, "bit low")?;
            let high_us = self.hold(pin, Level::High, "bit high")?;
            if high_us as f64 > BIT_THRESHOLD_US {
                frame[bit / 8] |= 0x80 >> (bit % 8);
            }
        }
        Ok(frame)
    }

    /// Microseconds the line stays at `level`, bounded by [`PHASE_TIMEOUT_US`].
    fn hold(&self, pin: &PinHandle, level: Level, phase: &'static str) -> Result<u64> {
        let start = self.time.now_micros();
        loop {
            let current = pin.read()?;
            let elapsed = self.time.now_micros().saturating_sub(start);
            if current != level {
                return Ok(elapsed);
            }
            if elapsed > PHASE_TIMEOUT_US {
                return Err(Error::ProtocolTimeout(phase));
            }
        }
    }
}

impl ClimateSensor for Dht {
    fn read(&self) -> Result<ClimateSample> {
        Dht::read(self)
    }
}
