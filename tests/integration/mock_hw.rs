//! Mock sensors, fan, log and operator for integration tests.
//!
//! Every mock shares its recorded history through an `Arc`, so a test can
//! hand the mock to a driver or the controller and still assert on the
//! calls afterwards.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hivekeeper::adapters::sim::SimPlatform;
use hivekeeper::app::ports::{CalibrationPrompt, ClimateLog, ClimateSensor, FanPort, StorageError};
use hivekeeper::climate::ClimateSample;
use hivekeeper::pins::PinId;
use hivekeeper::{Error, Result};

// ── ScriptedSensor ────────────────────────────────────────────

/// Plays back a list of results; the last one repeats forever.
pub struct ScriptedSensor {
    script: Mutex<VecDeque<Result<ClimateSample>>>,
    last: Mutex<Result<ClimateSample>>,
    delay: Duration,
    reads: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ScriptedSensor {
    pub fn new(script: impl IntoIterator<Item = Result<ClimateSample>>) -> Self {
        let script: VecDeque<_> = script.into_iter().collect();
        let last = script.back().copied().unwrap_or(Err(Error::ReadFailed { attempts: 0 }));
        Self {
            script: Mutex::new(script),
            last: Mutex::new(last),
            delay: Duration::ZERO,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn constant(sample: ClimateSample) -> Self {
        Self::new([Ok(sample)])
    }

    /// Block every read for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared read counter, valid after the sensor is moved away.
    pub fn reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl ClimateSensor for ScriptedSensor {
    fn read(&self) -> Result<ClimateSample> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => {
                *self.last.lock().unwrap() = result;
                result
            }
            None => *self.last.lock().unwrap(),
        }
    }
}

// ── RecordingFan ──────────────────────────────────────────────

/// Fan that accepts `0..=max` like the real one and records every command.
pub struct RecordingFan {
    max_speed_rpm: f64,
    commands: Arc<Mutex<Vec<f64>>>,
}

#[allow(dead_code)]
impl RecordingFan {
    pub fn new(max_speed_rpm: f64) -> Self {
        Self { max_speed_rpm, commands: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn commands(&self) -> Arc<Mutex<Vec<f64>>> {
        Arc::clone(&self.commands)
    }
}

impl FanPort for RecordingFan {
    fn max_speed_rpm(&self) -> f64 {
        self.max_speed_rpm
    }

    fn set_speed(&mut self, rpm: f64) -> Result<()> {
        self.commands.lock().unwrap().push(rpm);
        if (0.0..=self.max_speed_rpm).contains(&rpm) {
            Ok(())
        } else {
            Err(Error::OutOfRange("fan speed"))
        }
    }
}

// ── BrokenLog ─────────────────────────────────────────────────

/// Log whose every operation fails.
pub struct BrokenLog;

impl ClimateLog for BrokenLog {
    fn add_climate_data(&self, _: &str, _: i64, _: ClimateSample) -> std::result::Result<(), StorageError> {
        Err(StorageError::IoError)
    }

    fn climate_data(&self, _: &str, _: i64) -> std::result::Result<BTreeMap<i64, ClimateSample>, StorageError> {
        Err(StorageError::IoError)
    }

    fn clear_climate_data(&self) -> std::result::Result<(), StorageError> {
        Err(StorageError::IoError)
    }

    fn device_name(&self) -> std::result::Result<Option<String>, StorageError> {
        Err(StorageError::IoError)
    }

    fn set_device_name(&self, _: &str) -> std::result::Result<(), StorageError> {
        Err(StorageError::IoError)
    }
}

// ── ScriptedOperator ──────────────────────────────────────────

/// Calibration operator who loads the simulated scale when told to.
pub struct ScriptedOperator {
    sim: Arc<SimPlatform>,
    dout: PinId,
    loaded_raw: i32,
    reference_kg: f64,
    pub transcript: Vec<String>,
}

impl ScriptedOperator {
    pub fn new(sim: Arc<SimPlatform>, dout: PinId, loaded_raw: i32, reference_kg: f64) -> Self {
        Self { sim, dout, loaded_raw, reference_kg, transcript: Vec::new() }
    }
}

impl CalibrationPrompt for ScriptedOperator {
    fn announce(&mut self, message: &str) {
        self.transcript.push(message.to_owned());
    }

    fn confirm(&mut self, instruction: &str) -> Result<()> {
        self.transcript.push(instruction.to_owned());
        if instruction.contains("known weight") {
            self.sim.set_hx711_raw(self.dout, self.loaded_raw);
        }
        Ok(())
    }

    fn reference_mass_kg(&mut self) -> Result<f64> {
        Ok(self.reference_kg)
    }
}
