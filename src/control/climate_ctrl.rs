//! Climate control loop.
//!
//! A background thread samples every climate sensor once per period,
//! averages the readings, checks them against the comfort bands and drives
//! the fan with a fixed threshold policy.
//!
//! ```text
//!             start()                      stop()
//!   ┌──────┐ ─────────▶ ┌─────────┐ ──────────────────▶ ┌──────┐
//!   │ Idle │            │ Running │   flag + unpark +    │ Idle │
//!   └──────┘ ◀───────── └─────────┘   join               └──────┘
//! ```
//!
//! Start and stop share one transition lock taken with `try_lock`: a request
//! that arrives while another transition is still in flight is rejected with
//! [`Error::Busy`] rather than queued.
//!
//! # Fan policy (first match wins)
//!
//! | Condition | Speed |
//! |-----------|-------|
//! | `t > T.max` or `rh > H.max` | `max` |
//! | `t > T.mid` | `max / ((t - T.mid) / T.max)` |
//! | `t > T.min` and `rh > H.mid` | `max / ((rh - H.mid) / H.max)` |
//! | otherwise | `0` |
//!
//! The two middle rows are not clamped. Values above `max` reach the fan,
//! which rejects them; the rejection is logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::app::ports::{ClimateLog, ClimateSensor, FanPort};
use crate::climate::{ClimateSample, HUMIDITY_BAND, TEMPERATURE_BAND};
use crate::drivers::lock_unpoisoned;
use crate::drivers::priority::spawn_named;
use crate::error::{Error, Result};
use crate::timing::TimeProvider;

const THREAD_NAME: &str = "climate-ctrl";
const THREAD_STACK_KB: usize = 64;

/// A climate sensor and the id its samples are logged under.
pub struct NamedSensor {
    pub id: String,
    pub sensor: Box<dyn ClimateSensor>,
}

impl NamedSensor {
    pub fn new(id: impl Into<String>, sensor: impl ClimateSensor + 'static) -> Self {
        Self { id: id.into(), sensor: Box::new(sensor) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// Which row of the fan policy fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanRule {
    /// Above a band maximum: full speed.
    Saturated,
    /// Warmer than the temperature midpoint.
    Temperature,
    /// Above the humidity midpoint while not too cold.
    Humidity,
    Off,
}

/// Fan speed for a representative sample.
pub fn decide_fan_speed(sample: &ClimateSample, max_speed_rpm: f64) -> (FanRule, f64) {
    let t = sample.temperature;
    let rh = sample.relative_humidity();
    if t > TEMPERATURE_BAND.max || rh > HUMIDITY_BAND.max {
        (FanRule::Saturated, max_speed_rpm)
    } else if t > TEMPERATURE_BAND.mid() {
        let distance = (t - TEMPERATURE_BAND.mid()) / TEMPERATURE_BAND.max;
        (FanRule::Temperature, max_speed_rpm / distance)
    } else if t > TEMPERATURE_BAND.min && rh > HUMIDITY_BAND.mid() {
        let distance = (rh - HUMIDITY_BAND.mid()) / HUMIDITY_BAND.max;
        (FanRule::Humidity, max_speed_rpm / distance)
    } else {
        (FanRule::Off, 0.0)
    }
}

/// Sensors, fan and log, owned by whoever runs a cycle.
struct Plant<F> {
    sensors: Vec<NamedSensor>,
    fan: F,
    log: Option<Arc<dyn ClimateLog>>,
    time: TimeProvider,
}

impl<F: FanPort> Plant<F> {
    fn cycle(&mut self) -> Option<ClimateSample> {
        let timestamp = self.time.unix_timestamp();
        let mut total = ClimateSample::default();
        let mut count = 0u32;

        for named in &self.sensors {
            match named.sensor.read() {
                Ok(sample) if sample.is_plausible() => {
                    total += sample;
                    count += 1;
                    self.record(&named.id, timestamp, sample);
                }
                Ok(sample) => warn!(
                    "Controller: implausible reading from '{}' ({:.1} °C, {:.1} %RH) ignored",
                    named.id, sample.temperature, sample.humidity
                ),
                Err(e) => warn!("Controller: sensor '{}' skipped this cycle: {}", named.id, e),
            }
        }

        if count == 0 {
            warn!("Controller: no sensor produced a reading, fan left unchanged");
            return None;
        }
        let average = total / f64::from(count);

        if !TEMPERATURE_BAND.contains(average.temperature) {
            warn!(
                "Controller: temperature {:.1} °C outside [{}, {}]",
                average.temperature, TEMPERATURE_BAND.min, TEMPERATURE_BAND.max
            );
        }
        if !HUMIDITY_BAND.contains(average.relative_humidity()) {
            warn!(
                "Controller: humidity {:.2} outside [{}, {}]",
                average.relative_humidity(),
                HUMIDITY_BAND.min,
                HUMIDITY_BAND.max
            );
        }

        let (rule, rpm) = decide_fan_speed(&average, self.fan.max_speed_rpm());
        match self.fan.set_speed(rpm) {
            Ok(()) => debug!("Controller: fan {:?} -> {:.0} RPM", rule, rpm),
            Err(e) => warn!("Controller: fan rejected {:.0} RPM ({:?}): {}", rpm, rule, e),
        }
        Some(average)
    }

    fn record(&self, sensor_id: &str, timestamp: i64, sample: ClimateSample) {
        if let Some(log) = &self.log {
            if let Err(e) = log.add_climate_data(sensor_id, timestamp, sample) {
                warn!("Controller: could not log sample of '{}': {}", sensor_id, e);
            }
        }
    }
}

/// Periodic climate controller.
pub struct ClimateController<F: FanPort + 'static> {
    plant: Arc<Mutex<Plant<F>>>,
    latest: Arc<Mutex<Option<ClimateSample>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    stop: Arc<AtomicBool>,
    period: Duration,
}

impl<F: FanPort + 'static> ClimateController<F> {
    pub fn new(
        sensors: Vec<NamedSensor>,
        fan: F,
        log: Option<Arc<dyn ClimateLog>>,
        time: TimeProvider,
        period: Duration,
    ) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::InvalidArgument("control period must be positive"));
        }
        Ok(Self {
            plant: Arc::new(Mutex::new(Plant { sensors, fan, log, time })),
            latest: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
            period,
        })
    }

    pub fn state(&self) -> LoopState {
        if self.running.load(Ordering::Acquire) {
            LoopState::Running
        } else {
            LoopState::Idle
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Average of the most recent successful cycle.
    pub fn latest_sample(&self) -> Option<ClimateSample> {
        *lock_unpoisoned(&self.latest)
    }

    /// Ids of the sensors, in sampling order.
    pub fn sensor_ids(&self) -> Vec<String> {
        lock_unpoisoned(&self.plant)
            .sensors
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }

    /// Run one cycle on the calling thread. Only allowed while idle.
    pub fn run_cycle(&self) -> Result<Option<ClimateSample>> {
        let worker = self.begin_transition()?;
        if worker.is_some() {
            return Err(Error::InvalidState("controller is running"));
        }
        let average = lock_unpoisoned(&self.plant).cycle();
        if average.is_some() {
            *lock_unpoisoned(&self.latest) = average;
        }
        Ok(average)
    }

    pub fn start(&self) -> Result<()> {
        let mut worker = self.begin_transition()?;
        if worker.is_some() {
            warn!("Controller: start requested while running");
            return Err(Error::InvalidState("controller is already running"));
        }

        self.stop.store(false, Ordering::Release);
        let plant = Arc::clone(&self.plant);
        let latest = Arc::clone(&self.latest);
        let stop = Arc::clone(&self.stop);
        let period = self.period;
        let handle = spawn_named(THREAD_NAME, THREAD_STACK_KB, move || {
            control_loop(&plant, &latest, &stop, period);
        })?;

        *worker = Some(handle);
        self.running.store(true, Ordering::Release);
        info!("Controller: started (period {:?})", period);
        Ok(())
    }

    /// Stop the loop; returns once the worker has finished its iteration.
    pub fn stop(&self) -> Result<()> {
        let mut worker = self.begin_transition()?;
        let Some(handle) = worker.take() else {
            warn!("Controller: stop requested while idle");
            return Err(Error::InvalidState("controller is not running"));
        };
        self.halt(handle);
        info!("Controller: stopped");
        Ok(())
    }

    fn halt(&self, handle: JoinHandle<()>) {
        self.stop.store(true, Ordering::Release);
        handle.thread().unpark();
        if handle.join().is_err() {
            error!("Controller: control thread panicked");
        }
        self.running.store(false, Ordering::Release);
    }

    fn begin_transition(&self) -> Result<MutexGuard<'_, Option<JoinHandle<()>>>> {
        match self.worker.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                warn!("Controller: transition already in progress, request rejected");
                Err(Error::Busy)
            }
        }
    }
}

impl<F: FanPort + 'static> Drop for ClimateController<F> {
    fn drop(&mut self) {
        let handle = lock_unpoisoned(&self.worker).take();
        if let Some(handle) = handle {
            self.halt(handle);
        }
    }
}

/// Cycle on absolute deadlines until `stop` is raised.
fn control_loop<F: FanPort>(
    plant: &Mutex<Plant<F>>,
    latest: &Mutex<Option<ClimateSample>>,
    stop: &AtomicBool,
    period: Duration,
) {
    let mut deadline = Instant::now();
    while !stop.load(Ordering::Acquire) {
        let average = lock_unpoisoned(plant).cycle();
        if average.is_some() {
            *lock_unpoisoned(latest) = average;
        }

        deadline += period;
        let now = Instant::now();
        if deadline <= now {
            warn!("Controller: cycle overran its {:?} period", period);
            deadline = now;
            continue;
        }
        loop {
            if stop.load(Ordering::Acquire) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::park_timeout(deadline - now);
        }
    }
}
