//! Port traits: the boundary between the hive logic and the outside world.
//!
//! ```text
//!   Platform ──▶ drivers ──▶ ClimateSensor / FanPort ──▶ ClimateController
//!                                                            │
//!                         NodeApi ◀── NodeService ◀── ClimateLog
//! ```
//!
//! Downward ports (`Platform`, `ClimateLog`, `CalibrationPrompt`,
//! `ConfigPort`) are implemented by adapters. The controller and the node
//! service consume them via generics or trait objects, so every piece of
//! logic runs on the host against the simulator.

use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::climate::ClimateSample;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::pins::PinId;

// ───────────────────────────────────────────────────────────────
// Pin vocabulary shared by the backend and the pin handles
// ───────────────────────────────────────────────────────────────

/// Logic level of a pin. `Invalid` is what an unrecognised raw value reads as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
    Invalid,
}

impl Level {
    /// Map a raw backend reading onto a level.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Low,
            1 => Self::High,
            _ => Self::Invalid,
        }
    }

    /// Raw backend value of a valid level.
    pub fn raw(self) -> i32 {
        match self {
            Self::Low => 0,
            Self::High => 1,
            Self::Invalid => -1,
        }
    }
}

/// Pin function selected in the pin multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Input,
    Output,
    Pwm,
    Clock,
}

/// Internal bias resistor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resistor {
    Off,
    PullUp,
    PullDown,
}

/// Edge(s) that trigger an interrupt callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    None,
    Rising,
    Falling,
    Both,
}

/// PWM generator mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmMode {
    /// Classic mark:space output (one pulse per period).
    MarkSpace,
    /// Balanced output (pulses spread over the period).
    Balanced,
}

/// Scheduling class of the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    RealTime,
}

/// Callback invoked on an edge interrupt, possibly from a backend thread.
pub type EdgeCallback = Box<dyn FnMut() + Send + 'static>;

// ───────────────────────────────────────────────────────────────
// Platform backend (driven adapter: drivers → hardware)
// ───────────────────────────────────────────────────────────────

/// Raw hardware access. All methods take `&self`; implementations use
/// interior mutability so one backend can be shared by every pin handle.
///
/// Pin arguments are always in range; the registry checks before calling.
pub trait Platform: Send + Sync {
    /// Raw pin value: `0` low, `1` high, anything else is invalid.
    fn read(&self, pin: PinId) -> i32;

    fn write(&self, pin: PinId, level: Level);

    fn set_mode(&self, pin: PinId, function: Function);

    fn set_resistor(&self, pin: PinId, resistor: Resistor);

    /// Set the PWM compare value (`0..=range`) for a pin in PWM mode.
    fn pwm_write(&self, pin: PinId, value: u32);

    /// Configure the shared PWM generator.
    fn pwm_configure(&self, mode: PwmMode, range: u32, clock_divisor: u32);

    /// Arm `callback` for `edge` on `pin`, replacing any previous callback.
    fn set_edge_interrupt(&self, pin: PinId, edge: Edge, callback: EdgeCallback) -> Result<()>;

    /// Disarm edge detection. Once this returns no callback runs again.
    fn clear_edge_interrupt(&self, pin: PinId);

    /// Change the scheduling class of the calling thread.
    fn set_priority(&self, priority: Priority);

    fn delay_ms(&self, ms: u64);

    fn delay_us(&self, us: u64);

    /// Give up the CPU for at least `us` microseconds. Never spins.
    fn sleep_us(&self, us: u64);

    /// Monotonic microseconds since an arbitrary epoch.
    fn now_micros(&self) -> u64;

    /// Wall clock used to timestamp samples.
    fn wall_clock(&self) -> SystemTime {
        SystemTime::now()
    }
}

// ───────────────────────────────────────────────────────────────
// Sensor / actuator ports (drivers → controller)
// ───────────────────────────────────────────────────────────────

/// Anything that yields a temperature/humidity sample.
pub trait ClimateSensor: Send {
    fn read(&self) -> Result<ClimateSample>;
}

/// A speed-controlled fan.
pub trait FanPort: Send {
    fn max_speed_rpm(&self) -> f64;

    /// Command a target speed. Speeds outside `[0, max]` are rejected.
    fn set_speed(&mut self, rpm: f64) -> Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Climate log (driven adapter: controller ↔ persistence)
// ───────────────────────────────────────────────────────────────

/// Time-series store for climate samples plus the node's display name.
///
/// Timestamps are Unix seconds. The concrete engine lives outside this
/// crate; [`InMemoryClimateLog`](crate::adapters::memory_log::InMemoryClimateLog)
/// is the reference implementation.
pub trait ClimateLog: Send + Sync {
    fn add_climate_data(
        &self,
        sensor_id: &str,
        timestamp: i64,
        sample: ClimateSample,
    ) -> core::result::Result<(), StorageError>;

    /// Samples of `sensor_id` taken at or after `since`, keyed by timestamp.
    fn climate_data(
        &self,
        sensor_id: &str,
        since: i64,
    ) -> core::result::Result<BTreeMap<i64, ClimateSample>, StorageError>;

    fn clear_climate_data(&self) -> core::result::Result<(), StorageError>;

    fn device_name(&self) -> core::result::Result<Option<String>, StorageError>;

    fn set_device_name(&self, name: &str) -> core::result::Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Upward API (node service → HTTP / CLI front-ends)
// ───────────────────────────────────────────────────────────────

/// What a front-end may ask of the node.
pub trait NodeApi {
    fn name(&self) -> String;

    fn set_name(&self, name: &str);

    fn climate_samples(
        &self,
        sensor_id: &str,
        since: i64,
    ) -> core::result::Result<BTreeMap<i64, ClimateSample>, StorageError>;

    fn climate_sensor_ids(&self) -> Vec<String>;

    fn clear_climate_data(&self) -> core::result::Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Operator prompt (driven adapter: calibration ↔ console)
// ───────────────────────────────────────────────────────────────

/// Interactive operator channel used by load-cell calibration.
pub trait CalibrationPrompt {
    /// Print an informational line.
    fn announce(&mut self, message: &str);

    /// Show `instruction` and block until the operator acknowledges it.
    fn confirm(&mut self, instruction: &str) -> Result<()>;

    /// Ask for the reference mass in kilograms until a positive value is given.
    fn reference_mass_kg(&mut self) -> Result<f64>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: node ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists node configuration.
///
/// Implementations MUST validate before persisting; invalid values are
/// rejected with [`ConfigError::ValidationFailed`], never clamped.
pub trait ConfigPort {
    /// Returns [`NodeConfig::default()`] if no stored config exists.
    fn load(&self) -> core::result::Result<NodeConfig, ConfigError>;

    fn save(&self, config: &NodeConfig) -> core::result::Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`ClimateLog`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// The store refused the write (capacity, read-only).
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl std::error::Error for StorageError {}
