//! Node configuration parameters
//!
//! Wiring, sensor variant, fan characteristics and timing for one hive node.
//! Loaded from a JSON file by [`JsonConfigFile`](crate::adapters::config_file::JsonConfigFile);
//! every field has a default, so a partial file is enough.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::drivers::tachometer::DEFAULT_PULSES_PER_REVOLUTION;
use crate::pins::{self, NUM_PINS, PinId, is_pwm_capable};
use crate::sensors::dht::DhtKind;
use crate::sensors::hx711::{Calibration, Gain};

/// A named climate sensor and the pin it is wired to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClimateSensorConfig {
    pub id: String,
    pub pin: PinId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanConfig {
    /// Must be a hardware PWM pin.
    pub pwm_pin: PinId,
    /// `None` for a 3-wire fan.
    pub tach_pin: Option<PinId>,
    pub max_speed_rpm: f64,
    pub pulses_per_revolution: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleConfig {
    pub dout_pin: PinId,
    pub sck_pin: PinId,
    pub gain: Gain,
    /// Stored result of a previous calibration; prompts on start-up if absent.
    pub calibration: Option<Calibration>,
}

/// Core node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Display name reported to front-ends.
    pub name: String,
    pub dht_kind: DhtKind,
    pub climate_sensors: Vec<ClimateSensorConfig>,
    pub fan: FanConfig,
    /// `None` on nodes without a load cell.
    pub scale: Option<ScaleConfig>,
    /// Climate control period (milliseconds)
    pub control_period_ms: u64,
    /// Hive weighing period (milliseconds)
    pub scale_period_ms: u64,
    /// Climate samples kept per sensor in memory (`None` = unbounded)
    pub log_retention: Option<usize>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "hive".into(),
            dht_kind: DhtKind::Dht22,
            climate_sensors: vec![
                ClimateSensorConfig { id: "interior".into(), pin: pins::DHT_INTERIOR_PIN },
                ClimateSensorConfig { id: "exterior".into(), pin: pins::DHT_EXTERIOR_PIN },
            ],
            fan: FanConfig {
                pwm_pin: pins::FAN_PWM_PIN,
                tach_pin: Some(pins::FAN_TACH_PIN),
                max_speed_rpm: 1200.0,
                pulses_per_revolution: DEFAULT_PULSES_PER_REVOLUTION,
            },
            scale: Some(ScaleConfig {
                dout_pin: pins::SCALE_DOUT_PIN,
                sck_pin: pins::SCALE_SCK_PIN,
                gain: Gain::A128,
                calibration: None,
            }),
            control_period_ms: 5 * 60 * 1000, // 5 min
            scale_period_ms: 15 * 60 * 1000,  // 15 min
            log_retention: Some(7 * 24 * 12), // one week at 5 min
        }
    }
}

impl NodeConfig {
    /// Every pin the configuration claims, in wiring order.
    pub fn pins(&self) -> Vec<PinId> {
        let mut pins: Vec<PinId> = self.climate_sensors.iter().map(|s| s.pin).collect();
        pins.push(self.fan.pwm_pin);
        pins.extend(self.fan.tach_pin);
        if let Some(scale) = &self.scale {
            pins.push(scale.dout_pin);
            pins.push(scale.sck_pin);
        }
        pins
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        self.climate_sensors.iter().map(|s| s.id.clone()).collect()
    }

    /// Range-check every field. Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() || self.name.len() > 64 {
            return Err(ConfigError::ValidationFailed("name must be 1–64 characters"));
        }
        if self.climate_sensors.is_empty() {
            return Err(ConfigError::ValidationFailed("at least one climate sensor is required"));
        }
        for (i, sensor) in self.climate_sensors.iter().enumerate() {
            if sensor.id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed("climate sensor id must not be empty"));
            }
            if self.climate_sensors[..i].iter().any(|s| s.id == sensor.id) {
                return Err(ConfigError::ValidationFailed("climate sensor ids must be unique"));
            }
        }

        let pins = self.pins();
        for (i, pin) in pins.iter().enumerate() {
            if *pin as usize >= NUM_PINS {
                return Err(ConfigError::ValidationFailed("pin id must be below 40"));
            }
            if pins[..i].contains(pin) {
                return Err(ConfigError::ValidationFailed("pin assigned twice"));
            }
        }
        if !is_pwm_capable(self.fan.pwm_pin) {
            return Err(ConfigError::ValidationFailed("fan.pwm_pin must be 12, 13, 18 or 19"));
        }

        if !self.fan.max_speed_rpm.is_finite() || self.fan.max_speed_rpm <= 0.0 {
            return Err(ConfigError::ValidationFailed("fan.max_speed_rpm must be positive"));
        }
        if self.fan.pulses_per_revolution == 0 {
            return Err(ConfigError::ValidationFailed("fan.pulses_per_revolution must be positive"));
        }
        if let Some(calibration) = self.scale.as_ref().and_then(|s| s.calibration.as_ref()) {
            if !calibration.is_valid() {
                return Err(ConfigError::ValidationFailed("scale calibration is out of range"));
            }
        }

        if self.control_period_ms == 0 || self.scale_period_ms == 0 {
            return Err(ConfigError::ValidationFailed("periods must be positive"));
        }
        if self.log_retention == Some(0) {
            return Err(ConfigError::ValidationFailed("log_retention must be positive"));
        }
        Ok(())
    }
}
