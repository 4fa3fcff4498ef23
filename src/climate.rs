//! Climate measurement types and the hive comfort bands.

use core::iter::Sum;
use core::ops::{Add, AddAssign, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

/// One temperature/humidity measurement.
///
/// `temperature` is in °C, `humidity` in percent relative humidity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClimateSample {
    pub temperature: f64,
    pub humidity: f64,
}

impl ClimateSample {
    pub const fn new(temperature: f64, humidity: f64) -> Self {
        Self { temperature, humidity }
    }

    /// Humidity as a fraction in `[0, 1]`, the unit of [`HUMIDITY_BAND`].
    pub fn relative_humidity(&self) -> f64 {
        self.humidity / 100.0
    }

    /// Within the physical range a DHT22 can report.
    pub fn is_plausible(&self) -> bool {
        self.temperature.is_finite()
            && self.humidity.is_finite()
            && (-40.0..=80.0).contains(&self.temperature)
            && (0.0..=100.0).contains(&self.humidity)
    }
}

impl Add for ClimateSample {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.temperature + rhs.temperature, self.humidity + rhs.humidity)
    }
}

impl AddAssign for ClimateSample {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ClimateSample {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.temperature - rhs.temperature, self.humidity - rhs.humidity)
    }
}

impl Mul<f64> for ClimateSample {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.temperature * rhs, self.humidity * rhs)
    }
}

impl Div<f64> for ClimateSample {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self::new(self.temperature / rhs, self.humidity / rhs)
    }
}

impl Sum for ClimateSample {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Inclusive band `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> Range<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }
}

impl Range<f64> {
    /// Centre of the band.
    pub fn mid(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Target brood-box temperature in °C.
pub const TEMPERATURE_BAND: Range<f64> = Range::new(2.5, 7.5);

/// Target relative humidity as a fraction.
pub const HUMIDITY_BAND: Range<f64> = Range::new(0.50, 0.75);
