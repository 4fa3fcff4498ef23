//! Outlier-rejecting mean shared by the DHT and HX711 drivers.
//!
//! 1. average every sample;
//! 2. drop samples deviating from that average by more than 25% of its
//!    magnitude (any component, for multi-component samples);
//! 3. average the survivors.
//!
//! If every sample is dropped the unfiltered average is returned.

use core::ops::{Add, Div};

use log::warn;

use crate::climate::ClimateSample;

/// Maximum relative deviation from the mean a sample may show.
pub const OUTLIER_TOLERANCE: f64 = 0.25;

/// A sample type that can be averaged and checked against a mean.
pub trait Averaged: Copy + Default + Add<Output = Self> + Div<f64, Output = Self> {
    /// Whether every component lies within `tolerance` of `mean`.
    fn near(&self, mean: &Self, tolerance: f64) -> bool;
}

fn within(value: f64, mean: f64, tolerance: f64) -> bool {
    (value - mean).abs() <= tolerance * mean.abs()
}

impl Averaged for f64 {
    fn near(&self, mean: &Self, tolerance: f64) -> bool {
        within(*self, *mean, tolerance)
    }
}

impl Averaged for ClimateSample {
    fn near(&self, mean: &Self, tolerance: f64) -> bool {
        within(self.temperature, mean.temperature, tolerance)
            && within(self.humidity, mean.humidity, tolerance)
    }
}

pub fn mean<T: Averaged>(samples: &[T]) -> Option<T> {
    if samples.is_empty() {
        return None;
    }
    let sum = samples.iter().fold(T::default(), |acc, s| acc + *s);
    Some(sum / samples.len() as f64)
}

/// Mean of `samples` after discarding outliers. `None` for no samples.
pub fn filtered_mean<T: Averaged>(samples: &[T]) -> Option<T> {
    let raw = mean(samples)?;
    let mut sum = T::default();
    let mut kept = 0usize;
    for sample in samples.iter().filter(|s| s.near(&raw, OUTLIER_TOLERANCE)) {
        sum = sum + *sample;
        kept += 1;
    }
    if kept == 0 {
        warn!("Filter: all {} samples rejected as outliers, using raw mean", samples.len());
        return Some(raw);
    }
    Some(sum / kept as f64)
}
