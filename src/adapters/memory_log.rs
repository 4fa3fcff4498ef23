//! In-memory climate log.
//!
//! Implements [`ClimateLog`] with a map of per-sensor time series. With a
//! retention limit the oldest samples of a sensor are evicted first. Nothing
//! survives a restart; a database-backed log implements the same port.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use log::info;

use crate::app::ports::{ClimateLog, StorageError};
use crate::climate::ClimateSample;
use crate::drivers::lock_unpoisoned;

#[derive(Default)]
struct Store {
    series: HashMap<String, BTreeMap<i64, ClimateSample>>,
    name: Option<String>,
}

#[derive(Default)]
pub struct InMemoryClimateLog {
    store: Mutex<Store>,
    retention: Option<usize>,
}

impl InMemoryClimateLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `samples` entries per sensor.
    pub fn with_retention(samples: usize) -> Self {
        Self { store: Mutex::default(), retention: Some(samples) }
    }

    /// Samples currently held for `sensor_id`.
    pub fn len(&self, sensor_id: &str) -> usize {
        lock_unpoisoned(&self.store).series.get(sensor_id).map_or(0, BTreeMap::len)
    }
}

impl ClimateLog for InMemoryClimateLog {
    fn add_climate_data(
        &self,
        sensor_id: &str,
        timestamp: i64,
        sample: ClimateSample,
    ) -> Result<(), StorageError> {
        if self.retention == Some(0) {
            return Err(StorageError::Full);
        }
        let mut store = lock_unpoisoned(&self.store);
        let series = store.series.entry(sensor_id.to_owned()).or_default();
        series.insert(timestamp, sample);
        if let Some(limit) = self.retention {
            while series.len() > limit {
                series.pop_first();
            }
        }
        Ok(())
    }

    fn climate_data(
        &self,
        sensor_id: &str,
        since: i64,
    ) -> Result<BTreeMap<i64, ClimateSample>, StorageError> {
        let store = lock_unpoisoned(&self.store);
        Ok(store
            .series
            .get(sensor_id)
            .map(|series| series.range(since..).map(|(t, s)| (*t, *s)).collect())
            .unwrap_or_default())
    }

    fn clear_climate_data(&self) -> Result<(), StorageError> {
        lock_unpoisoned(&self.store).series.clear();
        info!("ClimateLog: cleared");
        Ok(())
    }

    fn device_name(&self) -> Result<Option<String>, StorageError> {
        Ok(lock_unpoisoned(&self.store).name.clone())
    }

    fn set_device_name(&self, name: &str) -> Result<(), StorageError> {
        lock_unpoisoned(&self.store).name = Some(name.to_owned());
        Ok(())
    }
}
