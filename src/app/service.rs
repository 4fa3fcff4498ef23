//! Node service: what front-ends (HTTP, CLI) talk to.
//!
//! ```text
//!   front-end ──▶ NodeApi ──▶ NodeService ──▶ ClimateLog
//! ```
//!
//! The display name is cached in memory and written through to the log, so
//! a failing store never loses a rename for the running process.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use log::{info, warn};

use crate::climate::ClimateSample;

use super::ports::{ClimateLog, NodeApi, StorageError};

pub struct NodeService {
    name: RwLock<String>,
    sensor_ids: Vec<String>,
    log: Arc<dyn ClimateLog>,
}

impl NodeService {
    /// `default_name` is used unless the log already holds a name.
    pub fn new(default_name: &str, sensor_ids: Vec<String>, log: Arc<dyn ClimateLog>) -> Self {
        let name = match log.device_name() {
            Ok(Some(stored)) => stored,
            Ok(None) => default_name.to_owned(),
            Err(e) => {
                warn!("NodeService: cannot read stored name ({}), using '{}'", e, default_name);
                default_name.to_owned()
            }
        };
        info!("NodeService: '{}' with sensors {:?}", name, sensor_ids);
        Self { name: RwLock::new(name), sensor_ids, log }
    }
}

impl NodeApi for NodeService {
    fn name(&self) -> String {
        self.name.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn set_name(&self, name: &str) {
        *self.name.write().unwrap_or_else(std::sync::PoisonError::into_inner) = name.to_owned();
        if let Err(e) = self.log.set_device_name(name) {
            warn!("NodeService: name '{}' not persisted: {}", name, e);
        }
    }

    fn climate_samples(
        &self,
        sensor_id: &str,
        since: i64,
    ) -> Result<BTreeMap<i64, ClimateSample>, StorageError> {
        self.log.climate_data(sensor_id, since)
    }

    fn climate_sensor_ids(&self) -> Vec<String> {
        self.sensor_ids.clone()
    }

    fn clear_climate_data(&self) -> Result<(), StorageError> {
        self.log.clear_climate_data()
    }
}
