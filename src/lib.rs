//! Hivekeeper node library.
//!
//! Pin ownership, sensor and actuator drivers, and the climate control loop
//! for a beehive monitoring node. Everything runs against the
//! [`Platform`](app::ports::Platform) port, so the whole stack is exercised on
//! the host with [`SimPlatform`](adapters::sim::SimPlatform); the Raspberry Pi
//! backend is behind the `rpi` feature.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod climate;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod pins;
pub mod sensors;
pub mod timing;

pub use error::{Error, Result};
