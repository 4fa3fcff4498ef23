//! Bit-banged sensor drivers.
//!
//! | Sensor | Driver | Output |
//! |--------|--------|--------|
//! | DHT11 / DHT22 | [`dht::Dht`] | temperature (°C) + humidity (%RH) |
//! | HX711 load cell | [`hx711::Hx711`] | mass (kg) |
//!
//! Both smooth their output with the outlier filter in [`filter`].

pub mod dht;
pub mod filter;
pub mod hx711;
