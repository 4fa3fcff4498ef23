//! Application core: ports and the node-level service.
//!
//! Hardware and persistence are reached only through the traits in
//! [`ports`]; [`service`] is the upward API a front-end talks to.

pub mod ports;
pub mod service;
