//! Closed-loop climate control.

pub mod climate_ctrl;
