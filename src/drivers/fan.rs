//! Speed-controlled cooling fan.
//!
//! | Wiring | Control | Feedback |
//! |--------|---------|----------|
//! | 3-pin  | PWM     | none (`read` is unsupported) |
//! | 4-pin  | PWM     | tachometer |
//!
//! Speed commands are in RPM and map linearly onto the PWM duty cycle:
//! `duty = rpm / max_speed_rpm`.

use log::debug;

use crate::app::ports::FanPort;
use crate::drivers::pwm::Pwm;
use crate::drivers::tachometer::Tachometer;
use crate::error::{Error, Result};

pub struct Fan {
    pwm: Pwm,
    tachometer: Option<Tachometer>,
    max_speed_rpm: f64,
}

impl Fan {
    pub fn new(pwm: Pwm, tachometer: Option<Tachometer>, max_speed_rpm: f64) -> Result<Self> {
        if !max_speed_rpm.is_finite() || max_speed_rpm <= 0.0 {
            return Err(Error::InvalidArgument("max fan speed must be positive"));
        }
        Ok(Self { pwm, tachometer, max_speed_rpm })
    }

    /// Command `rpm`, `0..=max_speed_rpm`.
    pub fn write(&mut self, rpm: f64) -> Result<()> {
        if !(0.0..=self.max_speed_rpm).contains(&rpm) {
            return Err(Error::OutOfRange("fan speed"));
        }
        self.pwm.write(rpm / self.max_speed_rpm)?;
        debug!("Fan: commanded {:.0} RPM (duty {:.3})", rpm, self.pwm.duty_cycle());
        Ok(())
    }

    /// Measured speed in RPM.
    pub fn read(&self) -> Result<f64> {
        self.tachometer
            .as_ref()
            .ok_or(Error::UnsupportedOperation("fan has no tachometer"))?
            .read()
    }

    pub fn max_speed_rpm(&self) -> f64 {
        self.max_speed_rpm
    }

    pub fn duty_cycle(&self) -> f64 {
        self.pwm.duty_cycle()
    }

    pub fn has_tachometer(&self) -> bool {
        self.tachometer.is_some()
    }
}

impl FanPort for Fan {
    fn max_speed_rpm(&self) -> f64 {
        self.max_speed_rpm
    }

    fn set_speed(&mut self, rpm: f64) -> Result<()> {
        self.write(rpm)
    }
}
