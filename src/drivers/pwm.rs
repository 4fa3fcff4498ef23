//! Hardware PWM output.
//!
//! The shared generator runs in mark:space mode with a range of 1024 steps.
//! The 19.2 MHz base oscillator is divided down to a 20 kHz counter clock.

use log::info;

use crate::app::ports::PwmMode;
use crate::drivers::gpio::{Function, PinHandle};
use crate::error::{Error, Result};
use crate::pins::{PinId, is_pwm_capable};

/// Compare-value resolution.
pub const PWM_RANGE: u32 = 1024;
/// PWM base oscillator.
pub const PWM_BASE_CLOCK_HZ: u32 = 19_200_000;
/// Counter clock after division.
pub const PWM_TARGET_CLOCK_HZ: u32 = 20_000;
/// Divisor programmed into the generator (960).
pub const PWM_CLOCK_DIVISOR: u32 = PWM_BASE_CLOCK_HZ / PWM_TARGET_CLOCK_HZ;

/// A PWM channel driving one pin.
pub struct Pwm {
    pin: PinHandle,
    duty_cycle: f64,
}

impl Pwm {
    /// Take over `pin` as a PWM output at 0% duty.
    ///
    /// The pin is released again if it cannot drive PWM.
    pub fn new(mut pin: PinHandle) -> Result<Self> {
        if !is_pwm_capable(pin.id()) {
            return Err(Error::InvalidArgument("pin is not PWM-capable"));
        }
        pin.set_mode(Function::Pwm);
        pin.platform()
            .pwm_configure(PwmMode::MarkSpace, PWM_RANGE, PWM_CLOCK_DIVISOR);
        info!(
            "PWM: pin {} at {} Hz counter clock, range {}",
            pin.id(),
            PWM_TARGET_CLOCK_HZ,
            PWM_RANGE
        );

        let mut pwm = Self { pin, duty_cycle: 0.0 };
        pwm.write(0.0)?;
        Ok(pwm)
    }

    /// Set the duty cycle, `0.0..=1.0`.
    pub fn write(&mut self, duty_cycle: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(Error::OutOfRange("duty cycle"));
        }
        let value = (duty_cycle * f64::from(PWM_RANGE)).round() as u32;
        self.pin.platform().pwm_write(self.pin.id(), value);
        self.duty_cycle = duty_cycle;
        Ok(())
    }

    /// Last duty cycle successfully written.
    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }

    pub fn pin_id(&self) -> PinId {
        self.pin.id()
    }
}

impl Drop for Pwm {
    fn drop(&mut self) {
        self.pin.platform().pwm_write(self.pin.id(), 0);
    }
}
