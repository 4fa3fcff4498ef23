//! PWM output and the fan built on it.

use std::sync::Arc;

use hivekeeper::Error;
use hivekeeper::adapters::sim::{SignalSpec, SimPlatform};
use hivekeeper::app::ports::{FanPort, Function, PwmMode};
use hivekeeper::drivers::fan::Fan;
use hivekeeper::drivers::gpio::{PinHandle, available_ids};
use hivekeeper::drivers::pwm::{PWM_CLOCK_DIVISOR, PWM_RANGE, Pwm};
use hivekeeper::drivers::tachometer::Tachometer;
use pretty_assertions::assert_eq;

#[test]
fn non_pwm_pin_is_rejected_and_released() {
    let sim = Arc::new(SimPlatform::default());
    let pin = PinHandle::acquire(10, sim.clone()).unwrap();
    assert!(matches!(Pwm::new(pin), Err(Error::InvalidArgument(_))));
    assert!(available_ids().contains(&10));
}

#[test]
fn duty_cycle_maps_onto_the_counter_range() {
    let sim = Arc::new(SimPlatform::default());
    let mut pwm = Pwm::new(PinHandle::acquire(18, sim.clone()).unwrap()).unwrap();
    assert_eq!(sim.function(18), Function::Pwm);
    assert_eq!(
        sim.pwm_config(),
        Some((PwmMode::MarkSpace, PWM_RANGE, PWM_CLOCK_DIVISOR))
    );
    assert_eq!(sim.pwm_value(18), Some(0));

    pwm.write(0.5).unwrap();
    assert_eq!(sim.pwm_value(18), Some(512));
    pwm.write(1.0).unwrap();
    assert_eq!(sim.pwm_value(18), Some(PWM_RANGE));

    assert_eq!(pwm.write(1.01).unwrap_err(), Error::OutOfRange("duty cycle"));
    assert_eq!(pwm.write(-0.1).unwrap_err(), Error::OutOfRange("duty cycle"));
    assert!(pwm.write(f64::NAN).is_err());
    assert_eq!(pwm.duty_cycle(), 1.0);
    assert_eq!(sim.pwm_value(18), Some(PWM_RANGE));

    drop(pwm);
    assert_eq!(sim.pwm_value(18), Some(0));
    assert_eq!(sim.function(18), Function::Input);
    assert!(available_ids().contains(&18));
}

#[test]
fn fan_speed_commands_and_tachometer_feedback() {
    let sim = Arc::new(SimPlatform::default());
    let pwm = Pwm::new(PinHandle::acquire(19, sim.clone()).unwrap()).unwrap();
    let tach = Tachometer::new(PinHandle::acquire(9, sim.clone()).unwrap(), 2).unwrap();
    // 20 Hz with two pulses per revolution is 600 RPM.
    sim.drive_signal(9, SignalSpec::new(20.0, 0.5, 0.0));
    let mut fan = Fan::new(pwm, Some(tach), 1200.0).unwrap();
    assert!(fan.has_tachometer());

    fan.set_speed(300.0).unwrap();
    assert_eq!(sim.pwm_value(19), Some(256));
    assert_eq!(fan.duty_cycle(), 0.25);

    assert_eq!(fan.write(1200.5).unwrap_err(), Error::OutOfRange("fan speed"));
    assert_eq!(fan.write(-1.0).unwrap_err(), Error::OutOfRange("fan speed"));
    assert_eq!(sim.pwm_value(19), Some(256));

    let rpm = fan.read().unwrap();
    assert!((rpm - 600.0).abs() <= 180.0, "rpm {rpm}");

    drop(fan);
    assert!(available_ids().contains(&19));
    assert!(available_ids().contains(&9));
}
