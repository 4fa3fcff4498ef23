//! Load-cell amplifier: calibration flow and failure handling.

use std::sync::Arc;

use hivekeeper::Error;
use hivekeeper::adapters::sim::{ClockMode, SimPlatform};
use hivekeeper::drivers::gpio::{Level, PinHandle};
use hivekeeper::sensors::hx711::{Calibration, Gain, Hx711};

use crate::mock_hw::ScriptedOperator;

fn amplifier(sim: &Arc<SimPlatform>, dout: u8, sck: u8, gain: Gain) -> Hx711 {
    Hx711::new(
        PinHandle::acquire(dout, sim.clone()).unwrap(),
        PinHandle::acquire(sck, sim.clone()).unwrap(),
        gain,
    )
    .unwrap()
}

#[test]
fn calibrate_then_weigh() {
    let sim = Arc::new(SimPlatform::new(ClockMode::Virtual { step_us: 1 }));
    sim.attach_hx711(2, 3, 1_000);
    let hx = amplifier(&sim, 2, 3, Gain::A128);

    let mut operator = ScriptedOperator::new(sim.clone(), 2, 51_000, 2.0);
    let calibration = hx.calibrate(&mut operator).unwrap();
    assert_eq!(calibration.tare, 1_000);
    assert_eq!(calibration.gain, Gain::A128);
    assert!((calibration.kg_per_raw_unit - 2.0 / 50_000.0).abs() < 1e-15);
    assert_eq!(operator.transcript.first().map(String::as_str), Some("Calibrating load cell"));
    assert_eq!(operator.transcript.last().map(String::as_str), Some("Calibration complete"));
    assert_eq!(hx.calibration(), Some(calibration));

    assert!((hx.read().unwrap() - 2.0).abs() < 1e-9);
    sim.set_hx711_raw(2, 26_000);
    assert!((hx.read().unwrap() - 1.0).abs() < 1e-9);
    // The configured gain is re-latched after every conversion.
    assert_eq!(sim.hx711_gain_pulses(2), Some(Gain::A128.pulses()));
    assert_eq!(sim.output_level(3), Level::High);

    assert!(matches!(hx.calibrate(&mut operator), Err(Error::InvalidOperation(_))));
}

#[test]
fn unresponsive_amplifier_times_out_and_powers_down() {
    let sim = Arc::new(SimPlatform::new(ClockMode::Virtual { step_us: 1 }));
    // No chip attached: DOUT floats high, so a conversion is never ready.
    sim.set_input(11, 1);
    let hx = amplifier(&sim, 11, 14, Gain::B32);

    assert_eq!(hx.read_raw_averaged(1).unwrap_err(), Error::ProtocolTimeout("conversion ready"));
    assert_eq!(sim.output_level(14), Level::High);

    let mismatched = Calibration { tare: 0, kg_per_raw_unit: 1e-4, gain: Gain::A128 };
    assert!(matches!(hx.with_calibration(mismatched), Err(Error::InvalidArgument(_))));
}
