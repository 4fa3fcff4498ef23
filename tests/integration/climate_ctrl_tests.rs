//! Climate controller: policy through the fan port, logging, and the
//! start/stop state machine under concurrent use.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hivekeeper::Error;
use hivekeeper::adapters::memory_log::InMemoryClimateLog;
use hivekeeper::adapters::sim::{ClockMode, DhtResponse, SimPlatform, dht_frame};
use hivekeeper::app::ports::{ClimateLog, Platform};
use hivekeeper::climate::ClimateSample;
use hivekeeper::control::climate_ctrl::{ClimateController, LoopState, NamedSensor};
use hivekeeper::drivers::fan::Fan;
use hivekeeper::drivers::gpio::PinHandle;
use hivekeeper::drivers::pwm::{PWM_RANGE, Pwm};
use hivekeeper::sensors::dht::{Dht, DhtKind};
use hivekeeper::timing::TimeProvider;
use pretty_assertions::assert_eq;

use crate::mock_hw::{BrokenLog, RecordingFan, ScriptedSensor};

const MAX_RPM: f64 = 1200.0;
const FAST: Duration = Duration::from_millis(20);

fn sensors(readings: [hivekeeper::Result<ClimateSample>; 2]) -> Vec<NamedSensor> {
    let [interior, exterior] = readings;
    vec![
        NamedSensor::new("interior", ScriptedSensor::new([interior])),
        NamedSensor::new("exterior", ScriptedSensor::new([exterior])),
    ]
}

fn clock() -> TimeProvider {
    TimeProvider::new(Arc::new(SimPlatform::new(ClockMode::Virtual { step_us: 1 })))
}

/// Poll `condition` for up to two seconds.
fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn zero_period_is_rejected() {
    let result =
        ClimateController::new(Vec::new(), RecordingFan::new(MAX_RPM), None, clock(), Duration::ZERO);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn cycle_averages_logs_and_saturates_the_fan() {
    let fan = RecordingFan::new(MAX_RPM);
    let commands = fan.commands();
    let log = Arc::new(InMemoryClimateLog::new());
    let controller = ClimateController::new(
        sensors([Ok(ClimateSample::new(9.0, 60.0)), Ok(ClimateSample::new(7.0, 60.0))]),
        fan,
        Some(log.clone() as Arc<dyn ClimateLog>),
        clock(),
        FAST,
    )
    .unwrap();

    let average = controller.run_cycle().unwrap().unwrap();
    assert_eq!(average, ClimateSample::new(8.0, 60.0));
    assert_eq!(controller.latest_sample(), Some(average));
    assert_eq!(*commands.lock().unwrap(), vec![MAX_RPM]);
    assert_eq!(log.len("interior"), 1);
    assert_eq!(log.len("exterior"), 1);
    let (_, logged) = log.climate_data("interior", 0).unwrap().pop_first().unwrap();
    assert_eq!(logged, ClimateSample::new(9.0, 60.0));
}

#[test]
fn literal_policy_speed_above_max_is_rejected_by_the_fan() {
    let fan = RecordingFan::new(MAX_RPM);
    let commands = fan.commands();
    let controller = ClimateController::new(
        sensors([Ok(ClimateSample::new(6.0, 60.0)), Ok(ClimateSample::new(6.0, 60.0))]),
        fan,
        None,
        clock(),
        FAST,
    )
    .unwrap();

    assert!(controller.run_cycle().unwrap().is_some());
    let commanded = commands.lock().unwrap().clone();
    // (6 - 5) / 7.5 puts the literal formula at 7.5 × max.
    assert_eq!(commanded.len(), 1);
    assert!((commanded[0] - 7.5 * MAX_RPM).abs() < 1e-6, "{commanded:?}");
}

#[test]
fn failed_and_implausible_sensors_are_skipped() {
    let fan = RecordingFan::new(MAX_RPM);
    let commands = fan.commands();
    let log = Arc::new(InMemoryClimateLog::new());
    let controller = ClimateController::new(
        vec![
            NamedSensor::new("interior", ScriptedSensor::constant(ClimateSample::new(4.0, 55.0))),
            NamedSensor::new(
                "exterior",
                ScriptedSensor::new([Err(Error::ReadFailed { attempts: 5 })]),
            ),
            NamedSensor::new("roof", ScriptedSensor::constant(ClimateSample::new(150.0, 50.0))),
        ],
        fan,
        Some(log.clone() as Arc<dyn ClimateLog>),
        clock(),
        FAST,
    )
    .unwrap();

    assert_eq!(controller.run_cycle().unwrap(), Some(ClimateSample::new(4.0, 55.0)));
    assert_eq!(*commands.lock().unwrap(), vec![0.0]);
    assert_eq!(log.len("interior"), 1);
    assert_eq!(log.len("exterior"), 0);
    assert_eq!(log.len("roof"), 0);
}

#[test]
fn no_readings_leaves_the_fan_alone() {
    let fan = RecordingFan::new(MAX_RPM);
    let commands = fan.commands();
    let controller = ClimateController::new(
        sensors([Err(Error::ProtocolTimeout("ack low")), Err(Error::ReadFailed { attempts: 5 })]),
        fan,
        Some(Arc::new(BrokenLog)),
        clock(),
        FAST,
    )
    .unwrap();

    assert_eq!(controller.run_cycle().unwrap(), None);
    assert_eq!(controller.latest_sample(), None);
    assert!(commands.lock().unwrap().is_empty());
}

#[test]
fn log_failures_do_not_stop_the_cycle() {
    let fan = RecordingFan::new(MAX_RPM);
    let commands = fan.commands();
    let controller = ClimateController::new(
        sensors([Ok(ClimateSample::new(4.0, 55.0)), Ok(ClimateSample::new(4.0, 55.0))]),
        fan,
        Some(Arc::new(BrokenLog)),
        clock(),
        FAST,
    )
    .unwrap();

    assert!(controller.run_cycle().unwrap().is_some());
    assert_eq!(*commands.lock().unwrap(), vec![0.0]);
}

#[test]
fn start_stop_state_machine() {
    let fan = RecordingFan::new(MAX_RPM);
    let commands = fan.commands();
    let controller = ClimateController::new(
        sensors([Ok(ClimateSample::new(4.0, 55.0)), Ok(ClimateSample::new(4.0, 55.0))]),
        fan,
        None,
        clock(),
        FAST,
    )
    .unwrap();
    assert_eq!(controller.state(), LoopState::Idle);
    assert!(matches!(controller.stop(), Err(Error::InvalidState(_))));

    controller.start().unwrap();
    assert_eq!(controller.state(), LoopState::Running);
    assert!(matches!(controller.start(), Err(Error::InvalidState(_))));
    assert!(matches!(controller.run_cycle(), Err(Error::InvalidState(_))));

    assert!(eventually(|| commands.lock().unwrap().len() >= 3));
    controller.stop().unwrap();
    assert_eq!(controller.state(), LoopState::Idle);

    let after_stop = commands.lock().unwrap().len();
    std::thread::sleep(FAST * 4);
    assert_eq!(commands.lock().unwrap().len(), after_stop);
    assert_eq!(controller.latest_sample(), Some(ClimateSample::new(4.0, 55.0)));

    // A stopped controller can be started again.
    controller.start().unwrap();
    controller.stop().unwrap();
}

#[test]
fn overlapping_transition_is_busy() {
    let slow = ScriptedSensor::constant(ClimateSample::new(4.0, 55.0))
        .with_delay(Duration::from_millis(300));
    let reads = slow.reads();
    let controller = Arc::new(
        ClimateController::new(
            vec![NamedSensor::new("interior", slow)],
            RecordingFan::new(MAX_RPM),
            None,
            clock(),
            FAST,
        )
        .unwrap(),
    );

    let manual = {
        let controller = Arc::clone(&controller);
        std::thread::spawn(move || controller.run_cycle())
    };
    assert!(eventually(|| reads.load(Ordering::SeqCst) == 1));

    assert_eq!(controller.start().unwrap_err(), Error::Busy);
    assert_eq!(controller.stop().unwrap_err(), Error::Busy);

    assert!(manual.join().unwrap().unwrap().is_some());
    assert_eq!(controller.state(), LoopState::Idle);
    controller.start().unwrap();
    controller.stop().unwrap();
}

#[test]
fn dropping_a_running_controller_stops_the_loop() {
    let sensor = ScriptedSensor::constant(ClimateSample::new(4.0, 55.0));
    let reads = sensor.reads();
    let controller = ClimateController::new(
        vec![NamedSensor::new("interior", sensor)],
        RecordingFan::new(MAX_RPM),
        None,
        clock(),
        FAST,
    )
    .unwrap();

    controller.start().unwrap();
    assert!(eventually(|| reads.load(Ordering::SeqCst) >= 2));
    drop(controller);

    let after_drop = reads.load(Ordering::SeqCst);
    std::thread::sleep(FAST * 4);
    assert_eq!(reads.load(Ordering::SeqCst), after_drop);
}

#[test]
fn full_stack_with_simulated_hardware() {
    let sim = Arc::new(SimPlatform::new(ClockMode::Virtual { step_us: 1 }));
    // 60.0 %RH at 9.0 °C and 7.0 °C.
    sim.attach_dht(16, [DhtResponse::Frame(dht_frame([0x02, 0x58, 0x00, 0x5A]))]);
    sim.attach_dht(17, [DhtResponse::Frame(dht_frame([0x02, 0x58, 0x00, 0x46]))]);

    let interior = Dht::new(DhtKind::Dht22, PinHandle::acquire(16, sim.clone()).unwrap());
    let exterior = Dht::new(DhtKind::Dht22, PinHandle::acquire(17, sim.clone()).unwrap());
    let pwm = Pwm::new(PinHandle::acquire(12, sim.clone()).unwrap()).unwrap();
    let fan = Fan::new(pwm, None, MAX_RPM).unwrap();
    let log = Arc::new(InMemoryClimateLog::new());

    let controller = ClimateController::new(
        vec![NamedSensor::new("interior", interior), NamedSensor::new("exterior", exterior)],
        fan,
        Some(log.clone() as Arc<dyn ClimateLog>),
        TimeProvider::new(sim.clone()),
        Duration::from_secs(300),
    )
    .unwrap();
    assert_eq!(controller.sensor_ids(), vec!["interior", "exterior"]);

    let average = controller.run_cycle().unwrap().unwrap();
    assert!((average.temperature - 8.0).abs() < 1e-9, "{average:?}");
    assert_eq!(sim.pwm_value(12), Some(PWM_RANGE));
    assert_eq!(log.len("interior"), 1);
    assert_eq!(log.len("exterior"), 1);
}

#[test]
fn samples_are_stamped_with_the_provider_wall_clock() {
    let sim = Arc::new(SimPlatform::new(ClockMode::Virtual { step_us: 1 }));
    let time = TimeProvider::new(sim.clone());
    let log = Arc::new(InMemoryClimateLog::new());
    let controller = ClimateController::new(
        sensors([Ok(ClimateSample::new(4.0, 55.0)), Ok(ClimateSample::new(4.0, 55.0))]),
        RecordingFan::new(MAX_RPM),
        Some(log.clone() as Arc<dyn ClimateLog>),
        time.clone(),
        FAST,
    )
    .unwrap();

    let first = time.unix_timestamp();
    controller.run_cycle().unwrap();
    sim.delay_ms(300_000);
    controller.run_cycle().unwrap();

    let stamps: Vec<i64> = log.climate_data("interior", 0).unwrap().into_keys().collect();
    assert_eq!(stamps, vec![first, first + 300]);
}
