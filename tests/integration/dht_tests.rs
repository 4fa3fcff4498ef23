//! DHT driver against the simulated one-wire responder.

use std::sync::Arc;

use hivekeeper::Error;
use hivekeeper::adapters::sim::{ClockMode, DhtResponse, SimPlatform, dht_frame};
use hivekeeper::app::ports::{ClimateSensor, Priority};
use hivekeeper::climate::ClimateSample;
use hivekeeper::drivers::gpio::PinHandle;
use hivekeeper::sensors::dht::{Dht, DhtKind, MAX_ATTEMPTS, SAMPLES_PER_READ};

// DHT22 frames: humidity and temperature in tenths, big-endian.
const WARM: [u8; 4] = [0x02, 0x58, 0x00, 0xC8]; // 60.0 %RH, 20.0 °C
const SPIKE: [u8; 4] = [0x02, 0x58, 0x01, 0x5E]; // 60.0 %RH, 35.0 °C

fn sensor(pin: u8, kind: DhtKind, script: Vec<DhtResponse>) -> (Arc<SimPlatform>, Dht) {
    let sim = Arc::new(SimPlatform::new(ClockMode::Virtual { step_us: 1 }));
    sim.attach_dht(pin, script);
    let dht = Dht::new(kind, PinHandle::acquire(pin, sim.clone()).unwrap());
    (sim, dht)
}

fn close(a: ClimateSample, b: ClimateSample) -> bool {
    (a.temperature - b.temperature).abs() < 1e-9 && (a.humidity - b.humidity).abs() < 1e-9
}

#[test]
fn smoothing_discards_an_outlier() {
    let mut script = vec![DhtResponse::Frame(dht_frame(WARM)); SAMPLES_PER_READ];
    script[4] = DhtResponse::Frame(dht_frame(SPIKE));
    let (sim, dht) = sensor(23, DhtKind::Dht22, script);

    let sample = ClimateSensor::read(&dht).unwrap();
    assert!(close(sample, ClimateSample::new(20.0, 60.0)), "{sample:?}");
    assert_eq!(sim.dht_exchanges(23), SAMPLES_PER_READ as u32);
    assert_eq!(sim.current_priority(), Priority::Normal);
}

#[test]
fn checksum_failure_is_retried() {
    let mut corrupt = dht_frame(WARM);
    corrupt[4] ^= 0xFF;
    let (sim, dht) = sensor(
        24,
        DhtKind::Dht22,
        vec![DhtResponse::Frame(corrupt), DhtResponse::Frame(dht_frame(WARM))],
    );

    let sample = dht.read_once().unwrap();
    assert!(close(sample, ClimateSample::new(20.0, 60.0)), "{sample:?}");
    assert_eq!(sim.dht_exchanges(24), 2);
}

#[test]
fn one_dead_sample_fails_the_whole_read() {
    let (sim, dht) = sensor(
        25,
        DhtKind::Dht22,
        vec![DhtResponse::Frame(dht_frame(WARM)), DhtResponse::Silent],
    );

    assert_eq!(dht.read().unwrap_err(), Error::ReadFailed { attempts: MAX_ATTEMPTS });
    assert_eq!(sim.dht_exchanges(25), 1 + MAX_ATTEMPTS);
}

#[test]
fn dht11_reads_integer_fields() {
    let (_sim, dht) = sensor(
        26,
        DhtKind::Dht11,
        vec![DhtResponse::Frame(dht_frame([55, 0, 21, 0]))],
    );
    assert_eq!(dht.kind(), DhtKind::Dht11);
    assert_eq!(dht.read().unwrap(), ClimateSample::new(21.0, 55.0));
}
