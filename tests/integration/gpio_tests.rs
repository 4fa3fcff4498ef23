//! Pin registry: exclusive ownership across handles and threads.

use std::sync::{Arc, Barrier};

use hivekeeper::Error;
use hivekeeper::adapters::sim::SimPlatform;
use hivekeeper::app::ports::{Edge, Platform};
use hivekeeper::drivers::gpio::{Function, Level, PinHandle, Resistor, available_ids};

fn platform() -> (Arc<SimPlatform>, Arc<dyn Platform>) {
    let sim = Arc::new(SimPlatform::default());
    let dynamic: Arc<dyn Platform> = sim.clone();
    (sim, dynamic)
}

#[test]
fn claim_write_release_reclaim() {
    let (sim, platform) = platform();

    let mut pin = PinHandle::acquire(4, platform.clone()).unwrap();
    assert!(!available_ids().contains(&4));
    assert!(PinHandle::claim(4, platform.clone()).unwrap().is_none());
    assert_eq!(
        PinHandle::acquire(4, platform.clone()).unwrap_err(),
        Error::ResourceUnavailable(4)
    );

    pin.set_edge_detection(Edge::Rising, Box::new(|| {})).unwrap();
    assert_eq!(sim.edge(4), Edge::Rising);
    pin.set_mode(Function::Output);
    pin.set_resistor(Resistor::PullUp);
    pin.write(Level::High).unwrap();
    assert_eq!(sim.output_level(4), Level::High);
    assert_eq!(sim.resistor(4), Resistor::PullUp);

    drop(pin);
    assert!(available_ids().contains(&4));
    assert_eq!(sim.function(4), Function::Input);
    assert_eq!(sim.resistor(4), Resistor::Off);
    assert_eq!(sim.edge(4), Edge::None);

    // Nothing from the previous owner sticks: the High driven above is gone
    // and no edge callback is armed.
    let again = PinHandle::acquire(4, platform).unwrap();
    assert_eq!(again.function(), Function::Input);
    assert_eq!(again.resistor(), Resistor::Off);
    assert_eq!(again.edge(), Edge::None);
    assert_eq!(again.read().unwrap(), Level::Low);
}

#[test]
fn read_follows_the_backend_and_write_needs_output_mode() {
    let (sim, platform) = platform();
    let mut pin = PinHandle::acquire(5, platform).unwrap();

    sim.set_input(5, 1);
    assert_eq!(pin.read().unwrap(), Level::High);
    sim.set_input(5, 7);
    assert_eq!(pin.read().unwrap(), Level::Invalid);

    assert!(matches!(pin.write(Level::High), Err(Error::InvalidOperation(_))));
    pin.set_mode(Function::Output);
    assert!(matches!(pin.read(), Err(Error::InvalidOperation(_))));
    assert_eq!(
        pin.write(Level::Invalid).unwrap_err(),
        Error::InvalidOperation("cannot drive an invalid level")
    );
    assert_eq!(sim.output_level(5), Level::Low);
}

#[test]
fn out_of_range_ids_are_rejected() {
    let (_sim, platform) = platform();
    assert!(matches!(PinHandle::claim(40, platform.clone()), Err(Error::OutOfRange(_))));
    assert!(matches!(PinHandle::acquire(255, platform), Err(Error::OutOfRange(_))));
}

#[test]
fn concurrent_claims_have_one_winner() {
    const CONTENDERS: usize = 8;
    let (_sim, platform) = platform();
    let barrier = Arc::new(Barrier::new(CONTENDERS));

    let handles: Vec<_> = (0..CONTENDERS)
        .map(|_| {
            let platform = platform.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                PinHandle::claim(6, platform).unwrap()
            })
        })
        .collect();
    let winners: Vec<PinHandle> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id(), 6);
    drop(winners);
    assert!(available_ids().contains(&6));
}

#[test]
fn handle_moves_between_threads() {
    let (sim, platform) = platform();
    let mut pin = PinHandle::acquire(7, platform).unwrap();
    pin.set_mode(Function::Output);

    let pin = std::thread::spawn(move || {
        pin.write(Level::High).unwrap();
        pin
    })
    .join()
    .unwrap();

    assert_eq!(sim.output_level(7), Level::High);
    assert!(!available_ids().contains(&7));
    drop(pin);
    assert!(available_ids().contains(&7));
}

#[test]
fn embedded_hal_traits_drive_the_pin() {
    use embedded_hal::digital::{InputPin, OutputPin};

    let (sim, platform) = platform();
    let mut pin = PinHandle::acquire(8, platform).unwrap();
    sim.set_input(8, 0);
    assert!(pin.is_low().unwrap());

    pin.set_mode(Function::Output);
    pin.set_high().unwrap();
    assert_eq!(sim.output_level(8), Level::High);
    pin.set_low().unwrap();
    assert_eq!(sim.output_level(8), Level::Low);
}
