//! Raspberry Pi platform backend.
//!
//! | Concern        | Mechanism |
//! |----------------|-----------|
//! | digital I/O    | `rppal::gpio::IoPin` (mode switched in place) |
//! | edge detection | `rppal::gpio::InputPin::set_async_interrupt` |
//! | PWM            | `rppal::pwm::Pwm` on PWM0 (12/18) and PWM1 (13/19) |
//! | priority       | `pthread_setschedparam` (SCHED_FIFO / SCHED_OTHER) |
//!
//! Pin lines are opened lazily and kept open for the life of the backend.
//! Errors from rppal are logged here because the [`Platform`] surface is
//! infallible apart from edge detection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use rppal::gpio::{self, Gpio, InputPin, IoPin, Mode, PullUpDown, Trigger};
use rppal::pwm::{Channel, Polarity, Pwm};

use crate::app::ports::{
    Edge, EdgeCallback, Function, Level, Platform, Priority, PwmMode, Resistor,
};
use crate::drivers::lock_unpoisoned;
use crate::drivers::pwm::PWM_BASE_CLOCK_HZ;
use crate::error::{Error, Result};
use crate::pins::PinId;

/// Below this a `delay_us` spins instead of sleeping.
const SPIN_BELOW_US: u64 = 100;

enum Line {
    Io(IoPin),
    Watched(InputPin),
    Pwm,
}

struct PwmState {
    config: Option<(PwmMode, u32, u32)>,
    channels: HashMap<PinId, Pwm>,
}

pub struct RpiPlatform {
    gpio: Gpio,
    lines: Mutex<HashMap<PinId, Line>>,
    pwm: Mutex<PwmState>,
    origin: Instant,
}

fn pwm_channel(pin: PinId) -> Option<Channel> {
    match pin {
        12 | 18 => Some(Channel::Pwm0),
        13 | 19 => Some(Channel::Pwm1),
        _ => None,
    }
}

impl RpiPlatform {
    /// Open the GPIO peripheral. Fails without access to `/dev/gpiomem`.
    pub fn new() -> core::result::Result<Self, gpio::Error> {
        let gpio = Gpio::new()?;
        info!("RpiPlatform: GPIO opened");
        Ok(Self {
            gpio,
            lines: Mutex::new(HashMap::new()),
            pwm: Mutex::new(PwmState { config: None, channels: HashMap::new() }),
            origin: Instant::now(),
        })
    }

    fn open_io(&self, pin: PinId) -> Option<IoPin> {
        match self.gpio.get(pin) {
            Ok(p) => {
                let mut io = p.into_io(Mode::Input);
                io.set_reset_on_drop(false);
                Some(io)
            }
            Err(e) => {
                error!("RpiPlatform: cannot open pin {}: {}", pin, e);
                None
            }
        }
    }

    /// Run `f` on the pin's I/O line, opening it if needed.
    fn with_io<T>(&self, pin: PinId, f: impl FnOnce(&mut IoPin) -> T) -> Option<T> {
        let mut lines = lock_unpoisoned(&self.lines);
        if !matches!(lines.get(&pin), Some(Line::Io(_))) {
            lines.remove(&pin);
            lock_unpoisoned(&self.pwm).channels.remove(&pin);
            let io = self.open_io(pin)?;
            lines.insert(pin, Line::Io(io));
        }
        match lines.get_mut(&pin) {
            Some(Line::Io(io)) => Some(f(io)),
            _ => None,
        }
    }
}

fn to_rppal(level: Level) -> gpio::Level {
    match level {
        Level::High => gpio::Level::High,
        _ => gpio::Level::Low,
    }
}

fn from_rppal(level: gpio::Level) -> i32 {
    match level {
        gpio::Level::Low => 0,
        gpio::Level::High => 1,
    }
}

impl Platform for RpiPlatform {
    fn read(&self, pin: PinId) -> i32 {
        let lines = lock_unpoisoned(&self.lines);
        match lines.get(&pin) {
            Some(Line::Io(io)) => from_rppal(io.read()),
            Some(Line::Watched(input)) => from_rppal(input.read()),
            Some(Line::Pwm) => -1,
            None => {
                drop(lines);
                self.with_io(pin, |io| from_rppal(io.read())).unwrap_or(-1)
            }
        }
    }

    fn write(&self, pin: PinId, level: Level) {
        self.with_io(pin, |io| io.write(to_rppal(level)));
    }

    fn set_mode(&self, pin: PinId, function: Function) {
        let mode = match function {
            Function::Input => Mode::Input,
            Function::Output => Mode::Output,
            Function::Clock => Mode::Alt0,
            Function::Pwm => {
                // The PWM overlay owns the pin's mux setting from here on.
                lock_unpoisoned(&self.lines).insert(pin, Line::Pwm);
                return;
            }
        };
        self.with_io(pin, |io| io.set_mode(mode));
    }

    fn set_resistor(&self, pin: PinId, resistor: Resistor) {
        let pud = match resistor {
            Resistor::Off => PullUpDown::Off,
            Resistor::PullUp => PullUpDown::PullUp,
            Resistor::PullDown => PullUpDown::PullDown,
        };
        self.with_io(pin, |io| io.set_pullupdown(pud));
    }

    fn pwm_write(&self, pin: PinId, value: u32) {
        let Some(channel) = pwm_channel(pin) else {
            warn!("RpiPlatform: pin {} has no PWM channel", pin);
            return;
        };
        let mut pwm = lock_unpoisoned(&self.pwm);
        let Some((_mode, range, divisor)) = pwm.config else {
            warn!("RpiPlatform: PWM written before configuration");
            return;
        };
        let frequency = f64::from(PWM_BASE_CLOCK_HZ) / f64::from(divisor) / f64::from(range);
        let duty = (f64::from(value) / f64::from(range)).clamp(0.0, 1.0);

        let result = match pwm.channels.get(&pin) {
            Some(existing) => existing.set_frequency(frequency, duty),
            None => Pwm::with_frequency(channel, frequency, duty, Polarity::Normal, true)
                .map(|created| {
                    pwm.channels.insert(pin, created);
                }),
        };
        if let Err(e) = result {
            error!("RpiPlatform: PWM write on pin {} failed: {}", pin, e);
        }
    }

    fn pwm_configure(&self, mode: PwmMode, range: u32, clock_divisor: u32) {
        if mode == PwmMode::Balanced {
            warn!("RpiPlatform: balanced PWM unavailable, using mark:space");
        }
        lock_unpoisoned(&self.pwm).config = Some((mode, range.max(1), clock_divisor.max(1)));
    }

    fn set_edge_interrupt(&self, pin: PinId, edge: Edge, callback: EdgeCallback) -> Result<()> {
        let trigger = match edge {
            Edge::None => Trigger::Disabled,
            Edge::Rising => Trigger::RisingEdge,
            Edge::Falling => Trigger::FallingEdge,
            Edge::Both => Trigger::Both,
        };
        let mut lines = lock_unpoisoned(&self.lines);
        // The I/O handle must be released before the pin can be reopened.
        lines.remove(&pin);
        let mut input = self
            .gpio
            .get(pin)
            .map_err(|_| Error::Platform("cannot open pin for edge detection"))?
            .into_input();
        input.set_reset_on_drop(false);

        let mut callback = callback;
        input
            .set_async_interrupt(trigger, move |_| callback())
            .map_err(|_| Error::Platform("cannot arm edge interrupt"))?;
        lines.insert(pin, Line::Watched(input));
        Ok(())
    }

    fn clear_edge_interrupt(&self, pin: PinId) {
        let mut lines = lock_unpoisoned(&self.lines);
        if let Some(Line::Watched(mut input)) = lines.remove(&pin) {
            if let Err(e) = input.clear_async_interrupt() {
                warn!("RpiPlatform: clearing interrupt on pin {} failed: {}", pin, e);
            }
            drop(input);
            if let Some(io) = self.open_io(pin) {
                lines.insert(pin, Line::Io(io));
            }
        }
    }

    fn set_priority(&self, priority: Priority) {
        let (policy, level) = match priority {
            // SAFETY: querying the priority bounds has no preconditions.
            Priority::RealTime => (libc::SCHED_FIFO, unsafe {
                libc::sched_get_priority_max(libc::SCHED_FIFO)
            }),
            Priority::Normal => (libc::SCHED_OTHER, 0),
        };
        let param = libc::sched_param { sched_priority: level };
        // SAFETY: `param` outlives the call and `pthread_self` is always valid.
        let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), policy, &param) };
        if rc != 0 {
            warn!("RpiPlatform: cannot switch to {:?} priority (errno {})", priority, rc);
        }
    }

    fn delay_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    fn delay_us(&self, us: u64) {
        if us >= SPIN_BELOW_US {
            std::thread::sleep(Duration::from_micros(us));
            return;
        }
        let deadline = Instant::now() + Duration::from_micros(us);
        while Instant::now() < deadline {
            core::hint::spin_loop();
        }
    }

    fn sleep_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }

    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}
