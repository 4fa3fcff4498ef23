//! Simulated platform backend for host-side testing.
//!
//! Records every pin operation and synthesises the signals the drivers
//! expect to see:
//!
//! | Feature | API | Used by |
//! |---------|-----|---------|
//! | periodic square wave on an input | [`SimPlatform::drive_signal`] | tachometer |
//! | DHT frame played after the host releases the line | [`SimPlatform::attach_dht`] | DHT driver |
//! | HX711 shifting out a raw conversion | [`SimPlatform::attach_hx711`] | HX711 driver |
//!
//! Two clock modes are available. `RealTime` follows `std::time::Instant`
//! and is required for the edge generator threads. `Virtual` advances the
//! clock by a fixed step on every `now_micros` call and by the full amount on
//! every delay, which makes bit-banged protocols deterministic. Its wall
//! clock starts at [`VIRTUAL_EPOCH`] and moves with the virtual clock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::warn;

use crate::app::ports::{
    Edge, EdgeCallback, Function, Level, Platform, Priority, PwmMode, Resistor,
};
use crate::drivers::lock_unpoisoned;
use crate::error::{Error, Result};
use crate::pins::{NUM_PINS, PinId};

/// Unix time (2024-01-01T00:00:00Z) at virtual clock zero.
pub const VIRTUAL_EPOCH: Duration = Duration::from_secs(1_704_067_200);

/// How the simulated clock advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    RealTime,
    Virtual { step_us: u64 },
}

/// Square wave fed to an input pin while edge detection is armed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSpec {
    pub frequency_hz: f64,
    /// Fraction of the period spent high.
    pub duty_cycle: f64,
    /// Delay of the first rising edge, as a fraction of the period.
    pub phase_offset: f64,
}

impl SignalSpec {
    pub const fn new(frequency_hz: f64, duty_cycle: f64, phase_offset: f64) -> Self {
        Self { frequency_hz, duty_cycle, phase_offset }
    }
}

/// What a simulated DHT does after the host releases the data line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtResponse {
    /// Answer with these five bytes (checksum included as given).
    Frame([u8; 5]),
    /// Never answer; the pull-up keeps the line high.
    Silent,
}

/// Build a frame with a correct checksum.
pub fn dht_frame(data: [u8; 4]) -> [u8; 5] {
    let checksum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    [data[0], data[1], data[2], data[3], checksum]
}

// Timing of the simulated DHT answer, in microseconds.
const DHT_RESPONSE_DELAY_US: u64 = 30;
const DHT_ACK_LOW_US: u64 = 80;
const DHT_ACK_HIGH_US: u64 = 80;
const DHT_BIT_LOW_US: u64 = 50;
const DHT_ZERO_HIGH_US: u64 = 27;
const DHT_ONE_HIGH_US: u64 = 70;

/// SCK held high longer than this powers the HX711 down.
const HX711_POWER_DOWN_US: u64 = 60;
/// Power-up selects channel A, gain 128.
const HX711_POWER_UP_PULSES: u32 = 1;

#[derive(Debug, Clone, Copy)]
struct PinState {
    function: Function,
    resistor: Resistor,
    edge: Edge,
    output: Level,
    input_raw: i32,
    pwm_value: Option<u32>,
}

impl Default for PinState {
    fn default() -> Self {
        Self {
            function: Function::Input,
            resistor: Resistor::Off,
            edge: Edge::None,
            output: Level::Low,
            input_raw: 0,
            pwm_value: None,
        }
    }
}

struct DhtResponder {
    script: VecDeque<DhtResponse>,
    last: DhtResponse,
    active: Option<(u64, DhtResponse)>,
    exchanges: u32,
}

impl DhtResponder {
    fn release(&mut self, now: u64) {
        let response = self.script.pop_front().unwrap_or(self.last);
        self.last = response;
        self.active = Some((now, response));
        self.exchanges += 1;
    }

    fn level(&self, now: u64) -> Option<Level> {
        let (t0, response) = self.active?;
        Some(match response {
            DhtResponse::Silent => Level::High,
            DhtResponse::Frame(frame) => dht_wave_level(&frame, now.saturating_sub(t0)),
        })
    }
}

fn dht_wave_level(frame: &[u8; 5], elapsed: u64) -> Level {
    let mut segments = Vec::with_capacity(84);
    segments.push((Level::High, DHT_RESPONSE_DELAY_US));
    segments.push((Level::Low, DHT_ACK_LOW_US));
    segments.push((Level::High, DHT_ACK_HIGH_US));
    for byte in frame {
        for shift in (0..8).rev() {
            let high = if byte >> shift & 1 == 1 { DHT_ONE_HIGH_US } else { DHT_ZERO_HIGH_US };
            segments.push((Level::Low, DHT_BIT_LOW_US));
            segments.push((Level::High, high));
        }
    }
    segments.push((Level::Low, DHT_BIT_LOW_US));

    let mut t = 0;
    for (level, len) in segments {
        t += len;
        if elapsed < t {
            return level;
        }
    }
    Level::High
}

#[derive(Debug)]
struct Hx711Sim {
    dout: PinId,
    sck: PinId,
    raw: i32,
    completed: u32,
    sck_high: bool,
    high_since: u64,
    last_gain_pulses: Option<u32>,
    conversions: u32,
    /// Gain pulses that selected the conversion being shifted out.
    latched: u32,
    /// `(pulses, other_raw)`: `raw` is only measured with `pulses` latched.
    channel: Option<(u32, i32)>,
}

impl Hx711Sim {
    fn on_clock(&mut self, level: Level, now: u64) {
        match level {
            Level::High if !self.sck_high => {
                self.sck_high = true;
                self.high_since = now;
            }
            Level::Low if self.sck_high => {
                self.sck_high = false;
                if now.saturating_sub(self.high_since) <= HX711_POWER_DOWN_US {
                    self.completed += 1;
                } else {
                    self.finish_conversion();
                    self.latched = HX711_POWER_UP_PULSES;
                }
            }
            _ => {}
        }
    }

    fn finish_conversion(&mut self) {
        if self.completed >= 24 {
            self.last_gain_pulses = Some(self.completed - 24);
            self.latched = self.completed - 24;
            self.conversions += 1;
        }
        self.completed = 0;
    }

    fn dout(&mut self, now: u64) -> Level {
        if self.sck_high {
            if now.saturating_sub(self.high_since) > HX711_POWER_DOWN_US || self.completed >= 24 {
                return Level::High;
            }
            return self.bit(self.completed);
        }
        if self.completed >= 24 {
            self.finish_conversion();
        }
        if self.completed == 0 {
            Level::Low
        } else {
            self.bit(self.completed - 1)
        }
    }

    fn measured(&self) -> i32 {
        match self.channel {
            Some((pulses, other_raw)) if pulses != self.latched => other_raw,
            _ => self.raw,
        }
    }

    fn bit(&self, index: u32) -> Level {
        let word = (self.measured() as u32) & 0x00FF_FFFF;
        if word >> (23 - index) & 1 == 1 { Level::High } else { Level::Low }
    }
}

struct SimState {
    pins: [PinState; NUM_PINS],
    pwm_config: Option<(PwmMode, u32, u32)>,
    priorities: Vec<Priority>,
    signals: HashMap<PinId, SignalSpec>,
    dht: HashMap<PinId, DhtResponder>,
    hx711: Vec<Hx711Sim>,
    delay_calls: u64,
    /// Priority held at each `sleep_us` call.
    sleeps: Vec<Priority>,
}

struct EdgeWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// In-memory [`Platform`] with signal synthesis.
pub struct SimPlatform {
    mode: ClockMode,
    origin: Instant,
    virtual_us: AtomicU64,
    state: Mutex<SimState>,
    workers: Mutex<HashMap<PinId, EdgeWorker>>,
    fired: Mutex<HashMap<PinId, Arc<AtomicU64>>>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new(ClockMode::RealTime)
    }
}

impl SimPlatform {
    pub fn new(mode: ClockMode) -> Self {
        Self {
            mode,
            origin: Instant::now(),
            virtual_us: AtomicU64::new(0),
            state: Mutex::new(SimState {
                pins: [PinState::default(); NUM_PINS],
                pwm_config: None,
                priorities: Vec::new(),
                signals: HashMap::new(),
                dht: HashMap::new(),
                hx711: Vec::new(),
                delay_calls: 0,
                sleeps: Vec::new(),
            }),
            workers: Mutex::new(HashMap::new()),
            fired: Mutex::new(HashMap::new()),
        }
    }

    /// Current clock without advancing it.
    pub fn clock_micros(&self) -> u64 {
        match self.mode {
            ClockMode::RealTime => self.origin.elapsed().as_micros() as u64,
            ClockMode::Virtual { .. } => self.virtual_us.load(Ordering::Acquire),
        }
    }

    // ── stimulus ─────────────────────────────────────────────

    /// Raw value an input-mode read of `pin` returns.
    pub fn set_input(&self, pin: PinId, raw: i32) {
        lock_unpoisoned(&self.state).pins[pin as usize].input_raw = raw;
    }

    /// Square wave delivered to `pin` whenever edge detection is armed.
    pub fn drive_signal(&self, pin: PinId, spec: SignalSpec) {
        lock_unpoisoned(&self.state).signals.insert(pin, spec);
    }

    /// Play `script` on `pin`, one response per exchange; the last response
    /// repeats once the script is exhausted.
    pub fn attach_dht(&self, pin: PinId, script: impl IntoIterator<Item = DhtResponse>) {
        let script: VecDeque<_> = script.into_iter().collect();
        let last = script.back().copied().unwrap_or(DhtResponse::Silent);
        lock_unpoisoned(&self.state).dht.insert(
            pin,
            DhtResponder { script, last, active: None, exchanges: 0 },
        );
    }

    /// Number of times the host released a DHT line on `pin`.
    pub fn dht_exchanges(&self, pin: PinId) -> u32 {
        lock_unpoisoned(&self.state).dht.get(&pin).map_or(0, |d| d.exchanges)
    }

    /// Simulate an HX711 on `dout`/`sck` whose every conversion yields `raw`.
    pub fn attach_hx711(&self, dout: PinId, sck: PinId, raw: i32) {
        let mut state = lock_unpoisoned(&self.state);
        state.hx711.retain(|h| h.dout != dout);
        state.hx711.push(Hx711Sim {
            dout,
            sck,
            raw,
            completed: 0,
            sck_high: false,
            high_since: 0,
            last_gain_pulses: None,
            conversions: 0,
            latched: HX711_POWER_UP_PULSES,
            channel: None,
        });
    }

    /// Only conversions selected by `gain_pulses` measure the load; the
    /// rest, including the one after power-up on channel A/128, yield
    /// `other_raw`.
    pub fn select_hx711_channel(&self, dout: PinId, gain_pulses: u32, other_raw: i32) {
        if let Some(hx) = lock_unpoisoned(&self.state).hx711.iter_mut().find(|h| h.dout == dout) {
            hx.channel = Some((gain_pulses, other_raw));
        }
    }

    /// Change the load seen by the HX711 on `dout`.
    pub fn set_hx711_raw(&self, dout: PinId, raw: i32) {
        if let Some(hx) = lock_unpoisoned(&self.state).hx711.iter_mut().find(|h| h.dout == dout) {
            hx.raw = raw;
        }
    }

    /// Extra clock pulses after the last complete 24-bit conversion,
    /// including one still waiting for the next power-up.
    pub fn hx711_gain_pulses(&self, dout: PinId) -> Option<u32> {
        lock_unpoisoned(&self.state)
            .hx711
            .iter()
            .find(|h| h.dout == dout)
            .and_then(|h| {
                if h.completed >= 24 { Some(h.completed - 24) } else { h.last_gain_pulses }
            })
    }

    /// Complete 24-bit conversions shifted out so far.
    pub fn hx711_conversions(&self, dout: PinId) -> u32 {
        lock_unpoisoned(&self.state)
            .hx711
            .iter()
            .find(|h| h.dout == dout)
            .map_or(0, |h| h.conversions + u32::from(h.completed >= 24))
    }

    // ── observation ──────────────────────────────────────────

    pub fn function(&self, pin: PinId) -> Function {
        lock_unpoisoned(&self.state).pins[pin as usize].function
    }

    pub fn resistor(&self, pin: PinId) -> Resistor {
        lock_unpoisoned(&self.state).pins[pin as usize].resistor
    }

    pub fn edge(&self, pin: PinId) -> Edge {
        lock_unpoisoned(&self.state).pins[pin as usize].edge
    }

    /// Last level written to `pin`.
    pub fn output_level(&self, pin: PinId) -> Level {
        lock_unpoisoned(&self.state).pins[pin as usize].output
    }

    pub fn pwm_value(&self, pin: PinId) -> Option<u32> {
        lock_unpoisoned(&self.state).pins[pin as usize].pwm_value
    }

    pub fn pwm_config(&self) -> Option<(PwmMode, u32, u32)> {
        lock_unpoisoned(&self.state).pwm_config
    }

    pub fn priority_history(&self) -> Vec<Priority> {
        lock_unpoisoned(&self.state).priorities.clone()
    }

    pub fn current_priority(&self) -> Priority {
        lock_unpoisoned(&self.state)
            .priorities
            .last()
            .copied()
            .unwrap_or(Priority::Normal)
    }

    /// Number of `delay_ms`/`delay_us` calls so far.
    pub fn delay_calls(&self) -> u64 {
        lock_unpoisoned(&self.state).delay_calls
    }

    /// Priority the caller held at each `sleep_us`, oldest first.
    pub fn sleep_priorities(&self) -> Vec<Priority> {
        lock_unpoisoned(&self.state).sleeps.clone()
    }

    /// Callbacks delivered on `pin` since edge detection was last armed.
    pub fn edges_fired(&self, pin: PinId) -> u64 {
        lock_unpoisoned(&self.fired)
            .get(&pin)
            .map_or(0, |count| count.load(Ordering::Acquire))
    }

    fn advance(&self, us: u64) {
        match self.mode {
            ClockMode::RealTime => std::thread::sleep(Duration::from_micros(us)),
            ClockMode::Virtual { .. } => {
                self.virtual_us.fetch_add(us, Ordering::AcqRel);
            }
        }
    }

    fn stop_worker(&self, pin: PinId) {
        let worker = lock_unpoisoned(&self.workers).remove(&pin);
        if let Some(worker) = worker {
            worker.stop.store(true, Ordering::Release);
            worker.handle.thread().unpark();
            if worker.handle.join().is_err() {
                warn!("Sim: edge generator for pin {} panicked", pin);
            }
        }
    }
}

impl Platform for SimPlatform {
    fn read(&self, pin: PinId) -> i32 {
        let now = self.clock_micros();
        let mut state = lock_unpoisoned(&self.state);
        if state.pins[pin as usize].function == Function::Input {
            if let Some(level) = state.dht.get(&pin).and_then(|d| d.level(now)) {
                return level.raw();
            }
        }
        if let Some(hx) = state.hx711.iter_mut().find(|h| h.dout == pin) {
            return hx.dout(now).raw();
        }
        let pin = &state.pins[pin as usize];
        match pin.function {
            Function::Output => pin.output.raw(),
            _ => pin.input_raw,
        }
    }

    fn write(&self, pin: PinId, level: Level) {
        let now = self.clock_micros();
        let mut state = lock_unpoisoned(&self.state);
        state.pins[pin as usize].output = level;
        if let Some(hx) = state.hx711.iter_mut().find(|h| h.sck == pin) {
            hx.on_clock(level, now);
        }
    }

    fn set_mode(&self, pin: PinId, function: Function) {
        let now = self.clock_micros();
        let mut state = lock_unpoisoned(&self.state);
        let previous = state.pins[pin as usize].function;
        state.pins[pin as usize].function = function;
        if let Some(dht) = state.dht.get_mut(&pin) {
            match function {
                Function::Input if previous == Function::Output => dht.release(now),
                Function::Input => {}
                _ => dht.active = None,
            }
        }
    }

    fn set_resistor(&self, pin: PinId, resistor: Resistor) {
        lock_unpoisoned(&self.state).pins[pin as usize].resistor = resistor;
    }

    fn pwm_write(&self, pin: PinId, value: u32) {
        lock_unpoisoned(&self.state).pins[pin as usize].pwm_value = Some(value);
    }

    fn pwm_configure(&self, mode: PwmMode, range: u32, clock_divisor: u32) {
        lock_unpoisoned(&self.state).pwm_config = Some((mode, range, clock_divisor));
    }

    fn set_edge_interrupt(&self, pin: PinId, edge: Edge, callback: EdgeCallback) -> Result<()> {
        self.stop_worker(pin);
        let signal = {
            let mut state = lock_unpoisoned(&self.state);
            state.pins[pin as usize].edge = edge;
            state.signals.get(&pin).copied()
        };
        let fired = Arc::new(AtomicU64::new(0));
        lock_unpoisoned(&self.fired).insert(pin, Arc::clone(&fired));

        let Some(signal) = signal else {
            return Ok(());
        };
        if self.mode != ClockMode::RealTime {
            return Err(Error::UnsupportedOperation("edge signals need the real-time clock"));
        }
        if signal.frequency_hz.is_nan()
            || signal.frequency_hz <= 0.0
            || !(0.0..=1.0).contains(&signal.duty_cycle)
        {
            return Err(Error::InvalidArgument("bad simulated signal"));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(format!("sim-edge-{pin}"))
            .spawn(move || generate_edges(signal, edge, callback, &worker_stop, &fired))
            .map_err(|_| Error::Platform("edge generator spawn failed"))?;
        lock_unpoisoned(&self.workers).insert(pin, EdgeWorker { stop, handle });
        Ok(())
    }

    fn clear_edge_interrupt(&self, pin: PinId) {
        self.stop_worker(pin);
        lock_unpoisoned(&self.state).pins[pin as usize].edge = Edge::None;
    }

    fn set_priority(&self, priority: Priority) {
        lock_unpoisoned(&self.state).priorities.push(priority);
    }

    fn delay_ms(&self, ms: u64) {
        lock_unpoisoned(&self.state).delay_calls += 1;
        self.advance(ms * 1000);
    }

    fn delay_us(&self, us: u64) {
        lock_unpoisoned(&self.state).delay_calls += 1;
        self.advance(us);
    }

    fn sleep_us(&self, us: u64) {
        {
            let mut state = lock_unpoisoned(&self.state);
            let priority = state.priorities.last().copied().unwrap_or(Priority::Normal);
            state.sleeps.push(priority);
        }
        self.advance(us);
    }

    fn now_micros(&self) -> u64 {
        match self.mode {
            ClockMode::RealTime => self.origin.elapsed().as_micros() as u64,
            ClockMode::Virtual { step_us } => {
                self.virtual_us.fetch_add(step_us, Ordering::AcqRel) + step_us
            }
        }
    }

    fn wall_clock(&self) -> SystemTime {
        match self.mode {
            ClockMode::RealTime => SystemTime::now(),
            ClockMode::Virtual { .. } => {
                UNIX_EPOCH + VIRTUAL_EPOCH + Duration::from_micros(self.clock_micros())
            }
        }
    }
}

impl Drop for SimPlatform {
    fn drop(&mut self) {
        let pins: Vec<PinId> = lock_unpoisoned(&self.workers).keys().copied().collect();
        for pin in pins {
            self.stop_worker(pin);
        }
    }
}

/// Edge generator loop. Deadlines are absolute so the wave does not drift.
fn generate_edges(
    signal: SignalSpec,
    edge: Edge,
    mut callback: EdgeCallback,
    stop: &AtomicBool,
    fired: &AtomicU64,
) {
    let period = Duration::from_secs_f64(1.0 / signal.frequency_hz);
    let high = period.mul_f64(signal.duty_cycle);
    let start = Instant::now() + period.mul_f64(signal.phase_offset);

    for cycle in 0u64.. {
        let rising = start + period.mul_f64(cycle as f64);
        for (at, is_rising) in [(rising, true), (rising + high, false)] {
            if !sleep_until(at, stop) {
                return;
            }
            let wanted = match edge {
                Edge::Both => true,
                Edge::Rising => is_rising,
                Edge::Falling => !is_rising,
                Edge::None => false,
            };
            if wanted {
                callback();
                fired.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

/// Park until `deadline`; `false` if asked to stop first.
fn sleep_until(deadline: Instant, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::park_timeout(deadline - now);
    }
}
