//! Hivekeeper: Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                   Adapters (outer ring)                    │
//! │                                                            │
//! │  RpiPlatform     JsonConfigFile   InMemoryClimateLog       │
//! │  (Platform)      (ConfigPort)     (ClimateLog)             │
//! │  ConsolePrompt   NodeService                               │
//! │  (Calibration)   (NodeApi)                                 │
//! │                                                            │
//! │  ──────────────── Port Trait Boundary ───────────────      │
//! │                                                            │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │  PinHandle registry · Dht · Fan · Hx711          │      │
//! │  │  ClimateController (own thread)                  │      │
//! │  └──────────────────────────────────────────────────┘      │
//! └────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use log::{LevelFilter, error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use syslog::{BasicLogger, Facility, Formatter3164};

use hivekeeper::adapters::config_file::JsonConfigFile;
use hivekeeper::adapters::console::ConsolePrompt;
use hivekeeper::adapters::memory_log::InMemoryClimateLog;
use hivekeeper::adapters::rpi::RpiPlatform;
use hivekeeper::app::ports::{ClimateLog, ConfigPort, NodeApi, Platform};
use hivekeeper::app::service::NodeService;
use hivekeeper::config::{NodeConfig, ScaleConfig};
use hivekeeper::control::climate_ctrl::{ClimateController, NamedSensor};
use hivekeeper::drivers::fan::Fan;
use hivekeeper::drivers::gpio::PinHandle;
use hivekeeper::drivers::pwm::Pwm;
use hivekeeper::drivers::tachometer::Tachometer;
use hivekeeper::sensors::dht::Dht;
use hivekeeper::sensors::hx711::Hx711;
use hivekeeper::timing::TimeProvider;

const CONFIG_ENV: &str = "HIVEKEEPER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/hivekeeper.json";
/// Granularity of the shutdown check in the main loop.
const IDLE_TICK: Duration = Duration::from_millis(250);

fn init_log() -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "hivekeeper".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|()| log::set_max_level(LevelFilter::Info))
            .map_err(|e| anyhow!("{e}"))
    })
}

/// Bring up the load cell, calibrating interactively if the config has no
/// stored calibration. A fresh calibration is written back to the config.
fn init_scale(
    platform: &Arc<dyn Platform>,
    scale: &ScaleConfig,
    config: &mut NodeConfig,
    store: &JsonConfigFile,
) -> Result<Hx711> {
    let dout = PinHandle::acquire(scale.dout_pin, Arc::clone(platform))
        .context("scale DOUT pin")?;
    let sck = PinHandle::acquire(scale.sck_pin, Arc::clone(platform)).context("scale SCK pin")?;
    let hx711 = Hx711::new(dout, sck, scale.gain).context("scale init")?;

    if let Some(calibration) = scale.calibration {
        return hx711.with_calibration(calibration).context("stored calibration");
    }

    let calibration = hx711
        .calibrate(&mut ConsolePrompt::stdio())
        .context("scale calibration")?;
    info!("Scale: calibrated {:?}", calibration);
    if let Some(stored) = config.scale.as_mut() {
        stored.calibration = Some(calibration);
    }
    if let Err(e) = store.save(config) {
        warn!("Scale: calibration not persisted: {}", e);
    }
    Ok(hx711)
}

fn main() -> Result<()> {
    // ── 1. Logging ─────────────────────────────────────────────
    init_log()?;
    info!("Hivekeeper v{} starting", env!("CARGO_PKG_VERSION"));

    // ── 2. Config ──────────────────────────────────────────────
    let store = JsonConfigFile::new(
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned()),
    );
    let mut config = store
        .load()
        .with_context(|| format!("loading {}", store.path().display()))?;
    info!("Config loaded from {}", store.path().display());

    // ── 3. Platform ────────────────────────────────────────────
    let platform: Arc<dyn Platform> =
        Arc::new(RpiPlatform::new().context("GPIO backend unavailable")?);

    // ── 4. Climate sensors + fan ───────────────────────────────
    let mut sensors = Vec::with_capacity(config.climate_sensors.len());
    for sensor in &config.climate_sensors {
        let pin = PinHandle::acquire(sensor.pin, Arc::clone(&platform))
            .with_context(|| format!("climate sensor '{}'", sensor.id))?;
        sensors.push(NamedSensor::new(sensor.id.clone(), Dht::new(config.dht_kind, pin)));
    }

    let pwm = Pwm::new(
        PinHandle::acquire(config.fan.pwm_pin, Arc::clone(&platform)).context("fan PWM pin")?,
    )
    .context("fan PWM")?;
    let tachometer = match config.fan.tach_pin {
        Some(pin) => Some(
            Tachometer::new(
                PinHandle::acquire(pin, Arc::clone(&platform)).context("fan tach pin")?,
                config.fan.pulses_per_revolution,
            )
            .context("fan tachometer")?,
        ),
        None => None,
    };
    let fan = Fan::new(pwm, tachometer, config.fan.max_speed_rpm).context("fan")?;

    // ── 5. Climate log + node service ──────────────────────────
    let log: Arc<dyn ClimateLog> = Arc::new(match config.log_retention {
        Some(samples) => InMemoryClimateLog::with_retention(samples),
        None => InMemoryClimateLog::new(),
    });
    let node = NodeService::new(&config.name, config.sensor_ids(), Arc::clone(&log));

    // ── 6. Scale (optional) ────────────────────────────────────
    let scale = match config.scale.clone() {
        Some(scale) => Some(init_scale(&platform, &scale, &mut config, &store)?),
        None => None,
    };

    // ── 7. Control loop ────────────────────────────────────────
    let controller = ClimateController::new(
        sensors,
        fan,
        Some(Arc::clone(&log)),
        TimeProvider::new(Arc::clone(&platform)),
        Duration::from_millis(config.control_period_ms),
    )?;
    controller.start()?;
    info!("'{}' running with sensors {:?}", node.name(), node.climate_sensor_ids());

    // ── 8. Main loop: weigh until a termination signal ─────────
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("installing signal handler")?;
    }

    let scale_period = Duration::from_millis(config.scale_period_ms);
    let mut next_weighing = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        if let Some(scale) = &scale {
            if Instant::now() >= next_weighing {
                match scale.read() {
                    Ok(kg) => info!("Scale: {:.2} kg", kg),
                    Err(e) => error!("Scale: read failed: {}", e),
                }
                next_weighing += scale_period;
            }
        }
        std::thread::sleep(IDLE_TICK);
    }

    info!("Shutdown requested");
    controller.stop()?;
    Ok(())
}
