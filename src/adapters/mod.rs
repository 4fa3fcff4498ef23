//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter       | Implements        | Connects to                 |
//! |---------------|-------------------|-----------------------------|
//! | `sim`         | Platform          | in-memory pins, synthetic signals |
//! | `rpi`         | Platform          | Raspberry Pi GPIO / PWM (feature `rpi`) |
//! | `memory_log`  | ClimateLog        | in-memory time series       |
//! | `config_file` | ConfigPort        | JSON file                   |
//! | `console`     | CalibrationPrompt | stdin / stdout              |

pub mod config_file;
pub mod console;
pub mod memory_log;
#[cfg(feature = "rpi")]
pub mod rpi;
pub mod sim;
