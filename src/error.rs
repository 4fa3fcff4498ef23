//! Unified error type for the hive node.
//!
//! One `Error` enum that every driver returns, so the control loop and the
//! node service handle failures uniformly. All variants are `Copy` so they
//! can be logged and handed across the controller thread without allocation.

use core::fmt;

use crate::pins::PinId;

// ---------------------------------------------------------------------------
// Hardware / driver error
// ---------------------------------------------------------------------------

/// Every fallible hardware operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The pin is already exclusively owned by another handle.
    ResourceUnavailable(PinId),
    /// A numeric argument (pin id, duty cycle, fan speed) is outside its domain.
    OutOfRange(&'static str),
    /// An argument is structurally unacceptable (non-PWM pin, zero divisor).
    InvalidArgument(&'static str),
    /// The operation is not allowed in the pin's current mode.
    InvalidOperation(&'static str),
    /// A bit-level protocol phase did not complete in time.
    ProtocolTimeout(&'static str),
    /// A sensor frame failed its checksum.
    ChecksumMismatch { expected: u8, actual: u8 },
    /// Every retry of a sensor read failed.
    ReadFailed { attempts: u32 },
    /// The device has no means of performing the request (fan without tachometer).
    UnsupportedOperation(&'static str),
    /// A load-cell read was requested before calibration.
    CalibrationRequired,
    /// Controller start/stop issued from the wrong state.
    InvalidState(&'static str),
    /// Another start/stop transition is already in flight.
    Busy,
    /// The platform backend failed (thread spawn, peripheral access).
    Platform(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceUnavailable(pin) => write!(f, "pin {pin} is already claimed"),
            Self::OutOfRange(what) => write!(f, "{what} out of range"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::InvalidOperation(msg) => write!(f, "invalid operation: {msg}"),
            Self::ProtocolTimeout(phase) => write!(f, "protocol timeout during {phase}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch (expected {expected:#04x}, got {actual:#04x})")
            }
            Self::ReadFailed { attempts } => write!(f, "read failed after {attempts} attempts"),
            Self::UnsupportedOperation(msg) => write!(f, "unsupported: {msg}"),
            Self::CalibrationRequired => write!(f, "calibration required"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Busy => write!(f, "another transition is in progress"),
            Self::Platform(msg) => write!(f, "platform: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl embedded_hal::digital::Error for Error {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
