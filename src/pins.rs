//! GPIO pin assignments for the hive node (BCM numbering).
//!
//! Single source of truth for the default wiring. `NodeConfig` defaults are
//! taken from here; a deployed node can override them in its config file.

/// Index of a general-purpose I/O pin.
pub type PinId = u8;

/// Number of pins the registry manages; valid ids are `0..NUM_PINS`.
pub const NUM_PINS: usize = 40;

/// Pins routed to the hardware PWM channels (PWM0: 12/18, PWM1: 13/19).
pub const PWM_CAPABLE_PINS: [PinId; 4] = [12, 13, 18, 19];

// ---------------------------------------------------------------------------
// Climate sensors (DHT22, single-wire, 10 kΩ pull-up on the board)
// ---------------------------------------------------------------------------

/// DHT inside the hive body.
pub const DHT_INTERIOR_PIN: PinId = 17;
/// DHT under the roof, outside the brood box.
pub const DHT_EXTERIOR_PIN: PinId = 27;

// ---------------------------------------------------------------------------
// Cooling fan (4-wire PC fan through a MOSFET)
// ---------------------------------------------------------------------------

/// PWM output to the fan's control wire.
pub const FAN_PWM_PIN: PinId = 18;
/// Open-collector tachometer input (2 pulses per revolution).
pub const FAN_TACH_PIN: PinId = 23;

// ---------------------------------------------------------------------------
// Load cell amplifier (HX711)
// ---------------------------------------------------------------------------

/// HX711 DOUT (data ready / serial data).
pub const SCALE_DOUT_PIN: PinId = 5;
/// HX711 PD_SCK (clock / power-down).
pub const SCALE_SCK_PIN: PinId = 6;

/// Whether `pin` can drive a hardware PWM channel.
pub fn is_pwm_capable(pin: PinId) -> bool {
    PWM_CAPABLE_PINS.contains(&pin)
}
