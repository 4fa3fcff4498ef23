//! Pin registry, actuator drivers and execution-priority helpers.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod fan;
pub mod gpio;
pub mod priority;
pub mod pwm;
pub mod tachometer;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every mutex in the drivers guards hardware state that stays consistent
/// across a panic (a pin handle, a bitmap bit), so poisoning is ignored.
pub(crate) fn lock_unpoisoned<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
