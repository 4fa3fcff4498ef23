//! Execution priority for timing-critical sections, and named worker threads.
//!
//! Bit-banged protocols (DHT, HX711) resolve pulses of a few tens of
//! microseconds. On Linux the reading thread is promoted to the real-time
//! scheduling class for exactly the duration of one protocol exchange:
//!
//! ```text
//!   let _rt = PriorityGuard::elevate(platform);   // SCHED_FIFO, max priority
//!   ... shift bits ...
//!   // guard dropped on every exit path         // back to SCHED_OTHER
//! ```

use std::thread::JoinHandle;

use log::info;

use crate::app::ports::{Platform, Priority};
use crate::error::{Error, Result};

/// Holds the calling thread at real-time priority until dropped.
#[must_use = "priority is restored as soon as the guard is dropped"]
pub struct PriorityGuard<'a> {
    platform: &'a dyn Platform,
}

impl<'a> PriorityGuard<'a> {
    pub fn elevate(platform: &'a dyn Platform) -> Self {
        platform.set_priority(Priority::RealTime);
        Self { platform }
    }
}

impl Drop for PriorityGuard<'_> {
    fn drop(&mut self) {
        self.platform.set_priority(Priority::Normal);
    }
}

/// Spawn a named worker thread with an explicit stack size.
pub fn spawn_named<T, F>(name: &'static str, stack_kb: usize, f: F) -> Result<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    info!("Spawning '{}' (stack={}KB)", name, stack_kb);
    std::thread::Builder::new()
        .name(name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
        .map_err(|_| Error::Platform("thread creation failed"))
}
