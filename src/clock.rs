use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Millisecond time source, wrapping like a microcontroller's `millis()`.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// `true` once at least `interval_ms` have passed since `last_ms`.
///
/// Uses wrapping subtraction so a counter rollover does not stall the gate.
pub fn interval_elapsed(now_ms: u64, last_ms: u64, interval_ms: u64) -> bool {
    now_ms.wrapping_sub(last_ms) >= interval_ms
}

/// Host clock measuring time since construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().wrapping_add(ms));
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
