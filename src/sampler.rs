use crate::clock::interval_elapsed;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Reading reported by a one-wire probe that did not answer.
pub const DISCONNECTED_C: f32 = -127.0;
pub const SAMPLE_INTERVAL_MS: u64 = 1000;

/// Temperature sensor bus.
pub trait TemperatureProbe {
    /// Start a conversion on the bus.
    fn request_conversion(&mut self);
    /// Result of the last conversion in °C, or [`DISCONNECTED_C`].
    fn read_last_result(&mut self) -> f32;
}

impl<P: TemperatureProbe + ?Sized> TemperatureProbe for &mut P {
    fn request_conversion(&mut self) {
        (**self).request_conversion();
    }

    fn read_last_result(&mut self) -> f32 {
        (**self).read_last_result()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SampleOutcome {
    /// Interval not yet elapsed, bus untouched.
    Skipped,
    Updated(f32),
    /// Probe reported the sentinel; the last good value was kept.
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerState {
    pub temperature: f32,
    pub last_sample_ms: u64,
    pub consecutive_faults: u32,
    pub total_faults: u32,
}

#[derive(Debug)]
pub struct TemperatureSampler {
    state: SamplerState,
    interval_ms: u64,
}

impl TemperatureSampler {
    pub fn new(initial_temperature: f32) -> Self {
        Self {
            state: SamplerState {
                temperature: initial_temperature,
                last_sample_ms: 0,
                consecutive_faults: 0,
                total_faults: 0,
            },
            interval_ms: SAMPLE_INTERVAL_MS,
        }
    }

    pub fn with_interval(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn temperature(&self) -> f32 {
        self.state.temperature
    }

    pub fn state(&self) -> &SamplerState {
        &self.state
    }

    /// Convert and read once per interval, keeping the last good value when
    /// the probe is disconnected. The sample time is recorded on failure too,
    /// so a dead probe is retried at the normal cadence.
    pub fn sample<P: TemperatureProbe>(&mut self, now_ms: u64, probe: &mut P) -> SampleOutcome {
        if !interval_elapsed(now_ms, self.state.last_sample_ms, self.interval_ms) {
            return SampleOutcome::Skipped;
        }

        probe.request_conversion();
        let reading = probe.read_last_result();
        self.state.last_sample_ms = now_ms;

        // Exact compare: the driver returns the sentinel verbatim
        #[allow(clippy::float_cmp)]
        let disconnected = reading == DISCONNECTED_C;

        if disconnected {
            self.state.consecutive_faults = self.state.consecutive_faults.saturating_add(1);
            self.state.total_faults = self.state.total_faults.saturating_add(1);
            warn!(
                consecutive = self.state.consecutive_faults,
                kept = self.state.temperature,
                "temperature probe disconnected"
            );
            return SampleOutcome::Disconnected;
        }

        if self.state.consecutive_faults > 0 {
            debug!(
                after = self.state.consecutive_faults,
                "temperature probe recovered"
            );
        }
        self.state.consecutive_faults = 0;
        self.state.temperature = reading;
        SampleOutcome::Updated(reading)
    }
}
