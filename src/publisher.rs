use crate::registers::{RegisterBank, RegisterError, RegisterPair};
use arrayvec::ArrayString;
use core::fmt::Write;
use tracing::info;

/// Minimum change that produces a new trace line.
pub const TRACE_THRESHOLD: f32 = 0.01;
const TRACE_LINE_SIZE: usize = 128;

pub type TraceLine = ArrayString<TRACE_LINE_SIZE>;

/// Writes the authoritative values into their register pairs every cycle and
/// traces them when they moved.
#[derive(Debug)]
pub struct Publisher {
    voltage_pair: RegisterPair,
    temperature_pair: RegisterPair,
    // Sentinels far from any real reading so the first publish always traces
    last_traced_voltage: f32,
    last_traced_temperature: f32,
    publish_count: u64,
}

impl Publisher {
    pub fn new(voltage_pair: RegisterPair, temperature_pair: RegisterPair) -> Self {
        Self {
            voltage_pair,
            temperature_pair,
            last_traced_voltage: -1.0,
            last_traced_temperature: -1000.0,
            publish_count: 0,
        }
    }

    pub fn voltage_pair(&self) -> RegisterPair {
        self.voltage_pair
    }

    pub fn temperature_pair(&self) -> RegisterPair {
        self.temperature_pair
    }

    pub fn publish_count(&self) -> u64 {
        self.publish_count
    }

    /// Encode both values into the bank, unconditionally.
    ///
    /// A client may have written the voltage pair since the last cycle; the
    /// arbiter's value overwrites it here. Returns the trace line when either
    /// value moved by more than [`TRACE_THRESHOLD`] since the last trace.
    pub fn publish(
        &mut self,
        bank: &mut RegisterBank,
        voltage: f32,
        temperature: f32,
    ) -> Result<Option<TraceLine>, RegisterError> {
        bank.write_f32(self.voltage_pair, voltage)?;
        bank.write_f32(self.temperature_pair, temperature)?;
        self.publish_count = self.publish_count.wrapping_add(1);

        Ok(self.trace(voltage, temperature))
    }

    fn trace(&mut self, voltage: f32, temperature: f32) -> Option<TraceLine> {
        let voltage_moved = (voltage - self.last_traced_voltage).abs() > TRACE_THRESHOLD;
        let temperature_moved =
            (temperature - self.last_traced_temperature).abs() > TRACE_THRESHOLD;
        if !voltage_moved && !temperature_moved {
            return None;
        }

        self.last_traced_voltage = voltage;
        self.last_traced_temperature = temperature;

        let line = format_trace(voltage, temperature);
        info!("{}", line);
        Some(line)
    }
}

pub fn format_trace(voltage: f32, temperature: f32) -> TraceLine {
    let mut line = TraceLine::new();
    // Capacity covers two full-width f32 renderings; truncate rather than fail
    if write!(line, "Voltage = {voltage:.2} V | Temperature = {temperature:.2} °C").is_err() {
        line.clear();
        let _ = line.try_push_str("Voltage/Temperature trace overflow");
    }
    line
}
