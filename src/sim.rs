use crate::arbiter::{InputPins, Level};
use crate::sampler::{TemperatureProbe, DISCONNECTED_C};
use serde::{Deserialize, Serialize};

/// DS18B20 12-bit resolution in °C.
const PROBE_RESOLUTION_C: f32 = 0.0625;

/// Encoder lines with pull-ups and nothing turning them.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdlePins;

impl InputPins for IdlePins {
    fn read_level(&mut self, _pin: u8) -> Level {
        Level::High
    }
}

/// Drop-out window for fault drills: conversions `start..start + length`
/// of every `period` report the disconnected sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropoutSchedule {
    pub period: u64,
    pub start: u64,
    pub length: u64,
}

impl DropoutSchedule {
    fn covers(&self, conversion: u64) -> bool {
        if self.period == 0 {
            return false;
        }
        let phase = conversion % self.period;
        phase >= self.start && phase < self.start.saturating_add(self.length)
    }
}

/// One-wire probe simulation: a slow sinusoidal drift around `base_c`,
/// quantised like a real DS18B20.
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    base_c: f32,
    amplitude_c: f32,
    period_conversions: u64,
    conversions: u64,
    dropout: Option<DropoutSchedule>,
}

impl SimulatedProbe {
    pub fn new(base_c: f32) -> Self {
        Self {
            base_c,
            amplitude_c: 1.5,
            period_conversions: 600,
            conversions: 0,
            dropout: None,
        }
    }

    pub fn with_drift(mut self, amplitude_c: f32, period_conversions: u64) -> Self {
        self.amplitude_c = amplitude_c;
        self.period_conversions = period_conversions.max(1);
        self
    }

    pub fn with_dropout(mut self, schedule: DropoutSchedule) -> Self {
        self.dropout = Some(schedule);
        self
    }

    pub fn conversions(&self) -> u64 {
        self.conversions
    }
}

impl TemperatureProbe for SimulatedProbe {
    fn request_conversion(&mut self) {
        self.conversions = self.conversions.wrapping_add(1);
    }

    fn read_last_result(&mut self) -> f32 {
        if self.dropout.is_some_and(|d| d.covers(self.conversions)) {
            return DISCONNECTED_C;
        }
        let phase = (self.conversions % self.period_conversions) as f32
            / self.period_conversions as f32
            * core::f32::consts::TAU;
        let celsius = self.base_c + self.amplitude_c * phase.sin();
        (celsius / PROBE_RESOLUTION_C).round() * PROBE_RESOLUTION_C
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_quantises_to_sixteenths() {
        let mut probe = SimulatedProbe::new(25.0).with_drift(1.0, 7);
        for _ in 0..20 {
            probe.request_conversion();
            let reading = probe.read_last_result();
            let steps = reading / PROBE_RESOLUTION_C;
            assert_eq!(steps, steps.round());
            assert!((24.0..=26.0).contains(&reading));
        }
    }

    #[test]
    fn test_dropout_window() {
        let mut probe = SimulatedProbe::new(25.0).with_dropout(DropoutSchedule {
            period: 10,
            start: 3,
            length: 2,
        });
        let readings: Vec<bool> = (0..10)
            .map(|_| {
                probe.request_conversion();
                probe.read_last_result() == DISCONNECTED_C
            })
            .collect();
        // Conversions are numbered from 1 after the first request
        assert_eq!(
            readings,
            vec![false, false, true, true, false, false, false, false, false, false]
        );
    }
}
