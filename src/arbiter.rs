//! Voltage arbitration.
//!
//! Three authorities compete for the voltage setpoint: a remote Modbus
//! client (through the voltage register pair), an autonomous oscillator and a
//! quadrature encoder on two digital inputs. Each cycle runs a fixed pipeline:
//!
//! 1. remote-write detection (0.01 V deadband),
//! 2. 1000 ms-gated oscillation between the autonomous bounds,
//! 3. encoder edge decoding (±0.1 V per CLK transition),
//! 4. hard clamp into the safety envelope.
//!
//! Later stages see the result of earlier ones, and the clamp always runs
//! last, so whatever the inputs were the committed value lies within
//! [`HARD_MIN`, `HARD_MAX`].

use crate::clock::interval_elapsed;
use crate::codec::{self, WordPair};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const AUTO_MIN: f32 = 22.5;
pub const AUTO_MAX: f32 = 25.5;
pub const HARD_MIN: f32 = 15.0;
pub const HARD_MAX: f32 = 30.0;

/// Differences at or below this are the node's own publish echo, not a client write.
pub const REMOTE_DEADBAND: f32 = 0.01;
// Rounding allowance around the deadband, in units of the current value's ulp
const DEADBAND_ULPS: f32 = 4.0;
pub const OSCILLATION_STEP: f32 = 0.1;
pub const ENCODER_STEP: f32 = 0.1;
pub const OSCILLATION_INTERVAL_MS: u64 = 1000;

/// Logic level of a digital input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Raw digital pin sampling.
pub trait InputPins {
    fn read_level(&mut self, pin: u8) -> Level;
}

impl<P: InputPins + ?Sized> InputPins for &mut P {
    fn read_level(&mut self, pin: u8) -> Level {
        (**self).read_level(pin)
    }
}

/// Pin numbers of the encoder's two quadrature lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderPins {
    pub clk: u8,
    pub dt: u8,
}

impl Default for EncoderPins {
    fn default() -> Self {
        Self { clk: 18, dt: 19 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn sign(self) -> f32 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArbiterState {
    pub voltage: f32,
    pub direction: Direction,
    pub last_oscillation_ms: u64,
    pub last_clk: Level,
}

/// What each pipeline stage did during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArbitrationReport {
    /// Value adopted from the remote register pair.
    pub remote_adopted: Option<f32>,
    pub oscillated: bool,
    /// New oscillation direction if the step hit an autonomous bound.
    pub reversed: Option<Direction>,
    pub encoder_step: Option<Direction>,
    /// Pre-clamp value when the clamp had to correct it.
    pub clamped_from: Option<f32>,
}

impl ArbitrationReport {
    pub fn changed(&self) -> bool {
        self.remote_adopted.is_some()
            || self.oscillated
            || self.encoder_step.is_some()
            || self.clamped_from.is_some()
    }
}

#[derive(Debug)]
pub struct VoltageArbiter {
    state: ArbiterState,
    pins: EncoderPins,
    oscillation_interval_ms: u64,
}

impl VoltageArbiter {
    /// `initial_clk` is the CLK level sampled at startup, so a line that is
    /// already low does not register as an edge on the first cycle.
    pub fn new(initial_voltage: f32, pins: EncoderPins, initial_clk: Level) -> Self {
        Self {
            state: ArbiterState {
                voltage: initial_voltage,
                direction: Direction::Up,
                last_oscillation_ms: 0,
                last_clk: initial_clk,
            },
            pins,
            oscillation_interval_ms: OSCILLATION_INTERVAL_MS,
        }
    }

    pub fn with_oscillation_interval(mut self, interval_ms: u64) -> Self {
        self.oscillation_interval_ms = interval_ms;
        self
    }

    pub fn voltage(&self) -> f32 {
        self.state.voltage
    }

    pub fn state(&self) -> &ArbiterState {
        &self.state
    }

    /// Run the four arbitration stages in order.
    ///
    /// `remote` is the current content of the voltage register pair.
    pub fn arbitrate<P: InputPins>(
        &mut self,
        remote: WordPair,
        now_ms: u64,
        inputs: &mut P,
    ) -> ArbitrationReport {
        let mut report = ArbitrationReport {
            remote_adopted: self.adopt_remote(codec::decode(remote)),
            ..ArbitrationReport::default()
        };

        if let Some(reversed) = self.oscillate(now_ms) {
            report.oscillated = true;
            report.reversed = reversed;
        }

        // DT only matters on a CLK edge
        let clk = inputs.read_level(self.pins.clk);
        if clk != self.state.last_clk {
            let dt = inputs.read_level(self.pins.dt);
            report.encoder_step = self.apply_encoder(clk, dt);
        }

        report.clamped_from = self.clamp();

        debug_assert!(
            (HARD_MIN..=HARD_MAX).contains(&self.state.voltage),
            "voltage {} escaped the hard envelope",
            self.state.voltage
        );

        report
    }

    /// Stage 1: adopt a remote value differing by more than the deadband.
    ///
    /// A client writing exactly `current ± 0.01` is inside the deadband even
    /// though the `f32` difference comes out a few ulps above 0.01, so the
    /// comparison allows for the rounding of both operands. A NaN in the
    /// registers never compares greater and is therefore ignored.
    pub fn adopt_remote(&mut self, observed: f32) -> Option<f32> {
        let slack = DEADBAND_ULPS * f32::EPSILON * self.state.voltage.abs().max(1.0);
        if (observed - self.state.voltage).abs() > REMOTE_DEADBAND + slack {
            self.state.voltage = observed;
            info!("voltage updated by client: {:.2}", observed);
            Some(observed)
        } else {
            None
        }
    }

    /// Stage 2: one oscillation step if the interval elapsed.
    ///
    /// Returns `None` when gated out, `Some(Some(dir))` when the step hit a
    /// bound and the direction flipped to `dir`.
    pub fn oscillate(&mut self, now_ms: u64) -> Option<Option<Direction>> {
        if !interval_elapsed(now_ms, self.state.last_oscillation_ms, self.oscillation_interval_ms) {
            return None;
        }

        self.state.voltage += self.state.direction.sign() * OSCILLATION_STEP;
        self.state.last_oscillation_ms = now_ms;

        let previous = self.state.direction;
        if self.state.voltage >= AUTO_MAX {
            self.state.direction = Direction::Down;
        }
        if self.state.voltage <= AUTO_MIN {
            self.state.direction = Direction::Up;
        }

        if self.state.direction == previous {
            Some(None)
        } else {
            debug!(
                voltage = self.state.voltage,
                direction = ?self.state.direction,
                "oscillation reversed"
            );
            Some(Some(self.state.direction))
        }
    }

    /// Stage 3: quadrature decoding of a CLK sample.
    ///
    /// On a CLK transition, DT differing from the new CLK level means
    /// clockwise (+0.1 V), DT equal to it counter-clockwise (−0.1 V). The
    /// sampled CLK level is stored either way.
    pub fn apply_encoder(&mut self, clk: Level, dt: Level) -> Option<Direction> {
        let edge = clk != self.state.last_clk;
        self.state.last_clk = clk;
        if !edge {
            return None;
        }

        let step = if dt != clk {
            Direction::Up
        } else {
            Direction::Down
        };
        self.state.voltage += step.sign() * ENCODER_STEP;
        debug!(voltage = self.state.voltage, ?step, "encoder step");
        Some(step)
    }

    /// Stage 4: force the value into the hard envelope.
    pub fn clamp(&mut self) -> Option<f32> {
        let before = self.state.voltage;
        // NaN cannot be ordered against the bounds; fall to the low limit
        let after = if before.is_nan() {
            HARD_MIN
        } else {
            before.clamp(HARD_MIN, HARD_MAX)
        };

        if after.to_bits() == before.to_bits() {
            return None;
        }
        self.state.voltage = after;
        debug!(from = before, to = after, "voltage clamped");
        Some(before)
    }
}
