// Hand-rolled hardware and transport doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use voltnode::arbiter::{EncoderPins, InputPins, Level};
use voltnode::modbus::{self, Frame, Request};
use voltnode::registers::RegisterBank;
use voltnode::sampler::TemperatureProbe;
use voltnode::transport::{ProtocolTransport, ServiceReport};

/// Encoder lines whose levels the test sets directly.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedPins {
    pub pins: EncoderPins,
    pub clk: Level,
    pub dt: Level,
    pub reads: usize,
}

impl ScriptedPins {
    pub fn new(clk: Level, dt: Level) -> Self {
        Self {
            pins: EncoderPins::default(),
            clk,
            dt,
            reads: 0,
        }
    }

    pub fn set(&mut self, clk: Level, dt: Level) {
        self.clk = clk;
        self.dt = dt;
    }
}

impl InputPins for ScriptedPins {
    fn read_level(&mut self, pin: u8) -> Level {
        self.reads += 1;
        if pin == self.pins.clk {
            self.clk
        } else if pin == self.pins.dt {
            self.dt
        } else {
            Level::High
        }
    }
}

/// Probe replaying a fixed list of readings; repeats the last one when exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    readings: VecDeque<f32>,
    last: f32,
    pub conversions: usize,
}

impl ScriptedProbe {
    pub fn new(readings: &[f32]) -> Self {
        Self {
            readings: readings.iter().copied().collect(),
            last: readings.last().copied().unwrap_or(25.0),
            conversions: 0,
        }
    }

    pub fn push(&mut self, reading: f32) {
        self.readings.push_back(reading);
    }
}

impl TemperatureProbe for ScriptedProbe {
    fn request_conversion(&mut self) {
        self.conversions += 1;
    }

    fn read_last_result(&mut self) -> f32 {
        if let Some(reading) = self.readings.pop_front() {
            self.last = reading;
        }
        self.last
    }
}

/// In-memory transport: frames queued by the test are applied on the next service call.
#[derive(Debug, Default)]
pub struct QueuedTransport {
    inbox: VecDeque<Frame>,
    pub replies: Vec<Frame>,
    next_transaction: u16,
}

impl QueuedTransport {
    pub fn submit(&mut self, request: Request) -> u16 {
        self.next_transaction = self.next_transaction.wrapping_add(1);
        let frame = Frame {
            transaction_id: self.next_transaction,
            unit_id: 1,
            pdu: request.encode().unwrap(),
        };
        self.inbox.push_back(frame);
        self.next_transaction
    }

    pub fn last_reply(&self) -> &Frame {
        self.replies.last().unwrap()
    }
}

impl ProtocolTransport for QueuedTransport {
    fn service_requests(&mut self, bank: &mut RegisterBank) -> ServiceReport {
        let mut report = ServiceReport::default();
        while let Some(frame) = self.inbox.pop_front() {
            let reply = modbus::handle_frame(bank, &frame);
            if reply.pdu[0] & 0x80 != 0 {
                report.exceptions += 1;
            }
            self.replies.push(reply);
            report.handled += 1;
        }
        report
    }
}

pub fn assert_close(actual: f32, expected: f32, tolerance: f32) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected} ± {tolerance}, got {actual}"
    );
}
