use crate::arbiter::{ArbiterState, ArbitrationReport, InputPins, VoltageArbiter};
use crate::clock::Clock;
use crate::config::{ConfigError, NodeConfig};
use crate::link::LinkError;
use crate::publisher::{Publisher, TraceLine};
use crate::registers::{RegisterBank, RegisterError};
use crate::sampler::{SampleOutcome, SamplerState, TemperatureProbe, TemperatureSampler};
use crate::transport::{ProtocolTransport, ServiceReport, TransportError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("register error: {0}")]
    Register(#[from] RegisterError),
    #[error("network error: {0}")]
    Link(#[from] LinkError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Everything one cycle did, in pipeline order.
#[derive(Debug, Clone, Copy)]
pub struct CycleReport {
    pub service: ServiceReport,
    pub arbitration: ArbitrationReport,
    pub sample: SampleOutcome,
    pub trace: Option<TraceLine>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CycleStats {
    pub cycles: u64,
    pub requests_handled: u64,
    pub remote_adoptions: u64,
    pub encoder_steps: u64,
    pub clamp_corrections: u64,
    pub probe_faults: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub voltage: f32,
    pub temperature: f32,
    pub arbiter: ArbiterState,
    pub sampler: SamplerState,
    pub stats: CycleStats,
}

/// The cycle driver.
///
/// Owns the register bank and every component that touches it. A cycle is
/// a fixed pipeline:
///
/// 1. service queued protocol requests (the only point where clients
///    change the bank),
/// 2. arbitrate the voltage from the voltage pair, oscillator and encoder,
/// 3. sample the temperature probe,
/// 4. publish both values back into the bank.
///
/// Client writes can only land in step 1, so the arbiter always sees a
/// write before the publisher overwrites the pair.
pub struct Node<T, P, I, C> {
    bank: RegisterBank,
    arbiter: VoltageArbiter,
    sampler: TemperatureSampler,
    publisher: Publisher,
    transport: T,
    probe: P,
    inputs: I,
    clock: C,
    stats: CycleStats,
}

impl<T, P, I, C> Node<T, P, I, C>
where
    T: ProtocolTransport,
    P: TemperatureProbe,
    I: InputPins,
    C: Clock,
{
    /// Allocate the register pairs, sample the encoder's resting CLK level
    /// and publish the initial values.
    pub fn new(
        config: &NodeConfig,
        transport: T,
        probe: P,
        mut inputs: I,
        clock: C,
    ) -> Result<Self, NodeError> {
        config.validate()?;

        let voltage_pair = config.registers.voltage_pair();
        let temperature_pair = config.registers.temperature_pair();

        let mut bank = RegisterBank::new();
        bank.allocate_pair(voltage_pair)?;
        bank.allocate_pair(temperature_pair)?;

        let encoder = config.pins.encoder();
        let initial_clk = inputs.read_level(encoder.clk);
        debug!(
            clk = encoder.clk,
            dt = encoder.dt,
            temperature_bus = config.pins.temperature_bus,
            ?initial_clk,
            "input pins configured"
        );

        let arbiter = VoltageArbiter::new(config.initial.voltage, encoder, initial_clk)
            .with_oscillation_interval(config.timing.oscillation_interval_ms);
        let sampler = TemperatureSampler::new(config.initial.temperature)
            .with_interval(config.timing.sample_interval_ms);
        let publisher = Publisher::new(voltage_pair, temperature_pair);

        bank.write_f32(voltage_pair, arbiter.voltage())?;
        bank.write_f32(temperature_pair, sampler.temperature())?;

        info!(
            voltage_register = voltage_pair.high(),
            temperature_register = temperature_pair.high(),
            "Modbus registers initialised"
        );

        Ok(Self {
            bank,
            arbiter,
            sampler,
            publisher,
            transport,
            probe,
            inputs,
            clock,
            stats: CycleStats::default(),
        })
    }

    /// Run one pass of the pipeline.
    pub fn cycle(&mut self) -> Result<CycleReport, NodeError> {
        let service = self.transport.service_requests(&mut self.bank);

        let now_ms = self.clock.now_ms();
        let remote = self.bank.read_pair(self.publisher.voltage_pair())?;
        let arbitration = self.arbiter.arbitrate(remote, now_ms, &mut self.inputs);

        let sample = self.sampler.sample(now_ms, &mut self.probe);

        let trace = self.publisher.publish(
            &mut self.bank,
            self.arbiter.voltage(),
            self.sampler.temperature(),
        )?;

        self.record(&service, &arbitration, sample);

        Ok(CycleReport {
            service,
            arbitration,
            sample,
            trace,
        })
    }

    /// Cycle forever at `period`.
    pub async fn run(&mut self, period: Duration) -> Result<(), NodeError> {
        self.run_until(period, std::future::pending::<()>()).await.map(|_| ())
    }

    /// Cycle at `period` until `shutdown` resolves; returns the number of cycles run.
    ///
    /// Each tick yields to the runtime so connection tasks can queue requests
    /// between cycles.
    pub async fn run_until<F>(&mut self, period: Duration, shutdown: F) -> Result<u64, NodeError>
    where
        F: Future<Output = ()>,
    {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut cycles = 0u64;
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(cycles, "cycle driver stopping");
                    return Ok(cycles);
                }
                _ = interval.tick() => {
                    self.cycle()?;
                    cycles += 1;
                }
            }
        }
    }

    fn record(&mut self, service: &ServiceReport, arbitration: &ArbitrationReport, sample: SampleOutcome) {
        self.stats.cycles = self.stats.cycles.wrapping_add(1);
        self.stats.requests_handled = self.stats.requests_handled.saturating_add(service.handled as u64);
        if arbitration.remote_adopted.is_some() {
            self.stats.remote_adoptions = self.stats.remote_adoptions.saturating_add(1);
        }
        if arbitration.encoder_step.is_some() {
            self.stats.encoder_steps = self.stats.encoder_steps.saturating_add(1);
        }
        if arbitration.clamped_from.is_some() {
            self.stats.clamp_corrections = self.stats.clamp_corrections.saturating_add(1);
        }
        if sample == SampleOutcome::Disconnected {
            self.stats.probe_faults = self.stats.probe_faults.saturating_add(1);
        }
        if service.budget_exhausted {
            debug!(handled = service.handled, "request budget reached, rest deferred");
        }
    }

    pub fn voltage(&self) -> f32 {
        self.arbiter.voltage()
    }

    pub fn temperature(&self) -> f32 {
        self.sampler.temperature()
    }

    pub fn bank(&self) -> &RegisterBank {
        &self.bank
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }

    pub fn inputs_mut(&mut self) -> &mut I {
        &mut self.inputs
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            voltage: self.voltage(),
            temperature: self.temperature(),
            arbiter: *self.arbiter.state(),
            sampler: self.sampler.state().clone(),
            stats: self.stats,
        }
    }
}
