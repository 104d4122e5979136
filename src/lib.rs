//! # Voltage/Temperature Modbus Node
//!
//! An embedded-style monitoring/control node that publishes a controllable
//! voltage and a sensed temperature as IEEE-754 floats over Modbus-TCP, while
//! reconciling three competing authorities over the voltage: a remote
//! client, an autonomous oscillator and a local rotary encoder.
//!
//! ## Features
//!
//! - **Deterministic arbitration**: fixed-order pipeline with a 0.01 V
//!   deadband for client writes and an unconditional 15–30 V safety clamp
//! - **Fault-tolerant sampling**: a disconnected probe never corrupts the
//!   published temperature
//! - **Lossless float registers**: big-endian word order, bit-exact for every
//!   `f32` pattern
//! - **Single-owner register bank**: protocol requests are applied between
//!   cycles, never concurrently with arbitration
//! - **Embedded-friendly**: bounded storage, no allocation in the cycle path
//!
//! ## Quick Start
//!
//! ```rust
//! use voltnode::clock::ManualClock;
//! use voltnode::config::NodeConfig;
//! use voltnode::registers::RegisterBank;
//! use voltnode::sim::{IdlePins, SimulatedProbe};
//! use voltnode::transport::{ProtocolTransport, ServiceReport};
//! use voltnode::Node;
//!
//! struct NoClients;
//!
//! impl ProtocolTransport for NoClients {
//!     fn service_requests(&mut self, _bank: &mut RegisterBank) -> ServiceReport {
//!         ServiceReport::default()
//!     }
//! }
//!
//! let clock = ManualClock::new(0);
//! let mut node = Node::new(
//!     &NodeConfig::default(),
//!     NoClients,
//!     SimulatedProbe::new(25.0),
//!     IdlePins,
//!     clock.clone(),
//! )
//! .unwrap();
//!
//! clock.advance(1000);
//! node.cycle().unwrap();
//! assert!((node.voltage() - 24.1).abs() < 1e-4);
//! ```
//!
//! ## Architecture
//!
//! - [`codec`] - float ↔ register pair conversion
//! - [`registers`] - holding-register bank and register map
//! - [`arbiter`] - voltage arbitration and encoder decoding
//! - [`sampler`] - temperature sampling with fault fallback
//! - [`publisher`] - register publishing and change trace
//! - [`node`] - the cycle driver
//! - [`modbus`], [`transport`], [`client`] - Modbus-TCP protocol, server and client
//! - [`link`] - network association with retry
//! - [`config`] - node configuration
//! - [`sim`] - host stand-ins for the probe and encoder

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]

pub mod arbiter;
pub mod client;
pub mod clock;
pub mod codec;
pub mod config;
pub mod link;
pub mod modbus;
pub mod node;
pub mod publisher;
pub mod registers;
pub mod sampler;
pub mod sim;
pub mod transport;

// Re-export main public types for convenience
pub use arbiter::VoltageArbiter;
pub use config::NodeConfig;
pub use node::{Node, NodeError};
pub use registers::RegisterBank;
pub use sampler::TemperatureSampler;
