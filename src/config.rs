use crate::arbiter::{EncoderPins, OSCILLATION_INTERVAL_MS};
use crate::link::{Credentials, RetryPolicy, DEFAULT_RETRY_MS, DEFAULT_STATUS_EVERY};
use crate::registers::{RegisterPair, REG_TEMPERATURE, REG_VOLTAGE};
use crate::sampler::SAMPLE_INTERVAL_MS;
use crate::transport::{TransportConfig, DEFAULT_MAX_REQUESTS_PER_CYCLE, DEFAULT_QUEUE_DEPTH};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const MODBUS_TCP_PORT: u16 = 502;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Any subset of the defaults can be overridden from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network: NetworkConfig,
    pub registers: RegisterConfig,
    pub pins: PinConfig,
    pub timing: TimingConfig,
    pub initial: InitialValues,
    pub transport: TransportSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(flatten)]
    pub credentials: Credentials,
    pub bind_address: IpAddr,
    pub port: u16,
    pub association_retry_ms: u64,
    pub association_attempts: Option<u32>,
    pub status_every: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: MODBUS_TCP_PORT,
            association_retry_ms: DEFAULT_RETRY_MS,
            association_attempts: None,
            status_every: DEFAULT_STATUS_EVERY,
        }
    }
}

impl NetworkConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_interval: Duration::from_millis(self.association_retry_ms),
            max_attempts: self.association_attempts,
            status_every: self.status_every,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterConfig {
    pub voltage_address: u16,
    pub temperature_address: u16,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            voltage_address: REG_VOLTAGE,
            temperature_address: REG_TEMPERATURE,
        }
    }
}

impl RegisterConfig {
    pub fn voltage_pair(&self) -> RegisterPair {
        RegisterPair(self.voltage_address)
    }

    pub fn temperature_pair(&self) -> RegisterPair {
        RegisterPair(self.temperature_address)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub encoder_clk: u8,
    pub encoder_dt: u8,
    pub temperature_bus: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        let encoder = EncoderPins::default();
        Self {
            encoder_clk: encoder.clk,
            encoder_dt: encoder.dt,
            temperature_bus: 14,
        }
    }
}

impl PinConfig {
    pub fn encoder(&self) -> EncoderPins {
        EncoderPins {
            clk: self.encoder_clk,
            dt: self.encoder_dt,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub cycle_period_ms: u64,
    pub oscillation_interval_ms: u64,
    pub sample_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cycle_period_ms: 10,
            oscillation_interval_ms: OSCILLATION_INTERVAL_MS,
            sample_interval_ms: SAMPLE_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialValues {
    pub voltage: f32,
    pub temperature: f32,
}

impl Default for InitialValues {
    fn default() -> Self {
        Self {
            voltage: 24.0,
            temperature: 25.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub request_queue_depth: usize,
    pub max_requests_per_cycle: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_queue_depth: DEFAULT_QUEUE_DEPTH,
            max_requests_per_cycle: DEFAULT_MAX_REQUESTS_PER_CYCLE,
        }
    }
}

impl From<TransportSettings> for TransportConfig {
    fn from(settings: TransportSettings) -> Self {
        TransportConfig {
            queue_depth: settings.request_queue_depth,
            max_requests_per_cycle: settings.max_requests_per_cycle,
        }
    }
}

impl NodeConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let voltage = self.registers.voltage_pair();
        let temperature = self.registers.temperature_pair();
        if voltage.overlaps(temperature) {
            return Err(ConfigError::Invalid("voltage and temperature register pairs overlap"));
        }
        if voltage.high() == u16::MAX || temperature.high() == u16::MAX {
            return Err(ConfigError::Invalid("register pair does not fit below address 65535"));
        }
        if self.pins.encoder_clk == self.pins.encoder_dt {
            return Err(ConfigError::Invalid("encoder CLK and DT must be different pins"));
        }
        if self.pins.temperature_bus == self.pins.encoder_clk
            || self.pins.temperature_bus == self.pins.encoder_dt
        {
            return Err(ConfigError::Invalid("temperature bus shares a pin with the encoder"));
        }
        if self.timing.cycle_period_ms == 0
            || self.timing.oscillation_interval_ms == 0
            || self.timing.sample_interval_ms == 0
        {
            return Err(ConfigError::Invalid("timing intervals must be non-zero"));
        }
        if !self.initial.voltage.is_finite() || !self.initial.temperature.is_finite() {
            return Err(ConfigError::Invalid("initial values must be finite"));
        }
        if self.transport.request_queue_depth == 0 || self.transport.max_requests_per_cycle == 0 {
            return Err(ConfigError::Invalid("transport queue sizes must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.port, 502);
        assert_eq!(config.registers.voltage_address, 0);
        assert_eq!(config.registers.temperature_address, 4);
        assert_eq!(config.initial.voltage, 24.0);
        assert_eq!(config.initial.temperature, 25.0);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = NodeConfig::from_json(
            r#"{"network":{"ssid":"plant-floor","password":"secret","port":1502},"timing":{"cycle_period_ms":5}}"#,
        )
        .unwrap();
        assert_eq!(config.network.credentials.ssid, "plant-floor");
        assert_eq!(config.network.port, 1502);
        assert_eq!(config.timing.cycle_period_ms, 5);
        assert_eq!(config.timing.sample_interval_ms, 1000);
        assert_eq!(config.pins.encoder_clk, 18);
    }

    #[test]
    fn test_overlapping_pairs_rejected() {
        let result = NodeConfig::from_json(r#"{"registers":{"voltage_address":4,"temperature_address":5}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_temperature_bus_must_not_share_encoder_pin() {
        let result = NodeConfig::from_json(r#"{"pins":{"temperature_bus":19}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let config = NodeConfig::from_json(r#"{"pins":{"temperature_bus":4}}"#).unwrap();
        assert_eq!(config.pins.temperature_bus, 4);
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let config = NodeConfig::from_json(r#"{"network":{"ssid":"lab","password":"hunter2"}}"#).unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("lab"));
        assert!(!rendered.contains("hunter2"));
    }
}
