//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::codec::{slip, FrameCodec, WireCodec};
use crate::error::{LinkError, Result};
use crate::session::protocol::PairingConfig;
use crate::transport::TransportConfig;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub transport: LinkConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// Pairing blob; pairing is only started when present
    #[serde(default)]
    pub pairing: Option<PairingConfig>,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Largest chunk handed to the transport per read
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

/// Transport and codec configuration
///
/// Bounds left out are taken from the selected codec.
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_transport_name")]
    pub name: String,

    /// `"slip"` or `"length_crc"`
    #[serde(default = "default_codec")]
    pub codec: String,

    #[serde(default)]
    pub ring_capacity: Option<usize>,

    #[serde(default)]
    pub frame_min: Option<usize>,

    #[serde(default)]
    pub frame_max: Option<usize>,

    #[serde(default)]
    pub sync_byte: Option<u8>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Link session timing and addressing
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Probe rounds before bring-up gives up
    #[serde(default = "default_try_cnt")]
    pub try_cnt: u32,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Node id of this host (4 bits)
    #[serde(default = "default_host_address")]
    pub host_address: u8,

    /// Node id of the RF module (4 bits)
    #[serde(default = "default_module_address")]
    pub module_address: u8,
}

/// Frame trace configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write logs to this file (daily rotation)
    #[serde(default)]
    pub file: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_read_chunk() -> usize { 64 }

fn default_transport_name() -> String { "rf".to_string() }
fn default_codec() -> String { "slip".to_string() }
fn default_poll_interval_ms() -> u64 { 5 }

fn default_try_cnt() -> u32 { 10 }
fn default_probe_interval_ms() -> u64 { 1000 }
fn default_ack_timeout_ms() -> u64 { 500 }
fn default_heartbeat_interval_ms() -> u64 { 50 }
fn default_host_address() -> u8 { 0x1 }
fn default_module_address() -> u8 { 0x2 }

fn default_telemetry_enabled() -> bool { false }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_chunk: default_read_chunk(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            name: default_transport_name(),
            codec: default_codec(),
            ring_capacity: None,
            frame_min: None,
            frame_max: None,
            sync_byte: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            try_cnt: default_try_cnt(),
            probe_interval_ms: default_probe_interval_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            host_address: default_host_address(),
            module_address: default_module_address(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LinkConfig {
    /// Build the configured codec
    ///
    /// # Errors
    ///
    /// Returns error if the codec name is unknown, or a sync byte override
    /// is given for a codec whose sync byte is fixed
    pub fn build_codec(&self) -> Result<WireCodec> {
        let codec = WireCodec::from_name(&self.codec).ok_or_else(|| {
            LinkError::Config(toml::de::Error::custom(format!(
                "unknown codec '{}' (expected 'slip' or 'length_crc')",
                self.codec
            )))
        })?;

        match (codec, self.sync_byte) {
            (WireCodec::LengthCrc(inner), Some(sync)) => {
                Ok(WireCodec::LengthCrc(inner.with_sync_byte(sync)))
            }
            (WireCodec::Slip(_), Some(sync)) if sync != slip::END => {
                Err(LinkError::Config(toml::de::Error::custom(format!(
                    "slip codec sync byte is fixed at 0x{:02X}",
                    slip::END
                ))))
            }
            (codec, _) => Ok(codec),
        }
    }

    /// Transport settings for `codec`, with configured overrides applied
    pub fn transport_config<C: FrameCodec>(&self, codec: &C) -> TransportConfig {
        let mut config = TransportConfig::for_codec(self.name.clone(), codec);

        if let Some(ring_capacity) = self.ring_capacity {
            config.ring_capacity = ring_capacity;
        }
        if let Some(frame_min) = self.frame_min {
            config.frame_min = frame_min;
        }
        if let Some(frame_max) = self.frame_max {
            config.frame_max = frame_max;
        }

        config
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rc_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(LinkError::Config(toml::de::Error::custom(
                "serial port cannot be empty",
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(LinkError::Config(toml::de::Error::custom(
                "baud_rate must be greater than 0",
            )));
        }

        if self.serial.read_chunk == 0 || self.serial.read_chunk > 4096 {
            return Err(LinkError::Config(toml::de::Error::custom(
                "read_chunk must be between 1 and 4096",
            )));
        }

        if self.transport.name.is_empty() {
            return Err(LinkError::Config(toml::de::Error::custom(
                "transport name cannot be empty",
            )));
        }

        if self.transport.poll_interval_ms == 0 || self.transport.poll_interval_ms > 1000 {
            return Err(LinkError::Config(toml::de::Error::custom(
                "poll_interval_ms must be between 1 and 1000",
            )));
        }

        // Codec name, sync override and size bounds checked together
        let codec = self.transport.build_codec()?;
        self.transport
            .transport_config(&codec)
            .validate()
            .map_err(|e| LinkError::Config(toml::de::Error::custom(e.to_string())))?;

        if self.session.try_cnt == 0 {
            return Err(LinkError::Config(toml::de::Error::custom(
                "try_cnt must be greater than 0",
            )));
        }

        for (name, value, max) in [
            ("probe_interval_ms", self.session.probe_interval_ms, 60000),
            ("ack_timeout_ms", self.session.ack_timeout_ms, 60000),
            ("heartbeat_interval_ms", self.session.heartbeat_interval_ms, 10000),
        ] {
            if value == 0 || value > max {
                return Err(LinkError::Config(toml::de::Error::custom(format!(
                    "{} must be between 1 and {}",
                    name, max
                ))));
            }
        }

        for (name, value) in [
            ("host_address", self.session.host_address),
            ("module_address", self.session.module_address),
        ] {
            if value > 0x0F {
                return Err(LinkError::Config(toml::de::Error::custom(format!(
                    "{} must be between 0 and 15",
                    name
                ))));
            }
        }

        if self.session.host_address == self.session.module_address {
            return Err(LinkError::Config(toml::de::Error::custom(
                "host_address and module_address must differ",
            )));
        }

        if let Some(pairing) = &self.pairing {
            pairing
                .encode()
                .map_err(|e| LinkError::Config(toml::de::Error::custom(e.to_string())))?;
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(LinkError::Config(toml::de::Error::custom(
                "telemetry log_dir cannot be empty when enabled",
            )));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(LinkError::Config(toml::de::Error::custom(
                "max_records_per_file must be greater than 0",
            )));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(LinkError::Config(toml::de::Error::custom(
                "log level must be one of: trace, debug, info, warn, error",
            )));
        }

        Ok(())
    }
}
