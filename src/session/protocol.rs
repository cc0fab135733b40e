//! # Module Protocol Constants and Types
//!
//! Command ids and payload layouts exchanged with the RF module.

use serde::Deserialize;

use crate::error::{LinkError, Result};

/// Readiness query / response `[ready]`
pub const CMD_READY: u8 = 0x01;

/// Link status query / response `[status]`
pub const CMD_STATUS: u8 = 0x02;

/// Version query / response (see [`ModuleInfo`])
pub const CMD_VERSION: u8 = 0x03;

/// Unsolicited status from the module `[status]`, acked with an empty echo
pub const CMD_STATUS_PUSH: u8 = 0x04;

/// Mode change `[mode]`
pub const CMD_SET_MODE: u8 = 0x05;

/// Pairing configuration blob (see [`PairingConfig`])
pub const CMD_PAIRING_CONFIG: u8 = 0x06;

/// RF test parameters (opaque)
pub const CMD_RF_TEST: u8 = 0x07;

/// Vendor extension (opaque)
pub const CMD_EXTENDED: u8 = 0x08;

/// Channel data heartbeat `[count][i16 LE x count]`
pub const CMD_CHANNEL_DATA: u8 = 0x09;

/// VERSION response size: product id (4) + firmware (2) + hardware (2)
pub const VERSION_PAYLOAD_SIZE: usize = 8;

/// Maximum channels in one CHANNEL_DATA frame
pub const MAX_CHANNELS: usize = 18;

/// Link status mirrored from the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    /// Nothing reported yet
    #[default]
    Unknown,
    HardwareError,
    Pairing,
    Syncing,
    Synced,
    Standby,
    UpdateVariants,
    RfTest,
    HardwareTest,
    /// Value this host does not know, kept verbatim
    Other(u8),
}

impl From<u8> for LinkStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::HardwareError,
            2 => Self::Pairing,
            3 => Self::Syncing,
            4 => Self::Synced,
            5 => Self::Standby,
            6 => Self::UpdateVariants,
            7 => Self::RfTest,
            8 => Self::HardwareTest,
            other => Self::Other(other),
        }
    }
}

impl From<LinkStatus> for u8 {
    fn from(status: LinkStatus) -> Self {
        match status {
            LinkStatus::Unknown => 0,
            LinkStatus::HardwareError => 1,
            LinkStatus::Pairing => 2,
            LinkStatus::Syncing => 3,
            LinkStatus::Synced => 4,
            LinkStatus::Standby => 5,
            LinkStatus::UpdateVariants => 6,
            LinkStatus::RfTest => 7,
            LinkStatus::HardwareTest => 8,
            LinkStatus::Other(value) => value,
        }
    }
}

/// Mode requested with SET_MODE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfMode {
    Normal = 0,
    Pairing = 1,
    RfTest = 2,
    Standby = 3,
}

impl RfMode {
    pub fn payload(self) -> Vec<u8> {
        vec![self as u8]
    }
}

/// Identity reported in the VERSION response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleInfo {
    /// Product id, zero until the module answers
    pub product_id: u32,

    /// Firmware version
    pub firmware_version: u16,

    /// Hardware revision
    pub hardware_version: u16,
}

impl ModuleInfo {
    /// Decode a VERSION response payload
    ///
    /// # Errors
    ///
    /// Returns error if payload is shorter than [`VERSION_PAYLOAD_SIZE`]
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < VERSION_PAYLOAD_SIZE {
            return Err(LinkError::Codec(format!(
                "Version payload too short: {} bytes (expected {})",
                payload.len(),
                VERSION_PAYLOAD_SIZE
            )));
        }

        Ok(Self {
            product_id: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            firmware_version: u16::from_le_bytes([payload[4], payload[5]]),
            hardware_version: u16::from_le_bytes([payload[6], payload[7]]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(VERSION_PAYLOAD_SIZE);
        payload.extend_from_slice(&self.product_id.to_le_bytes());
        payload.extend_from_slice(&self.firmware_version.to_le_bytes());
        payload.extend_from_slice(&self.hardware_version.to_le_bytes());
        payload
    }
}

/// Versioned configuration sent before entering pairing
///
/// Field values are opaque to this crate and passed through as-is.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PairingConfig {
    /// Blob layout version
    #[serde(default = "default_pairing_version")]
    pub version: u8,

    /// Failsafe value per channel
    #[serde(default)]
    pub failsafe: Vec<i16>,

    /// Output port types
    #[serde(default)]
    pub port_types: Vec<u8>,

    /// PWM frequency per output, in Hz
    #[serde(default)]
    pub pwm_frequencies: Vec<u16>,
}

fn default_pairing_version() -> u8 {
    1
}

impl PairingConfig {
    /// Encode as `[version][n][failsafe..][m][port_types..][k][pwm..]`
    ///
    /// # Errors
    ///
    /// Returns error if a list is longer than 255 entries
    pub fn encode(&self) -> Result<Vec<u8>> {
        fn count(name: &str, len: usize) -> Result<u8> {
            u8::try_from(len)
                .map_err(|_| LinkError::Codec(format!("Too many {} entries: {}", name, len)))
        }

        let mut blob = Vec::with_capacity(
            4 + self.failsafe.len() * 2 + self.port_types.len() + self.pwm_frequencies.len() * 2,
        );
        blob.push(self.version);

        blob.push(count("failsafe", self.failsafe.len())?);
        for value in &self.failsafe {
            blob.extend_from_slice(&value.to_le_bytes());
        }

        blob.push(count("port type", self.port_types.len())?);
        blob.extend_from_slice(&self.port_types);

        blob.push(count("PWM frequency", self.pwm_frequencies.len())?);
        for hz in &self.pwm_frequencies {
            blob.extend_from_slice(&hz.to_le_bytes());
        }

        Ok(blob)
    }
}

/// Encode a CHANNEL_DATA payload
///
/// # Errors
///
/// Returns error if more than [`MAX_CHANNELS`] values are given
pub fn encode_channels(channels: &[i16]) -> Result<Vec<u8>> {
    if channels.len() > MAX_CHANNELS {
        return Err(LinkError::Codec(format!(
            "Channel count {} exceeds maximum {}",
            channels.len(),
            MAX_CHANNELS
        )));
    }

    let mut payload = Vec::with_capacity(1 + channels.len() * 2);
    payload.push(channels.len() as u8);
    for value in channels {
        payload.extend_from_slice(&value.to_le_bytes());
    }

    Ok(payload)
}

/// Decode a CHANNEL_DATA payload
///
/// # Errors
///
/// Returns error if the count is too large or the payload is truncated
pub fn decode_channels(payload: &[u8]) -> Result<Vec<i16>> {
    let count = *payload
        .first()
        .ok_or_else(|| LinkError::Codec("Empty channel payload".to_string()))? as usize;

    if count > MAX_CHANNELS {
        return Err(LinkError::Codec(format!(
            "Channel count {} exceeds maximum {}",
            count, MAX_CHANNELS
        )));
    }

    let data = &payload[1..];
    if data.len() < count * 2 {
        return Err(LinkError::Codec(format!(
            "Channel payload too short: {} bytes for {} channels",
            data.len(),
            count
        )));
    }

    Ok(data
        .chunks_exact(2)
        .take(count)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_status_mirrors_raw_value() {
        for raw in 0..=u8::MAX {
            assert_eq!(u8::from(LinkStatus::from(raw)), raw);
        }
        assert_eq!(LinkStatus::from(4), LinkStatus::Synced);
        assert_eq!(LinkStatus::from(42), LinkStatus::Other(42));
        assert_eq!(LinkStatus::default(), LinkStatus::Unknown);
    }

    #[test]
    fn test_mode_payload() {
        assert_eq!(RfMode::Pairing.payload(), vec![1]);
        assert_eq!(RfMode::Standby.payload(), vec![3]);
    }

    #[test]
    fn test_module_info_decode() {
        let payload = [0x78, 0x56, 0x34, 0x12, 0x03, 0x01, 0x02, 0x00];
        let info = ModuleInfo::decode(&payload).unwrap();

        assert_eq!(info.product_id, 0x1234_5678);
        assert_eq!(info.firmware_version, 0x0103);
        assert_eq!(info.hardware_version, 2);
        assert_eq!(info.encode(), payload.to_vec());
    }

    #[test]
    fn test_module_info_too_short() {
        assert!(ModuleInfo::decode(&[0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn test_pairing_blob_layout() {
        let config = PairingConfig {
            version: 2,
            failsafe: vec![-1, 1000],
            port_types: vec![3],
            pwm_frequencies: vec![50, 400],
        };

        assert_eq!(
            config.encode().unwrap(),
            vec![2, 2, 0xFF, 0xFF, 0xE8, 0x03, 1, 3, 2, 50, 0, 0x90, 0x01]
        );
    }

    #[test]
    fn test_pairing_blob_empty_lists() {
        let config = PairingConfig {
            version: 1,
            failsafe: vec![],
            port_types: vec![],
            pwm_frequencies: vec![],
        };
        assert_eq!(config.encode().unwrap(), vec![1, 0, 0, 0]);
    }

    #[test]
    fn test_pairing_blob_too_many_entries() {
        let config = PairingConfig {
            version: 1,
            failsafe: vec![0; 256],
            port_types: vec![],
            pwm_frequencies: vec![],
        };
        assert!(config.encode().is_err());
    }

    #[test]
    fn test_channel_payload() {
        let payload = encode_channels(&[0, -1, 1500]).unwrap();
        assert_eq!(payload, vec![3, 0, 0, 0xFF, 0xFF, 0xDC, 0x05]);
        assert_eq!(decode_channels(&payload).unwrap(), vec![0, -1, 1500]);
    }

    #[test]
    fn test_channel_limits() {
        assert!(encode_channels(&[0; MAX_CHANNELS]).is_ok());
        assert!(encode_channels(&[0; MAX_CHANNELS + 1]).is_err());
        assert!(decode_channels(&[]).is_err());
        assert!(decode_channels(&[2, 0, 0, 0]).is_err());
        assert!(decode_channels(&[19]).is_err());
    }
}
