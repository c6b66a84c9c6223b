//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::error::SessionError;

/// Represents a discovered peripheral in the ranked scan list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeripheralRef {
    /// The advertised name of the device, or "Unknown"
    pub name: String,
    /// The address of the device (MAC address on most platforms, platform id on macOS)
    pub address: String,
    /// The signal strength (RSSI) of the most recent observation
    pub signal_strength: i16,
    /// The OS already holds a link to this device
    pub connected: bool,
}

impl PeripheralRef {
    pub fn new(name: String, address: String, signal_strength: i16) -> Self {
        Self {
            name,
            address,
            signal_strength,
            connected: false,
        }
    }
}

/// One advertisement observed by a backend scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
    /// Service UUIDs carried in the advertisement
    pub services: Vec<Uuid>,
    /// Reported from the OS connected-device list rather than advertised
    pub connected: bool,
}

/// Which peripherals a scan reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    /// Exact advertised name to match
    pub name: Option<String>,
    /// Match if any of these services is advertised
    pub services: Vec<Uuid>,
}

impl ScanFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            services: Vec::new(),
        }
    }

    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        if let Some(expected) = &self.name {
            if advertisement.name.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        self.services.is_empty()
            || advertisement
                .services
                .iter()
                .any(|uuid| self.services.contains(uuid))
    }
}

/// Sensor channel a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelTag {
    Emg,
    Ppg,
    Sweat,
    Test,
    RawAdc,
}

impl ChannelTag {
    /// Channels whose frames carry a text prefix on the shared characteristic
    pub const PREFIXED: [ChannelTag; 4] = [
        ChannelTag::Emg,
        ChannelTag::Ppg,
        ChannelTag::Sweat,
        ChannelTag::Test,
    ];

    /// The prefix token including its separator, e.g. `"EMG,"`
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            ChannelTag::Emg => Some("EMG,"),
            ChannelTag::Ppg => Some("PPG,"),
            ChannelTag::Sweat => Some("SWEAT,"),
            ChannelTag::Test => Some("TEST,"),
            ChannelTag::RawAdc => None,
        }
    }

    /// True for channels decoded as fixed-width binary
    pub fn is_binary(&self) -> bool {
        matches!(self, ChannelTag::RawAdc)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelTag::Emg => "emg",
            ChannelTag::Ppg => "ppg",
            ChannelTag::Sweat => "sweat",
            ChannelTag::Test => "test",
            ChannelTag::RawAdc => "raw_adc",
        }
    }
}

impl fmt::Display for ChannelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routed notification payload, consumed immediately by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub channel: ChannelTag,
    pub bytes: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// A decoded value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DecodedSample {
    /// Signed 16-bit ADC reading
    Adc(i16),
    /// One delimited text record, parsed later by the analyzer
    Record(String),
}

impl fmt::Display for DecodedSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedSample::Adc(value) => write!(f, "{}", value),
            DecodedSample::Record(record) => f.write_str(record),
        }
    }
}

/// Identity of one connection attempt. Events carrying another id are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Observable connection state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting(String),
    Connected(String),
    Disconnected(String),
    Error(SessionError),
}

impl ConnectionState {
    pub fn address(&self) -> Option<&str> {
        match self {
            ConnectionState::Connecting(address)
            | ConnectionState::Connected(address)
            | ConnectionState::Disconnected(address) => Some(address),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::Scanning => f.write_str("scanning"),
            ConnectionState::Connecting(address) => write!(f, "connecting to {}", address),
            ConnectionState::Connected(address) => write!(f, "connected to {}", address),
            ConnectionState::Disconnected(address) => write!(f, "disconnected from {}", address),
            ConnectionState::Error(error) => write!(f, "error: {}", error),
        }
    }
}

/// A characteristic as reported by service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

/// A service as reported by service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// The attribute table of a connected peripheral
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattProfile {
    pub services: Vec<ServiceInfo>,
}

impl GattProfile {
    pub fn service(&self, uuid: Uuid) -> Option<&ServiceInfo> {
        self.services.iter().find(|s| s.uuid == uuid)
    }
}

impl ServiceInfo {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}
