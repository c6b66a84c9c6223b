use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::connection::GattTarget;
use crate::core::bluetooth::constants::{
    ADC_DONGLE_NAME, BIOBAND_DEVICE_NAME, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_SCAN_DURATION_SECS, UUID_ADC_NOTIFY_CHAR, UUID_ADC_SERVICE,
    UUID_BIOBAND_NOTIFY_CHAR, UUID_BIOBAND_SERVICE,
};
use crate::core::bluetooth::types::{ChannelTag, ScanFilter};
use crate::core::stream::FrameRouter;

/// What happens after the link drops on its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconnectPolicy {
    /// Stay disconnected until the caller connects again
    #[default]
    Manual,
    /// Restart scanning with the last filter
    Rescan,
}

/// Peripheral and session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Exact advertised name to scan for. `None` accepts any device.
    pub device_name: Option<String>,
    pub service_uuid: Uuid,
    pub notify_characteristic_uuid: Uuid,
    /// Route everything from the notify characteristic to this channel
    /// instead of by payload prefix
    pub dedicated_channel: Option<ChannelTag>,
    /// Auto-stop for scans. `None` scans until stopped.
    pub scan_timeout_secs: Option<u64>,
    /// Upper bound on a connection attempt. `None` waits for the platform.
    pub connect_timeout_secs: Option<u64>,
    /// Connect to the first device that matches the filter
    pub auto_connect: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::bioband()
    }
}

impl ConnectionConfig {
    /// The sensor band: one characteristic carrying prefixed text records
    pub fn bioband() -> Self {
        ConnectionConfig {
            device_name: Some(BIOBAND_DEVICE_NAME.to_string()),
            service_uuid: UUID_BIOBAND_SERVICE,
            notify_characteristic_uuid: UUID_BIOBAND_NOTIFY_CHAR,
            dedicated_channel: None,
            scan_timeout_secs: Some(DEFAULT_SCAN_DURATION_SECS),
            connect_timeout_secs: Some(DEFAULT_CONNECT_TIMEOUT_SECS),
            auto_connect: false,
            reconnect: ReconnectPolicy::Manual,
        }
    }

    /// The ADC dongle: raw signed 16-bit samples on a dedicated characteristic
    pub fn adc_dongle() -> Self {
        ConnectionConfig {
            device_name: Some(ADC_DONGLE_NAME.to_string()),
            service_uuid: UUID_ADC_SERVICE,
            notify_characteristic_uuid: UUID_ADC_NOTIFY_CHAR,
            dedicated_channel: Some(ChannelTag::RawAdc),
            ..Self::bioband()
        }
    }

    pub fn target(&self) -> GattTarget {
        GattTarget {
            service: self.service_uuid,
            characteristic: self.notify_characteristic_uuid,
        }
    }

    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter {
            name: self.device_name.clone(),
            services: Vec::new(),
        }
    }

    pub fn router(&self) -> FrameRouter {
        match self.dedicated_channel {
            Some(channel) => {
                FrameRouter::new().with_dedicated(self.notify_characteristic_uuid, channel)
            }
            None => FrameRouter::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_target_their_characteristics() {
        let band = ConnectionConfig::bioband();
        assert_eq!(band.target().characteristic, UUID_BIOBAND_NOTIFY_CHAR);
        assert_eq!(band.scan_filter(), ScanFilter::by_name(BIOBAND_DEVICE_NAME));

        let dongle = ConnectionConfig::adc_dongle();
        assert_eq!(dongle.target().service, UUID_ADC_SERVICE);
        assert_eq!(dongle.dedicated_channel, Some(ChannelTag::RawAdc));
        assert_eq!(dongle.scan_timeout_secs, band.scan_timeout_secs);
    }

    #[test]
    fn dongle_router_routes_by_characteristic() {
        let router = ConnectionConfig::adc_dongle().router();
        let frame = router
            .route(UUID_ADC_NOTIFY_CHAR, &[0xFF, 0x7F], chrono::Utc::now())
            .unwrap();
        assert_eq!(frame.channel, ChannelTag::RawAdc);
        assert_eq!(frame.bytes, vec![0xFF, 0x7F]);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{ "auto_connect": true, "reconnect": "Rescan" }"#).unwrap();
        assert!(config.auto_connect);
        assert_eq!(config.reconnect, ReconnectPolicy::Rescan);
        assert_eq!(config.service_uuid, UUID_BIOBAND_SERVICE);
    }
}
