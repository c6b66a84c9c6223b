//! Constants used throughout the application
//! This module contains the GATT identifiers that must match the band
//! firmware, plus timeouts and stream defaults.

use uuid::Uuid;

/// The advertised name of the Bioband sensor
pub const BIOBAND_DEVICE_NAME: &str = "Test Device";

/// The advertised name of the single-channel ADC dongle
pub const ADC_DONGLE_NAME: &str = "ADC_DONGLE";

/// Standard Client Characteristic Configuration Descriptor
pub const UUID_CCCD: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// The Bioband sensor service
pub const UUID_BIOBAND_SERVICE: Uuid = Uuid::from_u128(0x75c276c3_8f97_20bc_a143_b354244886d4);

/// The single notify characteristic carrying EMG, PPG, SWEAT and TEST records
pub const UUID_BIOBAND_NOTIFY_CHAR: Uuid = Uuid::from_u128(0xd3d46a35_4394_e9aa_5ae7_921120aad4ed);

/// The ADC dongle service
pub const UUID_ADC_SERVICE: Uuid = Uuid::from_u128(0xfedcba98_7654_3210_fedc_ba9876543210);

/// The ADC dongle notify characteristic (little-endian int16 per notification)
pub const UUID_ADC_NOTIFY_CHAR: Uuid = Uuid::from_u128(0xfedcba98_7654_3210_fedc_ba9876543211);

/// Timeout for a single Bluetooth operation in seconds
pub const BLUETOOTH_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Scan duration in seconds before the scan stops on its own
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 15;

/// Connection attempt timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Number of records accumulated per channel before analysis runs
pub const DEFAULT_BATCH_THRESHOLD: usize = 10;

/// Delimiter used to join buffered records for the analyzer
pub const RECORD_DELIMITER: &str = ",";

/// Name reported for peripherals that advertise no name
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";
