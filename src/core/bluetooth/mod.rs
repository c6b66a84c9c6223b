//! Bluetooth functionality for the sensor band
//! This module handles all bluetooth operations including scanning,
//! connecting, and receiving data from the band.

pub mod backend;
pub mod bluest_backend;
pub mod connection;
pub mod constants;
pub mod error;
mod manager;
pub mod notification;
pub mod scanner;
pub mod types;

// Re-export types that should be publicly accessible
pub use backend::{AdvertisementStream, GattBackend, NotificationStream};
pub use bluest_backend::BluestBackend;
pub use connection::{ConnectionStateMachine, GattEvent, GattRequest, GattTarget};
pub use constants::*; // Re-export all constants
pub use error::{
    AnalysisError, BleError, DecodeError, GattFailure, GattResource, ScanError, SessionError,
};
pub use manager::BluetoothManager;
pub use notification::{NotificationHandler, PipelineStats};
pub use scanner::{BluetoothScanner, ScanState};
pub use types::{
    Advertisement, ChannelTag, CharacteristicInfo, ConnectionState, DecodedSample, GattProfile,
    PeripheralRef, RawFrame, ScanFilter, ServiceInfo, SessionId,
};
