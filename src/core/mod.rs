//! Core functionality for the sensor band link
//! This module contains the BLE session layer and the stream pipeline.

pub mod bluetooth;
pub mod stream;

// Re-export commonly used types
pub use bluetooth::{BluetoothManager, ChannelTag, ConnectionState, DecodedSample};
pub use stream::{Analysis, Analyzer, ChannelEvent};
