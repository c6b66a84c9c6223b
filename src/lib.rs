//! Bioband link library
//! BLE session management and biosignal stream decoding for the sensor band.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;
