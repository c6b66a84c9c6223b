//! Error taxonomy for the session manager and stream pipeline.
//!
//! Session-level errors ([`SessionError`]) are fatal to the live GATT session
//! and surface as [`ConnectionState::Error`](super::types::ConnectionState).
//! Decode and analysis errors are local: the frame or batch is dropped and
//! streaming continues.

use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a [`GattBackend`](super::backend::GattBackend).
///
/// This is the single vocabulary every platform error is normalized into
/// before it reaches the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GattFailure {
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,
    #[error("bluetooth permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found for address {0}")]
    UnknownDevice(String),
    #[error("gatt operation failed: {0}")]
    Status(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,
    #[error("scan permission denied: {0}")]
    PermissionDenied(String),
    #[error("scan rejected: {0}")]
    Rejected(String),
}

impl From<GattFailure> for ScanError {
    fn from(failure: GattFailure) -> Self {
        match failure {
            GattFailure::AdapterUnavailable => ScanError::AdapterUnavailable,
            GattFailure::PermissionDenied(reason) => ScanError::PermissionDenied(reason),
            other => ScanError::Rejected(other.to_string()),
        }
    }
}

/// A GATT attribute the session failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattResource {
    Service(Uuid),
    Characteristic(Uuid),
    Descriptor(Uuid),
}

impl std::fmt::Display for GattResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GattResource::Service(uuid) => write!(f, "service {}", uuid),
            GattResource::Characteristic(uuid) => write!(f, "characteristic {}", uuid),
            GattResource::Descriptor(uuid) => write!(f, "descriptor {}", uuid),
        }
    }
}

/// Errors that end the current session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("{0} not found")]
    Resolution(GattResource),
    /// Authorization is missing; the caller should re-request it rather than retry.
    #[error("permission denied: {0}")]
    Permission(String),
}

impl From<GattFailure> for SessionError {
    fn from(failure: GattFailure) -> Self {
        match failure {
            GattFailure::PermissionDenied(reason) => SessionError::Permission(reason),
            other => SessionError::Connection(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload too short: {0} bytes")]
    TooShort(usize),
    #[error("payload is not valid utf-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("analysis failed: {0}")]
pub struct AnalysisError(pub String);

/// Errors returned by the public session API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("session driver has shut down")]
    Closed,
}
