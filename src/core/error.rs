//! Error types for the Bluetooth device service

use thiserror::Error;

use super::{permissions::Capability, types::DeviceAddress};

/// Result type for Bluetooth backend operations
pub type BluetoothResult<T> = Result<T, BluetoothError>;

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors reported by the Bluetooth backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BluetoothError {
    #[error("No Bluetooth adapter present")]
    NoAdapter,

    #[error("BlueZ error: {0}")]
    Bluez(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),
}

impl From<std::io::Error> for BluetoothError {
    fn from(err: std::io::Error) -> Self {
        BluetoothError::Io(err.to_string())
    }
}

/// Errors related to core service operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Bluetooth not available")]
    Unavailable,

    #[error("Bluetooth {0} permission not granted")]
    PermissionDenied(Capability),

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Bluetooth adapter is off")]
    AdapterOff,

    #[error("Discovery already in progress")]
    AlreadyActive,

    #[error("Connection to {0} already in progress")]
    AlreadyConnecting(DeviceAddress),

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Device {0} is not connected")]
    NotConnected(DeviceAddress),

    #[error("Backend error: {0}")]
    Backend(BluetoothError),
}

impl From<BluetoothError> for ServiceError {
    fn from(err: BluetoothError) -> Self {
        match err {
            BluetoothError::NoAdapter => ServiceError::Unavailable,
            other => ServiceError::Backend(other),
        }
    }
}

/// Errors related to transport layer
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
