//! Bluetooth Device Service
//!
//! Manages a local Bluetooth Classic adapter and exposes it to local clients:
//! - adapter power state tracking and control
//! - time-bounded device discovery with classification
//! - RFCOMM stream connections to remote devices
//!
//! Clients talk JSON-RPC 2.0 over a Unix domain socket.

pub mod backend;
pub mod config;
pub mod core;
pub mod protocol;
pub mod transport;

pub use core::{
    classifier::{Category, classify},
    error::{BluetoothError, ServiceError, TransportError},
    permissions::{Capability, PermissionGuard},
    service::{BluetoothService, ServiceConfig},
    types::{AdapterState, ConnectionState, ConnectionStatus, DeviceAddress, DeviceRecord},
};
