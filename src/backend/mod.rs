//! Bluetooth backend abstraction layer

pub mod bluer_backend;
pub mod bluetooth_backend;
pub mod mock_backend;

pub use bluer_backend::BluerBackend;
pub use bluetooth_backend::{BluetoothBackend, PowerEvents, SightingStream};

#[cfg(test)]
pub use mock_backend::{ConnectBehavior, MockBluetoothBackend};
