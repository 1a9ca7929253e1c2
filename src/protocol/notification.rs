//! Notification message types (server-to-client events)

use serde::{Deserialize, Serialize};

use crate::{
    core::{
        events::ServiceEvent,
        types::{AdapterStateEvent, ConnectionState, DeviceAddress, FinishReason, SessionId},
    },
    protocol::response::DeviceInfo,
};

/// Server-to-client notifications
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    /// New device seen by the running discovery session
    DeviceFound(DeviceFoundParams),

    /// Adapter power state changed
    BluetoothStateChanged(AdapterStateEvent),

    /// Discovery session ended
    DiscoveryFinished(DiscoveryFinishedParams),

    /// Connection state changed
    ConnectionStateChanged(ConnectionStateChangedParams),

    /// Bytes received from a connected device
    DataReceived(DataReceivedParams),
}

/// Device found notification parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceFoundParams {
    pub session: SessionId,
    #[serde(flatten)]
    pub device: DeviceInfo,
}

/// Discovery finished notification parameters
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiscoveryFinishedParams {
    pub session: SessionId,
    #[serde(flatten)]
    pub reason: FinishReason,
}

/// Connection state change notification parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionStateChangedParams {
    pub device_id: DeviceAddress,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Data received notification parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataReceivedParams {
    pub device_id: DeviceAddress,
    /// Payload, hex-encoded
    pub data: String,
}

impl Notification {
    /// Notification for a service event
    ///
    /// `connected` lists the addresses with an open connection, so a
    /// rediscovered device reports its connection.
    pub fn from_event(event: ServiceEvent, connected: &[DeviceAddress]) -> Self {
        match event {
            ServiceEvent::AdapterStateChanged(state) => Notification::BluetoothStateChanged(state),
            ServiceEvent::DeviceFound { session, device } => {
                Notification::DeviceFound(DeviceFoundParams {
                    session,
                    device: DeviceInfo::from_record(&device, connected.contains(&device.address)),
                })
            }
            ServiceEvent::DiscoveryFinished { session, reason } => {
                Notification::DiscoveryFinished(DiscoveryFinishedParams { session, reason })
            }
            ServiceEvent::ConnectionStateChanged(status) => {
                Notification::ConnectionStateChanged(ConnectionStateChangedParams {
                    device_id: status.address,
                    state: status.state,
                    error: status.failure.map(|failure| failure.to_string()),
                })
            }
            ServiceEvent::DataReceived { address, data } => {
                Notification::DataReceived(DataReceivedParams {
                    device_id: address,
                    data: hex::encode(data),
                })
            }
        }
    }
}
