//! Response message types

use serde::{Deserialize, Serialize};

use crate::core::{
    classifier::Category,
    types::{ConnectionState, DeviceAddress, DeviceRecord, SessionId},
};

/// Name reported for devices that never advertised one
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Response messages from server to client
///
/// Untagged, so variants with more fields come first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Response {
    /// Scan started response
    ScanStarted(ScanStartedResponse),

    /// Connect response
    Connect(ConnectResponse),

    /// Device list response
    Devices(DevicesResponse),

    /// Adapter enabled query response
    Enabled(EnabledResponse),

    /// Plain acknowledgment
    Success(SuccessResponse),
}

/// Device as presented to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub address: DeviceAddress,
    pub name: String,
    pub class_code: u32,
    pub category: Category,
    pub paired: bool,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    /// Unix time in milliseconds
    pub last_seen: u64,
}

impl DeviceInfo {
    pub fn from_record(record: &DeviceRecord, connected: bool) -> Self {
        Self {
            id: record.address.to_string(),
            address: record.address,
            name: record
                .display_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
            class_code: record.class_code,
            category: record.category(),
            paired: record.bonded,
            connected,
            rssi: record.rssi,
            last_seen: record.last_seen_ms(),
        }
    }
}

/// Response for is_bluetooth_enabled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnabledResponse {
    pub enabled: bool,
}

/// Acknowledgment for commands without a payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Response for get_paired_devices and get_connected_devices
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceInfo>,
}

/// Response for scan_for_devices
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanStartedResponse {
    pub success: bool,
    pub session: SessionId,
}

impl ScanStartedResponse {
    pub fn ok(session: SessionId) -> Self {
        Self {
            success: true,
            session,
        }
    }
}

/// Response for connect_to_device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectResponse {
    pub success: bool,
    pub state: ConnectionState,
}

impl ConnectResponse {
    pub fn ok(state: ConnectionState) -> Self {
        Self {
            success: true,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::{Duration, UNIX_EPOCH};

    fn record(name: Option<&str>) -> DeviceRecord {
        DeviceRecord {
            address: DeviceAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            display_name: name.map(str::to_string),
            class_code: 1032,
            bonded: true,
            rssi: None,
            last_seen: UNIX_EPOCH + Duration::from_millis(1_700_000_000_000),
        }
    }

    #[test]
    fn test_device_info_serialization() {
        let info = DeviceInfo::from_record(&record(Some("Car Kit")), true);
        let json = serde_json::to_value(&info).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "id": "AA:BB:CC:DD:EE:FF",
                "address": "AA:BB:CC:DD:EE:FF",
                "name": "Car Kit",
                "class_code": 1032,
                "category": "audio",
                "paired": true,
                "connected": true,
                "last_seen": 1_700_000_000_000u64,
            })
        );
    }

    #[test]
    fn test_device_info_unknown_name() {
        let info = DeviceInfo::from_record(&record(None), false);
        assert_eq!(info.name, UNKNOWN_DEVICE_NAME);
        assert!(!info.connected);
    }

    #[test]
    fn test_untagged_responses_keep_their_shape() {
        let session = SessionId::new();
        let json = serde_json::to_string(&Response::ScanStarted(ScanStartedResponse::ok(session)))
            .unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Response::ScanStarted(ScanStartedResponse::ok(session)));

        let json = serde_json::to_string(&Response::Success(SuccessResponse::ok())).unwrap();
        assert_eq!(json, r#"{"success":true}"#);
        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Response::Success(SuccessResponse::ok()));
    }

    #[test]
    fn test_connect_response() {
        let response = ConnectResponse::ok(ConnectionState::Connecting);
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"success":true,"state":"connecting"}"#);
    }

    #[test]
    fn test_enabled_response() {
        let json = serde_json::to_string(&EnabledResponse { enabled: false }).unwrap();
        assert_eq!(json, r#"{"enabled":false}"#);
    }
}
