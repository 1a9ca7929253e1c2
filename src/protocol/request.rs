//! Request message types

use std::time::Duration;

use serde::{
    Deserialize, Deserializer, Serialize,
    de::{self, DeserializeOwned},
};
use serde_json::Value;

/// Request messages from client to server
///
/// Methods without parameters accept an absent, `null`, `{}` or `[]`
/// `params` member.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Query whether the adapter is on
    IsBluetoothEnabled,

    /// Power the adapter on
    EnableBluetooth,

    /// Power the adapter off
    DisableBluetooth,

    /// List bonded devices
    GetPairedDevices,

    /// Start a discovery session, results arrive as notifications
    ScanForDevices(ScanParams),

    /// Cancel the running discovery session
    CancelScan,

    /// Open a connection to a device
    ConnectToDevice(DeviceParams),

    /// Close the connection to a device
    DisconnectFromDevice(DeviceParams),

    /// List devices with an established connection
    GetConnectedDevices,

    /// Write bytes to a connected device
    SendData(SendDataParams),
}

impl Request {
    /// Method names understood by the service
    pub const METHODS: &'static [&'static str] = &[
        "is_bluetooth_enabled",
        "enable_bluetooth",
        "disable_bluetooth",
        "get_paired_devices",
        "scan_for_devices",
        "cancel_scan",
        "connect_to_device",
        "disconnect_from_device",
        "get_connected_devices",
        "send_data",
    ];

    pub fn is_known_method(method: &str) -> bool {
        Self::METHODS.contains(&method)
    }
}

#[derive(Deserialize)]
struct RawRequest {
    method: String,
    #[serde(default)]
    params: Value,
}

fn is_empty_params(params: &Value) -> bool {
    match params {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn decode_params<T: DeserializeOwned, E: de::Error>(params: Value) -> Result<T, E> {
    serde_json::from_value(params).map_err(E::custom)
}

impl<'de> Deserialize<'de> for Request {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let RawRequest { method, params } = RawRequest::deserialize(deserializer)?;

        let request = match method.as_str() {
            "is_bluetooth_enabled" => Request::IsBluetoothEnabled,
            "enable_bluetooth" => Request::EnableBluetooth,
            "disable_bluetooth" => Request::DisableBluetooth,
            "get_paired_devices" => Request::GetPairedDevices,
            "cancel_scan" => Request::CancelScan,
            "get_connected_devices" => Request::GetConnectedDevices,
            "scan_for_devices" if is_empty_params(&params) => {
                return Ok(Request::ScanForDevices(ScanParams::default()));
            }
            "scan_for_devices" => return decode_params(params).map(Request::ScanForDevices),
            "connect_to_device" => return decode_params(params).map(Request::ConnectToDevice),
            "disconnect_from_device" => {
                return decode_params(params).map(Request::DisconnectFromDevice);
            }
            "send_data" => return decode_params(params).map(Request::SendData),
            other => return Err(de::Error::unknown_variant(other, Self::METHODS)),
        };

        if !is_empty_params(&params) {
            return Err(de::Error::custom(format!("{method} takes no params")));
        }
        Ok(request)
    }
}

/// Parameters for scan_for_devices
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanParams {
    /// Session length in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ScanParams {
    /// Requested session length, `None` when absent or zero
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

/// Parameters addressing a single device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceParams {
    /// Device address (`XX:XX:XX:XX:XX:XX`)
    pub device_id: String,
}

/// Parameters for send_data request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendDataParams {
    pub device_id: String,

    /// Payload, hex-encoded
    pub data: String,
}

impl SendDataParams {
    /// Decode the hex payload
    pub fn decode_data(&self) -> Result<Vec<u8>, String> {
        hex::decode(&self.data).map_err(|e| format!("Invalid hex payload: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_without_params() {
        for (request, method) in [
            (Request::IsBluetoothEnabled, "is_bluetooth_enabled"),
            (Request::EnableBluetooth, "enable_bluetooth"),
            (Request::DisableBluetooth, "disable_bluetooth"),
            (Request::GetPairedDevices, "get_paired_devices"),
            (Request::CancelScan, "cancel_scan"),
            (Request::GetConnectedDevices, "get_connected_devices"),
        ] {
            let json = serde_json::to_string(&request).unwrap();
            assert_eq!(json, format!(r#"{{"method":"{method}"}}"#));
        }
    }

    #[test]
    fn test_request_accepts_empty_params() {
        for params in ["{}", "[]", "null"] {
            let json = format!(r#"{{"method":"is_bluetooth_enabled","params":{params}}}"#);
            let request: Request = serde_json::from_str(&json).unwrap();
            assert_eq!(request, Request::IsBluetoothEnabled);
        }

        let json = r#"{"method":"cancel_scan","params":{"force":true}}"#;
        assert!(serde_json::from_str::<Request>(json).is_err());
    }

    #[test]
    fn test_request_scan_for_devices() {
        let request: Request = serde_json::from_str(r#"{"method":"scan_for_devices"}"#).unwrap();
        assert_eq!(request, Request::ScanForDevices(ScanParams::default()));

        let json = r#"{"method":"scan_for_devices","params":{"timeout_ms":5000}}"#;
        let Request::ScanForDevices(params) = serde_json::from_str(json).unwrap() else {
            panic!("expected scan_for_devices");
        };
        assert_eq!(params.timeout(), Some(Duration::from_secs(5)));

        let json = serde_json::to_string(&Request::ScanForDevices(ScanParams::default())).unwrap();
        assert_eq!(json, r#"{"method":"scan_for_devices","params":{}}"#);
        assert_eq!(ScanParams { timeout_ms: Some(0) }.timeout(), None);
    }

    #[test]
    fn test_request_connect_to_device() {
        let json = r#"{"method":"connect_to_device","params":{"device_id":"AA:BB:CC:DD:EE:FF"}}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            Request::ConnectToDevice(DeviceParams {
                device_id: "AA:BB:CC:DD:EE:FF".to_string()
            })
        );
    }

    #[test]
    fn test_request_missing_params() {
        let json = r#"{"method":"disconnect_from_device"}"#;
        assert!(serde_json::from_str::<Request>(json).is_err());
    }

    #[test]
    fn test_request_unknown_method() {
        let json = r#"{"method":"format_disk"}"#;
        let err = serde_json::from_str::<Request>(json).unwrap_err();
        assert!(err.to_string().contains("format_disk"));
        assert!(!Request::is_known_method("format_disk"));
        assert!(Request::is_known_method("send_data"));
    }

    #[test]
    fn test_send_data_decode() {
        let params = SendDataParams {
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            data: "48656c6C6f".to_string(),
        };
        assert_eq!(params.decode_data().unwrap(), b"Hello");

        let params = SendDataParams {
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            data: "abc".to_string(),
        };
        assert!(params.decode_data().is_err());

        let params = SendDataParams {
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            data: "zz".to_string(),
        };
        assert!(params.decode_data().is_err());
    }
}
