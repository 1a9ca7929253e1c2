//! JSON-RPC 2.0 message envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    core::error::ServiceError,
    protocol::{notification::Notification, request::Request, response::Response},
};

/// JSON-RPC 2.0 request wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub request: Request,
    pub id: RequestId,
}

/// JSON-RPC 2.0 response wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// `null` when the request id could not be determined
    pub id: Option<RequestId>,
}

/// JSON-RPC 2.0 notification wrapper
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub notification: Notification,
}

/// Request ID (number or string)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC error codes
impl JsonRpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Custom error codes
    pub const UNAVAILABLE: i32 = -32001;
    pub const PERMISSION_DENIED: i32 = -32002;
    pub const INVALID_ADDRESS: i32 = -32003;
    pub const ADAPTER_OFF: i32 = -32004;
    pub const ALREADY_ACTIVE: i32 = -32005;
    pub const TIMEOUT: i32 = -32006;
    pub const CONNECT_FAILED: i32 = -32007;
    pub const BACKEND_ERROR: i32 = -32008;

    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(Self::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }
}

impl From<&ServiceError> for JsonRpcError {
    fn from(err: &ServiceError) -> Self {
        let code = match err {
            ServiceError::Unavailable => Self::UNAVAILABLE,
            ServiceError::PermissionDenied(_) => Self::PERMISSION_DENIED,
            ServiceError::InvalidAddress(_) => Self::INVALID_ADDRESS,
            ServiceError::AdapterOff => Self::ADAPTER_OFF,
            ServiceError::AlreadyActive | ServiceError::AlreadyConnecting(_) => {
                Self::ALREADY_ACTIVE
            }
            ServiceError::Timeout => Self::TIMEOUT,
            ServiceError::ConnectFailed(_) | ServiceError::NotConnected(_) => {
                Self::CONNECT_FAILED
            }
            ServiceError::Backend(_) => Self::BACKEND_ERROR,
        };

        let mut error = Self::new(code, err.to_string());
        if let ServiceError::PermissionDenied(capability) = err {
            error.data = Some(serde_json::json!({ "capability": capability }));
        }
        error
    }
}

impl JsonRpcRequest {
    pub fn new(request: Request, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            request,
            id,
        }
    }
}

impl JsonRpcResponse {
    pub fn success(result: Response, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    pub fn error(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id: Some(id),
        }
    }

    /// Error reply to a message whose id may be unknown
    pub fn failure(error: JsonRpcError, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

impl JsonRpcNotification {
    pub fn new(notification: Notification) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            notification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            permissions::Capability,
            types::{AdapterState, DeviceAddress, SessionId},
        },
        protocol::{
            request::ScanParams,
            response::{ScanStartedResponse, SuccessResponse},
        },
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn test_jsonrpc_request_serialization() {
        let request = JsonRpcRequest::new(Request::ScanForDevices(ScanParams::default()), RequestId::Number(1));
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""method":"scan_for_devices""#));
        assert!(json.contains(r#""id":1"#));

        let deserialized: JsonRpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, request);
    }

    #[test]
    fn test_jsonrpc_request_with_string_id() {
        let json = r#"{"jsonrpc":"2.0","method":"cancel_scan","id":"abc-123"}"#;
        let request: JsonRpcRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.request, Request::CancelScan);
        assert_eq!(request.id, RequestId::String("abc-123".to_string()));
    }

    #[test]
    fn test_jsonrpc_response_success() {
        let response = JsonRpcResponse::success(
            Response::ScanStarted(ScanStartedResponse::ok(SessionId::new())),
            RequestId::Number(1),
        );
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains(r#""result""#));
        assert!(!json.contains(r#""error""#));
        assert!(json.contains(r#""id":1"#));

        let deserialized: JsonRpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_jsonrpc_response_error() {
        let response = JsonRpcResponse::error(
            JsonRpcError::from(&ServiceError::AdapterOff),
            RequestId::Number(7),
        );
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains(r#""code":-32004"#));
        assert!(json.contains(r#""message":"Bluetooth adapter is off""#));
        assert!(!json.contains(r#""result""#));

        let deserialized: JsonRpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_parse_error_has_null_id() {
        let response = JsonRpcResponse::failure(JsonRpcError::parse_error(), None);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["id"], serde_json::Value::Null);
        assert_eq!(json["error"]["code"], JsonRpcError::PARSE_ERROR);
    }

    #[test]
    fn test_jsonrpc_notification() {
        let notif = JsonRpcNotification::new(Notification::BluetoothStateChanged(
            AdapterState::On.into(),
        ));
        let json = serde_json::to_string(&notif).unwrap();

        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""method":"bluetooth_state_changed""#));
        assert!(!json.contains(r#""id""#)); // notifications don't have id
    }

    #[test]
    fn test_service_error_codes() {
        let addr = DeviceAddress::new([0; 6]);
        let cases = [
            (ServiceError::Unavailable, -32001),
            (ServiceError::PermissionDenied(Capability::Scan), -32002),
            (ServiceError::InvalidAddress("x".into()), -32003),
            (ServiceError::AdapterOff, -32004),
            (ServiceError::AlreadyActive, -32005),
            (ServiceError::AlreadyConnecting(addr), -32005),
            (ServiceError::Timeout, -32006),
            (ServiceError::ConnectFailed("refused".into()), -32007),
            (ServiceError::NotConnected(addr), -32007),
        ];
        for (err, code) in cases {
            assert_eq!(JsonRpcError::from(&err).code, code, "{err}");
        }
    }

    #[test]
    fn test_permission_denied_names_capability() {
        let err = JsonRpcError::from(&ServiceError::PermissionDenied(Capability::Location));
        assert_eq!(err.message, "Bluetooth location permission not granted");
        assert_eq!(err.data, Some(serde_json::json!({ "capability": "location" })));
    }

    #[test]
    fn test_success_response_shape() {
        let response =
            JsonRpcResponse::success(Response::Success(SuccessResponse::ok()), RequestId::Number(3));
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"jsonrpc":"2.0","result":{"success":true},"id":3}"#
        );
    }
}
