//! Protocol message definitions

pub mod jsonrpc;
pub mod notification;
pub mod request;
pub mod response;

pub use {
    jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId},
    notification::{
        ConnectionStateChangedParams, DataReceivedParams, DeviceFoundParams,
        DiscoveryFinishedParams, Notification,
    },
    request::{DeviceParams, Request, ScanParams, SendDataParams},
    response::{
        ConnectResponse, DeviceInfo, DevicesResponse, EnabledResponse, Response,
        ScanStartedResponse, SuccessResponse,
    },
};
