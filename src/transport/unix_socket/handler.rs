//! JSON-RPC request handler for Unix socket transport

use std::sync::Arc;

use tracing::debug;

use crate::{
    backend::BluetoothBackend,
    core::{error::ServiceResult, service::BluetoothService, types::DeviceRecord},
    protocol::{
        ConnectResponse, DeviceInfo, DeviceParams, DevicesResponse, EnabledResponse, JsonRpcError,
        JsonRpcRequest, JsonRpcResponse, Request, RequestId, Response, ScanParams,
        ScanStartedResponse, SendDataParams, SuccessResponse,
    },
};

/// JSON-RPC request handler
pub struct RequestHandler<B: BluetoothBackend> {
    service: Arc<BluetoothService<B>>,
}

impl<B: BluetoothBackend> RequestHandler<B> {
    /// Create a new request handler
    pub fn new(service: Arc<BluetoothService<B>>) -> Self {
        Self { service }
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Handling request {:?}", request.request);

        let result = match request.request {
            Request::IsBluetoothEnabled => Ok(Response::Enabled(EnabledResponse {
                enabled: self.service.is_bluetooth_enabled().await,
            })),
            Request::EnableBluetooth => self
                .service
                .enable_bluetooth()
                .await
                .map(|success| Response::Success(SuccessResponse { success })),
            Request::DisableBluetooth => self
                .service
                .disable_bluetooth()
                .await
                .map(|success| Response::Success(SuccessResponse { success })),
            Request::GetPairedDevices => self.handle_get_paired_devices().await,
            Request::ScanForDevices(params) => self.handle_scan_for_devices(params).await,
            Request::CancelScan => {
                self.service.cancel_scan().await;
                Ok(Response::Success(SuccessResponse::ok()))
            }
            Request::ConnectToDevice(params) => self.handle_connect(params).await,
            Request::DisconnectFromDevice(params) => self
                .service
                .disconnect_from_device(&params.device_id)
                .await
                .map(|()| Response::Success(SuccessResponse::ok())),
            Request::GetConnectedDevices => Ok(Response::Devices(DevicesResponse {
                devices: self
                    .service
                    .connected_devices()
                    .await
                    .iter()
                    .map(|record| DeviceInfo::from_record(record, true))
                    .collect(),
            })),
            Request::SendData(params) => return self.handle_send_data(params, request.id).await,
        };

        Self::reply(result, request.id)
    }

    fn reply(result: ServiceResult<Response>, id: RequestId) -> JsonRpcResponse {
        match result {
            Ok(response) => JsonRpcResponse::success(response, id),
            Err(e) => {
                debug!("Request failed: {}", e);
                JsonRpcResponse::error(JsonRpcError::from(&e), id)
            }
        }
    }

    async fn handle_get_paired_devices(&self) -> ServiceResult<Response> {
        let paired = self.service.paired_devices().await?;
        Ok(Response::Devices(DevicesResponse {
            devices: self.device_infos(&paired).await,
        }))
    }

    async fn handle_scan_for_devices(&self, params: ScanParams) -> ServiceResult<Response> {
        // Results reach clients as notifications, the handle is not needed
        let handle = self.service.scan_for_devices(params.timeout()).await?;
        Ok(Response::ScanStarted(ScanStartedResponse::ok(handle.id())))
    }

    async fn handle_connect(&self, params: DeviceParams) -> ServiceResult<Response> {
        let handle = self.service.connect_to_device(&params.device_id).await?;
        Ok(Response::Connect(ConnectResponse::ok(handle.state())))
    }

    async fn handle_send_data(&self, params: SendDataParams, id: RequestId) -> JsonRpcResponse {
        let data = match params.decode_data() {
            Ok(data) => data,
            Err(e) => return JsonRpcResponse::error(JsonRpcError::invalid_params(e), id),
        };

        let result = self
            .service
            .send_data(&params.device_id, &data)
            .await
            .map(|()| Response::Success(SuccessResponse::ok()));
        Self::reply(result, id)
    }

    async fn device_infos(&self, records: &[DeviceRecord]) -> Vec<DeviceInfo> {
        let connected = self.service.connector.connected_devices().await;
        records
            .iter()
            .map(|record| DeviceInfo::from_record(record, connected.contains(&record.address)))
            .collect()
    }
}
