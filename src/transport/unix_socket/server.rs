//! Unix socket server implementation

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::StreamExt;
use listenfd::ListenFd;
use serde_json::Value;
use tokio::{
    fs,
    net::{UnixListener, UnixStream},
};
use tracing::{debug, error, info, warn};

use crate::{
    backend::BluetoothBackend,
    core::{error::TransportResult, service::BluetoothService},
    protocol::{
        JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Notification, Request,
        RequestId,
    },
    transport::unix_socket::{
        handler::RequestHandler,
        session::{SessionReader, UnixSocketSession},
    },
};

/// Unix socket server
pub struct UnixSocketServer<B: BluetoothBackend> {
    socket_path: PathBuf,
    socket_mode: u32,
    service: Arc<BluetoothService<B>>,
    handler: Arc<RequestHandler<B>>,
    owns_socket: AtomicBool,
}

impl<B: BluetoothBackend> UnixSocketServer<B> {
    /// Create a new Unix socket server
    pub fn new(
        socket_path: impl Into<PathBuf>,
        socket_mode: u32,
        service: Arc<BluetoothService<B>>,
    ) -> Self {
        let handler = Arc::new(RequestHandler::new(service.clone()));

        Self {
            socket_path: socket_path.into(),
            socket_mode,
            service,
            handler,
            owns_socket: AtomicBool::new(false),
        }
    }

    /// Take the socket passed by the service manager, or bind our own
    pub async fn bind(&self) -> TransportResult<UnixListener> {
        let mut listenfd = ListenFd::from_env();
        if let Some(listener) = listenfd.take_unix_listener(0)? {
            listener.set_nonblocking(true)?;
            info!("Using Unix socket inherited from the service manager");
            return Ok(UnixListener::from_std(listener)?);
        }

        // Remove existing socket file if it exists
        if Path::new(&self.socket_path).exists() {
            fs::remove_file(&self.socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        fs::set_permissions(
            &self.socket_path,
            std::fs::Permissions::from_mode(self.socket_mode),
        )
        .await?;
        self.owns_socket.store(true, Ordering::SeqCst);

        info!(
            "Unix socket server listening on {} (mode {:o})",
            self.socket_path.display(),
            self.socket_mode
        );
        Ok(listener)
    }

    /// Bind and serve until the accept loop fails
    pub async fn start(&self) -> TransportResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept clients on `listener`
    pub async fn serve(&self, listener: UnixListener) -> TransportResult<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    let service = self.service.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_client(stream, handler, service).await {
                            error!("Error handling client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                }
            }
        }
    }

    /// Remove the socket file if this server created it
    pub async fn cleanup(&self) {
        if !self.owns_socket.swap(false, Ordering::SeqCst) {
            return;
        }

        match fs::remove_file(&self.socket_path).await {
            Ok(()) => debug!("Removed {}", self.socket_path.display()),
            Err(e) => warn!("Failed to remove {}: {}", self.socket_path.display(), e),
        }
    }

    async fn handle_client(
        stream: UnixStream,
        handler: Arc<RequestHandler<B>>,
        service: Arc<BluetoothService<B>>,
    ) -> TransportResult<()> {
        let (read_half, write_half) = stream.into_split();
        let session = UnixSocketSession::new(write_half);
        let mut reader = SessionReader::new(read_half);

        info!("New client connected: {}", session.id());

        let forwarder = {
            let session = session.clone();
            let mut events = service.subscribe();
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let connected = service.connector.connected_devices().await;
                    let notification =
                        JsonRpcNotification::new(Notification::from_event(event, &connected));
                    if let Err(e) = session.send_notification(&notification).await {
                        debug!("Stopped forwarding notifications to {}: {}", session.id(), e);
                        break;
                    }
                }
            })
        };

        let result = Self::serve_requests(&mut reader, &session, &handler).await;
        forwarder.abort();

        info!("Client disconnected: {}", session.id());
        result
    }

    async fn serve_requests(
        reader: &mut SessionReader,
        session: &UnixSocketSession,
        handler: &RequestHandler<B>,
    ) -> TransportResult<()> {
        while let Some(line) = reader.read_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let response = match parse_request(&line) {
                Ok(request) => handler.handle_request(request).await,
                Err(response) => {
                    warn!("Invalid JSON-RPC request: {}", line);
                    response
                }
            };
            session.send_response(&response).await?;
        }

        Ok(())
    }
}

/// Parse one request line, or build the error reply for it
fn parse_request(line: &str) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let value: Value = serde_json::from_str(line)
        .map_err(|_| JsonRpcResponse::failure(JsonRpcError::parse_error(), None))?;

    let id = value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
    let invalid = |message: &str| {
        JsonRpcResponse::failure(JsonRpcError::invalid_request(message), id.clone())
    };

    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(invalid("jsonrpc must be \"2.0\""));
    }
    let Some(method) = value.get("method").and_then(Value::as_str) else {
        return Err(invalid("method must be a string"));
    };
    if id.is_none() {
        return Err(invalid("id must be a number or string"));
    }
    if !Request::is_known_method(method) {
        return Err(JsonRpcResponse::failure(
            JsonRpcError::method_not_found(method),
            id,
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| JsonRpcResponse::failure(JsonRpcError::invalid_params(e.to_string()), id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::MockBluetoothBackend,
        core::{
            permissions::PermissionGuard,
            service::ServiceConfig,
            types::{DeviceAddress, DeviceSighting},
        },
        protocol::ScanParams,
    };
    use serde_json::json;
    use tempfile::tempdir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn service(backend: MockBluetoothBackend) -> Arc<BluetoothService<MockBluetoothBackend>> {
        let service = Arc::new(BluetoothService::new(
            Arc::new(backend),
            PermissionGuard::all_granted(),
            ServiceConfig::default(),
        ));
        service.start().await.unwrap();
        service
    }

    struct Client {
        lines: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
        writer: tokio::net::unix::OwnedWriteHalf,
    }

    impl Client {
        async fn connect(path: &Path) -> Self {
            let stream = UnixStream::connect(path).await.unwrap();
            let (read, writer) = stream.into_split();
            Self {
                lines: BufReader::new(read).lines(),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
            self.writer.flush().await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = tokio::time::timeout(std::time::Duration::from_secs(1), self.lines.next_line())
                .await
                .expect("line from server")
                .unwrap()
                .expect("connection open");
            serde_json::from_str(&line).unwrap()
        }
    }

    async fn running_server(
        service: Arc<BluetoothService<MockBluetoothBackend>>,
    ) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let server = UnixSocketServer::new(socket_path.clone(), 0o600, service);
        let listener = server.bind().await.unwrap();
        tokio::spawn(async move {
            server.serve(listener).await.ok();
        });

        (dir, socket_path)
    }

    #[test]
    fn test_parse_request_errors() {
        let response = parse_request("{not json").unwrap_err();
        assert_eq!(response.error.unwrap().code, JsonRpcError::PARSE_ERROR);
        assert_eq!(response.id, None);

        let response =
            parse_request(r#"{"jsonrpc":"2.0","method":"send_data","params":{},"id":4}"#)
                .unwrap_err();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
        assert_eq!(response.id, Some(RequestId::Number(4)));

        let response = parse_request(r#"{"jsonrpc":"2.0","method":"no_such_method","id":3}"#)
            .unwrap_err();
        assert_eq!(response.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
        assert_eq!(response.id, Some(RequestId::Number(3)));

        let response =
            parse_request(r#"{"jsonrpc":"1.0","method":"cancel_scan","id":5}"#).unwrap_err();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_REQUEST);
        assert_eq!(response.id, Some(RequestId::Number(5)));

        let response = parse_request(r#"{"jsonrpc":"2.0","method":"cancel_scan"}"#).unwrap_err();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_REQUEST);
        assert_eq!(response.id, None);

        let request = parse_request(r#"{"jsonrpc":"2.0","method":"cancel_scan","id":"x"}"#).unwrap();
        assert_eq!(request.request, Request::CancelScan);

        let request = parse_request(
            r#"{"jsonrpc":"2.0","method":"scan_for_devices","params":{"timeout_ms":250},"id":6}"#,
        )
        .unwrap();
        assert_eq!(
            request.request,
            Request::ScanForDevices(ScanParams {
                timeout_ms: Some(250)
            })
        );
    }

    #[tokio::test]
    async fn test_bind_sets_socket_mode() {
        let service = service(MockBluetoothBackend::new()).await;
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("mode.sock");

        let server = UnixSocketServer::new(socket_path.clone(), 0o600, service);
        let _listener = server.bind().await.unwrap();

        let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        server.cleanup().await;
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_client_request_response() {
        let (_dir, path) = running_server(service(MockBluetoothBackend::new()).await).await;
        let mut client = Client::connect(&path).await;

        client
            .send(r#"{"jsonrpc":"2.0","method":"is_bluetooth_enabled","id":1}"#)
            .await;
        assert_eq!(
            client.recv().await,
            json!({"jsonrpc": "2.0", "result": {"enabled": false}, "id": 1})
        );

        client.send("garbage").await;
        let response = client.recv().await;
        assert_eq!(response["error"]["code"], JsonRpcError::PARSE_ERROR);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_client_unknown_method_and_empty_params() {
        let (_dir, path) = running_server(service(MockBluetoothBackend::new()).await).await;
        let mut client = Client::connect(&path).await;

        client
            .send(r#"{"jsonrpc":"2.0","method":"no_such_method","id":3}"#)
            .await;
        let response = client.recv().await;
        assert_eq!(response["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);
        assert_eq!(response["id"], 3);

        client
            .send(r#"{"jsonrpc":"2.0","method":"is_bluetooth_enabled","params":{},"id":4}"#)
            .await;
        assert_eq!(
            client.recv().await,
            json!({"jsonrpc": "2.0", "result": {"enabled": false}, "id": 4})
        );
    }

    #[tokio::test]
    async fn test_client_receives_notifications() {
        let (_dir, path) = running_server(service(MockBluetoothBackend::new()).await).await;
        let mut client = Client::connect(&path).await;

        // Give the forwarder time to subscribe
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        client
            .send(r#"{"jsonrpc":"2.0","method":"enable_bluetooth","id":2}"#)
            .await;

        let mut messages = Vec::new();
        for _ in 0..3 {
            messages.push(client.recv().await);
        }

        assert!(messages.contains(&json!({"jsonrpc": "2.0", "result": {"success": true}, "id": 2})));
        assert!(messages.contains(&json!({
            "jsonrpc": "2.0",
            "method": "bluetooth_state_changed",
            "params": {"state": "turning_on", "enabled": false}
        })));
        assert!(messages.contains(&json!({
            "jsonrpc": "2.0",
            "method": "bluetooth_state_changed",
            "params": {"state": "on", "enabled": true}
        })));
    }

    #[tokio::test]
    async fn test_device_found_marks_connected_device() {
        let backend = MockBluetoothBackend::powered().await;
        let service = service(backend.clone()).await;
        let address: DeviceAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();

        let mut connection = service.connect_to_device(&address.to_string()).await.unwrap();
        connection.established().await.unwrap();

        let (_dir, path) = running_server(service.clone()).await;
        let mut client = Client::connect(&path).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let _scan = service.scan_for_devices(None).await.unwrap();
        backend.inject_sighting(DeviceSighting::new(address).with_name("Car Kit"));

        let found = loop {
            let message = client.recv().await;
            if message["method"] == "device_found" {
                break message;
            }
        };
        assert_eq!(found["params"]["id"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(found["params"]["connected"], true);
    }

    #[tokio::test]
    async fn test_request_via_typed_client() {
        let (_dir, path) = running_server(service(MockBluetoothBackend::powered().await).await).await;
        let mut client = Client::connect(&path).await;

        let request = JsonRpcRequest::new(Request::GetConnectedDevices, RequestId::Number(9));
        client.send(&serde_json::to_string(&request).unwrap()).await;

        // Skip notifications, if any
        let response = loop {
            let message = client.recv().await;
            if message.get("id").is_some() {
                break message;
            }
        };
        assert_eq!(response["result"], json!({"devices": []}));
        assert_eq!(response["id"], 9);
    }
}
