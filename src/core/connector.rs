//! Connection manager with a per-address state machine

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    backend::BluetoothBackend,
    core::{
        adapter::AdapterTracker,
        error::{BluetoothError, ServiceError, ServiceResult},
        events::{EventBus, ServiceEvent},
        permissions::{Capability, PermissionGuard},
        service::ServiceConfig,
        types::{AdapterState, ConnectFailure, ConnectionState, ConnectionStatus, DeviceAddress, SessionId},
    },
};

const READ_BUFFER_SIZE: usize = 1024;

/// Live connection or attempt for one address
struct ConnectionSlot<S> {
    attempt: SessionId,
    status_tx: watch::Sender<ConnectionStatus>,
    writer: Option<Arc<Mutex<WriteHalf<S>>>>,
    task: Option<JoinHandle<()>>,
}

impl<S> ConnectionSlot<S> {
    fn state(&self) -> ConnectionState {
        self.status_tx.borrow().state
    }

    fn update(&self, status: ConnectionStatus, events: &EventBus) {
        info!(
            "Connection {} ({}) -> {:?}",
            status.address, self.attempt, status.state
        );
        self.status_tx.send_replace(status.clone());
        events.publish(ServiceEvent::ConnectionStateChanged(status));
    }

    /// Abort pending work and release the stream
    fn close(mut self, events: &EventBus) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.writer = None;

        let address = self.status_tx.borrow().address;
        self.update(
            ConnectionStatus::new(address, ConnectionState::Disconnected),
            events,
        );
    }
}

type Slots<S> = Arc<Mutex<HashMap<DeviceAddress, ConnectionSlot<S>>>>;

/// Caller side of a connection attempt
#[derive(Debug)]
pub struct ConnectionHandle {
    address: DeviceAddress,
    attempt: SessionId,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Wait for the outcome of the attempt
    pub async fn established(&mut self) -> ServiceResult<()> {
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            if self.status_rx.changed().await.is_err() {
                return self.outcome().unwrap_or_else(|| {
                    Err(ServiceError::ConnectFailed("connection attempt abandoned".into()))
                });
            }
        }
    }

    fn outcome(&mut self) -> Option<ServiceResult<()>> {
        let status = self.status_rx.borrow_and_update();
        match status.state {
            ConnectionState::Connected => Some(Ok(())),
            ConnectionState::Failed => Some(Err(status
                .failure
                .clone()
                .map(ServiceError::from)
                .unwrap_or_else(|| ServiceError::ConnectFailed("unknown failure".into())))),
            ConnectionState::Disconnected => Some(Err(ServiceError::ConnectFailed(
                "disconnected".into(),
            ))),
            ConnectionState::Idle | ConnectionState::Connecting => None,
        }
    }
}

/// Bluetooth connection manager
///
/// Owns every open stream. At most one attempt or connection exists per
/// address.
pub struct ConnectionService<B: BluetoothBackend> {
    backend: Arc<B>,
    adapter: Arc<AdapterTracker<B>>,
    permissions: Arc<PermissionGuard>,
    events: EventBus,
    connect_timeout: Duration,
    slots: Slots<B::Stream>,
}

impl<B: BluetoothBackend> ConnectionService<B> {
    /// Create a new connection service
    pub fn new(
        backend: Arc<B>,
        adapter: Arc<AdapterTracker<B>>,
        permissions: Arc<PermissionGuard>,
        events: EventBus,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            backend,
            adapter,
            permissions,
            events,
            connect_timeout: config.connect_timeout,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start connecting to a device
    ///
    /// Returns a handle in `Connecting` state; the outcome is reported
    /// through the handle and as `ConnectionStateChanged` events.
    pub async fn connect(&self, device_id: &str) -> ServiceResult<ConnectionHandle> {
        let address: DeviceAddress = device_id.parse()?;
        self.permissions.require(&[Capability::Connect]).await?;

        match self.adapter.state().await {
            AdapterState::On => {}
            AdapterState::Unavailable => return Err(ServiceError::Unavailable),
            _ => return Err(ServiceError::AdapterOff),
        }

        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(&address) {
            match slot.state() {
                ConnectionState::Connected => {
                    debug!("Reusing connection to {}", address);
                    return Ok(ConnectionHandle {
                        address,
                        attempt: slot.attempt,
                        status_rx: slot.status_tx.subscribe(),
                    });
                }
                _ => return Err(ServiceError::AlreadyConnecting(address)),
            }
        }

        let attempt = SessionId::new();
        let (status_tx, status_rx) =
            watch::channel(ConnectionStatus::new(address, ConnectionState::Connecting));
        let mut slot = ConnectionSlot {
            attempt,
            status_tx,
            writer: None,
            task: None,
        };
        slot.update(
            ConnectionStatus::new(address, ConnectionState::Connecting),
            &self.events,
        );

        slot.task = Some(tokio::spawn(run_attempt(
            self.backend.clone(),
            self.slots.clone(),
            self.events.clone(),
            address,
            attempt,
            self.connect_timeout,
        )));
        slots.insert(address, slot);

        Ok(ConnectionHandle {
            address,
            attempt,
            status_rx,
        })
    }

    /// Tear down the connection behind `handle`
    ///
    /// A handle from an earlier attempt leaves newer connections alone.
    pub async fn disconnect(&self, handle: &ConnectionHandle) {
        let mut slots = self.slots.lock().await;
        let current = slots
            .get(&handle.address)
            .is_some_and(|slot| slot.attempt == handle.attempt);
        if !current {
            debug!("Ignoring disconnect of stale handle for {}", handle.address);
            return;
        }

        if let Some(slot) = slots.remove(&handle.address) {
            slot.close(&self.events);
        }
    }

    /// Tear down whatever connection exists for `address`
    pub async fn disconnect_address(&self, address: DeviceAddress) {
        let slot = self.slots.lock().await.remove(&address);
        match slot {
            Some(slot) => slot.close(&self.events),
            None => debug!("No connection to {}", address),
        }
    }

    pub async fn disconnect_all(&self) {
        let drained: Vec<_> = self.slots.lock().await.drain().collect();
        for (_, slot) in drained {
            slot.close(&self.events);
        }
    }

    /// Write bytes to a connected device
    pub async fn send(&self, address: DeviceAddress, data: &[u8]) -> ServiceResult<()> {
        self.permissions.require(&[Capability::Connect]).await?;

        let writer = self
            .slots
            .lock()
            .await
            .get(&address)
            .and_then(|slot| slot.writer.clone())
            .ok_or(ServiceError::NotConnected(address))?;

        let mut writer = writer.lock().await;
        writer.write_all(data).await.map_err(BluetoothError::from)?;
        writer.flush().await.map_err(BluetoothError::from)?;

        debug!("Sent {} bytes to {}", data.len(), address);
        Ok(())
    }

    /// Addresses with an established connection
    pub async fn connected_devices(&self) -> Vec<DeviceAddress> {
        let mut addresses: Vec<_> = self
            .slots
            .lock()
            .await
            .iter()
            .filter(|(_, slot)| slot.state() == ConnectionState::Connected)
            .map(|(address, _)| *address)
            .collect();
        addresses.sort();
        addresses
    }

    /// Current state for `address`, `Idle` when unknown
    pub async fn status(&self, address: DeviceAddress) -> ConnectionStatus {
        self.slots
            .lock()
            .await
            .get(&address)
            .map(|slot| slot.status_tx.borrow().clone())
            .unwrap_or_else(|| ConnectionStatus::new(address, ConnectionState::Idle))
    }
}

async fn run_attempt<B: BluetoothBackend>(
    backend: Arc<B>,
    slots: Slots<B::Stream>,
    events: EventBus,
    address: DeviceAddress,
    attempt: SessionId,
    connect_timeout: Duration,
) {
    debug!("Opening stream to {}", address);
    let result = match tokio::time::timeout(connect_timeout, backend.open_stream(address)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ConnectFailure::Transport(e.to_string())),
        Err(_) => Err(ConnectFailure::Timeout),
    };

    let mut guard = slots.lock().await;
    let Some(slot) = guard
        .get_mut(&address)
        .filter(|slot| slot.attempt == attempt)
    else {
        debug!("Dropping outcome of superseded attempt {}", attempt);
        return;
    };

    match result {
        Ok(stream) => {
            let (reader, writer) = tokio::io::split(stream);
            slot.writer = Some(Arc::new(Mutex::new(writer)));
            slot.update(
                ConnectionStatus::new(address, ConnectionState::Connected),
                &events,
            );
            slot.task = Some(tokio::spawn(read_stream(
                reader,
                slots.clone(),
                events.clone(),
                address,
                attempt,
            )));
        }
        Err(failure) => {
            warn!("Connection to {} failed: {}", address, failure);
            if let Some(slot) = guard.remove(&address) {
                slot.update(ConnectionStatus::failed(address, failure), &events);
            }
        }
    }
}

async fn read_stream<S>(
    mut reader: ReadHalf<S>,
    slots: Slots<S>,
    events: EventBus,
    address: DeviceAddress,
    attempt: SessionId,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                info!("Remote {} closed the stream", address);
                break;
            }
            Ok(n) => {
                debug!("Received {} bytes from {}", n, address);
                events.publish(ServiceEvent::DataReceived {
                    address,
                    data: buf[..n].to_vec(),
                });
            }
            Err(e) => {
                warn!("Read from {} failed: {}", address, e);
                break;
            }
        }
    }

    let mut guard = slots.lock().await;
    if !guard
        .get(&address)
        .is_some_and(|slot| slot.attempt == attempt)
    {
        return;
    }
    if let Some(slot) = guard.remove(&address) {
        slot.update(
            ConnectionStatus::new(address, ConnectionState::Disconnected),
            &events,
        );
    }
}
