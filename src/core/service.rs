//! Main Bluetooth device service facade

use std::{sync::Arc, time::Duration};

use futures::stream::BoxStream;
use tracing::info;

use crate::{
    backend::BluetoothBackend,
    core::{
        adapter::AdapterTracker,
        connector::{ConnectionHandle, ConnectionService},
        discovery::{DiscoveryHandle, DiscoveryService},
        error::ServiceResult,
        events::{EventBus, ServiceEvent},
        permissions::PermissionGuard,
        registry::DeviceRegistry,
        types::{AdapterState, DeviceAddress, DeviceRecord},
    },
};

/// Default discovery duration, matching the platform inquiry window
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(12);

/// Default bound on opening a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for the core services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub discovery_timeout: Duration,
    pub connect_timeout: Duration,
    /// Start cancels a running discovery instead of failing with `AlreadyActive`
    pub supersede_active_scan: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            supersede_active_scan: true,
        }
    }
}

/// Main Bluetooth device service facade
///
/// Orchestrates all service components (adapter, discovery, connections)
pub struct BluetoothService<B: BluetoothBackend> {
    pub permissions: Arc<PermissionGuard>,
    pub adapter: Arc<AdapterTracker<B>>,
    pub registry: Arc<DeviceRegistry>,
    pub discovery: Arc<DiscoveryService<B>>,
    pub connector: Arc<ConnectionService<B>>,
    events: EventBus,
}

impl<B: BluetoothBackend> BluetoothService<B> {
    /// Create a new Bluetooth device service
    pub fn new(backend: Arc<B>, permissions: PermissionGuard, config: ServiceConfig) -> Self {
        let events = EventBus::new();
        let permissions = Arc::new(permissions);
        let registry = Arc::new(DeviceRegistry::new());

        let adapter = Arc::new(AdapterTracker::new(
            backend.clone(),
            permissions.clone(),
            events.clone(),
        ));
        let discovery = Arc::new(DiscoveryService::new(
            backend.clone(),
            adapter.clone(),
            registry.clone(),
            permissions.clone(),
            events.clone(),
            &config,
        ));
        let connector = Arc::new(ConnectionService::new(
            backend,
            adapter.clone(),
            permissions.clone(),
            events.clone(),
            &config,
        ));

        Self {
            permissions,
            adapter,
            registry,
            discovery,
            connector,
            events,
        }
    }

    /// Probe the adapter and start following its state
    pub async fn start(&self) -> ServiceResult<()> {
        self.adapter.start().await?;
        info!(
            "Bluetooth device service started, adapter {:?}",
            self.adapter.state().await
        );
        Ok(())
    }

    /// Cancel discovery, close connections and drop all observers
    pub async fn shutdown(&self) {
        info!("Shutting down Bluetooth device service");
        self.discovery.cancel().await;
        self.connector.disconnect_all().await;
        self.adapter.shutdown().await;
        self.registry.clear().await;
    }

    /// Subscribe to all service events
    pub fn subscribe(&self) -> BoxStream<'static, ServiceEvent> {
        self.events.subscribe()
    }

    pub async fn adapter_state(&self) -> AdapterState {
        self.adapter.state().await
    }

    pub async fn is_bluetooth_enabled(&self) -> bool {
        self.adapter.query_enabled().await
    }

    pub async fn enable_bluetooth(&self) -> ServiceResult<bool> {
        self.adapter.request_enable().await
    }

    pub async fn disable_bluetooth(&self) -> ServiceResult<bool> {
        self.adapter.request_disable().await
    }

    pub async fn paired_devices(&self) -> ServiceResult<Vec<DeviceRecord>> {
        self.discovery.paired_devices().await
    }

    /// Start discovery, for `timeout` or the configured discovery timeout
    pub async fn scan_for_devices(
        &self,
        timeout: Option<Duration>,
    ) -> ServiceResult<DiscoveryHandle> {
        self.discovery.start(timeout).await
    }

    pub async fn cancel_scan(&self) {
        self.discovery.cancel().await
    }

    pub async fn connect_to_device(&self, device_id: &str) -> ServiceResult<ConnectionHandle> {
        self.connector.connect(device_id).await
    }

    pub async fn disconnect_from_device(&self, device_id: &str) -> ServiceResult<()> {
        let address: DeviceAddress = device_id.parse()?;
        self.connector.disconnect_address(address).await;
        Ok(())
    }

    /// Records of devices with an established connection
    pub async fn connected_devices(&self) -> Vec<DeviceRecord> {
        let mut records = Vec::new();
        for address in self.connector.connected_devices().await {
            match self.registry.get(&address).await {
                Some(record) => records.push(record),
                None => records.push(DeviceRecord::unknown(address)),
            }
        }
        records
    }

    pub async fn send_data(&self, device_id: &str, data: &[u8]) -> ServiceResult<()> {
        let address: DeviceAddress = device_id.parse()?;
        self.connector.send(address, data).await
    }
}
