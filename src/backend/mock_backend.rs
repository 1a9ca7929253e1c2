//! Mock Bluetooth backend for testing

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::StreamExt;
use tokio::{
    io::DuplexStream,
    sync::{Mutex, broadcast, watch},
};

use crate::backend::{BluetoothBackend, PowerEvents, SightingStream};
use crate::core::error::{BluetoothError, BluetoothResult};
use crate::core::events::broadcast_stream;
use crate::core::types::{DeviceAddress, DeviceSighting};

const MOCK_STREAM_BUFFER: usize = 1024;

/// How the mock answers a connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Hand out an in-memory duplex stream
    Accept,
    /// Fail with the given reason
    Refuse(String),
    /// Never complete
    Hang,
}

/// Internal state for the mock backend
#[derive(Debug)]
struct MockState {
    present: bool,
    powered: bool,
    auto_complete_power: bool,
    should_fail_power: bool,
    should_fail_discovery: bool,
    bonded: Vec<DeviceSighting>,
    scripted_sightings: Vec<DeviceSighting>,
    connect_behavior: HashMap<DeviceAddress, ConnectBehavior>,
    peers: HashMap<DeviceAddress, DuplexStream>,
    connect_attempts: usize,
}

/// Mock Bluetooth backend for testing
///
/// Allows configuring behavior for tests without requiring actual hardware.
#[derive(Debug, Clone)]
pub struct MockBluetoothBackend {
    inner: Arc<Mutex<MockState>>,
    power_tx: broadcast::Sender<bool>,
    removed_tx: Arc<watch::Sender<bool>>,
    sighting_tx: broadcast::Sender<DeviceSighting>,
    active_discoveries: Arc<AtomicUsize>,
    peak_discoveries: Arc<AtomicUsize>,
}

impl MockBluetoothBackend {
    /// Create a new mock backend with a present, powered-off adapter
    pub fn new() -> Self {
        let (power_tx, _) = broadcast::channel(16);
        let (sighting_tx, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(Mutex::new(MockState {
                present: true,
                powered: false,
                auto_complete_power: true,
                should_fail_power: false,
                should_fail_discovery: false,
                bonded: vec![],
                scripted_sightings: vec![],
                connect_behavior: HashMap::new(),
                peers: HashMap::new(),
                connect_attempts: 0,
            })),
            power_tx,
            removed_tx: Arc::new(watch::channel(false).0),
            sighting_tx,
            active_discoveries: Arc::new(AtomicUsize::new(0)),
            peak_discoveries: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock backend whose adapter is already powered
    pub async fn powered() -> Self {
        let backend = Self::new();
        backend.inner.lock().await.powered = true;
        backend
    }

    /// Simulate a host without Bluetooth hardware
    pub async fn set_present(&self, present: bool) {
        self.inner.lock().await.present = present;
    }

    /// When disabled, `set_powered` only accepts the request and the test
    /// must call [`report_power`](Self::report_power) to complete it
    pub async fn set_auto_complete_power(&self, auto: bool) {
        self.inner.lock().await.auto_complete_power = auto;
    }

    /// Configure mock to fail power requests
    pub async fn set_power_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_power = should_fail;
    }

    /// Configure mock to fail discovery start
    pub async fn set_discovery_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_discovery = should_fail;
    }

    /// Simulate the radio reporting a power state
    pub async fn report_power(&self, powered: bool) {
        self.inner.lock().await.powered = powered;
        let _ = self.power_tx.send(powered);
    }

    /// Simulate the adapter being unplugged, ending every power event stream
    pub async fn remove_adapter(&self) {
        self.inner.lock().await.present = false;
        self.removed_tx.send_replace(true);
    }

    pub async fn set_bonded_devices(&self, devices: Vec<DeviceSighting>) {
        self.inner.lock().await.bonded = devices;
    }

    /// Sightings replayed at the start of every discovery
    pub async fn set_discovery_results(&self, sightings: Vec<DeviceSighting>) {
        self.inner.lock().await.scripted_sightings = sightings;
    }

    /// Deliver a sighting to every running discovery
    pub fn inject_sighting(&self, sighting: DeviceSighting) {
        let _ = self.sighting_tx.send(sighting);
    }

    /// Number of discovery streams currently alive
    pub fn active_discoveries(&self) -> usize {
        self.active_discoveries.load(Ordering::SeqCst)
    }

    /// Highest number of discovery streams that were ever alive at once
    pub fn peak_discoveries(&self) -> usize {
        self.peak_discoveries.load(Ordering::SeqCst)
    }

    pub async fn set_connect_behavior(&self, address: DeviceAddress, behavior: ConnectBehavior) {
        self.inner
            .lock()
            .await
            .connect_behavior
            .insert(address, behavior);
    }

    /// Number of transport opens attempted so far
    pub async fn connect_attempts(&self) -> usize {
        self.inner.lock().await.connect_attempts
    }

    /// Take the remote end of the last stream opened to `address`
    pub async fn take_peer(&self, address: DeviceAddress) -> Option<DuplexStream> {
        self.inner.lock().await.peers.remove(&address)
    }
}

impl Default for MockBluetoothBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the live discovery counter when the stream is dropped
struct DiscoveryGuard(Arc<AtomicUsize>);

impl Drop for DiscoveryGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BluetoothBackend for MockBluetoothBackend {
    type Stream = DuplexStream;

    async fn is_powered(&self) -> BluetoothResult<bool> {
        let state = self.inner.lock().await;
        if !state.present {
            return Err(BluetoothError::NoAdapter);
        }
        Ok(state.powered)
    }

    async fn set_powered(&self, powered: bool) -> BluetoothResult<()> {
        let mut state = self.inner.lock().await;
        if !state.present {
            return Err(BluetoothError::NoAdapter);
        }
        if state.should_fail_power {
            return Err(BluetoothError::Bluez("Mock power failure".into()));
        }
        if state.auto_complete_power {
            state.powered = powered;
            let _ = self.power_tx.send(powered);
        }
        Ok(())
    }

    async fn power_events(&self) -> BluetoothResult<PowerEvents> {
        if !self.inner.lock().await.present {
            return Err(BluetoothError::NoAdapter);
        }
        let mut removed = self.removed_tx.subscribe();
        let gone = async move {
            let _ = removed.wait_for(|gone| *gone).await;
        };
        Ok(broadcast_stream(self.power_tx.subscribe())
            .take_until(gone)
            .boxed())
    }

    async fn bonded_devices(&self) -> BluetoothResult<Vec<DeviceSighting>> {
        let state = self.inner.lock().await;
        if !state.present {
            return Err(BluetoothError::NoAdapter);
        }
        Ok(state.bonded.clone())
    }

    async fn discover(&self) -> BluetoothResult<SightingStream> {
        let state = self.inner.lock().await;
        if !state.present {
            return Err(BluetoothError::NoAdapter);
        }
        if state.should_fail_discovery {
            return Err(BluetoothError::DiscoveryFailed("Mock discovery failure".into()));
        }

        let alive = self.active_discoveries.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_discoveries.fetch_max(alive, Ordering::SeqCst);
        let guard = DiscoveryGuard(self.active_discoveries.clone());

        let live = broadcast_stream(self.sighting_tx.subscribe());
        let stream = futures::stream::iter(state.scripted_sightings.clone())
            .chain(live)
            .map(move |sighting| {
                let _guard = &guard;
                sighting
            });

        Ok(stream.boxed())
    }

    async fn open_stream(&self, address: DeviceAddress) -> BluetoothResult<Self::Stream> {
        let behavior = {
            let mut state = self.inner.lock().await;
            if !state.present {
                return Err(BluetoothError::NoAdapter);
            }
            state.connect_attempts += 1;
            state
                .connect_behavior
                .get(&address)
                .cloned()
                .unwrap_or(ConnectBehavior::Accept)
        };

        match behavior {
            ConnectBehavior::Accept => {
                let (local, remote) = tokio::io::duplex(MOCK_STREAM_BUFFER);
                self.inner.lock().await.peers.insert(address, remote);
                Ok(local)
            }
            ConnectBehavior::Refuse(reason) => Err(BluetoothError::ConnectFailed(reason)),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_mock_backend_absent_adapter() {
        let backend = MockBluetoothBackend::new();
        backend.set_present(false).await;

        assert_eq!(backend.is_powered().await, Err(BluetoothError::NoAdapter));
        assert!(backend.discover().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_backend_power() {
        let backend = MockBluetoothBackend::new();
        let mut events = backend.power_events().await.unwrap();

        assert!(!backend.is_powered().await.unwrap());
        backend.set_powered(true).await.unwrap();

        assert_eq!(events.next().await, Some(true));
        assert!(backend.is_powered().await.unwrap());
    }

    #[tokio::test]
    async fn test_mock_backend_discovery_guard() {
        let backend = MockBluetoothBackend::powered().await;
        let addr = DeviceAddress::new([1, 2, 3, 4, 5, 6]);
        backend
            .set_discovery_results(vec![DeviceSighting::new(addr)])
            .await;

        let mut stream = backend.discover().await.unwrap();
        assert_eq!(backend.active_discoveries(), 1);
        assert_eq!(stream.next().await.map(|s| s.address), Some(addr));

        drop(stream);
        assert_eq!(backend.active_discoveries(), 0);
    }

    #[tokio::test]
    async fn test_mock_backend_stream_pair() {
        let backend = MockBluetoothBackend::powered().await;
        let addr = DeviceAddress::new([1, 2, 3, 4, 5, 6]);

        let mut local = backend.open_stream(addr).await.unwrap();
        let mut remote = backend.take_peer(addr).await.unwrap();

        local.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(backend.connect_attempts().await, 1);
    }

    #[tokio::test]
    async fn test_mock_backend_refuse() {
        let backend = MockBluetoothBackend::powered().await;
        let addr = DeviceAddress::new([1, 2, 3, 4, 5, 6]);
        backend
            .set_connect_behavior(addr, ConnectBehavior::Refuse("busy".into()))
            .await;

        assert_eq!(
            backend.open_stream(addr).await.unwrap_err(),
            BluetoothError::ConnectFailed("busy".into())
        );
    }
}
