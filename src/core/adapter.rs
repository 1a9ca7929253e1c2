//! Adapter state tracker
//!
//! Sole owner of the local radio's power state. The state changes only when
//! the backend reports a power transition or a caller requests one.

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{error, info, warn};

use crate::{
    backend::BluetoothBackend,
    core::{
        error::{BluetoothError, ServiceError, ServiceResult},
        events::{EventBus, ServiceEvent},
        permissions::{Capability, PermissionGuard},
        types::{AdapterState, AdapterStateEvent},
    },
};

/// Apply a state change and publish it, unless nothing changed
async fn transition(state: &RwLock<AdapterState>, events: &EventBus, next: AdapterState) -> bool {
    let mut current = state.write().await;
    if *current == next {
        return false;
    }

    info!("Adapter state {:?} -> {:?}", *current, next);
    *current = next;
    events.publish(ServiceEvent::AdapterStateChanged(next.into()));
    true
}

/// Tracks the on/off/transitioning state of the local adapter
pub struct AdapterTracker<B: BluetoothBackend> {
    backend: Arc<B>,
    permissions: Arc<PermissionGuard>,
    events: EventBus,
    state: Arc<RwLock<AdapterState>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<B: BluetoothBackend> AdapterTracker<B> {
    /// Create a tracker; the state is `Unavailable` until [`start`](Self::start)
    pub fn new(backend: Arc<B>, permissions: Arc<PermissionGuard>, events: EventBus) -> Self {
        Self {
            backend,
            permissions,
            events,
            state: Arc::new(RwLock::new(AdapterState::Unavailable)),
            watcher: Mutex::new(None),
        }
    }

    /// Probe the initial state and start following backend power reports
    pub async fn start(&self) -> ServiceResult<()> {
        let mut watcher = self.watcher.lock().await;
        if watcher.is_some() {
            return Ok(());
        }

        // Subscribe before probing so no report falls in between
        let mut power_events = match self.backend.power_events().await {
            Ok(events) => events,
            Err(BluetoothError::NoAdapter) => {
                warn!("No Bluetooth adapter present");
                transition(&self.state, &self.events, AdapterState::Unavailable).await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let initial = match self.backend.is_powered().await {
            Ok(true) => AdapterState::On,
            Ok(false) => AdapterState::Off,
            Err(BluetoothError::NoAdapter) => AdapterState::Unavailable,
            Err(e) => return Err(e.into()),
        };
        transition(&self.state, &self.events, initial).await;

        let state = self.state.clone();
        let events = self.events.clone();
        *watcher = Some(tokio::spawn(async move {
            while let Some(powered) = power_events.next().await {
                let next = if powered {
                    AdapterState::On
                } else {
                    AdapterState::Off
                };
                transition(&state, &events, next).await;
            }
            warn!("Adapter power event stream ended, adapter is gone");
            transition(&state, &events, AdapterState::Unavailable).await;
        }));

        Ok(())
    }

    /// Stop following backend power reports
    pub async fn shutdown(&self) {
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.abort();
            info!("Adapter state watcher stopped");
        }
    }

    /// Current adapter state
    pub async fn state(&self) -> AdapterState {
        *self.state.read().await
    }

    /// Whether the adapter is on
    pub async fn query_enabled(&self) -> bool {
        self.state().await.is_on()
    }

    /// Request the adapter to power on
    ///
    /// Returns once the request is accepted; the `On` state arrives later
    /// as a state event. Already on (or turning on) is a no-op.
    pub async fn request_enable(&self) -> ServiceResult<bool> {
        match self.state().await {
            AdapterState::Unavailable => return Err(ServiceError::Unavailable),
            AdapterState::On | AdapterState::TurningOn => return Ok(true),
            AdapterState::Off | AdapterState::TurningOff => {}
        }

        self.permissions.require(&[Capability::Connect]).await?;
        self.request_power(true, AdapterState::TurningOn, AdapterState::Off)
            .await
    }

    /// Request the adapter to power off
    pub async fn request_disable(&self) -> ServiceResult<bool> {
        match self.state().await {
            AdapterState::Unavailable => return Err(ServiceError::Unavailable),
            AdapterState::Off | AdapterState::TurningOff => return Ok(true),
            AdapterState::On | AdapterState::TurningOn => {}
        }

        self.permissions
            .require(&[Capability::Connect, Capability::Admin])
            .await?;
        self.request_power(false, AdapterState::TurningOff, AdapterState::On)
            .await
    }

    /// Lazy, infinite stream of state changes from now on
    pub fn subscribe(&self) -> BoxStream<'static, AdapterStateEvent> {
        self.events.adapter_states()
    }

    async fn request_power(
        &self,
        powered: bool,
        transitional: AdapterState,
        fallback: AdapterState,
    ) -> ServiceResult<bool> {
        transition(&self.state, &self.events, transitional).await;

        if let Err(e) = self.backend.set_powered(powered).await {
            error!("Adapter power request failed: {}", e);

            // Revert unless a backend report already moved the state on
            if self.state().await == transitional {
                transition(&self.state, &self.events, fallback).await;
            }
            return Err(e.into());
        }

        Ok(true)
    }
}

impl<B: BluetoothBackend> Drop for AdapterTracker<B> {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
    }
}
