//! Device discovery service with single-flight sessions

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{StreamExt, stream::BoxStream};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    backend::{BluetoothBackend, SightingStream},
    core::{
        adapter::AdapterTracker,
        error::{ServiceError, ServiceResult},
        events::{EventBus, ServiceEvent},
        permissions::{Capability, PermissionGuard},
        registry::DeviceRegistry,
        service::ServiceConfig,
        types::{AdapterState, AdapterStateEvent, DeviceAddress, DeviceRecord, FinishReason, SessionId},
    },
};

/// Event yielded by a [`DiscoveryHandle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// First sighting of a device in this session
    DeviceFound(DeviceRecord),
    /// Last event of the session
    Finished(FinishReason),
}

/// Caller side of a discovery session
///
/// Yields `DeviceFound` events followed by exactly one `Finished`, then
/// `None`. Once the session is cancelled no further sightings are
/// delivered, even ones already buffered.
#[derive(Debug)]
pub struct DiscoveryHandle {
    id: SessionId,
    events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    cancelled: watch::Receiver<bool>,
    watching: bool,
    finished: bool,
}

impl DiscoveryHandle {
    fn new(
        id: SessionId,
        events: mpsc::UnboundedReceiver<DiscoveryEvent>,
        cancelled: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            events,
            cancelled,
            watching: true,
            finished: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next event of the session
    pub async fn next(&mut self) -> Option<DiscoveryEvent> {
        if self.finished {
            return None;
        }

        loop {
            if *self.cancelled.borrow() {
                return self.finish(FinishReason::Cancelled);
            }

            tokio::select! {
                biased;
                changed = self.cancelled.changed(), if self.watching => {
                    if changed.is_err() {
                        // Session slot released, only buffered events remain
                        self.watching = false;
                    }
                }
                event = self.events.recv() => {
                    return match event {
                        Some(DiscoveryEvent::Finished(reason)) => self.finish(reason),
                        Some(event) => Some(event),
                        None => self.finish(FinishReason::Cancelled),
                    };
                }
            }
        }
    }

    fn finish(&mut self, reason: FinishReason) -> Option<DiscoveryEvent> {
        self.finished = true;
        Some(DiscoveryEvent::Finished(reason))
    }
}

/// State of one running discovery
#[derive(Debug)]
struct DiscoverySession {
    id: SessionId,
    started_at: Instant,
    seen: HashSet<DeviceAddress>,
}

impl DiscoverySession {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            seen: HashSet::new(),
        }
    }

    /// Record an address, returns true on its first sighting
    fn mark_seen(&mut self, address: DeviceAddress) -> bool {
        self.seen.insert(address)
    }
}

/// Service-side bookkeeping for the active session
#[derive(Debug)]
struct ActiveDiscovery {
    id: SessionId,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ActiveDiscovery {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the session and wait until its backend stream is dropped
    async fn stop(self) {
        if self.is_running() {
            info!("Cancelling discovery session {}", self.id);
            let _ = self.cancel_tx.send(true);
        }
        let _ = self.task.await;
    }
}

struct SessionContext {
    registry: Arc<DeviceRegistry>,
    events: EventBus,
    tx: mpsc::UnboundedSender<DiscoveryEvent>,
    timeout: Duration,
    reveal_names: bool,
}

async fn run_session(
    mut session: DiscoverySession,
    mut sightings: SightingStream,
    mut adapter_states: BoxStream<'static, AdapterStateEvent>,
    mut cancel_rx: watch::Receiver<bool>,
    ctx: SessionContext,
) {
    let deadline = tokio::time::sleep(ctx.timeout);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel_rx.changed() => break FinishReason::Cancelled,
            _ = &mut deadline => break FinishReason::Completed,
            Some(state) = adapter_states.next() => {
                if !state.enabled && state.state != AdapterState::TurningOn {
                    break FinishReason::Failed("adapter powered off".to_string());
                }
            }
            sighting = sightings.next() => match sighting {
                Some(sighting) => {
                    let record = ctx.registry.observe(sighting, ctx.reveal_names).await;
                    if session.mark_seen(record.address) {
                        debug!("Discovered device {} ({:?})", record.address, record.category());
                        let _ = ctx.tx.send(DiscoveryEvent::DeviceFound(record.clone()));
                        ctx.events.publish(ServiceEvent::DeviceFound {
                            session: session.id,
                            device: record,
                        });
                    } else {
                        debug!("Refreshed device {}", record.address);
                    }
                }
                None => break FinishReason::Completed,
            },
        }
    };

    // Stops discovery in the backend
    drop(sightings);

    info!(
        "Discovery session {} finished after {:?}: {:?}, {} devices",
        session.id,
        session.started_at.elapsed(),
        reason,
        session.seen.len()
    );
    let _ = ctx.tx.send(DiscoveryEvent::Finished(reason.clone()));
    ctx.events.publish(ServiceEvent::DiscoveryFinished {
        session: session.id,
        reason,
    });
}

/// Device discovery service
///
/// Coordinates discovery sessions using the Bluetooth backend. At most one
/// session runs at a time.
pub struct DiscoveryService<B: BluetoothBackend> {
    backend: Arc<B>,
    adapter: Arc<AdapterTracker<B>>,
    registry: Arc<DeviceRegistry>,
    permissions: Arc<PermissionGuard>,
    events: EventBus,
    timeout: Duration,
    supersede: bool,
    active: Mutex<Option<ActiveDiscovery>>,
}

impl<B: BluetoothBackend> DiscoveryService<B> {
    /// Create a new discovery service
    pub fn new(
        backend: Arc<B>,
        adapter: Arc<AdapterTracker<B>>,
        registry: Arc<DeviceRegistry>,
        permissions: Arc<PermissionGuard>,
        events: EventBus,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            backend,
            adapter,
            registry,
            permissions,
            events,
            timeout: config.discovery_timeout,
            supersede: config.supersede_active_scan,
            active: Mutex::new(None),
        }
    }

    /// Start a discovery session
    ///
    /// A running session is cancelled first, or rejected with
    /// `AlreadyActive` when superseding is disabled. Returns as soon as
    /// the backend accepted the request. Without a `timeout` the session
    /// runs for the configured discovery timeout.
    pub async fn start(&self, timeout: Option<Duration>) -> ServiceResult<DiscoveryHandle> {
        match self.adapter.state().await {
            AdapterState::On => {}
            AdapterState::Unavailable => return Err(ServiceError::Unavailable),
            _ => return Err(ServiceError::AdapterOff),
        }
        self.permissions
            .require(&[Capability::Scan, Capability::Location])
            .await?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            if previous.is_running() && !self.supersede {
                *active = Some(previous);
                return Err(ServiceError::AlreadyActive);
            }
            previous.stop().await;
        }

        let adapter_states = self.adapter.subscribe();
        let sightings = self.backend.discover().await?;
        let reveal_names = self.permissions.is_granted(Capability::Connect).await;

        let id = SessionId::new();
        let timeout = timeout.unwrap_or(self.timeout);
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let ctx = SessionContext {
            registry: self.registry.clone(),
            events: self.events.clone(),
            tx,
            timeout,
            reveal_names,
        };
        let task = tokio::spawn(run_session(
            DiscoverySession::new(id),
            sightings,
            adapter_states,
            cancel_rx.clone(),
            ctx,
        ));

        info!("Discovery session {} started for {:?}", id, timeout);
        *active = Some(ActiveDiscovery {
            id,
            cancel_tx,
            task,
        });

        Ok(DiscoveryHandle::new(id, rx, cancel_rx))
    }

    /// Cancel the running session, if any
    pub async fn cancel(&self) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.stop().await;
        }
    }

    /// Whether a session is currently running
    pub async fn is_active(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(ActiveDiscovery::is_running)
    }

    /// Query bonded devices and record them in the registry
    pub async fn paired_devices(&self) -> ServiceResult<Vec<DeviceRecord>> {
        if self.adapter.state().await == AdapterState::Unavailable {
            return Err(ServiceError::Unavailable);
        }
        self.permissions.require(&[Capability::Connect]).await?;

        let bonded = self.backend.bonded_devices().await?;
        let mut records = Vec::with_capacity(bonded.len());
        for sighting in bonded {
            records.push(self.registry.observe(sighting.bonded(), true).await);
        }

        debug!("{} paired devices", records.len());
        Ok(records)
    }
}
