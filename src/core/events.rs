//! Service event bus
//!
//! All asynchronous notifications travel over one broadcast channel.
//! Subscribers get a lazy stream; dropping it unsubscribes.

use futures::{Stream, StreamExt, stream::BoxStream};
use tokio::sync::broadcast;
use tracing::warn;

use crate::core::types::{
    AdapterStateEvent, ConnectionStatus, DeviceAddress, DeviceRecord, FinishReason, SessionId,
};

const EVENT_CAPACITY: usize = 256;

/// Event published by the core services
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    AdapterStateChanged(AdapterStateEvent),
    DeviceFound {
        session: SessionId,
        device: DeviceRecord,
    },
    DiscoveryFinished {
        session: SessionId,
        reason: FinishReason,
    },
    ConnectionStateChanged(ConnectionStatus),
    DataReceived {
        address: DeviceAddress,
        data: Vec<u8>,
    },
}

/// Cloneable publisher handle
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServiceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: ServiceEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to every event published from now on
    pub fn subscribe(&self) -> BoxStream<'static, ServiceEvent> {
        broadcast_stream(self.tx.subscribe()).boxed()
    }

    /// Subscribe to adapter state changes only
    pub fn adapter_states(&self) -> BoxStream<'static, AdapterStateEvent> {
        self.subscribe()
            .filter_map(|event| async move {
                match event {
                    ServiceEvent::AdapterStateChanged(state) => Some(state),
                    _ => None,
                }
            })
            .boxed()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a broadcast receiver into a fused stream that skips lagged items
pub fn broadcast_stream<T>(rx: broadcast::Receiver<T>) -> impl Stream<Item = T> + Send + 'static
where
    T: Clone + Send + 'static,
{
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .fuse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AdapterState;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(ServiceEvent::AdapterStateChanged(AdapterState::On.into()));
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut events = bus.subscribe();

        bus.publish(ServiceEvent::AdapterStateChanged(
            AdapterState::TurningOn.into(),
        ));
        bus.publish(ServiceEvent::AdapterStateChanged(AdapterState::On.into()));

        assert_eq!(
            events.next().await,
            Some(ServiceEvent::AdapterStateChanged(
                AdapterState::TurningOn.into()
            ))
        );
        assert_eq!(
            events.next().await,
            Some(ServiceEvent::AdapterStateChanged(AdapterState::On.into()))
        );
    }

    #[tokio::test]
    async fn test_adapter_state_filter() {
        let bus = EventBus::new();
        let mut states = bus.adapter_states();

        bus.publish(ServiceEvent::DataReceived {
            address: DeviceAddress::new([0; 6]),
            data: vec![1, 2, 3],
        });
        bus.publish(ServiceEvent::AdapterStateChanged(AdapterState::Off.into()));

        assert_eq!(states.next().await, Some(AdapterState::Off.into()));
    }

    #[tokio::test]
    async fn test_stream_ends_when_bus_dropped() {
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        drop(bus);

        assert_eq!(events.next().await, None);
    }
}
