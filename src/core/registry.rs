//! In-memory device registry keyed by address

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use tokio::sync::RwLock;
use tracing::debug;

use crate::core::types::{DeviceAddress, DeviceRecord, DeviceSighting};

/// Known devices for the lifetime of the service
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<DeviceAddress, DeviceRecord>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh the record for a sighting
    ///
    /// When `reveal_name` is false the advertised name is not recorded.
    /// Fields absent from the sighting keep their previous value; the
    /// bonded flag is sticky.
    pub async fn observe(&self, sighting: DeviceSighting, reveal_name: bool) -> DeviceRecord {
        let name = sighting.name.filter(|_| reveal_name);
        let mut devices = self.devices.write().await;

        let record = devices
            .entry(sighting.address)
            .and_modify(|record| {
                if name.is_some() {
                    record.display_name = name.clone();
                }
                if let Some(code) = sighting.class_code.filter(|code| *code != 0) {
                    record.class_code = code;
                }
                if sighting.rssi.is_some() {
                    record.rssi = sighting.rssi;
                }
                record.bonded |= sighting.bonded;
                record.last_seen = SystemTime::now();
            })
            .or_insert_with(|| {
                debug!("New device record: {}", sighting.address);
                DeviceRecord {
                    address: sighting.address,
                    display_name: name.clone(),
                    class_code: sighting.class_code.unwrap_or_default(),
                    bonded: sighting.bonded,
                    rssi: sighting.rssi,
                    last_seen: SystemTime::now(),
                }
            });

        record.clone()
    }

    pub async fn get(&self, address: &DeviceAddress) -> Option<DeviceRecord> {
        self.devices.read().await.get(address).cloned()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.devices.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::Category;

    fn addr(last: u8) -> DeviceAddress {
        DeviceAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    #[tokio::test]
    async fn test_observe_creates_record() {
        let registry = DeviceRegistry::new();
        let record = registry
            .observe(
                DeviceSighting::new(addr(1))
                    .with_name("JBL Flip")
                    .with_class(1344)
                    .with_rssi(-50),
                true,
            )
            .await;

        assert_eq!(record.display_name.as_deref(), Some("JBL Flip"));
        assert_eq!(record.class_code, 1344);
        assert_eq!(record.category(), Category::Speaker);
        assert_eq!(record.rssi, Some(-50));
        assert!(!record.bonded);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_observe_refreshes_existing() {
        let registry = DeviceRegistry::new();
        let first = registry
            .observe(
                DeviceSighting::new(addr(1)).with_class(516).bonded(),
                true,
            )
            .await;

        let second = registry
            .observe(
                DeviceSighting::new(addr(1))
                    .with_name("Pixel")
                    .with_rssi(-70),
                true,
            )
            .await;

        assert_eq!(registry.len().await, 1);
        assert_eq!(second.display_name.as_deref(), Some("Pixel"));
        assert_eq!(second.class_code, 516);
        assert!(second.bonded);
        assert!(second.last_seen >= first.last_seen);
    }

    #[tokio::test]
    async fn test_observe_withholds_name() {
        let registry = DeviceRegistry::new();
        let record = registry
            .observe(DeviceSighting::new(addr(2)).with_name("Secret"), false)
            .await;

        assert_eq!(record.display_name, None);
        assert_eq!(record.category(), Category::Other);
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = DeviceRegistry::new();
        registry.observe(DeviceSighting::new(addr(3)), true).await;
        registry.observe(DeviceSighting::new(addr(1)), true).await;
        assert_eq!(registry.len().await, 2);

        registry.clear().await;
        assert!(registry.is_empty().await);
        assert!(registry.get(&addr(1)).await.is_none());
    }
}
