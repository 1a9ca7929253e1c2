//! BlueZ backend over D-Bus

use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport, Session,
    rfcomm::{SocketAddr, Stream},
};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::backend::{BluetoothBackend, PowerEvents, SightingStream};
use crate::core::error::{BluetoothError, BluetoothResult};
use crate::core::types::{DeviceAddress, DeviceSighting};

/// RFCOMM channel used when none is configured (serial port profile)
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

impl From<Address> for DeviceAddress {
    fn from(addr: Address) -> Self {
        DeviceAddress::new(addr.0)
    }
}

impl From<DeviceAddress> for Address {
    fn from(addr: DeviceAddress) -> Self {
        Address::new(addr.octets())
    }
}

fn bluez_error(err: bluer::Error) -> BluetoothError {
    BluetoothError::Bluez(err.to_string())
}

/// Backend using the BlueZ daemon
///
/// The adapter is optional: a host without Bluetooth hardware still gets a
/// backend, and every call reports `NoAdapter`.
pub struct BluerBackend {
    _session: Session,
    adapter: Option<Adapter>,
    rfcomm_channel: u8,
}

impl BluerBackend {
    /// Connect to BlueZ and pick the named adapter, or the default one
    pub async fn new(adapter_name: Option<&str>, rfcomm_channel: u8) -> BluetoothResult<Self> {
        let session = Session::new().await.map_err(bluez_error)?;

        let adapter = match adapter_name {
            Some(name) => {
                let names = session.adapter_names().await.map_err(bluez_error)?;
                if names.iter().any(|n| n == name) {
                    Some(session.adapter(name).map_err(bluez_error)?)
                } else {
                    warn!("Bluetooth adapter {} not found", name);
                    None
                }
            }
            None => match session.default_adapter().await {
                Ok(adapter) => Some(adapter),
                Err(e) => {
                    warn!("No default Bluetooth adapter: {}", e);
                    None
                }
            },
        };

        if let Some(adapter) = &adapter {
            info!("Using Bluetooth adapter: {}", adapter.name());
        }

        Ok(Self {
            _session: session,
            adapter,
            rfcomm_channel,
        })
    }

    fn adapter(&self) -> BluetoothResult<&Adapter> {
        self.adapter.as_ref().ok_or(BluetoothError::NoAdapter)
    }
}

/// Read the properties of a device known to the adapter
async fn read_sighting(adapter: &Adapter, addr: Address) -> BluetoothResult<DeviceSighting> {
    let device = adapter.device(addr).map_err(bluez_error)?;

    Ok(DeviceSighting {
        address: addr.into(),
        name: device.name().await.ok().flatten(),
        class_code: device.class().await.ok().flatten(),
        bonded: device.is_paired().await.unwrap_or(false),
        rssi: device.rssi().await.ok().flatten(),
    })
}

impl BluetoothBackend for BluerBackend {
    type Stream = Stream;

    async fn is_powered(&self) -> BluetoothResult<bool> {
        self.adapter()?.is_powered().await.map_err(bluez_error)
    }

    async fn set_powered(&self, powered: bool) -> BluetoothResult<()> {
        let adapter = self.adapter()?;
        adapter.set_powered(powered).await.map_err(bluez_error)?;
        debug!("Requested adapter power {}", if powered { "on" } else { "off" });
        Ok(())
    }

    async fn power_events(&self) -> BluetoothResult<PowerEvents> {
        let events = self.adapter()?.events().await.map_err(bluez_error)?;

        Ok(events
            .filter_map(|event| async move {
                match event {
                    AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) => {
                        Some(powered)
                    }
                    _ => None,
                }
            })
            .boxed())
    }

    async fn bonded_devices(&self) -> BluetoothResult<Vec<DeviceSighting>> {
        let adapter = self.adapter()?;
        let addresses = adapter.device_addresses().await.map_err(bluez_error)?;

        let mut bonded = Vec::new();
        for addr in addresses {
            match read_sighting(adapter, addr).await {
                Ok(sighting) if sighting.bonded => bonded.push(sighting),
                Ok(_) => {}
                Err(e) => warn!("Failed to read device {}: {}", addr, e),
            }
        }

        Ok(bonded)
    }

    async fn discover(&self) -> BluetoothResult<SightingStream> {
        let adapter = self.adapter()?.clone();

        // Classic inquiry only
        adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::BrEdr,
                ..Default::default()
            })
            .await
            .map_err(|e| BluetoothError::DiscoveryFailed(e.to_string()))?;

        let events = adapter
            .discover_devices()
            .await
            .map_err(|e| BluetoothError::DiscoveryFailed(e.to_string()))?;

        info!("Discovery started on {}", adapter.name());

        Ok(events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    match event {
                        AdapterEvent::DeviceAdded(addr) => match read_sighting(&adapter, addr).await
                        {
                            Ok(sighting) => Some(sighting),
                            Err(e) => {
                                warn!("Failed to read discovered device {}: {}", addr, e);
                                None
                            }
                        },
                        AdapterEvent::DeviceRemoved(addr) => {
                            debug!("Device removed: {}", addr);
                            None
                        }
                        _ => None,
                    }
                }
            })
            .boxed())
    }

    async fn open_stream(&self, address: DeviceAddress) -> BluetoothResult<Self::Stream> {
        self.adapter()?;

        let target = SocketAddr::new(address.into(), self.rfcomm_channel);
        debug!(
            "Opening RFCOMM stream to {} channel {}",
            address, self.rfcomm_channel
        );

        Stream::connect(target)
            .await
            .map_err(|e| BluetoothError::ConnectFailed(e.to_string()))
    }
}
