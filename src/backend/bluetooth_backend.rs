//! Bluetooth backend trait definition

use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};
use trait_variant::make;

use crate::core::error::BluetoothResult;
use crate::core::types::{DeviceAddress, DeviceSighting};

/// Stream of adapter power reports (`true` = powered)
pub type PowerEvents = BoxStream<'static, bool>;

/// Stream of raw device sightings while discovery runs
pub type SightingStream = BoxStream<'static, DeviceSighting>;

/// Abstraction over the operating system's Bluetooth stack (typically BlueZ)
///
/// This trait enables testing by allowing mock implementations
/// while providing a standard interface for adapter operations.
/// Every method fails with `BluetoothError::NoAdapter` when no radio is
/// present.
#[make(Send)]
pub trait BluetoothBackend: Send + Sync + 'static {
    /// Transport returned by [`open_stream`](Self::open_stream)
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Whether the adapter is currently powered
    async fn is_powered(&self) -> BluetoothResult<bool>;

    /// Request a power change; completion is reported through
    /// [`power_events`](Self::power_events)
    async fn set_powered(&self, powered: bool) -> BluetoothResult<()>;

    /// Subscribe to power state reports
    ///
    /// Dropping the stream unregisters the observer.
    async fn power_events(&self) -> BluetoothResult<PowerEvents>;

    /// Devices with an established bond
    async fn bonded_devices(&self) -> BluetoothResult<Vec<DeviceSighting>>;

    /// Start discovery
    ///
    /// Discovery runs for as long as the returned stream is alive.
    async fn discover(&self) -> BluetoothResult<SightingStream>;

    /// Open a stream-oriented session to a remote device
    async fn open_stream(&self, address: DeviceAddress) -> BluetoothResult<Self::Stream>;
}
