//! Domain types for Bluetooth device management

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::{
    classifier::{Category, classify},
    error::ServiceError,
};

/// Bluetooth hardware address of a remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = ServiceError;

    /// Parse `XX:XX:XX:XX:XX:XX` (hex digits, any case)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ServiceError::InvalidAddress(s.to_string());

        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Power state of the local Bluetooth adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Off,
    TurningOn,
    On,
    TurningOff,
    Unavailable,
}

impl AdapterState {
    pub fn is_on(&self) -> bool {
        matches!(self, AdapterState::On)
    }
}

/// Adapter state change as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterStateEvent {
    pub state: AdapterState,
    pub enabled: bool,
}

impl From<AdapterState> for AdapterStateEvent {
    fn from(state: AdapterState) -> Self {
        Self {
            state,
            enabled: state.is_on(),
        }
    }
}

/// Raw device observation reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSighting {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub class_code: Option<u32>,
    pub bonded: bool,
    pub rssi: Option<i16>,
}

impl DeviceSighting {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            name: None,
            class_code: None,
            bonded: false,
            rssi: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_class(mut self, class_code: u32) -> Self {
        self.class_code = Some(class_code);
        self
    }

    pub fn bonded(mut self) -> Self {
        self.bonded = true;
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Known remote device
///
/// Identity is the address; every other field is a snapshot refreshed on
/// each sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub address: DeviceAddress,
    pub display_name: Option<String>,
    pub class_code: u32,
    pub bonded: bool,
    pub rssi: Option<i16>,
    pub last_seen: SystemTime,
}

impl DeviceRecord {
    /// Placeholder for an address the registry has never seen
    pub fn unknown(address: DeviceAddress) -> Self {
        Self {
            address,
            display_name: None,
            class_code: 0,
            bonded: false,
            rssi: None,
            last_seen: SystemTime::now(),
        }
    }

    /// Semantic category, recomputed from class code and name
    pub fn category(&self) -> Category {
        classify(self.class_code, self.display_name.as_deref())
    }

    /// Milliseconds since the Unix epoch of the last sighting
    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Why a discovery session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "message")]
pub enum FinishReason {
    Completed,
    Cancelled,
    Failed(String),
}

/// Connection state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Reason a connection attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    Timeout,
    Transport(String),
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectFailure::Timeout => write!(f, "connection attempt timed out"),
            ConnectFailure::Transport(reason) => write!(f, "{reason}"),
        }
    }
}

impl From<ConnectFailure> for ServiceError {
    fn from(failure: ConnectFailure) -> Self {
        match failure {
            ConnectFailure::Timeout => ServiceError::Timeout,
            ConnectFailure::Transport(reason) => ServiceError::ConnectFailed(reason),
        }
    }
}

/// Connection status for a single device address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub address: DeviceAddress,
    pub state: ConnectionState,
    pub failure: Option<ConnectFailure>,
}

impl ConnectionStatus {
    pub fn new(address: DeviceAddress, state: ConnectionState) -> Self {
        Self {
            address,
            state,
            failure: None,
        }
    }

    pub fn failed(address: DeviceAddress, failure: ConnectFailure) -> Self {
        Self {
            address,
            state: ConnectionState::Failed,
            failure: Some(failure),
        }
    }
}

/// Identifier for discovery sessions, connection attempts and client sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
