//! Runtime capability guard
//!
//! Operations that touch the radio require one or more capabilities. The
//! guard starts from the set granted by configuration; grants can be
//! changed at runtime.

use std::{collections::HashSet, fmt, sync::Arc};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::error::{ServiceError, ServiceResult};

/// Capability required before certain operations succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Talk to paired devices, read names, open connections
    Connect,
    /// Run device discovery
    Scan,
    /// Change adapter power state
    Admin,
    /// Location access, needed for discovery
    Location,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Connect,
        Capability::Scan,
        Capability::Admin,
        Capability::Location,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Connect => "connect",
            Capability::Scan => "scan",
            Capability::Admin => "admin",
            Capability::Location => "location",
        };
        f.write_str(name)
    }
}

/// Capability guard shared by all core services
#[derive(Debug)]
pub struct PermissionGuard {
    granted: Arc<RwLock<HashSet<Capability>>>,
}

impl PermissionGuard {
    /// Create a guard with the given capabilities granted
    pub fn new(granted: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            granted: Arc::new(RwLock::new(granted.into_iter().collect())),
        }
    }

    /// Create a guard with every capability granted
    pub fn all_granted() -> Self {
        Self::new(Capability::ALL)
    }

    /// Fail with `PermissionDenied` unless every capability is granted
    pub async fn require(&self, capabilities: &[Capability]) -> ServiceResult<()> {
        let granted = self.granted.read().await;
        match capabilities.iter().find(|c| !granted.contains(*c)) {
            Some(missing) => {
                warn!("Permission denied, missing capability: {}", missing);
                Err(ServiceError::PermissionDenied(*missing))
            }
            None => Ok(()),
        }
    }

    /// Check a single capability
    pub async fn is_granted(&self, capability: Capability) -> bool {
        self.granted.read().await.contains(&capability)
    }

    pub async fn grant(&self, capability: Capability) {
        debug!("Granting capability: {}", capability);
        self.granted.write().await.insert(capability);
    }

    pub async fn revoke(&self, capability: Capability) {
        debug!("Revoking capability: {}", capability);
        self.granted.write().await.remove(&capability);
    }
}

impl Default for PermissionGuard {
    fn default() -> Self {
        Self::all_granted()
    }
}
