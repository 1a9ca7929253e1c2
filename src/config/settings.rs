//! Runtime settings

use std::time::Duration;

use crate::{
    config::CliArgs,
    core::{
        permissions::{Capability, PermissionGuard},
        service::ServiceConfig,
    },
};

const DEFAULT_SOCKET_MODE: u32 = 0o660;

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub adapter: Option<String>,
    pub socket_path: String,
    pub socket_mode: u32,
    pub discovery_timeout: Duration,
    pub connect_timeout: Duration,
    pub rfcomm_channel: u8,
    pub denied: Vec<Capability>,
    pub reject_concurrent_scan: bool,
}

impl Settings {
    /// Tunables for the core services
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            discovery_timeout: self.discovery_timeout,
            connect_timeout: self.connect_timeout,
            supersede_active_scan: !self.reject_concurrent_scan,
        }
    }

    /// Capability guard with every capability granted except the denied ones
    pub fn permissions(&self) -> PermissionGuard {
        PermissionGuard::new(
            Capability::ALL
                .into_iter()
                .filter(|capability| !self.denied.contains(capability)),
        )
    }
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        // Parse octal socket mode
        let socket_mode = u32::from_str_radix(&args.socket_mode, 8).unwrap_or(DEFAULT_SOCKET_MODE);

        Settings {
            adapter: args.adapter,
            socket_path: args.socket_path,
            socket_mode,
            discovery_timeout: Duration::from_secs(args.discovery_timeout_secs),
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            rfcomm_channel: args.rfcomm_channel,
            denied: args.deny,
            reject_concurrent_scan: args.reject_concurrent_scan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn settings(args: &[&str]) -> Settings {
        let mut argv = vec!["bluetooth-device-service"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv).into()
    }

    #[test]
    fn test_socket_mode_is_octal() {
        assert_eq!(settings(&["--socket-mode", "600"]).socket_mode, 0o600);
        assert_eq!(settings(&["--socket-mode", "999"]).socket_mode, 0o660);
    }

    #[test]
    fn test_service_config() {
        let config = settings(&[
            "--discovery-timeout-secs",
            "5",
            "--connect-timeout-secs",
            "3",
            "--reject-concurrent-scan",
        ])
        .service_config();

        assert_eq!(config.discovery_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert!(!config.supersede_active_scan);

        assert_eq!(settings(&[]).service_config(), ServiceConfig::default());
    }

    #[tokio::test]
    async fn test_denied_capabilities() {
        let guard = settings(&["--deny", "admin"]).permissions();

        assert!(guard.is_granted(Capability::Connect).await);
        assert!(guard.is_granted(Capability::Scan).await);
        assert!(guard.is_granted(Capability::Location).await);
        assert!(!guard.is_granted(Capability::Admin).await);
    }
}
