//! Command-line argument parsing

use clap::Parser;

use crate::{
    backend::bluer_backend::DEFAULT_RFCOMM_CHANNEL,
    core::{
        permissions::Capability,
        service::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_DISCOVERY_TIMEOUT},
    },
};

#[derive(Parser, Debug, Clone)]
#[clap(name = "bluetooth-device-service", version, author)]
#[clap(about = "Bluetooth Classic device service with a Unix socket JSON-RPC interface")]
pub struct CliArgs {
    /// Bluetooth adapter name (e.g. hci0), the default adapter when omitted
    #[clap(short, long)]
    pub adapter: Option<String>,

    /// Path for Unix socket
    #[clap(long, default_value = "/run/bluetooth-device-service.sock")]
    pub socket_path: String,

    /// Socket file permissions (octal, e.g., 660)
    #[clap(long, default_value = "660")]
    pub socket_mode: String,

    /// Duration of a discovery session in seconds
    #[clap(long, default_value_t = DEFAULT_DISCOVERY_TIMEOUT.as_secs())]
    pub discovery_timeout_secs: u64,

    /// Bound on opening a device connection in seconds
    #[clap(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    pub connect_timeout_secs: u64,

    /// RFCOMM channel used for device connections
    #[clap(long, default_value_t = DEFAULT_RFCOMM_CHANNEL)]
    pub rfcomm_channel: u8,

    /// Capability to withhold from clients (repeatable)
    #[clap(long = "deny", value_enum)]
    pub deny: Vec<Capability>,

    /// Reject a scan request while another discovery runs instead of restarting it
    #[clap(long)]
    pub reject_concurrent_scan: bool,
}
