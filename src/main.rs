//! Bluetooth Device Service - Main Entry Point

use std::sync::Arc;

use bluetooth_device_service::{
    backend::BluerBackend,
    config::{CliArgs, Settings},
    core::service::BluetoothService,
    transport::unix_socket::UnixSocketServer,
};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bluetooth_device_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    info!(?args, "Starting Bluetooth device service");
    let settings = Settings::from(args);

    // Create Bluetooth backend
    let backend = Arc::new(
        BluerBackend::new(settings.adapter.as_deref(), settings.rfcomm_channel).await?,
    );
    info!("Bluetooth backend initialized");

    // Create Bluetooth device service
    let service = Arc::new(BluetoothService::new(
        backend,
        settings.permissions(),
        settings.service_config(),
    ));
    service.start().await?;

    // Start Unix socket transport
    let server = Arc::new(UnixSocketServer::new(
        settings.socket_path.clone(),
        settings.socket_mode,
        service.clone(),
    ));
    let listener = server.bind().await?;
    let server_task = {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!("Unix socket server error: {}", e);
            }
        })
    };

    info!("Service started successfully");
    notify_ready();

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        }
        result = shutdown_signal() => {
            match result {
                Ok(()) => info!("Received SIGTERM, shutting down gracefully"),
                Err(e) => warn!("Failed to listen for SIGTERM: {}", e),
            }
        }
    }

    info!("Shutting down...");
    server_task.abort();
    service.shutdown().await;
    server.cleanup().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    // On non-Unix platforms, just wait forever
    std::future::pending().await
}

#[cfg(feature = "systemd")]
fn notify_ready() {
    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        warn!("Failed to notify service manager: {}", e);
    }
}

#[cfg(not(feature = "systemd"))]
fn notify_ready() {}
