mod config;
mod mdns;
mod zone;
mod zone_manager;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use shared::tailnet::TailscaleCli;
use crate::config::Config;
use crate::zone_manager::ZoneAuthority;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gateway_authorityd=info"))
        )
        .init();

    tracing::info!("Starting gateway-authorityd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/hearth/authorityd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let hostname = hostname::get()
        .context("Failed to get system hostname")?
        .to_string_lossy()
        .split('.')
        .next()
        .unwrap_or_default()
        .to_string();

    // Write the zone once before advertising anything
    let overlay = Arc::new(TailscaleCli::new(
        config.zone.tailscale_binary.clone(),
        Duration::from_secs(5),
    ));
    let authority = Arc::new(ZoneAuthority::new(
        config.zone.clone(),
        config.gateway.clone(),
        hostname.clone(),
        overlay,
    ));
    let outcome = authority.refresh().await?;
    tracing::info!(
        "Zone {} at serial {} ({})",
        outcome.path.display(),
        outcome.serial,
        if outcome.changed { "written" } else { "unchanged" }
    );

    // Local-segment advertisement
    let mdns = if config.mdns.enabled {
        let mdns_daemon = ServiceDaemon::new()
            .context("Failed to create mDNS daemon")?;
        if let Some(interface) = &config.mdns.interface {
            mdns_daemon
                .disable_interface(mdns_sd::IfKind::All)
                .context("Failed to disable default interfaces")?;
            mdns_daemon
                .enable_interface(interface.as_str())
                .with_context(|| format!("Failed to enable interface {}", interface))?;
        }

        let beacon = config.gateway.beacon(&hostname);
        let service_info = mdns::advertise::register_gateway(
            &mdns_daemon,
            &config.mdns,
            &beacon,
            &hostname,
        )?;
        Some((mdns_daemon, service_info))
    } else {
        tracing::info!("mDNS advertisement disabled");
        None
    };

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn zone refresh task
    let zone_cancel = cancel.clone();
    let zone_authority = authority.clone();
    let zone_handle = tokio::spawn(async move {
        if let Err(e) = zone_manager::run(zone_authority, zone_cancel).await {
            tracing::error!("Zone manager error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();
    let _ = zone_handle.await;

    if let Some((mdns_daemon, service_info)) = mdns {
        if let Err(e) = mdns::advertise::unregister_gateway(&mdns_daemon, &service_info) {
            tracing::error!("Failed to unregister mDNS service: {}", e);
        }
        if let Err(e) = mdns_daemon.shutdown() {
            tracing::error!("Failed to shutdown mDNS daemon: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
