use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use chrono::Utc;
use shared::tailnet::OverlayStatusSource;
use crate::config::{GatewayConfig, ZoneConfig};
use crate::zone::{self, ZoneOptions, ZoneWriteOutcome};

/// Owns the zone file on this host. Single writer: one refresh at a time.
pub struct ZoneAuthority {
    zone: ZoneConfig,
    gateway: GatewayConfig,
    hostname: String,
    overlay: Arc<dyn OverlayStatusSource>,
    write_lock: tokio::sync::Mutex<()>,
}

impl ZoneAuthority {
    pub fn new(
        zone: ZoneConfig,
        gateway: GatewayConfig,
        hostname: String,
        overlay: Arc<dyn OverlayStatusSource>,
    ) -> Self {
        Self {
            zone,
            gateway,
            hostname,
            overlay,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Zone inputs. Configured addresses win; otherwise this node's entry
    /// in the overlay status supplies them (and the tailnet DNS name).
    async fn zone_options(&self) -> Result<ZoneOptions> {
        let mut beacon = self.gateway.beacon(&self.hostname);

        let (ipv4, ipv6) = match self.zone.tailnet_ipv4 {
            Some(ipv4) => (ipv4, self.zone.tailnet_ipv6),
            None => {
                let status = self
                    .overlay
                    .status()
                    .await
                    .context("Failed to read overlay status for tailnet addresses")?;
                let me = status
                    .self_node
                    .context("Overlay status has no entry for this node")?;

                if beacon.tailnet_dns.is_none() {
                    beacon.tailnet_dns = me.dns_name().map(str::to_string);
                }

                let ipv4 = match me.ipv4() {
                    Some(IpAddr::V4(ip)) => ip,
                    _ => anyhow::bail!("Overlay status lists no IPv4 address for this node"),
                };
                let ipv6 = self.zone.tailnet_ipv6.or_else(|| match me.ipv6() {
                    Some(IpAddr::V6(ip)) => Some(ip),
                    _ => None,
                });
                (ipv4, ipv6)
            }
        };

        Ok(self.options(beacon, ipv4, ipv6))
    }

    fn options(&self, beacon: shared::types::GatewayBeacon, ipv4: Ipv4Addr, ipv6: Option<Ipv6Addr>) -> ZoneOptions {
        ZoneOptions {
            beacon,
            tailnet_ipv4: ipv4,
            tailnet_ipv6: ipv6,
            system_hostname: self.hostname.clone(),
            host_label: self.zone.host_label.clone(),
            instance_label: self.zone.instance_label.clone(),
        }
    }

    /// Render and write the zone if its content changed.
    pub async fn refresh(&self) -> Result<ZoneWriteOutcome> {
        let _guard = self.write_lock.lock().await;
        let opts = self.zone_options().await?;
        let path = self.zone.path.clone();
        let today = Utc::now().date_naive();

        let outcome = tokio::task::spawn_blocking(move || zone::write_zone(&path, &opts, today))
            .await
            .context("Zone writer task failed")??;
        Ok(outcome)
    }
}

/// Zone refresh loop - rewrites the zone on an interval until cancelled
pub async fn run(authority: Arc<ZoneAuthority>, cancel: CancellationToken) -> Result<()> {
    let mut refresh_interval = tokio::time::interval(
        std::time::Duration::from_secs(authority.zone.refresh_interval_secs.max(1))
    );
    // The first tick fires immediately; startup already wrote the zone.
    refresh_interval.tick().await;

    loop {
        tokio::select! {
            _ = refresh_interval.tick() => {
                match authority.refresh().await {
                    Ok(outcome) if outcome.changed => {
                        tracing::info!("Zone updated to serial {}", outcome.serial);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Failed to refresh zone: {:#}", e);
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Zone manager shutting down");
                break;
            }
        }
    }

    Ok(())
}
