use std::collections::HashMap;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use anyhow::{Context, Result};
use shared::protocol::mdns_service_type;
use shared::txt::beacon_txt_pairs;
use shared::types::GatewayBeacon;
use crate::config::MdnsConfig;

/// Advertise the gateway beacon on the local segment.
pub fn register_gateway(
    daemon: &ServiceDaemon,
    config: &MdnsConfig,
    beacon: &GatewayBeacon,
    hostname: &str,
) -> Result<ServiceInfo> {
    let service_type = mdns_service_type();
    let host_name = format!("{}.local.", hostname.split('.').next().unwrap_or(hostname));

    // Same fields the wide-area zone carries in its TXT record
    let txt_records: HashMap<String, String> = beacon_txt_pairs(beacon).into_iter().collect();

    let mut service_info = ServiceInfo::new(
        &service_type,
        &beacon.display_name,
        &host_name,
        &config.addresses[..],
        beacon.gateway_port,
        txt_records,
    )
    .context("Failed to create ServiceInfo")?;

    if config.addresses.is_empty() {
        service_info = service_info.enable_addr_auto();
    }

    daemon
        .register(service_info.clone())
        .context("Failed to register mDNS service")?;

    tracing::info!(
        "Registered {} as {} on port {}",
        service_type,
        beacon.display_name,
        beacon.gateway_port
    );

    Ok(service_info)
}

pub fn unregister_gateway(daemon: &ServiceDaemon, service_info: &ServiceInfo) -> Result<()> {
    daemon
        .unregister(service_info.get_fullname())
        .context("Failed to unregister mDNS service")?;

    tracing::info!("Unregistered {}", service_info.get_fullname());
    Ok(())
}
