//! Gateway discovery: multicast on the local segment, unicast DNS-SD over
//! the overlay network as a fallback.

pub mod dig;
pub mod local;
pub mod mdns;
pub mod wide_area;

use std::collections::HashMap;
use std::time::Duration;
use async_trait::async_trait;
use tokio::time::Instant;
use shared::types::{DiscoveredGateway, StableEndpointId};

pub use local::{BrowseEvent, DiscoveryEvent, LocalDiscovery, ServiceBrowser};
pub use wide_area::{WideAreaDiscovery, WideAreaSettings};

/// What the session coordinator discovers through.
#[async_trait]
pub trait GatewayDiscovery: Send + Sync {
    /// Beacons found within `timeout`. Empty means nothing was found.
    async fn discover(&self, timeout: Duration) -> Vec<DiscoveredGateway>;
}

/// Sort by display name, then id, so results are deterministic.
pub(crate) fn sort_gateways(gateways: &mut [DiscoveredGateway]) {
    gateways.sort_by(|a, b| {
        a.beacon
            .display_name
            .cmp(&b.beacon.display_name)
            .then_with(|| a.stable_id.cmp(&b.stable_id))
    });
}

/// One entry per stable id; later entries replace earlier ones.
pub fn dedupe(gateways: Vec<DiscoveredGateway>) -> Vec<DiscoveredGateway> {
    let mut by_id: HashMap<StableEndpointId, DiscoveredGateway> = HashMap::new();
    for gateway in gateways {
        by_id.insert(gateway.stable_id.clone(), gateway);
    }
    let mut out: Vec<DiscoveredGateway> = by_id.into_values().collect();
    sort_gateways(&mut out);
    out
}

/// Local discovery first; wide-area only when the local segment is empty.
#[derive(Default)]
pub struct CombinedDiscovery {
    local: Option<LocalDiscovery>,
    wide_area: Option<WideAreaDiscovery>,
}

impl CombinedDiscovery {
    pub fn new(local: Option<LocalDiscovery>, wide_area: Option<WideAreaDiscovery>) -> Self {
        Self { local, wide_area }
    }
}

#[async_trait]
impl GatewayDiscovery for CombinedDiscovery {
    async fn discover(&self, timeout: Duration) -> Vec<DiscoveredGateway> {
        // One budget for both sources
        let deadline = Instant::now() + timeout;

        if let Some(local) = &self.local {
            let found = local.discover(timeout).await;
            if !found.is_empty() {
                return found;
            }
        }

        let Some(wide_area) = &self.wide_area else {
            return Vec::new();
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::debug!("Discovery budget spent on the local segment");
            return Vec::new();
        }
        match wide_area.discover(remaining).await {
            Ok(found) => {
                tracing::debug!("Wide-area discovery found {} gateway(s)", found.len());
                found
            }
            Err(e) => {
                tracing::warn!("Wide-area discovery failed: {}", e);
                Vec::new()
            }
        }
    }
}
