use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use shared::identity::{decode, stable_id, Endpoint};
use shared::txt::beacon_from_txt;
use shared::types::{DiscoveredGateway, ServiceRecord, StableEndpointId};
use crate::error::DiscoveryError;
use super::{sort_gateways, GatewayDiscovery};

/// What a service browser reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    Resolved(ServiceRecord),
    Removed {
        service_type: String,
        domain: String,
        instance_name: String,
    },
}

pub type BrowseStream = BoxStream<'static, BrowseEvent>;

/// OS-level multicast service discovery.
pub trait ServiceBrowser: Send + Sync {
    /// Start browsing `service_type` (e.g. "_hearth-gw._tcp"). The stream
    /// stays open until the browser stops.
    fn browse(&self, service_type: &str) -> Result<BrowseStream, DiscoveryError>;
}

/// Add/remove events, keyed by stable id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added(DiscoveredGateway),
    Removed(StableEndpointId),
}

/// Gateway discovery on the local segment.
pub struct LocalDiscovery {
    browser: Arc<dyn ServiceBrowser>,
    service_type: String,
}

impl LocalDiscovery {
    pub fn new(browser: Arc<dyn ServiceBrowser>, service_type: impl Into<String>) -> Self {
        Self {
            browser,
            service_type: service_type.into(),
        }
    }

    /// Browser failures only mean "nothing found".
    fn open(&self) -> Option<BrowseStream> {
        match self.browser.browse(&self.service_type) {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!("Local discovery unavailable: {}", e);
                None
            }
        }
    }

    /// Browse for at most `timeout` and return everything still present.
    pub async fn discover(&self, timeout: Duration) -> Vec<DiscoveredGateway> {
        let Some(mut stream) = self.open() else {
            return Vec::new();
        };

        let deadline = tokio::time::Instant::now() + timeout;
        let mut found: HashMap<StableEndpointId, DiscoveredGateway> = HashMap::new();

        loop {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(event)) => match to_discovery_event(event) {
                    Some(DiscoveryEvent::Added(gateway)) => {
                        found.insert(gateway.stable_id.clone(), gateway);
                    }
                    Some(DiscoveryEvent::Removed(id)) => {
                        found.remove(&id);
                    }
                    None => {}
                },
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!("Local discovery window closed with {} gateway(s)", found.len());
                    break;
                }
            }
        }

        let mut gateways: Vec<DiscoveredGateway> = found.into_values().collect();
        sort_gateways(&mut gateways);
        gateways
    }

    /// Long-lived listener. Events flow until `cancel` fires or the browser
    /// ends; call again to restart.
    pub fn watch(&self, cancel: CancellationToken) -> mpsc::Receiver<DiscoveryEvent> {
        let (tx, rx) = mpsc::channel(64);
        let Some(mut stream) = self.open() else {
            return rx;
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = stream.next() => {
                        let Some(event) = event else {
                            tracing::debug!("Local browse stream ended");
                            break;
                        };
                        if let Some(event) = to_discovery_event(event) {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::debug!("Local discovery watcher shutting down");
                        break;
                    }
                }
            }
        });

        rx
    }
}

#[async_trait]
impl GatewayDiscovery for LocalDiscovery {
    async fn discover(&self, timeout: Duration) -> Vec<DiscoveredGateway> {
        LocalDiscovery::discover(self, timeout).await
    }
}

fn to_discovery_event(event: BrowseEvent) -> Option<DiscoveryEvent> {
    match event {
        BrowseEvent::Resolved(record) => {
            let gateway = gateway_from_record(&record);
            if gateway.is_none() {
                tracing::debug!("Skipping {} - no usable gateway port", record.instance_name);
            }
            gateway.map(DiscoveryEvent::Added)
        }
        BrowseEvent::Removed { service_type, domain, instance_name } => Some(DiscoveryEvent::Removed(
            stable_id(&service_type, &domain, &decode(&instance_name)),
        )),
    }
}

/// Record -> gateway. The connect host prefers an IPv4 address, then IPv6,
/// then the advertised host name.
pub fn gateway_from_record(record: &ServiceRecord) -> Option<DiscoveredGateway> {
    let beacon = beacon_from_txt(&record.txt, &record.instance_name, record.port)?;

    let host = record
        .addresses
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| record.addresses.first())
        .map(IpAddr::to_string)
        .unwrap_or_else(|| record.hostname.trim_end_matches('.').to_string());
    if host.is_empty() {
        return None;
    }

    Some(DiscoveredGateway {
        stable_id: Endpoint::from(record).stable_id(),
        domain: record.domain.clone(),
        host,
        beacon,
        last_seen: Utc::now(),
    })
}
