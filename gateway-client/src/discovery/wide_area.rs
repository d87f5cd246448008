use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use shared::identity::{decode, normalize_service_domain, stable_id};
use shared::protocol::{GATEWAY_SERVICE_TYPE, WIDE_AREA_DOMAIN};
use shared::tailnet::OverlayStatusSource;
use shared::txt::{beacon_from_txt, parse_txt};
use shared::types::DiscoveredGateway;
use crate::error::DiscoveryError;
use super::dig::{DnsQuery, RecordType};
use super::{dedupe, GatewayDiscovery};

#[derive(Debug, Clone)]
pub struct WideAreaSettings {
    pub service_type: String,
    pub domain: String,
    /// Upper bound for a single DNS query; never past the overall deadline
    pub query_timeout: Duration,
}

impl Default for WideAreaSettings {
    fn default() -> Self {
        Self {
            service_type: GATEWAY_SERVICE_TYPE.to_string(),
            domain: WIDE_AREA_DOMAIN.to_string(),
            query_timeout: Duration::from_secs(1),
        }
    }
}

/// Unicast DNS-SD against every overlay peer.
///
/// Each peer may run the zone authority and answer for the wide-area domain
/// itself, so every peer address doubles as a resolver.
pub struct WideAreaDiscovery {
    overlay: Arc<dyn OverlayStatusSource>,
    dns: Arc<dyn DnsQuery>,
    settings: WideAreaSettings,
}

impl WideAreaDiscovery {
    pub fn new(
        overlay: Arc<dyn OverlayStatusSource>,
        dns: Arc<dyn DnsQuery>,
        settings: WideAreaSettings,
    ) -> Self {
        Self { overlay, dns, settings }
    }

    /// Only an unreadable overlay status is an error. Peers that fail are
    /// dropped; peers still outstanding at the deadline are abandoned.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredGateway>, DiscoveryError> {
        let deadline = Instant::now() + timeout;

        let status = match tokio::time::timeout_at(deadline, self.overlay.status()).await {
            Ok(status) => status?,
            Err(_) => return Err(DiscoveryError::Timeout(timeout)),
        };

        let own: HashSet<IpAddr> = status.self_addresses().iter().copied().collect();
        let mut tasks = JoinSet::new();

        for (key, peer) in &status.peers {
            if peer.addresses.iter().any(|addr| own.contains(addr)) {
                tracing::debug!("Skipping peer {} - shares an address with this node", key);
                continue;
            }
            let addresses = peer.addresses_v4_first();
            if addresses.is_empty() {
                continue;
            }

            let probe = PeerProbe {
                dns: self.dns.clone(),
                settings: self.settings.clone(),
                deadline,
            };
            tasks.spawn(async move { probe.resolve(addresses).await });
        }

        tracing::debug!("Querying {} overlay peer(s)", tasks.len());

        let mut found = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(Some(gateway)))) => found.push(gateway),
                Ok(Some(Ok(None))) => {}
                Ok(Some(Err(e))) => {
                    tracing::warn!("Peer query task failed: {}", e);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(
                        "{}; keeping {} result(s), abandoning {} peer(s)",
                        DiscoveryError::Timeout(timeout),
                        found.len(),
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        Ok(dedupe(found))
    }
}

#[async_trait]
impl GatewayDiscovery for WideAreaDiscovery {
    async fn discover(&self, timeout: Duration) -> Vec<DiscoveredGateway> {
        match WideAreaDiscovery::discover(self, timeout).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Wide-area discovery failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Queries for one peer, run inside its own task.
struct PeerProbe {
    dns: Arc<dyn DnsQuery>,
    settings: WideAreaSettings,
    deadline: Instant,
}

impl PeerProbe {
    async fn resolve(&self, addresses: Vec<IpAddr>) -> Option<DiscoveredGateway> {
        for nameserver in addresses {
            match self.query_peer(nameserver).await {
                Ok(Some(gateway)) => return Some(gateway),
                Ok(None) => {
                    tracing::debug!("No gateway advertised by {}", nameserver);
                }
                Err(e) => {
                    tracing::debug!("Peer {} skipped: {}", nameserver, e);
                }
            }
        }
        None
    }

    async fn query_peer(&self, nameserver: IpAddr) -> Result<Option<DiscoveredGateway>, DiscoveryError> {
        let service = format!(
            "{}.{}",
            self.settings.service_type,
            normalize_service_domain(&self.settings.domain)
        );

        let ptr = self.query(nameserver, &service, RecordType::Ptr).await?;
        let Some(instance_fqdn) = first_line(&ptr) else {
            return Ok(None);
        };
        let Some((instance, domain)) = split_instance(instance_fqdn, &self.settings.service_type) else {
            return Err(malformed(nameserver, instance_fqdn, RecordType::Ptr, "not an instance of the gateway service"));
        };

        let srv = self.query(nameserver, instance_fqdn, RecordType::Srv).await?;
        let port = first_line(&srv).and_then(srv_port).unwrap_or(0);

        let txt = self.query(nameserver, instance_fqdn, RecordType::Txt).await?;
        let joined = txt.lines().map(str::trim).collect::<Vec<_>>().join(" ");
        let Some(fields) = parse_txt(&joined) else {
            return Err(malformed(nameserver, instance_fqdn, RecordType::Txt, "unterminated quote"));
        };

        let Some(beacon) = beacon_from_txt(&fields, &instance, port) else {
            return Err(malformed(nameserver, instance_fqdn, RecordType::Txt, "no usable gateway port"));
        };

        Ok(Some(DiscoveredGateway {
            stable_id: stable_id(&self.settings.service_type, &domain, &decode(&instance)),
            domain,
            host: nameserver.to_string(),
            beacon,
            last_seen: Utc::now(),
        }))
    }

    async fn query(&self, nameserver: IpAddr, name: &str, record: RecordType) -> Result<String, DiscoveryError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(DiscoveryError::Timeout(self.settings.query_timeout));
        }
        let budget = self.settings.query_timeout.min(remaining);

        match tokio::time::timeout(budget, self.dns.query(nameserver, name, record, budget)).await {
            Ok(answer) => answer,
            Err(_) => Err(DiscoveryError::DnsQuery {
                nameserver,
                name: name.to_string(),
                record,
                message: format!("no answer within {:?}", budget),
            }),
        }
    }
}

fn malformed(nameserver: IpAddr, name: &str, record: RecordType, message: &str) -> DiscoveryError {
    DiscoveryError::DnsQuery {
        nameserver,
        name: name.to_string(),
        record,
        message: message.to_string(),
    }
}

fn first_line(answer: &str) -> Option<&str> {
    answer.lines().map(str::trim).find(|line| !line.is_empty())
}

/// "studio-gateway._hearth-gw._tcp.hearth.internal." -> ("studio-gateway", "hearth.internal.")
fn split_instance(fqdn: &str, service_type: &str) -> Option<(String, String)> {
    let marker = format!(".{}.", service_type);
    let at = fqdn.find(&marker)?;
    let instance = &fqdn[..at];
    let domain = &fqdn[at + marker.len()..];
    if instance.is_empty() || domain.is_empty() {
        return None;
    }
    Some((instance.to_string(), normalize_service_domain(domain)))
}

/// "0 0 18789 studio.hearth.internal." -> 18789
fn srv_port(line: &str) -> Option<u16> {
    line.split_whitespace().nth(2)?.parse().ok()
}
