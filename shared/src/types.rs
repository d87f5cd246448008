use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// A raw discovery result, straight from the discovery transport.
/// Consumed immediately into a `GatewayBeacon`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Service type without domain, e.g. "_hearth-gw._tcp"
    pub service_type: String,

    /// Domain, e.g. "local." or "hearth.internal."
    pub domain: String,

    /// Instance name as advertised; may still carry `\NNN` escapes
    pub instance_name: String,

    /// Target host name, e.g. "studio.local."
    pub hostname: String,

    /// Resolved addresses
    pub addresses: Vec<IpAddr>,

    /// SRV port
    pub port: u16,

    /// TXT record key-value pairs
    pub txt: HashMap<String, String>,
}

/// Deduplication and lookup key for a discovered gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableEndpointId(String);

impl StableEndpointId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableEndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StableEndpointId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Parsed gateway advertisement metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayBeacon {
    pub display_name: String,

    /// Always > 0
    pub gateway_port: u16,

    pub tls_enabled: bool,

    /// Lowercase hex SHA-256 of the gateway certificate, when advertised
    pub tls_fingerprint_sha256: Option<String>,

    pub tailnet_dns: Option<String>,

    pub ssh_port: Option<u16>,

    pub cli_path: Option<String>,

    /// Informational, "gateway" for real gateways
    pub role: Option<String>,

    pub transport: Option<String>,
}

/// A beacon plus what the client needs to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredGateway {
    pub stable_id: StableEndpointId,

    pub domain: String,

    /// Address or host name to connect to
    pub host: String,

    pub beacon: GatewayBeacon,

    /// When this beacon was last produced by discovery
    pub last_seen: DateTime<Utc>,
}

impl DiscoveredGateway {
    pub fn port(&self) -> u16 {
        self.beacon.gateway_port
    }
}
