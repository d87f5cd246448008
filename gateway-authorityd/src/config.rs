use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DEFAULT_GATEWAY_PORT, WIDE_AREA_ZONE_FILENAME};
use shared::types::GatewayBeacon;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub zone: ZoneConfig,
    #[serde(default)]
    pub mdns: MdnsConfig,
}

/// What the gateway advertises about itself
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub tls_enabled: bool,
    pub tls_fingerprint_sha256: Option<String>,
    pub tailnet_dns: Option<String>,
    pub ssh_port: Option<u16>,
    pub cli_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    #[serde(default = "default_zone_path")]
    pub path: PathBuf,
    pub host_label: Option<String>,
    pub instance_label: Option<String>,
    /// Falls back to the overlay status when unset
    pub tailnet_ipv4: Option<Ipv4Addr>,
    pub tailnet_ipv6: Option<Ipv6Addr>,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_tailscale_binary")]
    pub tailscale_binary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MdnsConfig {
    #[serde(default = "default_mdns_enabled")]
    pub enabled: bool,
    /// Restrict advertisement to one interface
    pub interface: Option<String>,
    /// Advertised addresses; auto-detected when empty
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
}

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_zone_path() -> PathBuf {
    PathBuf::from("/var/lib/hearth/dns").join(WIDE_AREA_ZONE_FILENAME)
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_tailscale_binary() -> String {
    "tailscale".to_string()
}

fn default_mdns_enabled() -> bool {
    true
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            path: default_zone_path(),
            host_label: None,
            instance_label: None,
            tailnet_ipv4: None,
            tailnet_ipv6: None,
            refresh_interval_secs: default_refresh_interval(),
            tailscale_binary: default_tailscale_binary(),
        }
    }
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            enabled: default_mdns_enabled(),
            interface: None,
            addresses: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Beacon fields for this gateway; a blank display name becomes `hostname`.
    pub fn beacon(&self, hostname: &str) -> GatewayBeacon {
        let display_name = match self.display_name.trim() {
            "" => hostname.to_string(),
            name => name.to_string(),
        };
        GatewayBeacon {
            display_name,
            gateway_port: self.port,
            tls_enabled: self.tls_enabled,
            tls_fingerprint_sha256: self.tls_fingerprint_sha256.clone(),
            tailnet_dns: self.tailnet_dns.clone(),
            ssh_port: self.ssh_port,
            cli_path: self.cli_path.clone(),
            role: None,
            transport: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.gateway.port == 0 {
            anyhow::bail!("gateway.port must be greater than zero");
        }

        Ok(config)
    }
}
