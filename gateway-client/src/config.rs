use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DEFAULT_GATEWAY_PORT, GATEWAY_SERVICE_TYPE, WIDE_AREA_DOMAIN};
use shared::tailnet::TailscaleCli;
use crate::discovery::dig::DigQuery;
use crate::discovery::mdns::MdnsBrowser;
use crate::discovery::{CombinedDiscovery, LocalDiscovery, WideAreaDiscovery, WideAreaSettings};
use crate::session::{CoordinatorSettings, ManualTarget, TcpTransport};
use crate::trust::TrustStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub trust: TrustConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub local: bool,
    #[serde(default = "default_true")]
    pub wide_area: bool,
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_wide_area_domain")]
    pub wide_area_domain: String,
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,
    /// Per DNS query, bounded by `timeout_ms`
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_dig_binary")]
    pub dig_binary: String,
    #[serde(default = "default_tailscale_binary")]
    pub tailscale_binary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    pub token: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub require_tls: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Skip discovery and always connect here
    pub manual: Option<ManualConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualConfig {
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrustConfig {
    #[serde(default = "default_trust_db")]
    pub db_path: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_service_type() -> String {
    GATEWAY_SERVICE_TYPE.to_string()
}

fn default_wide_area_domain() -> String {
    WIDE_AREA_DOMAIN.to_string()
}

fn default_discovery_timeout_ms() -> u64 {
    5000
}

fn default_query_timeout_ms() -> u64 {
    1000
}

fn default_dig_binary() -> String {
    "dig".to_string()
}

fn default_tailscale_binary() -> String {
    "tailscale".to_string()
}

fn default_role() -> String {
    "node".to_string()
}

fn default_client_id() -> String {
    "hearth-node".to_string()
}

fn default_display_name() -> String {
    "Hearth Node".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_trust_db() -> PathBuf {
    PathBuf::from("/var/lib/hearth/trust.db")
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            local: true,
            wide_area: true,
            service_type: default_service_type(),
            wide_area_domain: default_wide_area_domain(),
            timeout_ms: default_discovery_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            dig_binary: default_dig_binary(),
            tailscale_binary: default_tailscale_binary(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            scopes: Vec::new(),
            client_id: default_client_id(),
            display_name: default_display_name(),
            token: None,
            password: None,
            require_tls: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            manual: None,
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self { db_path: default_trust_db() }
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

        if let Some(manual) = &config.session.manual {
            if manual.port == 0 {
                anyhow::bail!("session.manual.port must be greater than zero");
            }
        }

        Ok(config)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        let session = &self.session;
        CoordinatorSettings {
            role: session.role.clone(),
            scopes: session.scopes.clone(),
            client_id: session.client_id.clone(),
            display_name: session.display_name.clone(),
            token: session.token.clone(),
            password: session.password.clone(),
            require_tls: session.require_tls,
            discovery_timeout: Duration::from_millis(self.discovery.timeout_ms),
            handshake_timeout: Duration::from_millis(session.handshake_timeout_ms),
            ..CoordinatorSettings::default()
        }
    }

    pub fn manual_target(&self) -> Option<ManualTarget> {
        self.session.manual.as_ref().map(|manual| ManualTarget {
            host: manual.host.clone(),
            port: manual.port,
            tls: manual.tls,
        })
    }

    pub fn wide_area_settings(&self) -> WideAreaSettings {
        WideAreaSettings {
            service_type: self.discovery.service_type.clone(),
            domain: self.discovery.wide_area_domain.clone(),
            query_timeout: Duration::from_millis(self.discovery.query_timeout_ms),
        }
    }

    /// Discovery as configured. Needs a runtime for the mDNS daemon.
    pub fn discovery(&self) -> Result<CombinedDiscovery> {
        let local = if self.discovery.local {
            let browser = MdnsBrowser::new().context("Failed to create mDNS browser")?;
            Some(LocalDiscovery::new(
                Arc::new(browser),
                self.discovery.service_type.clone(),
            ))
        } else {
            None
        };

        let wide_area = self.discovery.wide_area.then(|| {
            WideAreaDiscovery::new(
                Arc::new(TailscaleCli::new(
                    self.discovery.tailscale_binary.clone(),
                    Duration::from_secs(5),
                )),
                Arc::new(DigQuery::new(self.discovery.dig_binary.clone())),
                self.wide_area_settings(),
            )
        });

        Ok(CombinedDiscovery::new(local, wide_area))
    }

    pub fn trust_store(&self) -> Result<TrustStore> {
        TrustStore::open(&self.trust.db_path)
            .with_context(|| format!("Failed to open trust store {}", self.trust.db_path.display()))
    }

    pub fn transport(&self, trust: TrustStore) -> TcpTransport {
        TcpTransport::new(trust, Duration::from_millis(self.session.connect_timeout_ms))
    }
}
