//! Overlay network (tailnet) status.
//!
//! Both the host daemon (its own addresses for the zone) and the client
//! (peer addresses to query) read the same `tailscale status --json` shape.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} did not answer within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("invalid overlay status payload: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One node of the overlay network.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverlayNode {
    #[serde(rename = "TailscaleIPs", default)]
    pub addresses: Vec<IpAddr>,

    #[serde(rename = "DNSName", default)]
    pub dns_name: String,

    #[serde(rename = "HostName", default)]
    pub host_name: String,
}

impl OverlayNode {
    pub fn ipv4(&self) -> Option<IpAddr> {
        self.addresses.iter().copied().find(IpAddr::is_ipv4)
    }

    pub fn ipv6(&self) -> Option<IpAddr> {
        self.addresses.iter().copied().find(IpAddr::is_ipv6)
    }

    /// Addresses with IPv4 first, original order otherwise kept.
    pub fn addresses_v4_first(&self) -> Vec<IpAddr> {
        let mut out: Vec<IpAddr> = self.addresses.iter().copied().filter(IpAddr::is_ipv4).collect();
        out.extend(self.addresses.iter().copied().filter(IpAddr::is_ipv6));
        out
    }

    /// DNS name without the trailing root dot
    pub fn dns_name(&self) -> Option<&str> {
        let trimmed = self.dns_name.trim().trim_end_matches('.');
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

/// This node plus its peers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverlayStatus {
    #[serde(rename = "Self", default)]
    pub self_node: Option<OverlayNode>,

    #[serde(rename = "Peer", default)]
    pub peers: BTreeMap<String, OverlayNode>,
}

impl OverlayStatus {
    pub fn parse(json: &str) -> Result<Self, OverlayError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn self_addresses(&self) -> &[IpAddr] {
        self.self_node
            .as_ref()
            .map(|node| node.addresses.as_slice())
            .unwrap_or(&[])
    }
}

/// Where overlay status comes from.
#[async_trait]
pub trait OverlayStatusSource: Send + Sync {
    async fn status(&self) -> Result<OverlayStatus, OverlayError>;
}

/// Reads status from the `tailscale` CLI.
#[derive(Debug, Clone)]
pub struct TailscaleCli {
    binary: String,
    timeout: Duration,
}

impl TailscaleCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl Default for TailscaleCli {
    fn default() -> Self {
        Self::new("tailscale", Duration::from_secs(5))
    }
}

#[async_trait]
impl OverlayStatusSource for TailscaleCli {
    async fn status(&self) -> Result<OverlayStatus, OverlayError> {
        let command = format!("{} status --json", self.binary);
        let output = tokio::process::Command::new(&self.binary)
            .args(["status", "--json"])
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(OverlayError::Spawn { command, source }),
            Err(_) => {
                return Err(OverlayError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(OverlayError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::debug!("Read overlay status ({} bytes)", output.stdout.len());
        OverlayStatus::parse(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = r#"{
        "Self": { "TailscaleIPs": ["100.69.232.64", "fd7a:115c:a1e0::1"], "DNSName": "laptop.tail-net.ts.net." },
        "Peer": {
            "nodekey:b": { "TailscaleIPs": ["fd7a:115c:a1e0::2", "100.123.224.76"], "HostName": "studio" },
            "nodekey:a": { "TailscaleIPs": [] }
        },
        "BackendState": "Running"
    }"#;

    #[test]
    fn test_parse_status() {
        let status = OverlayStatus::parse(STATUS).unwrap();
        assert_eq!(status.self_addresses().len(), 2);
        assert_eq!(status.peers.len(), 2);

        let me = status.self_node.as_ref().unwrap();
        assert_eq!(me.ipv4(), Some("100.69.232.64".parse().unwrap()));
        assert_eq!(me.dns_name(), Some("laptop.tail-net.ts.net"));
    }

    #[test]
    fn test_peer_addresses_prefer_ipv4() {
        let status = OverlayStatus::parse(STATUS).unwrap();
        let studio = &status.peers["nodekey:b"];
        let ordered = studio.addresses_v4_first();
        assert_eq!(ordered[0], "100.123.224.76".parse::<IpAddr>().unwrap());
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(OverlayStatus::parse("not json"), Err(OverlayError::Parse(_))));
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let status = OverlayStatus::parse("{}").unwrap();
        assert!(status.self_addresses().is_empty());
        assert!(status.peers.is_empty());
    }
}
