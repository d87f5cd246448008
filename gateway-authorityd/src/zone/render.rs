use std::net::{Ipv4Addr, Ipv6Addr};
use shared::protocol::{GATEWAY_SERVICE_TYPE, WIDE_AREA_DOMAIN, ZONE_HASH_COMMENT};
use shared::txt::{beacon_txt_pairs, quote_txt_value};
use shared::types::GatewayBeacon;
use super::hash::content_hash;

const MAX_LABEL_LEN: usize = 63;
const SERIAL_PLACEHOLDER: &str = "SERIAL";
const FALLBACK_HOST_LABEL: &str = "hearth";
const FALLBACK_INSTANCE_LABEL: &str = "hearth-gw";

/// Everything that ends up in the wide-area zone.
#[derive(Debug, Clone)]
pub struct ZoneOptions {
    pub beacon: GatewayBeacon,
    pub tailnet_ipv4: Ipv4Addr,
    pub tailnet_ipv6: Option<Ipv6Addr>,
    /// Short system host name, used for label defaults
    pub system_hostname: String,
    pub host_label: Option<String>,
    pub instance_label: Option<String>,
}

/// A rendered zone: file text, embedded content hash, SOA serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneState {
    pub text: String,
    pub hash: String,
    pub serial: u32,
}

/// Sanitize to a DNS label: `[a-z0-9-]`, no leading/trailing hyphen, at most
/// 63 characters, `fallback` when nothing usable is left.
pub fn dns_label(raw: &str, fallback: &str) -> String {
    let mut label = String::with_capacity(raw.len());
    let mut pending_hyphen = false;
    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            if pending_hyphen {
                label.push('-');
                pending_hyphen = false;
            }
            label.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    let trimmed = label.trim_matches('-');
    let out = if trimmed.is_empty() { fallback } else { trimmed };
    out.chars().take(MAX_LABEL_LEN).collect()
}

fn soa_line(serial: &str) -> String {
    format!("@ IN SOA ns1 hostmaster {} 7200 3600 1209600 60", serial)
}

fn records(opts: &ZoneOptions, serial: &str) -> Vec<String> {
    let host = opts.system_hostname.split('.').next().unwrap_or_default();
    let host_label = dns_label(opts.host_label.as_deref().unwrap_or(host), FALLBACK_HOST_LABEL);
    let instance_label = match opts.instance_label.as_deref() {
        Some(label) => dns_label(label, FALLBACK_INSTANCE_LABEL),
        None => dns_label(&format!("{}-gateway", host), FALLBACK_INSTANCE_LABEL),
    };

    let mut beacon = opts.beacon.clone();
    if beacon.display_name.trim().is_empty() {
        beacon.display_name = host.to_string();
    }
    let txt = beacon_txt_pairs(&beacon)
        .iter()
        .map(|(key, value)| quote_txt_value(&format!("{}={}", key, value)))
        .collect::<Vec<_>>()
        .join(" ");

    let service = GATEWAY_SERVICE_TYPE;
    let mut records = vec![
        format!("$ORIGIN {}", WIDE_AREA_DOMAIN),
        "$TTL 60".to_string(),
        soa_line(serial),
        "@ IN NS ns1".to_string(),
        format!("ns1 IN A {}", opts.tailnet_ipv4),
        format!("{} IN A {}", host_label, opts.tailnet_ipv4),
    ];
    if let Some(ipv6) = opts.tailnet_ipv6 {
        records.push(format!("{} IN AAAA {}", host_label, ipv6));
    }
    records.push(format!("{service} IN PTR {instance_label}.{service}"));
    records.push(format!(
        "{instance_label}.{service} IN SRV 0 0 {} {host_label}",
        opts.beacon.gateway_port
    ));
    records.push(format!("{instance_label}.{service} IN TXT {txt}"));
    records
}

fn body(records: &[String]) -> String {
    let mut body = records.join("\n");
    body.push('\n');
    body
}

/// Render the zone. The content hash is taken over the body rendered with a
/// placeholder serial so that only semantic changes move it.
pub fn render_zone(opts: &ZoneOptions, serial: u32) -> ZoneState {
    let hash = content_hash(&body(&records(opts, SERIAL_PLACEHOLDER)));
    let content = body(&records(opts, &serial.to_string()));
    ZoneState {
        text: format!("; {}: {}\n{}", ZONE_HASH_COMMENT, hash, content),
        hash,
        serial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn studio() -> ZoneOptions {
        ZoneOptions {
            beacon: GatewayBeacon {
                display_name: "Mac Studio (Hearth)".to_string(),
                gateway_port: 18789,
                tls_enabled: false,
                tls_fingerprint_sha256: None,
                tailnet_dns: None,
                ssh_port: Some(22),
                cli_path: Some("/opt/homebrew/bin/hearth".to_string()),
                role: None,
                transport: None,
            },
            tailnet_ipv4: Ipv4Addr::new(100, 123, 224, 76),
            tailnet_ipv6: Some("fd7a:115c:a1e0::8801:e04c".parse().unwrap()),
            system_hostname: "studio.lan".to_string(),
            host_label: Some("studio-london".to_string()),
            instance_label: Some("studio-london".to_string()),
        }
    }

    #[test]
    fn test_renders_gateway_records() {
        let zone = render_zone(&studio(), 2025121701);
        let txt = &zone.text;

        assert!(txt.starts_with(&format!("; hearth-content-hash: {}\n", zone.hash)));
        assert!(txt.contains("$ORIGIN hearth.internal."));
        assert!(txt.contains("@ IN SOA ns1 hostmaster 2025121701 7200 3600 1209600 60"));
        assert!(txt.contains("studio-london IN A 100.123.224.76"));
        assert!(txt.contains("studio-london IN AAAA fd7a:115c:a1e0::8801:e04c"));
        assert!(txt.contains("_hearth-gw._tcp IN PTR studio-london._hearth-gw._tcp"));
        assert!(txt.contains("studio-london._hearth-gw._tcp IN SRV 0 0 18789 studio-london"));
        assert!(txt.contains("\"displayName=Mac Studio (Hearth)\""));
        assert!(txt.contains("\"role=gateway\" \"transport=gateway\" \"gatewayPort=18789\""));
        assert!(txt.contains("\"sshPort=22\""));
        assert!(txt.contains("\"cliPath=/opt/homebrew/bin/hearth\""));
        assert!(!txt.contains("gatewayTls"));
    }

    #[test]
    fn test_includes_tls_and_tailnet_dns() {
        let mut opts = studio();
        opts.beacon.tls_enabled = true;
        opts.beacon.tls_fingerprint_sha256 = Some("ab".repeat(32));
        opts.beacon.tailnet_dns = Some("studio-1.sheep-coho.ts.net".to_string());

        let txt = render_zone(&opts, 1).text;
        assert!(txt.contains("\"gatewayTls=1\""));
        assert!(txt.contains(&format!("\"gatewayTlsSha256={}\"", "ab".repeat(32))));
        assert!(txt.contains("\"tailnetDns=studio-1.sheep-coho.ts.net\""));
    }

    #[test]
    fn test_hash_ignores_serial() {
        let a = render_zone(&studio(), 2026011001);
        let b = render_zone(&studio(), 2026011002);
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.text, b.text);

        let mut changed = studio();
        changed.beacon.gateway_port = 18790;
        assert_ne!(render_zone(&changed, 2026011001).hash, a.hash);
    }

    #[test]
    fn test_label_defaults_from_hostname() {
        let mut opts = studio();
        opts.host_label = None;
        opts.instance_label = None;
        opts.tailnet_ipv6 = None;

        let txt = render_zone(&opts, 1).text;
        assert!(txt.contains("studio IN A 100.123.224.76"));
        assert!(txt.contains("_hearth-gw._tcp IN PTR studio-gateway._hearth-gw._tcp"));
        assert!(!txt.contains("AAAA"));
    }

    #[test]
    fn test_dns_label_sanitizes() {
        assert_eq!(dns_label("  Peter's Mac Studio ", "x"), "peter-s-mac-studio");
        assert_eq!(dns_label("--edge--", "x"), "edge");
        assert_eq!(dns_label("!!!", "fallback"), "fallback");
        assert_eq!(dns_label(&"a".repeat(80), "x").len(), 63);
    }
}
