//! Gateway beacon <-> DNS TXT fields.
//!
//! The same key set is used for mDNS TXT properties and for the TXT record
//! of the wide-area zone.

use std::collections::HashMap;
use crate::identity::{decode, decimal_escape};
use crate::protocol::*;
use crate::types::GatewayBeacon;

/// Ordered TXT key/value pairs for a beacon.
pub fn beacon_txt_pairs(beacon: &GatewayBeacon) -> Vec<(String, String)> {
    let mut pairs = vec![
        (TXT_DISPLAY_NAME.to_string(), beacon.display_name.trim().to_string()),
        (
            TXT_ROLE.to_string(),
            beacon.role.clone().unwrap_or_else(|| GATEWAY_ROLE.to_string()),
        ),
        (
            TXT_TRANSPORT.to_string(),
            beacon.transport.clone().unwrap_or_else(|| GATEWAY_TRANSPORT.to_string()),
        ),
        (TXT_GATEWAY_PORT.to_string(), beacon.gateway_port.to_string()),
    ];

    if beacon.tls_enabled {
        pairs.push((TXT_GATEWAY_TLS.to_string(), "1".to_string()));
        if let Some(fingerprint) = beacon.tls_fingerprint_sha256.as_deref().and_then(normalize_fingerprint) {
            pairs.push((TXT_GATEWAY_TLS_SHA256.to_string(), fingerprint));
        }
    }
    if let Some(dns) = non_blank(beacon.tailnet_dns.as_deref()) {
        pairs.push((TXT_TAILNET_DNS.to_string(), dns.to_string()));
    }
    if let Some(port) = beacon.ssh_port.filter(|p| *p > 0) {
        pairs.push((TXT_SSH_PORT.to_string(), port.to_string()));
    }
    if let Some(path) = non_blank(beacon.cli_path.as_deref()) {
        pairs.push((TXT_CLI_PATH.to_string(), path.to_string()));
    }

    pairs
}

/// Quote a TXT character-string for a zone file.
pub fn quote_txt_value(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{}\"", escaped)
}

/// Split presentation-format TXT data (as printed by resolvers) into its
/// character-strings. Quoted and bare tokens are accepted; `\NNN` escapes
/// become raw bytes and `\x` becomes `x`.
///
/// Returns `None` for an unterminated quoted string.
pub fn tokenize_txt(raw: &str) -> Option<Vec<String>> {
    let bytes = raw.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let mut buf = Vec::new();
        if bytes[i] == b'"' {
            i += 1;
            let mut closed = false;
            while i < bytes.len() {
                match bytes[i] {
                    b'"' => {
                        closed = true;
                        i += 1;
                        break;
                    }
                    b'\\' => i = unescape_at(bytes, i, &mut buf),
                    other => {
                        buf.push(other);
                        i += 1;
                    }
                }
            }
            if !closed {
                return None;
            }
        } else {
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                if bytes[i] == b'\\' {
                    i = unescape_at(bytes, i, &mut buf);
                } else {
                    buf.push(bytes[i]);
                    i += 1;
                }
            }
        }

        tokens.push(String::from_utf8_lossy(&buf).into_owned());
    }

    Some(tokens)
}

fn unescape_at(bytes: &[u8], at: usize, buf: &mut Vec<u8>) -> usize {
    if at + 3 < bytes.len() {
        if let Some(value) = decimal_escape(&bytes[at + 1..at + 4]) {
            buf.push(value);
            return at + 4;
        }
    }
    match bytes.get(at + 1) {
        Some(&next) => {
            buf.push(next);
            at + 2
        }
        None => {
            buf.push(b'\\');
            at + 1
        }
    }
}

/// `key=value` tokens into a map. Tokens without `=` map to an empty value.
pub fn txt_map<I, S>(tokens: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .filter_map(|token| {
            let token = token.as_ref();
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            let key = key.trim();
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

/// Parse TXT presentation text straight into a map.
pub fn parse_txt(raw: &str) -> Option<HashMap<String, String>> {
    tokenize_txt(raw).map(txt_map)
}

/// Build a beacon from TXT fields.
///
/// `fallback_name` is used when `displayName` is absent or blank and
/// `fallback_port` (the SRV port) when `gatewayPort` is absent. Returns `None`
/// when no positive port can be determined.
pub fn beacon_from_txt(
    txt: &HashMap<String, String>,
    fallback_name: &str,
    fallback_port: u16,
) -> Option<GatewayBeacon> {
    let field = |key: &str| non_blank(txt.get(key).map(String::as_str)).map(str::to_string);

    let gateway_port = txt
        .get(TXT_GATEWAY_PORT)
        .and_then(|v| v.trim().parse::<u16>().ok())
        .filter(|p| *p > 0)
        .or(Some(fallback_port).filter(|p| *p > 0))?;

    let display_name = field(TXT_DISPLAY_NAME)
        .map(|name| decode(&name).trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| decode(fallback_name).trim().to_string());

    let tls_enabled = txt
        .get(TXT_GATEWAY_TLS)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    Some(GatewayBeacon {
        display_name,
        gateway_port,
        tls_enabled,
        tls_fingerprint_sha256: field(TXT_GATEWAY_TLS_SHA256)
            .as_deref()
            .and_then(normalize_fingerprint),
        tailnet_dns: field(TXT_TAILNET_DNS),
        ssh_port: txt
            .get(TXT_SSH_PORT)
            .and_then(|v| v.trim().parse::<u16>().ok())
            .filter(|p| *p > 0),
        cli_path: field(TXT_CLI_PATH),
        role: field(TXT_ROLE),
        transport: field(TXT_TRANSPORT),
    })
}

/// Lowercase hex with separators removed; `None` unless it is 64 hex digits.
pub fn normalize_fingerprint(raw: &str) -> Option<String> {
    let hex: String = raw
        .trim()
        .trim_start_matches("sha256:")
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex)
    } else {
        None
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon() -> GatewayBeacon {
        GatewayBeacon {
            display_name: "Studio".to_string(),
            gateway_port: 18789,
            tls_enabled: false,
            tls_fingerprint_sha256: None,
            tailnet_dns: None,
            ssh_port: None,
            cli_path: None,
            role: None,
            transport: None,
        }
    }

    #[test]
    fn test_parse_minimal_txt() {
        let txt = parse_txt("\"displayName=Foo\" \"gatewayPort=18789\"").unwrap();
        let beacon = beacon_from_txt(&txt, "fallback", 0).unwrap();
        assert_eq!(beacon.display_name, "Foo");
        assert_eq!(beacon.gateway_port, 18789);
        assert!(!beacon.tls_enabled);
    }

    #[test]
    fn test_parse_escaped_display_name() {
        let raw = "\"displayName=Peter\\226\\128\\153s Mac Studio\" \"gatewayPort=18789\" \"cliPath=/usr/local/bin/hearth\"";
        let txt = parse_txt(raw).unwrap();
        let beacon = beacon_from_txt(&txt, "", 0).unwrap();
        assert_eq!(beacon.display_name, "Peter\u{2019}s Mac Studio");
        assert_eq!(beacon.cli_path.as_deref(), Some("/usr/local/bin/hearth"));
    }

    #[test]
    fn test_tokenize_handles_quote_escapes_and_bare_tokens() {
        let tokens = tokenize_txt("\"say \\\"hi\\\"\" bare=1\n\"back\\\\slash\"").unwrap();
        assert_eq!(tokens, vec!["say \"hi\"", "bare=1", "back\\slash"]);
    }

    #[test]
    fn test_tokenize_rejects_unterminated_quote() {
        assert!(tokenize_txt("\"displayName=Foo").is_none());
    }

    #[test]
    fn test_missing_port_uses_srv_port_or_rejects() {
        let txt = parse_txt("\"displayName=Foo\"").unwrap();
        assert_eq!(beacon_from_txt(&txt, "", 4242).unwrap().gateway_port, 4242);
        assert!(beacon_from_txt(&txt, "", 0).is_none());
    }

    #[test]
    fn test_blank_display_name_falls_back() {
        let txt = parse_txt("\"displayName=  \" \"gatewayPort=1\"").unwrap();
        let beacon = beacon_from_txt(&txt, "Studio\\032Mac", 0).unwrap();
        assert_eq!(beacon.display_name, "Studio Mac");
    }

    #[test]
    fn test_txt_pairs_round_through_parser() {
        let mut b = beacon();
        b.tls_enabled = true;
        b.tls_fingerprint_sha256 = Some("AB".repeat(32));
        b.ssh_port = Some(22);
        b.tailnet_dns = Some("studio.tail-net.ts.net".to_string());

        let quoted = beacon_txt_pairs(&b)
            .iter()
            .map(|(k, v)| quote_txt_value(&format!("{}={}", k, v)))
            .collect::<Vec<_>>()
            .join(" ");
        let parsed = beacon_from_txt(&parse_txt(&quoted).unwrap(), "", 0).unwrap();

        assert!(parsed.tls_enabled);
        assert_eq!(parsed.tls_fingerprint_sha256, Some("ab".repeat(32)));
        assert_eq!(parsed.ssh_port, Some(22));
        assert_eq!(parsed.role.as_deref(), Some("gateway"));
        assert_eq!(parsed.tailnet_dns.as_deref(), Some("studio.tail-net.ts.net"));
    }

    #[test]
    fn test_fingerprint_omitted_without_tls() {
        let mut b = beacon();
        b.tls_fingerprint_sha256 = Some("ab".repeat(32));
        let keys: Vec<String> = beacon_txt_pairs(&b).into_iter().map(|(k, _)| k).collect();
        assert!(!keys.contains(&TXT_GATEWAY_TLS_SHA256.to_string()));
        assert!(!keys.contains(&TXT_GATEWAY_TLS.to_string()));
    }

    #[test]
    fn test_normalize_fingerprint() {
        let colon = (0..32).map(|_| "AB").collect::<Vec<_>>().join(":");
        assert_eq!(normalize_fingerprint(&colon), Some("ab".repeat(32)));
        assert_eq!(normalize_fingerprint("abc"), None);
        assert_eq!(normalize_fingerprint(&"zz".repeat(32)), None);
    }
}
