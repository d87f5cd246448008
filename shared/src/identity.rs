//! Stable identities for discovered gateways.
//!
//! DNS-SD instance names travel with `\NNN` decimal escapes (one escape per
//! UTF-8 byte). Everything that deduplicates or looks up a gateway keys on the
//! decoded, normalized form produced here.

use std::fmt;
use crate::protocol::LOCAL_DOMAIN;
use crate::types::{ServiceRecord, StableEndpointId};

const ID_SEPARATOR: char = '|';

/// Decode `\NNN` decimal escapes into the UTF-8 text they spell.
///
/// Consecutive escapes are collected as raw bytes first, so a multi-byte code
/// point split over several escapes comes back as one character. Text without
/// escapes is returned unchanged.
pub fn decode(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }

    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            if let Some(value) = decimal_escape(&bytes[i + 1..i + 4]) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    match String::from_utf8(out) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

pub(crate) fn decimal_escape(digits: &[u8]) -> Option<u8> {
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let value = digits
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    u8::try_from(value).ok()
}

/// Normalize a DNS-SD domain: empty and "local" map to "local.", everything
/// else is lowercased with a trailing dot.
pub fn normalize_service_domain(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return LOCAL_DOMAIN.to_string();
    }
    let lower = trimmed.to_lowercase();
    if lower == "local" || lower == LOCAL_DOMAIN {
        return LOCAL_DOMAIN.to_string();
    }
    if lower.ends_with('.') {
        lower
    } else {
        format!("{}.", lower)
    }
}

fn normalize_name(decoded: &str) -> String {
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical key for a service-style endpoint.
pub fn stable_id(service_type: &str, domain: &str, decoded_name: &str) -> StableEndpointId {
    StableEndpointId::new(format!(
        "{}{sep}{}{sep}{}",
        service_type.trim(),
        normalize_service_domain(domain),
        normalize_name(decoded_name),
        sep = ID_SEPARATOR,
    ))
}

/// Something a client can connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A DNS-SD service instance
    Service {
        name: String,
        service_type: String,
        domain: String,
    },
    /// A direct host:port target (manual configuration)
    HostPort { host: String, port: u16 },
}

impl Endpoint {
    pub fn stable_id(&self) -> StableEndpointId {
        match self {
            Endpoint::Service { name, service_type, domain } => {
                stable_id(service_type, domain, &decode(name))
            }
            Endpoint::HostPort { .. } => StableEndpointId::new(self.to_string()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Service { name, service_type, domain } => {
                write!(f, "{}.{}.{}", name, service_type, domain)
            }
            Endpoint::HostPort { host, port } if host.contains(':') => {
                write!(f, "[{}]:{}", host, port)
            }
            Endpoint::HostPort { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

impl From<&ServiceRecord> for Endpoint {
    fn from(record: &ServiceRecord) -> Self {
        Endpoint::Service {
            name: record.instance_name.clone(),
            service_type: record.service_type.clone(),
            domain: record.domain.clone(),
        }
    }
}

/// Human readable form of an endpoint. Display only, never a lookup key.
pub fn pretty_description(endpoint: &Endpoint) -> String {
    decode(&endpoint.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GATEWAY_SERVICE_TYPE, WIDE_AREA_DOMAIN};

    #[test]
    fn test_decode_noop() {
        assert_eq!(decode(""), "");
        assert_eq!(decode("hello"), "hello");
        assert_eq!(decode("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_decode_decimal_escapes() {
        assert_eq!(decode("Hearth\\032Gateway"), "Hearth Gateway");
        assert_eq!(decode("A\\032B"), "A B");
    }

    #[test]
    fn test_decode_reassembles_multibyte_sequence() {
        assert_eq!(decode("Peter\\226\\128\\153s Mac"), "Peter\u{2019}s Mac");
    }

    #[test]
    fn test_decode_leaves_invalid_escapes_alone() {
        assert_eq!(decode("a\\999b"), "a\\999b");
        assert_eq!(decode("a\\12b"), "a\\12b");
    }

    #[test]
    fn test_stable_id_decodes_and_normalizes_name() {
        let endpoint = Endpoint::Service {
            name: "Hearth\\032Gateway   \\032  Node\n".to_string(),
            service_type: GATEWAY_SERVICE_TYPE.to_string(),
            domain: "local.".to_string(),
        };
        assert_eq!(
            endpoint.stable_id().as_str(),
            "_hearth-gw._tcp|local.|Hearth Gateway Node"
        );
    }

    #[test]
    fn test_stable_id_is_pure_and_domain_sensitive() {
        let a = stable_id(GATEWAY_SERVICE_TYPE, "local.", "Studio");
        let b = stable_id(GATEWAY_SERVICE_TYPE, "local.", "Studio");
        let c = stable_id(GATEWAY_SERVICE_TYPE, WIDE_AREA_DOMAIN, "Studio");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_stable_id_normalizes_domain_spelling() {
        assert_eq!(
            stable_id(GATEWAY_SERVICE_TYPE, "local", "Studio"),
            stable_id(GATEWAY_SERVICE_TYPE, "", "Studio")
        );
        assert_eq!(normalize_service_domain("Hearth.Internal"), "hearth.internal.");
    }

    #[test]
    fn test_stable_id_for_host_port_uses_description() {
        let endpoint = Endpoint::HostPort { host: "127.0.0.1".to_string(), port: 4242 };
        assert_eq!(endpoint.stable_id().as_str(), "127.0.0.1:4242");

        let v6 = Endpoint::HostPort { host: "fd7a::1".to_string(), port: 443 };
        assert_eq!(v6.stable_id().as_str(), "[fd7a::1]:443");
    }

    #[test]
    fn test_pretty_description_decodes_escapes() {
        let endpoint = Endpoint::Service {
            name: "Hearth\\032Gateway".to_string(),
            service_type: GATEWAY_SERVICE_TYPE.to_string(),
            domain: "local.".to_string(),
        };
        let pretty = pretty_description(&endpoint);
        assert_eq!(pretty, "Hearth Gateway._hearth-gw._tcp.local.");
        assert!(!pretty.contains("\\032"));
    }
}
