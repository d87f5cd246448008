use std::collections::HashMap;
use std::net::IpAddr;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use futures::stream::{Stream, StreamExt};
use shared::protocol::LOCAL_DOMAIN;
use shared::types::ServiceRecord;
use crate::error::DiscoveryError;
use super::local::{BrowseEvent, BrowseStream, ServiceBrowser};

/// `ServiceBrowser` on top of an mdns-sd daemon.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
}

impl MdnsBrowser {
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Browser(e.to_string()))?;
        Ok(Self { daemon })
    }

    pub fn with_daemon(daemon: ServiceDaemon) -> Self {
        Self { daemon }
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            tracing::warn!("Failed to shutdown mDNS daemon: {}", e);
        }
    }
}

impl ServiceBrowser for MdnsBrowser {
    fn browse(&self, service_type: &str) -> Result<BrowseStream, DiscoveryError> {
        let full_type = qualify_service_type(service_type);
        let receiver = self
            .daemon
            .browse(&full_type)
            .map_err(|e| DiscoveryError::Browser(format!("failed to browse {}: {}", full_type, e)))?;

        tracing::debug!("Browsing {}", full_type);

        let guard = StopBrowse {
            daemon: self.daemon.clone(),
            full_type,
        };
        Ok(browse_events(receiver.into_stream(), guard))
    }
}

/// Stops the daemon's browse for `full_type` when dropped.
struct StopBrowse {
    daemon: ServiceDaemon,
    full_type: String,
}

impl Drop for StopBrowse {
    fn drop(&mut self) {
        match self.daemon.stop_browse(&self.full_type) {
            Ok(()) => tracing::debug!("Stopped browsing {}", self.full_type),
            Err(e) => tracing::debug!("Failed to stop browsing {}: {}", self.full_type, e),
        }
    }
}

/// Converted events; `guard` lives exactly as long as the stream.
fn browse_events<S, G>(events: S, guard: G) -> BrowseStream
where
    S: Stream<Item = ServiceEvent> + Send + 'static,
    G: Send + 'static,
{
    // Ends when the daemon drops the channel
    futures::stream::unfold((events.boxed(), guard), |(mut events, guard)| async move {
        while let Some(event) = events.next().await {
            if let Some(event) = convert_event(event) {
                return Some((event, (events, guard)));
            }
        }
        tracing::debug!("mDNS receiver disconnected");
        None
    })
    .boxed()
}

fn convert_event(event: ServiceEvent) -> Option<BrowseEvent> {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let record = convert_service_info(&info);
            tracing::debug!("Resolved service: {}", info.get_fullname());
            Some(BrowseEvent::Resolved(record))
        }
        ServiceEvent::ServiceRemoved(ty_domain, fullname) => {
            tracing::debug!("Service removed: {}", fullname);
            let (service_type, domain) = split_service_type(&ty_domain);
            Some(BrowseEvent::Removed {
                instance_name: instance_name(&fullname, &ty_domain),
                service_type,
                domain,
            })
        }
        _ => None,
    }
}

/// Convert an mdns-sd ServiceInfo to a ServiceRecord
fn convert_service_info(info: &ServiceInfo) -> ServiceRecord {
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort();

    let txt: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    let (service_type, domain) = split_service_type(info.get_type());

    ServiceRecord {
        instance_name: instance_name(info.get_fullname(), info.get_type()),
        service_type,
        domain,
        hostname: info.get_hostname().to_string(),
        addresses,
        port: info.get_port(),
        txt,
    }
}

/// "_hearth-gw._tcp" -> "_hearth-gw._tcp.local."
fn qualify_service_type(service_type: &str) -> String {
    let trimmed = service_type.trim().trim_end_matches('.');
    if trimmed.ends_with(".local") {
        format!("{}.", trimmed)
    } else {
        format!("{}.{}", trimmed, LOCAL_DOMAIN)
    }
}

/// "_hearth-gw._tcp.local." -> ("_hearth-gw._tcp", "local.")
fn split_service_type(ty_domain: &str) -> (String, String) {
    let trimmed = ty_domain.trim_end_matches('.');
    // The type is always "_name._proto"; whatever follows is the domain
    let mut labels = trimmed.splitn(3, '.');
    match (labels.next(), labels.next(), labels.next()) {
        (Some(name), Some(proto), Some(domain)) => {
            (format!("{}.{}", name, proto), format!("{}.", domain))
        }
        _ => (trimmed.to_string(), LOCAL_DOMAIN.to_string()),
    }
}

/// "Studio._hearth-gw._tcp.local." -> "Studio"
fn instance_name(fullname: &str, ty_domain: &str) -> String {
    fullname
        .strip_suffix(ty_domain)
        .map(|name| name.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot::{self, error::TryRecvError};

    #[tokio::test]
    async fn test_dropping_stream_stops_browse() {
        let mut props = HashMap::new();
        props.insert("displayName".to_string(), "Studio".to_string());
        let info = ServiceInfo::new(
            "_hearth-gw._tcp.local.",
            "Studio",
            "studio.local.",
            "192.168.1.20",
            18789,
            props,
        )
        .unwrap();
        let events = futures::stream::iter(vec![
            ServiceEvent::SearchStarted("_hearth-gw._tcp.local.".to_string()),
            ServiceEvent::ServiceResolved(info),
        ])
        .chain(futures::stream::pending());

        let (guard, mut stopped) = oneshot::channel::<()>();
        let mut stream = browse_events(events, guard);

        match stream.next().await {
            Some(BrowseEvent::Resolved(record)) => assert_eq!(record.instance_name, "Studio"),
            other => panic!("expected a resolved record, got {:?}", other),
        }
        assert_eq!(stopped.try_recv(), Err(TryRecvError::Empty));

        drop(stream);
        assert_eq!(stopped.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_qualify_service_type() {
        assert_eq!(qualify_service_type("_hearth-gw._tcp"), "_hearth-gw._tcp.local.");
        assert_eq!(qualify_service_type("_hearth-gw._tcp.local."), "_hearth-gw._tcp.local.");
    }

    #[test]
    fn test_split_service_type() {
        assert_eq!(
            split_service_type("_hearth-gw._tcp.local."),
            ("_hearth-gw._tcp".to_string(), "local.".to_string())
        );
        assert_eq!(
            split_service_type("_hearth-gw._tcp"),
            ("_hearth-gw._tcp".to_string(), "local.".to_string())
        );
    }

    #[test]
    fn test_instance_name_strips_type_suffix() {
        assert_eq!(
            instance_name("Peter\u{2019}s Mac._hearth-gw._tcp.local.", "_hearth-gw._tcp.local."),
            "Peter\u{2019}s Mac"
        );
        assert_eq!(instance_name("odd-name", "_hearth-gw._tcp.local."), "odd-name");
    }

    #[test]
    fn test_convert_service_info() {
        let mut props = HashMap::new();
        props.insert("displayName".to_string(), "Studio".to_string());
        props.insert("gatewayPort".to_string(), "18789".to_string());
        let info = ServiceInfo::new(
            "_hearth-gw._tcp.local.",
            "Studio",
            "studio.local.",
            "192.168.1.20",
            18789,
            props,
        )
        .unwrap();

        let record = convert_service_info(&info);
        assert_eq!(record.instance_name, "Studio");
        assert_eq!(record.service_type, "_hearth-gw._tcp");
        assert_eq!(record.domain, "local.");
        assert_eq!(record.hostname, "studio.local.");
        assert_eq!(record.addresses, vec!["192.168.1.20".parse::<IpAddr>().unwrap()]);
        assert_eq!(record.txt.get("gatewayPort").map(String::as_str), Some("18789"));
    }
}
