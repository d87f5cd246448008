/// DNS-SD service type advertised by the gateway (without domain)
pub const GATEWAY_SERVICE_TYPE: &str = "_hearth-gw._tcp";

/// Link-local mDNS domain
pub const LOCAL_DOMAIN: &str = "local.";

/// Unicast DNS-SD domain served from the wide-area zone
pub const WIDE_AREA_DOMAIN: &str = "hearth.internal.";

/// File name of the rendered wide-area zone
pub const WIDE_AREA_ZONE_FILENAME: &str = "hearth.internal.db";

/// Leading comment key carrying the zone content hash
pub const ZONE_HASH_COMMENT: &str = "hearth-content-hash";

/// Default gateway port when nothing else is configured
pub const DEFAULT_GATEWAY_PORT: u16 = 18789;

/// TXT record keys carried by gateway beacons (mDNS and wide-area zone)
pub const TXT_DISPLAY_NAME: &str = "displayName";
pub const TXT_ROLE: &str = "role";
pub const TXT_TRANSPORT: &str = "transport";
pub const TXT_GATEWAY_PORT: &str = "gatewayPort";
pub const TXT_GATEWAY_TLS: &str = "gatewayTls";
pub const TXT_GATEWAY_TLS_SHA256: &str = "gatewayTlsSha256";
pub const TXT_TAILNET_DNS: &str = "tailnetDns";
pub const TXT_SSH_PORT: &str = "sshPort";
pub const TXT_CLI_PATH: &str = "cliPath";

/// Fixed role/transport values advertised by the gateway
pub const GATEWAY_ROLE: &str = "gateway";
pub const GATEWAY_TRANSPORT: &str = "gateway";

/// Full mDNS service type as expected by mdns-sd, e.g. "_hearth-gw._tcp.local."
pub fn mdns_service_type() -> String {
    format!("{}.{}", GATEWAY_SERVICE_TYPE, LOCAL_DOMAIN)
}
