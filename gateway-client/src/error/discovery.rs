use std::net::IpAddr;
use std::time::Duration;
use shared::tailnet::OverlayError;
use thiserror::Error;
use crate::discovery::dig::RecordType;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The overall budget ran out. Never fatal: callers keep partial results.
    #[error("discovery timed out after {0:?}")]
    Timeout(Duration),

    /// One query against one peer failed. Scoped to that peer.
    #[error("{record} query for {name} @{nameserver} failed: {message}")]
    DnsQuery {
        nameserver: IpAddr,
        name: String,
        record: RecordType,
        message: String,
    },

    #[error("overlay status unavailable: {0}")]
    OverlayStatus(#[from] OverlayError),

    #[error("service browser unavailable: {0}")]
    Browser(String),
}
