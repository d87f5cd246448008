//! Certificate pinning keyed by gateway identity.

pub mod db;
pub mod store;
pub mod verifier;

pub use db::{Pin, TrustDb};
pub use store::TrustStore;
pub use verifier::{fingerprint_sha256, PinningVerifier};

/// What a TLS connection to one gateway must satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPolicy {
    /// Refuse plaintext connections
    pub required: bool,
    /// Lowercase hex SHA-256 the leaf certificate must hash to
    pub expected_fingerprint: Option<String>,
    /// Trust and pin the first certificate seen
    pub allow_tofu: bool,
    /// StableEndpointId string the pin is stored under
    pub store_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    Matched,
    PinnedOnFirstUse,
}
