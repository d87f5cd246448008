use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    #[error("certificate fingerprint changed for {store_key} (expected {expected}, got {observed})")]
    FingerprintMismatch {
        store_key: String,
        expected: String,
        observed: String,
    },

    #[error("no pinned certificate for {store_key} and trust-on-first-use is disabled")]
    Untrusted { store_key: String },

    #[error("{store_key} requires TLS but the endpoint is not encrypted")]
    TlsRequired { store_key: String },

    #[error("trust store failure: {0}")]
    Store(String),
}

impl From<anyhow::Error> for TrustError {
    fn from(e: anyhow::Error) -> Self {
        TrustError::Store(format!("{:#}", e))
    }
}
