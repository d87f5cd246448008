use std::time::Duration;
use thiserror::Error;
use super::trust::TrustError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no gateway discovered")]
    NoGateway,

    #[error("failed to connect to {target}: {message}")]
    Connect { target: String, message: String },

    /// Fatal for the attempt; never retried without the pin
    #[error("certificate fingerprint changed for {store_key} (expected {expected}, got {observed})")]
    TlsFingerprintMismatch {
        store_key: String,
        expected: String,
        observed: String,
    },

    #[error("gateway {store_key} is not trusted: {reason}")]
    Untrusted { store_key: String, reason: String },

    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("transport dropped: {0}")]
    TransportDropped(String),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// An application callback panicked or was cancelled
    #[error("session handler failed: {0}")]
    Handler(String),

    #[error(transparent)]
    Trust(TrustError),
}

impl SessionError {
    /// What the user can do about it. Only set for errors that are surfaced
    /// to the application; everything else is retried quietly.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            SessionError::TlsFingerprintMismatch { .. } => {
                Some("certificate fingerprint changed; re-pair this device")
            }
            SessionError::AuthenticationFailure(_) => {
                Some("check the gateway token or password configured on this device")
            }
            _ => None,
        }
    }

    pub fn is_surfaced(&self) -> bool {
        self.remediation().is_some()
    }

    /// Text handed to `on_disconnected`
    pub fn reason(&self) -> String {
        match self.remediation() {
            Some(hint) => format!("{}; {}", self, hint),
            None => self.to_string(),
        }
    }
}

impl From<TrustError> for SessionError {
    fn from(e: TrustError) -> Self {
        match e {
            TrustError::FingerprintMismatch { store_key, expected, observed } => {
                SessionError::TlsFingerprintMismatch { store_key, expected, observed }
            }
            TrustError::Untrusted { ref store_key } | TrustError::TlsRequired { ref store_key } => {
                SessionError::Untrusted {
                    store_key: store_key.clone(),
                    reason: e.to_string(),
                }
            }
            TrustError::Store(_) => SessionError::Trust(e),
        }
    }
}
