use std::path::Path;
use std::thread;
use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use shared::txt::normalize_fingerprint;
use crate::error::TrustError;
use super::db::{Pin, TrustDb};
use super::{TlsPolicy, TrustDecision};

/// Commands sent to the trust store thread
enum TrustCommand {
    Get(String, oneshot::Sender<Result<Option<Pin>>>),
    PinIfAbsent {
        store_key: String,
        fingerprint: String,
        reply: oneshot::Sender<Result<Pin>>,
    },
    Clear(String, oneshot::Sender<Result<bool>>),
    All(oneshot::Sender<Result<Vec<Pin>>>),
    Shutdown,
}

/// Handle to the pinned-fingerprint store.
///
/// The database lives on one thread; every handle clone talks to it over a
/// channel, so a pin-if-absent is atomic across all coordinators sharing
/// the store.
#[derive(Clone)]
pub struct TrustStore {
    tx: mpsc::Sender<TrustCommand>,
}

impl TrustStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::spawn(TrustDb::open(path)?))
    }

    /// Spawn the store thread around an open database
    pub fn spawn(db: TrustDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<TrustCommand>(64);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    TrustCommand::Get(store_key, reply) => {
                        let _ = reply.send(db.get(&store_key));
                    }
                    TrustCommand::PinIfAbsent { store_key, fingerprint, reply } => {
                        let result = db.pin_if_absent(&store_key, &fingerprint);
                        if let Ok(pin) = &result {
                            if pin.fingerprint == fingerprint {
                                tracing::debug!("Pinned {} for {}", fingerprint, store_key);
                            }
                        }
                        let _ = reply.send(result);
                    }
                    TrustCommand::Clear(store_key, reply) => {
                        let result = db.clear(&store_key);
                        if matches!(result, Ok(true)) {
                            tracing::info!("Cleared pinned fingerprint for {}", store_key);
                        }
                        let _ = reply.send(result);
                    }
                    TrustCommand::All(reply) => {
                        let _ = reply.send(db.all());
                    }
                    TrustCommand::Shutdown => {
                        tracing::info!("Trust store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(&self, cmd: TrustCommand, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| anyhow!("trust store thread is not running"))?;
        rx.await.map_err(|_| anyhow!("trust store thread dropped the request"))?
    }

    /// Pinned fingerprint for a gateway, if any
    pub async fn fingerprint(&self, store_key: &str) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        let pin = self.request(TrustCommand::Get(store_key.to_string(), reply), rx).await?;
        Ok(pin.map(|p| p.fingerprint))
    }

    pub async fn pin_if_absent(&self, store_key: &str, fingerprint: &str) -> Result<Pin> {
        let (reply, rx) = oneshot::channel();
        let cmd = TrustCommand::PinIfAbsent {
            store_key: store_key.to_string(),
            fingerprint: fingerprint.to_string(),
            reply,
        };
        self.request(cmd, rx).await
    }

    /// Drop the pin so the next connection can pair again
    pub async fn clear(&self, store_key: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(TrustCommand::Clear(store_key.to_string(), reply), rx).await
    }

    pub async fn pins(&self) -> Result<Vec<Pin>> {
        let (reply, rx) = oneshot::channel();
        self.request(TrustCommand::All(reply), rx).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(TrustCommand::Shutdown).await;
    }

    /// What a connection to `store_key` has to present. A stored pin wins
    /// over the fingerprint the beacon advertises; with neither, the first
    /// certificate seen is trusted.
    pub async fn policy_for(
        &self,
        store_key: &str,
        required: bool,
        advertised: Option<&str>,
    ) -> Result<TlsPolicy, TrustError> {
        let expected = match self.fingerprint(store_key).await? {
            Some(pinned) => Some(pinned),
            None => advertised.and_then(normalize_fingerprint),
        };

        Ok(TlsPolicy {
            required,
            allow_tofu: expected.is_none(),
            expected_fingerprint: expected,
            store_key: store_key.to_string(),
        })
    }

    /// Check the certificate a handshake observed against the policy.
    pub async fn validate(&self, policy: &TlsPolicy, observed: &str) -> Result<TrustDecision, TrustError> {
        let observed = normalize_fingerprint(observed).unwrap_or_else(|| observed.to_ascii_lowercase());
        let mismatch = |expected: String| TrustError::FingerprintMismatch {
            store_key: policy.store_key.clone(),
            expected,
            observed: observed.clone(),
        };

        if let Some(expected) = &policy.expected_fingerprint {
            let expected = normalize_fingerprint(expected).unwrap_or_else(|| expected.to_ascii_lowercase());
            if expected != observed {
                return Err(mismatch(expected));
            }
            let pin = self.pin_if_absent(&policy.store_key, &observed).await?;
            if pin.fingerprint != observed {
                return Err(mismatch(pin.fingerprint));
            }
            return Ok(TrustDecision::Matched);
        }

        if policy.allow_tofu {
            let pin = self.pin_if_absent(&policy.store_key, &observed).await?;
            if pin.fingerprint != observed {
                // Another attempt pinned a different certificate first
                return Err(mismatch(pin.fingerprint));
            }
            tracing::info!("Trusting {} on first use ({})", policy.store_key, observed);
            return Ok(TrustDecision::PinnedOnFirstUse);
        }

        Err(TrustError::Untrusted {
            store_key: policy.store_key.clone(),
        })
    }
}
