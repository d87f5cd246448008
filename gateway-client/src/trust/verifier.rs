use std::sync::{Arc, Mutex};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use super::TlsPolicy;

/// Lowercase hex SHA-256 of a DER certificate
pub fn fingerprint_sha256(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Certificate verifier that trusts by fingerprint instead of a CA chain.
///
/// With an expected fingerprint the handshake fails on a mismatch. Without
/// one (first use) it accepts, and the observed fingerprint is left for the
/// caller to pin before any application data flows.
#[derive(Debug)]
pub struct PinningVerifier {
    expected: Option<String>,
    allow_tofu: bool,
    observed: Mutex<Option<String>>,
    provider: Arc<CryptoProvider>,
}

impl PinningVerifier {
    pub fn new(policy: &TlsPolicy) -> Self {
        Self {
            expected: policy.expected_fingerprint.clone(),
            allow_tofu: policy.allow_tofu,
            observed: Mutex::new(None),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Leaf fingerprint from the last handshake, even a rejected one
    pub fn observed(&self) -> Option<String> {
        self.observed.lock().ok().and_then(|guard| guard.clone())
    }

    /// Client config that verifies through this verifier
    pub fn client_config(self: &Arc<Self>) -> Result<ClientConfig, rustls::Error> {
        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(self.clone())
            .with_no_client_auth();
        Ok(config)
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let observed = fingerprint_sha256(end_entity.as_ref());
        if let Ok(mut guard) = self.observed.lock() {
            *guard = Some(observed.clone());
        }

        match &self.expected {
            Some(expected) if *expected == observed => Ok(ServerCertVerified::assertion()),
            Some(expected) => {
                tracing::warn!("Certificate fingerprint {} does not match pinned {}", observed, expected);
                Err(rustls::Error::General("certificate fingerprint mismatch".to_string()))
            }
            None if self.allow_tofu => Ok(ServerCertVerified::assertion()),
            None => Err(rustls::Error::General("no pinned certificate fingerprint".to_string())),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(expected: Option<&str>, allow_tofu: bool) -> TlsPolicy {
        TlsPolicy {
            required: true,
            expected_fingerprint: expected.map(str::to_string),
            allow_tofu,
            store_key: "gw".to_string(),
        }
    }

    fn verify(verifier: &PinningVerifier, der: &[u8]) -> Result<ServerCertVerified, rustls::Error> {
        let cert = CertificateDer::from(der.to_vec());
        let name = ServerName::try_from("gateway.local").unwrap();
        verifier.verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
    }

    #[test]
    fn test_fingerprint_is_lowercase_sha256_hex() {
        let fp = fingerprint_sha256(b"certificate");
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, fp.to_lowercase());
    }

    #[test]
    fn test_expected_fingerprint_must_match() {
        let der = b"leaf certificate";
        let good = PinningVerifier::new(&policy(Some(&fingerprint_sha256(der)), false));
        assert!(verify(&good, der).is_ok());

        let bad = PinningVerifier::new(&policy(Some(&fingerprint_sha256(b"other")), false));
        assert!(verify(&bad, der).is_err());
        assert_eq!(bad.observed(), Some(fingerprint_sha256(der)));
    }

    #[test]
    fn test_first_use_accepts_and_records() {
        let der = b"leaf certificate";
        let tofu = PinningVerifier::new(&policy(None, true));
        assert!(verify(&tofu, der).is_ok());
        assert_eq!(tofu.observed(), Some(fingerprint_sha256(der)));

        let closed = PinningVerifier::new(&policy(None, false));
        assert!(verify(&closed, der).is_err());
    }

    #[test]
    fn test_client_config_builds() {
        let verifier = Arc::new(PinningVerifier::new(&policy(None, true)));
        assert!(verifier.client_config().is_ok());
    }
}
