//! Certificate trust verifier.
//!
//! Wraps the standard webpki chain validation and applies the
//! connection's [`TrustPolicy`] when validation fails:
//!
//! - Strict: the failure stands
//! - Interactive: the host is asked, blocking the executor until it
//!   answers; no verdict means reject
//! - Permissive: accepted, with a warning on both log channels
//!
//! Handshake signatures are always checked against the presented
//! certificate's key, whatever the policy.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, X509Certificate};

use super::{TlsSettings, TrustPolicy};
use crate::bridge::{CertificatePrompt, EventArg, EventName, HostBridge, LogLevel};
use crate::command::Command;
use crate::connection::ConnectionId;
use crate::error::TlsError;
use crate::executor::Submitter;

/// Policy-aware [`ServerCertVerifier`] for one upgrade.
pub struct TrustVerifier {
    policy: TrustPolicy,
    connection_id: ConnectionId,
    inner: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
    bridge: Arc<dyn HostBridge>,
    submitter: Submitter,
}

impl fmt::Debug for TrustVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustVerifier")
            .field("policy", &self.policy)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl TrustVerifier {
    /// Creates a verifier for one connection's upgrade.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Config`] if the webpki verifier cannot be built
    /// from the configured anchors.
    pub fn new(
        policy: TrustPolicy,
        settings: &TlsSettings,
        connection_id: ConnectionId,
        bridge: Arc<dyn HostBridge>,
        submitter: Submitter,
    ) -> Result<Self, TlsError> {
        let inner = WebPkiServerVerifier::builder_with_provider(
            Arc::clone(settings.roots()),
            Arc::clone(settings.provider()),
        )
        .build()
        .map_err(|e| TlsError::Config(format!("failed to build certificate verifier: {e}")))?;

        Ok(Self {
            policy,
            connection_id,
            inner,
            provider: Arc::clone(settings.provider()),
            bridge,
            submitter,
        })
    }

    /// Policy in effect.
    pub fn policy(&self) -> TrustPolicy {
        self.policy
    }

    fn warn_host(&self, message: String) {
        log::warn!("[Tls] {}: {}", self.connection_id, message);
        self.submitter.push(Command::notify(
            self.connection_id.clone(),
            EventName::Log,
            Some(EventArg::log(LogLevel::Warn, message)),
        ));
    }
}

impl ServerCertVerifier for TrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let error = match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => return Ok(verified),
            Err(error) => error,
        };

        match self.policy {
            TrustPolicy::Strict => {
                log::warn!(
                    "[Tls] {}: rejecting certificate for {:?}: {}",
                    self.connection_id,
                    server_name,
                    error
                );
                Err(error)
            }
            TrustPolicy::Permissive => {
                self.warn_host(format!(
                    "Accepting untrusted certificate for {:?} under permissive policy: {}",
                    server_name,
                    error
                ));
                Ok(ServerCertVerified::assertion())
            }
            TrustPolicy::Interactive => {
                let prompt = describe_certificate(end_entity, &error);
                log::info!(
                    "[Tls] {}: asking host about certificate {}",
                    self.connection_id,
                    prompt.subject
                );
                match self
                    .bridge
                    .prompt_certificate_decision(&self.connection_id, &prompt)
                {
                    Some(true) => {
                        log::info!("[Tls] {}: host accepted certificate", self.connection_id);
                        Ok(ServerCertVerified::assertion())
                    }
                    Some(false) => {
                        log::info!("[Tls] {}: host rejected certificate", self.connection_id);
                        Err(error)
                    }
                    None => {
                        log::warn!(
                            "[Tls] {}: no certificate verdict from host, rejecting",
                            self.connection_id
                        );
                        Err(error)
                    }
                }
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Builds the host prompt for a certificate that failed validation.
pub fn describe_certificate(cert: &CertificateDer<'_>, error: &rustls::Error) -> CertificatePrompt {
    let fingerprint = Sha256::digest(cert.as_ref())
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":");

    match X509Certificate::from_der(cert.as_ref()) {
        Ok((_, parsed)) => {
            let subject = parsed.subject().to_string();
            let issuer = parsed.issuer().to_string();
            let validity = parsed.validity();
            let description = format!(
                "Subject: {subject}\n\
                 Issuer: {issuer}\n\
                 Serial: {}\n\
                 Not before: {}\n\
                 Not after: {}\n\
                 SHA-256: {fingerprint}\n\
                 Validation error: {error}",
                parsed.raw_serial_as_string(),
                validity.not_before,
                validity.not_after,
            );
            CertificatePrompt {
                subject,
                issuer,
                description,
            }
        }
        Err(e) => CertificatePrompt {
            subject: "<unparseable certificate>".to_string(),
            issuer: "<unknown>".to_string(),
            description: format!(
                "SHA-256: {fingerprint}\nParse error: {e}\nValidation error: {error}"
            ),
        },
    }
}
