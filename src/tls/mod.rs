//! TLS upgrade support.
//!
//! An open plain connection can be upgraded in place: the listener is
//! hard-stopped, the same TCP stream is wrapped in a rustls client
//! session, and a new listener is started on the encrypted stream.
//!
//! Certificate trust is decided per upgrade by a [`TrustVerifier`] under
//! one [`TrustPolicy`].

// Rust guideline compliant 2026-02

pub mod upgrade;
pub mod verifier;

pub use verifier::TrustVerifier;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};

use crate::constants::trust_policy;
use crate::error::TlsError;

/// How a presented certificate chain is judged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustPolicy {
    /// Standard chain validation; failures reject.
    Strict,
    /// On validation failure, ask the host.
    Interactive,
    /// Accept anything, with a warning.
    Permissive,
}

impl TrustPolicy {
    /// Host attribute code.
    pub fn code(self) -> i64 {
        match self {
            Self::Strict => trust_policy::STRICT,
            Self::Interactive => trust_policy::INTERACTIVE,
            Self::Permissive => trust_policy::PERMISSIVE,
        }
    }

    /// Parses a host attribute code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            trust_policy::STRICT => Some(Self::Strict),
            trust_policy::INTERACTIVE => Some(Self::Interactive),
            trust_policy::PERMISSIVE => Some(Self::Permissive),
            _ => None,
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Interactive => "interactive",
            Self::Permissive => "permissive",
        }
    }
}

impl fmt::Display for TrustPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustPolicy {
    type Err = String;

    /// Accepts names (any case) or numeric codes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i64>() {
            return Self::from_code(code).ok_or_else(|| format!("unknown trust policy code {code}"));
        }
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "interactive" => Ok(Self::Interactive),
            "permissive" => Ok(Self::Permissive),
            other => Err(format!("unknown trust policy '{other}'")),
        }
    }
}

/// Progress of an in-place TLS upgrade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeState {
    /// No upgrade attempted.
    Plain,
    /// Hard-stopping the plain listener.
    StoppingListener,
    /// Handshake in progress on the executor thread.
    Handshaking,
    /// TLS listener running.
    Active,
    /// Upgrade failed; the connection is terminal.
    Failed,
}

/// Process-wide TLS material: crypto provider and trust anchors.
#[derive(Clone)]
pub struct TlsSettings {
    provider: Arc<CryptoProvider>,
    roots: Arc<RootCertStore>,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("roots", &self.roots.len())
            .finish_non_exhaustive()
    }
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            roots: Arc::new(RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            }),
        }
    }
}

impl TlsSettings {
    /// Mozilla trust anchors plus `extra` DER certificates.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Config`] if a certificate is not a usable anchor.
    pub fn with_extra_roots<I>(extra: I) -> Result<Self, TlsError>
    where
        I: IntoIterator<Item = CertificateDer<'static>>,
    {
        let mut settings = Self::default();
        let mut roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        for cert in extra {
            roots
                .add(cert)
                .map_err(|e| TlsError::Config(format!("invalid trust anchor: {e}")))?;
        }
        settings.roots = Arc::new(roots);
        Ok(settings)
    }

    /// Crypto provider.
    pub fn provider(&self) -> &Arc<CryptoProvider> {
        &self.provider
    }

    /// Trust anchors.
    pub fn roots(&self) -> &Arc<RootCertStore> {
        &self.roots
    }

    /// Builds a client config that judges certificates with `verifier`.
    pub fn client_config(&self, verifier: Arc<TrustVerifier>) -> Result<ClientConfig, TlsError> {
        Ok(ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::Config(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth())
    }
}
