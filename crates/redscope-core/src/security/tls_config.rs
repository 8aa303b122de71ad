//! TLS Configuration Types
//!
//! Certificates are carried as PEM text, the form in which they are stored
//! alongside database descriptors.

use crate::{RedscopeError, Result};
use serde::{Deserialize, Serialize};

const PEM_MARKER: &str = "-----BEGIN";

/// Configuration for TLS connections to Redis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Whether to verify the server's certificate chain and hostname
    #[serde(default = "default_verify_server_cert")]
    pub verify_server_cert: bool,
    /// PEM encoded CA certificate used for server verification
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// PEM encoded client certificate for mutual TLS
    #[serde(default)]
    pub client_cert: Option<String>,
    /// PEM encoded client private key for mutual TLS
    #[serde(default)]
    pub client_key: Option<String>,
}

fn default_verify_server_cert() -> bool {
    true
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_server_cert: default_verify_server_cert(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
        }
    }
}

impl TlsConfig {
    /// TLS with full server verification
    pub fn verified() -> Self {
        Self::default()
    }

    /// TLS without server certificate verification
    pub fn insecure() -> Self {
        Self {
            verify_server_cert: false,
            ..Self::default()
        }
    }

    /// Set the CA certificate for server verification
    pub fn ca_cert(mut self, pem: impl Into<String>) -> Self {
        self.ca_cert = Some(pem.into());
        self
    }

    /// Set the client certificate for mutual TLS authentication
    pub fn client_cert(mut self, cert_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        self.client_cert = Some(cert_pem.into());
        self.client_key = Some(key_pem.into());
        self
    }

    /// Returns true if mutual TLS is configured
    pub fn has_client_auth(&self) -> bool {
        self.client_cert.is_some() && self.client_key.is_some()
    }

    /// Validate the TLS configuration
    pub fn validate(&self) -> Result<()> {
        check_pem("CA certificate", self.ca_cert.as_deref())?;
        check_pem("Client certificate", self.client_cert.as_deref())?;
        check_pem("Client key", self.client_key.as_deref())?;

        if self.client_cert.is_some() && self.client_key.is_none() {
            return Err(RedscopeError::Configuration(
                "Client certificate provided but client key is missing".to_string(),
            ));
        }

        if self.client_key.is_some() && self.client_cert.is_none() {
            return Err(RedscopeError::Configuration(
                "Client key provided but client certificate is missing".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_pem(label: &str, pem: Option<&str>) -> Result<()> {
    let Some(pem) = pem else {
        return Ok(());
    };

    if pem.trim().is_empty() {
        return Err(RedscopeError::Configuration(format!(
            "{} cannot be empty",
            label
        )));
    }

    if !pem.contains(PEM_MARKER) {
        return Err(RedscopeError::Configuration(format!(
            "{} is not PEM encoded",
            label
        )));
    }

    Ok(())
}
