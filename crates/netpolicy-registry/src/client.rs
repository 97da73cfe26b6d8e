// netpolicy-registry/src/client.rs
// ============================================================================
// Module: HTTP Client Builder
// Description: Shared reqwest client construction with TLS material.
// Purpose: Apply timeouts, CA bundles, and client identities uniformly.
// Dependencies: reqwest
// ============================================================================

//! ## Overview
//! Every outbound client in this crate is built here. CA bundles and client
//! identities are read from PEM files at construction time so a bad path
//! fails startup instead of the first request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Certificate;
use reqwest::Client;
use reqwest::Identity;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default whole-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: Config
// ============================================================================

/// TLS and timeout settings for an outbound client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Extra CA bundle trusted for the peer.
    pub ca_file: Option<PathBuf>,
    /// Client certificate presented to the peer.
    pub client_cert_file: Option<PathBuf>,
    /// Private key for the client certificate.
    pub client_key_file: Option<PathBuf>,
    /// Accept any server certificate.
    pub skip_tls_verify: bool,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            ca_file: None,
            client_cert_file: None,
            client_key_file: None,
            skip_tls_verify: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl HttpClientConfig {
    /// Builds a reqwest client from the settings.
    ///
    /// # Errors
    ///
    /// Returns [`HttpClientError`] when PEM material cannot be read or parsed,
    /// or when only half of a client identity is configured.
    pub fn build(&self) -> Result<Client, HttpClientError> {
        let mut builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .danger_accept_invalid_certs(self.skip_tls_verify);
        if let Some(ca_file) = &self.ca_file {
            let pem = read_pem(ca_file)?;
            let certificate =
                Certificate::from_pem(&pem).map_err(|err| HttpClientError::Tls(err.to_string()))?;
            builder = builder.add_root_certificate(certificate);
        }
        match (&self.client_cert_file, &self.client_key_file) {
            (Some(cert_file), Some(key_file)) => {
                let mut pem = read_pem(cert_file)?;
                pem.push(b'\n');
                pem.extend(read_pem(key_file)?);
                let identity =
                    Identity::from_pem(&pem).map_err(|err| HttpClientError::Tls(err.to_string()))?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(HttpClientError::Tls(
                    "client certificate and key must be configured together".to_string(),
                ));
            }
        }
        builder.build().map_err(|err| HttpClientError::Build(err.to_string()))
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Client construction failures.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// PEM file could not be read.
    #[error("tls file error: {0}")]
    Io(String),
    /// PEM material was rejected.
    #[error("tls material error: {0}")]
    Tls(String),
    /// reqwest refused the builder settings.
    #[error("http client build error: {0}")]
    Build(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a PEM file with the path in the error message.
fn read_pem(path: &Path) -> Result<Vec<u8>, HttpClientError> {
    fs::read(path).map_err(|err| HttpClientError::Io(format!("{}: {err}", path.display())))
}
