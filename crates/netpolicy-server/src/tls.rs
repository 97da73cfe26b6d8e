// netpolicy-server/src/tls.rs
// ============================================================================
// Module: Listener TLS
// Description: rustls server configs for the external and internal listeners.
// Purpose: Load PEM material and require client certificates internally.
// Dependencies: rustls, rustls-pki-types
// ============================================================================

//! ## Overview
//! The internal listener trusts only client certificates issued by the
//! configured CA. Both configs pin the aws-lc-rs provider explicitly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use rustls_pki_types::CertificateDer;
use rustls_pki_types::PrivateKeyDer;
use rustls_pki_types::pem::PemObject;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// TLS setup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TlsError {
    /// A PEM file could not be read or parsed.
    #[error("tls material error: {0}")]
    Material(String),
    /// rustls rejected the configuration.
    #[error("tls config error: {0}")]
    Config(String),
}

// ============================================================================
// SECTION: Configs
// ============================================================================

/// Builds a server config without client authentication.
///
/// # Errors
///
/// Returns [`TlsError`] when the certificate or key is unusable.
pub fn server_config(cert_file: &Path, key_file: &Path) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|err| TlsError::Config(err.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| TlsError::Config(err.to_string()))?;
    config.alpn_protocols = alpn();
    Ok(Arc::new(config))
}

/// Builds a server config that requires a client certificate from `ca_file`.
///
/// # Errors
///
/// Returns [`TlsError`] when any PEM file is unusable or the CA is empty.
pub fn mutual_tls_config(
    cert_file: &Path,
    key_file: &Path,
    ca_file: &Path,
) -> Result<Arc<ServerConfig>, TlsError> {
    let ca_certs = load_certs(ca_file)?;
    let mut roots = RootCertStore::empty();
    for cert in ca_certs {
        roots
            .add(cert)
            .map_err(|err| TlsError::Material(format!("failed to add CA certificate: {err}")))?;
    }
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
        .build()
        .map_err(|err| TlsError::Config(format!("client verifier error: {err}")))?;
    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|err| TlsError::Config(err.to_string()))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|err| TlsError::Config(err.to_string()))?;
    config.alpn_protocols = alpn();
    Ok(Arc::new(config))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Crypto provider used by both listeners.
fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// ALPN protocols offered to clients.
fn alpn() -> Vec<Vec<u8>> {
    vec![b"h2".to_vec(), b"http/1.1".to_vec()]
}

/// Reads every certificate in a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = std::fs::read(path)
        .map_err(|err| TlsError::Material(format!("{}: {err}", path.display())))?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| TlsError::Material(format!("{}: {err}", path.display())))?;
    if certs.is_empty() {
        return Err(TlsError::Material(format!("{}: no certificates found", path.display())));
    }
    Ok(certs)
}

/// Reads the first private key in a PEM file.
fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = std::fs::read(path)
        .map_err(|err| TlsError::Material(format!("{}: {err}", path.display())))?;
    PrivateKeyDer::from_pem_slice(&pem)
        .map_err(|err| TlsError::Material(format!("{}: {err}", path.display())))
}
