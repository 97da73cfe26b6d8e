// netpolicy-server/tests/common/tls.rs
// ============================================================================
// Module: TLS Fixtures
// Description: Ephemeral CA, server, and client certificates.
// Purpose: Exercise the mutual TLS listener without committed keys.
// Dependencies: rcgen, tempfile
// ============================================================================

use std::fs;
use std::path::PathBuf;

use rcgen::BasicConstraints;
use rcgen::Certificate;
use rcgen::CertificateParams;
use rcgen::DistinguishedName;
use rcgen::DnType;
use rcgen::IsCa;
use rcgen::Issuer;
use rcgen::KeyPair;
use tempfile::TempDir;

/// PEM files for one CA and its server and client leaves.
pub struct TlsFixtures {
    _dir: TempDir,
    pub ca: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

pub fn generate(label: &str) -> TlsFixtures {
    let dir = tempfile::Builder::new().prefix("netpolicy-tls").tempdir().unwrap();
    let (ca, issuer) = certificate_authority(&format!("{label} CA"));
    let (server, server_key) = leaf(
        &issuer,
        CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap(),
        &format!("{label} server"),
    );
    let (client, client_key) =
        leaf(&issuer, CertificateParams::default(), &format!("{label} client"));

    let fixtures = TlsFixtures {
        ca: dir.path().join("ca.pem"),
        server_cert: dir.path().join("server.pem"),
        server_key: dir.path().join("server.key"),
        client_cert: dir.path().join("client.pem"),
        client_key: dir.path().join("client.key"),
        _dir: dir,
    };
    fs::write(&fixtures.ca, ca.pem()).unwrap();
    fs::write(&fixtures.server_cert, server.pem()).unwrap();
    fs::write(&fixtures.server_key, server_key.serialize_pem()).unwrap();
    fs::write(&fixtures.client_cert, client.pem()).unwrap();
    fs::write(&fixtures.client_key, client_key.serialize_pem()).unwrap();
    fixtures
}

fn certificate_authority(name: &str) -> (Certificate, Issuer<'static, KeyPair>) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name = common_name(name);
    let cert = params.self_signed(&key).unwrap();
    (cert, Issuer::new(params, key))
}

fn leaf(
    issuer: &Issuer<'_, KeyPair>,
    mut params: CertificateParams,
    name: &str,
) -> (Certificate, KeyPair) {
    let key = KeyPair::generate().unwrap();
    params.distinguished_name = common_name(name);
    params.is_ca = IsCa::NoCa;
    let cert = params.signed_by(&key, issuer).unwrap();
    (cert, key)
}

fn common_name(value: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, value);
    name
}
