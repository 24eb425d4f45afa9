//! Transport security policy.
//!
//! # Responsibilities
//! - Decide whether the listener speaks TLS at all
//! - Fix the hardened cipher suite, curve and protocol-version choices
//! - Load the trusted client CA pool and pick the client-certificate mode
//!
//! # Design Decisions
//! - The policy is plain data; `net::tls` turns it into a rustls config
//! - Client certificates are required only when they are the sole way in:
//!   a CA pool is configured, no password auth exists and anonymous reads
//!   are not allowed

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;

use crate::config::HttpConfig;
use crate::error::{RegistryError, RegistryResult};

/// TLS 1.2 cipher suites offered, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    EcdheEcdsaWithAes256GcmSha384,
    EcdheRsaWithAes256GcmSha384,
    EcdheEcdsaWithChacha20Poly1305,
    EcdheRsaWithChacha20Poly1305,
    EcdheEcdsaWithAes128GcmSha256,
    EcdheRsaWithAes128GcmSha256,
}

/// The hardened allow-list.
pub const HARDENED_CIPHER_SUITES: [CipherSuite; 6] = [
    CipherSuite::EcdheEcdsaWithAes256GcmSha384,
    CipherSuite::EcdheRsaWithAes256GcmSha384,
    CipherSuite::EcdheEcdsaWithChacha20Poly1305,
    CipherSuite::EcdheRsaWithChacha20Poly1305,
    CipherSuite::EcdheEcdsaWithAes128GcmSha256,
    CipherSuite::EcdheRsaWithAes128GcmSha256,
];

/// Key-exchange curves, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    P256,
    X25519,
}

pub const CURVE_PREFERENCES: [Curve; 2] = [Curve::P256, Curve::X25519];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

/// Client certificate requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    None,
    VerifyIfGiven,
    RequireAndVerify,
}

/// Resolved transport security decision for a TLS listener.
#[derive(Debug)]
pub struct SecurityPolicy {
    pub cert_path: PathBuf,
    pub certificate_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
    pub cipher_suites: Vec<CipherSuite>,
    pub curves: Vec<Curve>,
    pub min_version: TlsVersion,
    pub client_auth: ClientAuth,
    pub client_ca: Option<Arc<RootCertStore>>,
}

/// Client certificate mode for the given settings.
pub fn client_auth_for(has_ca: bool, has_password_auth: bool, allow_read_access: bool) -> ClientAuth {
    match (has_ca, has_password_auth, allow_read_access) {
        (false, _, _) => ClientAuth::None,
        (true, false, false) => ClientAuth::RequireAndVerify,
        (true, _, _) => ClientAuth::VerifyIfGiven,
    }
}

/// Derive the security policy. `Ok(None)` means plain transport.
pub fn resolve_security_policy(http: &HttpConfig) -> RegistryResult<Option<SecurityPolicy>> {
    let Some(tls) = &http.tls else {
        return Ok(None);
    };
    let (Some(cert_path), Some(key_path)) = (&tls.cert, &tls.key) else {
        return Ok(None);
    };

    let certificate_chain = load_certs(cert_path)?;
    if certificate_chain.is_empty() {
        return Err(RegistryError::Config(format!(
            "no certificate found in {}",
            cert_path.display()
        )));
    }
    let private_key = load_private_key(key_path)?;

    let client_ca = match &tls.ca_cert {
        Some(ca_path) => Some(Arc::new(load_ca_pool(ca_path)?)),
        None => None,
    };

    let client_auth = client_auth_for(
        client_ca.is_some(),
        http.has_password_auth(),
        http.allow_read_access,
    );

    tracing::info!(
        cert = %cert_path.display(),
        client_auth = ?client_auth,
        "TLS enabled"
    );

    Ok(Some(SecurityPolicy {
        cert_path: cert_path.clone(),
        certificate_chain,
        private_key,
        cipher_suites: HARDENED_CIPHER_SUITES.to_vec(),
        curves: CURVE_PREFERENCES.to_vec(),
        min_version: TlsVersion::Tls12,
        client_auth,
        client_ca,
    }))
}

fn open(path: &Path, what: &str) -> RegistryResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| RegistryError::Config(format!("cannot read {what} {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> RegistryResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "certificate")?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RegistryError::Config(format!("cannot parse certificate {}: {e}", path.display())))
}

fn load_private_key(path: &Path) -> RegistryResult<PrivateKeyDer<'static>> {
    let mut reader = open(path, "private key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| RegistryError::Config(format!("cannot parse private key {}: {e}", path.display())))?
        .ok_or_else(|| RegistryError::Config(format!("no private key found in {}", path.display())))
}

/// Load a PEM bundle into a trust pool. Any unparseable bundle is fatal.
pub fn load_ca_pool(path: &Path) -> RegistryResult<RootCertStore> {
    let mut reader = open(path, "CA certificate")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| RegistryError::BadCaCert(path.to_path_buf()))?;

    let mut pool = RootCertStore::empty();
    let (added, ignored) = pool.add_parsable_certificates(certs);
    if added == 0 {
        tracing::error!(path = %path.display(), ignored, "CA file holds no usable certificate");
        return Err(RegistryError::BadCaCert(path.to_path_buf()));
    }

    Ok(pool)
}
