//! rustls server configuration from a resolved [`SecurityPolicy`].

use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::crypto::ring::{cipher_suite, default_provider, kx_group};
use rustls::crypto::{CryptoProvider, SupportedKxGroup};
use rustls::server::WebPkiClientVerifier;
use rustls::{ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};

use crate::error::{RegistryError, RegistryResult};
use crate::security::policy::{ClientAuth, CipherSuite, Curve, SecurityPolicy, TlsVersion};

fn rustls_suite(suite: CipherSuite) -> SupportedCipherSuite {
    match suite {
        CipherSuite::EcdheEcdsaWithAes256GcmSha384 => cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        CipherSuite::EcdheRsaWithAes256GcmSha384 => cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        CipherSuite::EcdheEcdsaWithChacha20Poly1305 => {
            cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256
        }
        CipherSuite::EcdheRsaWithChacha20Poly1305 => cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        CipherSuite::EcdheEcdsaWithAes128GcmSha256 => cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        CipherSuite::EcdheRsaWithAes128GcmSha256 => cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    }
}

fn rustls_group(curve: Curve) -> &'static dyn SupportedKxGroup {
    match curve {
        Curve::P256 => kx_group::SECP256R1,
        Curve::X25519 => kx_group::X25519,
    }
}

/// Crypto provider restricted to the policy's suites and curves.
///
/// TLS 1.3 suites are appended because rustls cannot negotiate 1.3 without
/// them; they are all AEAD.
pub fn crypto_provider(policy: &SecurityPolicy) -> CryptoProvider {
    let mut cipher_suites: Vec<SupportedCipherSuite> =
        policy.cipher_suites.iter().copied().map(rustls_suite).collect();
    cipher_suites.extend([
        cipher_suite::TLS13_AES_256_GCM_SHA384,
        cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
        cipher_suite::TLS13_AES_128_GCM_SHA256,
    ]);

    CryptoProvider {
        cipher_suites,
        kx_groups: policy.curves.iter().copied().map(rustls_group).collect(),
        ..default_provider()
    }
}

static TLS12_AND_UP: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13, &rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn protocol_versions(min: TlsVersion) -> &'static [&'static SupportedProtocolVersion] {
    match min {
        TlsVersion::Tls12 => TLS12_AND_UP,
        TlsVersion::Tls13 => TLS13_ONLY,
    }
}

fn tls_error(e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Config(format!("invalid TLS configuration: {e}"))
}

/// Build the rustls server config.
pub fn server_config(policy: &SecurityPolicy) -> RegistryResult<ServerConfig> {
    let provider = Arc::new(crypto_provider(policy));

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(protocol_versions(policy.min_version))
        .map_err(tls_error)?;

    let builder = match (policy.client_auth, &policy.client_ca) {
        (ClientAuth::None, _) | (_, None) => builder.with_no_client_auth(),
        (mode, Some(roots)) => {
            let verifier = WebPkiClientVerifier::builder_with_provider(roots.clone(), provider);
            let verifier = if mode == ClientAuth::VerifyIfGiven {
                verifier.allow_unauthenticated()
            } else {
                verifier
            };
            builder.with_client_cert_verifier(verifier.build().map_err(tls_error)?)
        }
    };

    let mut config = builder
        .with_single_cert(policy.certificate_chain.clone(), policy.private_key.clone_key())
        .map_err(tls_error)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    // the policy suite order wins over the client's
    config.ignore_client_order = true;

    Ok(config)
}

/// Wrap the server config for `axum_server`.
pub fn rustls_config(policy: &SecurityPolicy) -> RegistryResult<RustlsConfig> {
    Ok(RustlsConfig::from_config(Arc::new(server_config(policy)?)))
}
