//! TLS transport: CA loading and client certificate enforcement.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use content_registry::config::schema::TlsConfig;
use content_registry::{Controller, ControllerState, DisabledExtensions, RegistryConfig, RegistryError};
use rcgen::{BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

mod common;

use common::{registry_config, start};

/// Server identity plus a client certificate issued by a separate CA.
struct Pki {
    dir: tempfile::TempDir,
    server_cert: CertificateDer<'static>,
    client_cert: CertificateDer<'static>,
    client_key: Vec<u8>,
}

fn pki() -> Pki {
    let dir = tempfile::tempdir().unwrap();

    let server = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    std::fs::write(dir.path().join("cert.pem"), server.cert.pem()).unwrap();
    std::fs::write(dir.path().join("key.pem"), server.key_pair.serialize_pem()).unwrap();

    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.distinguished_name.push(DnType::CommonName, "registry test ca");
    let ca_key = KeyPair::generate().unwrap();
    let ca = ca_params.self_signed(&ca_key).unwrap();
    std::fs::write(dir.path().join("ca.pem"), ca.pem()).unwrap();

    let mut client_params = CertificateParams::new(vec!["client.localhost".to_string()]).unwrap();
    client_params.distinguished_name.push(DnType::CommonName, "registry client");
    client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    let client_key = KeyPair::generate().unwrap();
    let client = client_params.signed_by(&client_key, &ca, &ca_key).unwrap();

    Pki {
        dir,
        server_cert: server.cert.der().clone(),
        client_cert: client.der().clone(),
        client_key: client_key.serialize_der(),
    }
}

fn tls_config(dir: &Path, ca_file: &str) -> RegistryConfig {
    let mut config = registry_config(&dir.join("data"));
    config.http.tls = Some(TlsConfig {
        cert: Some(dir.join("cert.pem")),
        key: Some(dir.join("key.pem")),
        ca_cert: Some(dir.join(ca_file)),
    });
    config
}

fn client_config(pki: &Pki, with_cert: bool) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add(pki.server_cert.clone()).unwrap();

    let builder = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots);
    let config = if with_cert {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pki.client_key.clone()));
        builder
            .with_client_auth_cert(vec![pki.client_cert.clone()], key)
            .unwrap()
    } else {
        builder.with_no_client_auth()
    };
    Arc::new(config)
}

/// `GET /v2/` over TLS; returns the response head.
fn fetch_head(addr: SocketAddr, config: Arc<ClientConfig>) -> std::io::Result<String> {
    let sock = TcpStream::connect(addr)?;
    sock.set_read_timeout(Some(Duration::from_secs(5)))?;
    let server_name = ServerName::try_from("localhost").unwrap();
    let conn = ClientConnection::new(config, server_name).map_err(std::io::Error::other)?;
    let mut stream = StreamOwned::new(conn, sock);

    stream.write_all(b"GET /v2/ HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")?;

    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

#[tokio::test]
async fn unreadable_ca_fails_before_anything_is_built() {
    let pki = pki();
    std::fs::write(pki.dir.path().join("garbage.pem"), "not a certificate").unwrap();

    let controller = Controller::new(tls_config(pki.dir.path(), "garbage.pem"), Arc::new(DisabledExtensions));
    let err = controller.run().await.unwrap_err();

    assert!(matches!(err, RegistryError::BadCaCert(ref path) if path.ends_with("garbage.pem")));
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert!(controller.topology().is_none());
    assert!(!pki.dir.path().join("data").exists());
}

#[tokio::test]
async fn client_certificate_is_required_when_ca_is_set() {
    let pki = pki();
    let controller = Arc::new(Controller::new(
        tls_config(pki.dir.path(), "ca.pem"),
        Arc::new(DisabledExtensions),
    ));
    let (addr, server) = start(controller.clone()).await;

    let anonymous = client_config(&pki, false);
    let rejected = tokio::task::spawn_blocking(move || fetch_head(addr, anonymous))
        .await
        .unwrap();
    assert!(
        !rejected.as_ref().is_ok_and(|head| head.starts_with("HTTP/1.1 200")),
        "anonymous client was served: {rejected:?}"
    );

    let identified = client_config(&pki, true);
    let head = tokio::task::spawn_blocking(move || fetch_head(addr, identified))
        .await
        .unwrap()
        .unwrap();
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected response: {head}");

    controller.shutdown().await;
    server.await.unwrap().unwrap();
}
