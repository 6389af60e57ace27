use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::{self, CertifiedKey};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::{DomainCert, ListenerConfig, SslMaterial};
use crate::error::{ProxyError, Result};
use crate::pathutil::domain_matches;

fn certified_key_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<CertifiedKey>> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(cert_pem)
        .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
        .map_err(|e| ProxyError::Tls(format!("Failed to parse certificates: {e}")))?;

    let mut keys: Vec<PrivateKeyDer<'static>> = PrivateKeyDer::pem_slice_iter(key_pem)
        .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
        .map_err(|e| ProxyError::Tls(format!("Failed to parse private key: {e}")))?;
    let Some(key) = keys.pop() else {
        return Err(ProxyError::NoPrivateKey);
    };

    let signing_key = sign::any_supported_type(&key)
        .map_err(|e| ProxyError::Tls(format!("Unsupported private key: {e}")))?;

    Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
}

fn load_material(material: &SslMaterial) -> Result<(Vec<u8>, Vec<u8>)> {
    match material {
        SslMaterial::Paths { ssl_cert_path, ssl_key_path } => {
            let cert = std::fs::read(ssl_cert_path)
                .map_err(|e| ProxyError::Tls(format!("Failed to read certificate: {e}")))?;
            let key = std::fs::read(ssl_key_path)
                .map_err(|e| ProxyError::Tls(format!("Failed to read key: {e}")))?;
            Ok((cert, key))
        }
        SslMaterial::Inline { ssl_cert_data, ssl_key_data } => {
            Ok((ssl_cert_data.clone().into_bytes(), ssl_key_data.clone().into_bytes()))
        }
    }
}

/// Resolves a certificate for a ClientHello by SNI: exact domain match,
/// then segment-wise wildcard match, falling back to the listener's default.
struct SniResolver {
    domains: Vec<(String, Arc<CertifiedKey>)>,
    default: Arc<CertifiedKey>,
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(sni) = client_hello.server_name() else {
            return Some(self.default.clone());
        };
        if let Some((_, key)) = self.domains.iter().find(|(pattern, _)| pattern == sni) {
            return Some(key.clone());
        }
        if let Some((_, key)) = self.domains.iter().find(|(pattern, _)| domain_matches(pattern, sni)) {
            return Some(key.clone());
        }
        Some(self.default.clone())
    }
}

/// Builds a TLS acceptor for a listener, with SNI-based certificate
/// selection across its `domain_certs` and a default falling back to the
/// listener's own `ssl_cert_*`/`ssl_key_*` material.
pub fn build_rustls(cfg: &ListenerConfig) -> Result<TlsAcceptor> {
    let default_material = match (&cfg.ssl_cert_path, &cfg.ssl_key_path, &cfg.ssl_cert_data, &cfg.ssl_key_data) {
        (Some(cert), Some(key), _, _) => {
            SslMaterial::Paths { ssl_cert_path: cert.clone(), ssl_key_path: key.clone() }
        }
        (_, _, Some(cert), Some(key)) => {
            SslMaterial::Inline { ssl_cert_data: cert.clone(), ssl_key_data: key.clone() }
        }
        _ => {
            return Err(ProxyError::Config(
                "https listener has no default TLS material".to_string(),
            ))
        }
    };
    let (cert_pem, key_pem) = load_material(&default_material)?;
    let default = certified_key_from_pem(&cert_pem, &key_pem)?;

    let mut domains = Vec::with_capacity(cfg.domain_certs.len());
    for DomainCert { domain, material } in &cfg.domain_certs {
        let (cert_pem, key_pem) = load_material(material)?;
        domains.push((domain.clone(), certified_key_from_pem(&cert_pem, &key_pem)?));
    }

    let resolver = Arc::new(SniResolver { domains, default });

    let mut server = ServerConfig::builder().with_no_client_auth().with_cert_resolver(resolver);
    server.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server)))
}
