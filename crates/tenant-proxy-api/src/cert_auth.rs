//! Client certificate authentication for mTLS
//!
//! Extracts user identity from TLS client certificates the same way the
//! Kubernetes API server does: the subject Common Name (CN) is the username
//! and each subject Organization (O) is a group.
//!
//! # Security Model
//!
//! Client certificates are optional on the listener so bearer tokens keep
//! working, but when one is presented it must chain to the configured client
//! CA. Without a client CA the listener does not request certificates at all.

use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::Identity;

/// Client certificate chain extracted from TLS connection
///
/// This is stored as a request extension so handlers can access it.
#[derive(Clone, Debug, Default)]
pub struct ClientCertChain(pub Vec<Vec<u8>>);

impl ClientCertChain {
    /// Create from certificate DER bytes
    pub fn new(certs: Vec<Vec<u8>>) -> Self {
        Self(certs)
    }

    /// Check if any certificates were provided
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Leaf certificate DER bytes
    pub fn leaf(&self) -> Option<&[u8]> {
        self.0.first().map(Vec::as_slice)
    }
}

/// Extract identity from the leaf certificate of a chain
///
/// Username is the subject CN, groups are the subject O values.
pub fn identity_from_chain(chain: &ClientCertChain) -> Result<Identity> {
    let leaf = chain
        .leaf()
        .ok_or_else(|| Error::Unauthenticated("No client certificate provided".into()))?;

    let (_, parsed) = x509_parser::parse_x509_certificate(leaf)
        .map_err(|e| Error::Unauthenticated(format!("Failed to parse client certificate: {}", e)))?;

    let subject = parsed.subject();

    let cn = subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .ok_or_else(|| Error::Unauthenticated("Client certificate has no Common Name".into()))?;

    let groups: Vec<String> = subject
        .iter_organization()
        .filter_map(|o| o.as_str().ok())
        .map(str::to_string)
        .collect();

    debug!(cn = %cn, groups = ?groups, "Extracted identity from client certificate");

    Ok(Identity::new(cn, groups))
}

/// Build the listener TLS configuration
///
/// When `client_ca_pem` is given, client certificates are requested and
/// verified against it but remain optional.
pub fn server_tls_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    client_ca_pem: Option<&[u8]>,
) -> Result<ServerConfig> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(cert_pem)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Config(format!("invalid serving certificate: {}", e)))?;
    let key = PrivateKeyDer::from_pem_slice(key_pem)
        .map_err(|e| Error::Config(format!("invalid serving key: {}", e)))?;

    let builder = ServerConfig::builder();
    let builder = match client_ca_pem {
        Some(ca_pem) => {
            let mut roots = RootCertStore::empty();
            for cert in CertificateDer::pem_slice_iter(ca_pem) {
                let cert = cert.map_err(|e| Error::Config(format!("invalid client CA: {}", e)))?;
                roots
                    .add(cert)
                    .map_err(|e| Error::Config(format!("invalid client CA: {}", e)))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .map_err(|e| Error::Config(format!("client verifier: {}", e)))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("TLS config error: {}", e)))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}
