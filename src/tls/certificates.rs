//! Root-CA and client-certificate assembly.
//!
//! Both builders are fault tolerant: an entry that fails to read or parse
//! is logged and skipped, and assembly carries on with the rest.

use std::sync::Arc;

use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use rustls::{RootCertStore, SignatureScheme};

use super::FileOrContent;
use crate::config::model::Certificate;
use crate::error::CertificateError;

fn parse_certificates(
    pem: &[u8],
    what: &'static str,
) -> Result<Vec<CertificateDer<'static>>, CertificateError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CertificateError::Pem { what, source })?;
    if certs.is_empty() {
        return Err(CertificateError::NoCertificate(what));
    }
    Ok(certs)
}

/// Read and parse one cert/key pair, checking that the key belongs to the
/// leaf certificate.
pub fn load_key_pair(
    certificate: &Certificate,
    provider: &CryptoProvider,
) -> Result<CertifiedKey, CertificateError> {
    let cert_pem = certificate
        .cert_file
        .read()
        .map_err(|source| CertificateError::Read {
            what: "CertFile",
            source,
        })?;
    let key_pem = certificate
        .key_file
        .read()
        .map_err(|source| CertificateError::Read {
            what: "KeyFile",
            source,
        })?;

    let chain = parse_certificates(&cert_pem, "CertFile")?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|source| CertificateError::Pem {
            what: "KeyFile",
            source,
        })?
        .ok_or(CertificateError::NoPrivateKey)?;

    CertifiedKey::from_der(chain, key, provider).map_err(CertificateError::KeyPair)
}

/// Every pair that loads, in configuration order.
pub fn client_certificates(
    certificates: &[Certificate],
    provider: &CryptoProvider,
) -> Vec<Arc<CertifiedKey>> {
    certificates
        .iter()
        .filter_map(|certificate| match load_key_pair(certificate, provider) {
            Ok(key) => Some(Arc::new(key)),
            Err(e) => {
                tracing::error!(
                    cert = %certificate.cert_file,
                    key = %certificate.key_file,
                    error = %e,
                    "skipping client certificate"
                );
                None
            }
        })
        .collect()
}

/// Trust anchors from every readable source. A source with no parsable
/// certificate contributes nothing; the store may end up empty.
#[must_use]
pub fn root_store(sources: &[FileOrContent]) -> RootCertStore {
    let mut roots = RootCertStore::empty();

    for source in sources {
        let pem = match source.read() {
            Ok(pem) => pem,
            Err(e) => {
                tracing::error!(source = %source, error = %e, "error while reading root CA");
                continue;
            }
        };
        let certs = match parse_certificates(&pem, "root CA") {
            Ok(certs) => certs,
            Err(e) => {
                tracing::error!(source = %source, error = %e, "skipping root CA");
                continue;
            }
        };

        let (added, ignored) = roots.add_parsable_certificates(certs);
        if ignored > 0 {
            tracing::warn!(source = %source, added, ignored, "some root CA certificates were ignored");
        }
    }

    roots
}

/// Offers the first configured certificate whose key can sign with a scheme
/// the server accepts. Sends nothing when none fits.
#[derive(Debug)]
pub struct ClientCertResolver {
    certificates: Vec<Arc<CertifiedKey>>,
}

impl ClientCertResolver {
    #[must_use]
    pub fn new(certificates: Vec<Arc<CertifiedKey>>) -> Self {
        Self { certificates }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

impl ResolvesClientCert for ClientCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.certificates
            .iter()
            .find(|certified| certified.key.choose_scheme(sigschemes).is_some())
            .cloned()
    }

    fn has_certs(&self) -> bool {
        !self.certificates.is_empty()
    }
}
