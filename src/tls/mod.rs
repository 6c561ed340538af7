//! Client-side TLS material for outbound transports.
//!
//! [`FileOrContent`] resolves PEM from a path or inline text,
//! [`certificates`] turns configured sources into a root store and a
//! client-certificate resolver, and [`verifier`] holds the skip-verify
//! verifier.

pub mod certificates;
pub mod source;
pub mod verifier;

pub use source::FileOrContent;

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::ClientConfig;

use crate::config::model::ServersTransport;
use crate::error::TransportError;
use certificates::ClientCertResolver;
use verifier::SkipServerVerification;

fn webpki_roots() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// Config for transports that leave TLS alone: webpki roots, no client
/// certificate, and the process-default crypto provider.
#[must_use]
pub fn default_client_config() -> ClientConfig {
    ClientConfig::builder()
        .with_root_certificates(webpki_roots())
        .with_no_client_auth()
}

/// Build the client TLS config for a transport that customizes TLS.
///
/// Configured root CAs replace the webpki roots entirely. Credentials that
/// fail to load are skipped (see [`certificates`]).
pub fn client_config(
    transport: &ServersTransport,
    provider: &Arc<CryptoProvider>,
) -> Result<ClientConfig, TransportError> {
    let builder = ClientConfig::builder_with_provider(Arc::clone(provider))
        .with_safe_default_protocol_versions()?;

    let builder = if transport.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(SkipServerVerification::new(Arc::clone(provider)))
    } else if transport.root_cas.is_empty() {
        builder.with_root_certificates(webpki_roots())
    } else {
        let roots = certificates::root_store(&transport.root_cas);
        if roots.is_empty() {
            tracing::warn!(
                sources = transport.root_cas.len(),
                "no usable root CA; every server certificate will be rejected"
            );
        }
        builder.with_root_certificates(roots)
    };

    let resolver = ClientCertResolver::new(certificates::client_certificates(
        &transport.certificates,
        provider,
    ));

    let config = if resolver.is_empty() {
        builder.with_no_client_auth()
    } else {
        tracing::debug!(count = resolver.len(), "client certificates loaded");
        builder.with_client_cert_resolver(Arc::new(resolver))
    };

    Ok(config)
}
