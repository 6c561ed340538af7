//! Unified error types for the relay.
//!
//! [`RelayError`] covers the application shell (config loading, CLI,
//! listener). The transport layer has its own enums so callers can match
//! on them: [`TransportError`] for building and looking up servers
//! transports, [`CertificateError`] for credential material, and
//! [`BackendError`] for a single failed round trip.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub scope: String,
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  {}: {}: {}", self.scope, self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible (only fails on OOM which is unrecoverable)
        let _ = write!(buf, "{e}");
    }
    buf
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RelayError {
    #[error("No config source found.\n\n  {hint}")]
    NoConfigSource { hint: String },

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Config validation failed:\n{}", format_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("Invalid upstream URL: {0}")]
    UpstreamUrl(#[from] url::ParseError),

    #[error("Invalid upstream target '{url}': {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Failure to build or resolve a servers transport.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("servers transport config is missing")]
    MissingConfig,

    #[error("servers transport name can not be empty")]
    EmptyName,

    #[error("servers transport not found: {0}")]
    NotFound(String),

    #[error("invalid TLS server name '{name}': {source}")]
    ServerName {
        name: String,
        #[source]
        source: rustls::pki_types::InvalidDnsNameError,
    },

    #[error("TLS client setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("servers transport build did not complete: {0}")]
    BuildAborted(String),
}

impl TransportError {
    /// True for the caller-side mistakes: absent config or empty lookup name.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::MissingConfig | Self::EmptyName)
    }
}

/// Failure to turn a certificate source into usable TLS material.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CertificateError {
    #[error("unable to read {what}: {source}")]
    Read {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed PEM in {what}: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in {0}")]
    NoCertificate(&'static str),

    #[error("no private key found in key file")]
    NoPrivateKey,

    #[error("unable to generate TLS certificate: {0}")]
    KeyPair(#[source] rustls::Error),
}

/// A failed exchange with the backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("request cancelled by the client")]
    Canceled,

    #[error("no response headers from backend within {0:?}")]
    ResponseHeaderTimeout(Duration),

    #[error("backend request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid outbound request: {0}")]
    Request(#[from] hyper::http::Error),
}
