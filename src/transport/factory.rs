//! Builds one outbound transport from a [`ServersTransport`] definition.
//!
//! Every transport gets its own pair of connection pools (HTTP/1.1-only and
//! ALPN-negotiating). TLS is only customized when the definition asks for
//! it; otherwise the webpki roots and the URL host are used as-is. The TLS
//! handshake runs under its own deadline after the dial completes.

use std::sync::Arc;
use std::time::Duration;

use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;

use super::connector::HandshakeConnector;
use super::{HttpClient, PooledTransport, Transport};
use crate::config::model::ServersTransport;
use crate::error::TransportError;
use crate::tls;

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const EXPECT_CONTINUE_TIMEOUT: Duration = Duration::from_secs(1);
const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_MAX_IDLE_PER_HOST: usize = 2;

/// Resolved dial, pool, and timeout knobs for one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub dial_timeout: Duration,
    pub keep_alive: Duration,
    pub tls_handshake_timeout: Duration,
    pub expect_continue_timeout: Duration,
    pub idle_conn_timeout: Duration,
    pub response_header_timeout: Option<Duration>,
    pub max_idle_per_host: usize,
}

impl TransportSettings {
    #[must_use]
    pub fn from_config(config: &ServersTransport) -> Self {
        let timeouts = config.forwarding_timeouts.as_ref();
        Self {
            dial_timeout: timeouts.and_then(|t| t.dial()).unwrap_or(DIAL_TIMEOUT),
            keep_alive: TCP_KEEPALIVE,
            tls_handshake_timeout: TLS_HANDSHAKE_TIMEOUT,
            expect_continue_timeout: EXPECT_CONTINUE_TIMEOUT,
            idle_conn_timeout: timeouts
                .and_then(|t| t.idle_conn())
                .unwrap_or(IDLE_CONN_TIMEOUT),
            response_header_timeout: timeouts.and_then(|t| t.response_header()),
            max_idle_per_host: match config.max_idle_conns_per_host {
                0 => DEFAULT_MAX_IDLE_PER_HOST,
                n => n,
            },
        }
    }

    /// Settings of the transport used when a definition cannot be built.
    #[must_use]
    pub const fn fallback() -> Self {
        Self {
            dial_timeout: DIAL_TIMEOUT,
            keep_alive: TCP_KEEPALIVE,
            tls_handshake_timeout: TLS_HANDSHAKE_TIMEOUT,
            expect_continue_timeout: EXPECT_CONTINUE_TIMEOUT,
            idle_conn_timeout: DEFAULT_IDLE_CONN_TIMEOUT,
            response_header_timeout: None,
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportFactory {
    provider: Arc<CryptoProvider>,
}

impl Default for TransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory {
    #[must_use]
    pub fn new() -> Self {
        // When multiple rustls crypto providers are compiled in, rustls cannot
        // auto-detect which one to use. Explicitly install `ring` as the
        // default provider for the webpki-roots configs.
        let _ = rustls::crypto::ring::default_provider().install_default();

        Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Build a transport for one definition. `None` is a config error.
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(&self, config: Option<&ServersTransport>) -> Result<Transport, TransportError> {
        let config = config.ok_or(TransportError::MissingConfig)?;
        let settings = TransportSettings::from_config(config);

        let transport = if config.customizes_tls() {
            let tls_config = tls::client_config(config, &self.provider)?;
            let server_name = if config.server_name.is_empty() {
                None
            } else {
                Some(
                    ServerName::try_from(config.server_name.clone()).map_err(|source| {
                        TransportError::ServerName {
                            name: config.server_name.clone(),
                            source,
                        }
                    })?,
                )
            };
            tls_transport(&settings, tls_config, server_name)
        } else {
            tls_transport(&settings, tls::default_client_config(), None)
        };

        tracing::debug!(
            server_name = %config.server_name,
            insecure_skip_verify = config.insecure_skip_verify,
            root_cas = config.root_cas.len(),
            certificates = config.certificates.len(),
            dial_timeout_ms = settings.dial_timeout.as_millis() as u64,
            tls_handshake_timeout_ms = settings.tls_handshake_timeout.as_millis() as u64,
            idle_conn_timeout_ms = settings.idle_conn_timeout.as_millis() as u64,
            expect_continue_timeout_ms = settings.expect_continue_timeout.as_millis() as u64,
            max_idle_per_host = settings.max_idle_per_host,
            "servers transport built"
        );

        Ok(transport)
    }

    /// The generic transport installed when a definition fails to build.
    #[must_use]
    pub fn default_transport(&self) -> Transport {
        tls_transport(
            &TransportSettings::fallback(),
            tls::default_client_config(),
            None,
        )
    }
}

fn http_connector(settings: &TransportSettings) -> HttpConnector {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(settings.dial_timeout));
    http.set_keepalive(Some(settings.keep_alive));
    http.set_nodelay(true);
    http
}

fn pooled(
    settings: &TransportSettings,
    mut tls_config: ClientConfig,
    server_name: Option<ServerName<'static>>,
    negotiate_http2: bool,
) -> PooledTransport {
    tls_config.alpn_protocols = if negotiate_http2 {
        vec![b"h2".to_vec(), b"http/1.1".to_vec()]
    } else {
        vec![b"http/1.1".to_vec()]
    };
    let connector = HandshakeConnector::new(
        http_connector(settings),
        tls_config,
        server_name,
        settings.tls_handshake_timeout,
    );
    let client: HttpClient = Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(settings.idle_conn_timeout)
        .pool_max_idle_per_host(settings.max_idle_per_host)
        .build(connector);
    PooledTransport::new(client, settings.response_header_timeout)
}

fn tls_transport(
    settings: &TransportSettings,
    tls_config: ClientConfig,
    server_name: Option<ServerName<'static>>,
) -> Transport {
    Transport::new(
        pooled(settings, tls_config.clone(), server_name.clone(), false),
        pooled(settings, tls_config, server_name, true),
    )
}
