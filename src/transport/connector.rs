//! Outbound connector: TCP dial through [`HttpConnector`], then the rustls
//! handshake under its own deadline.
//!
//! The dial is bounded by the connector's connect timeout. The handshake
//! deadline starts once the socket is connected; expiry is reported as an
//! I/O `TimedOut` error, which the proxy classifies as a gateway timeout.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::http::uri::Scheme;
use hyper::Uri;
use hyper_rustls::{
    DefaultServerNameResolver, FixedServerNameResolver, MaybeHttpsStream, ResolveServerName,
};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tower::Service;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Connection = MaybeHttpsStream<TokioIo<TcpStream>>;

#[derive(Clone)]
pub struct HandshakeConnector {
    http: HttpConnector,
    tls: Arc<ClientConfig>,
    server_name: Arc<dyn ResolveServerName + Send + Sync>,
    handshake_timeout: Duration,
}

impl HandshakeConnector {
    /// `server_name` overrides the URL host for SNI and verification.
    #[must_use]
    pub fn new(
        http: HttpConnector,
        tls: ClientConfig,
        server_name: Option<ServerName<'static>>,
        handshake_timeout: Duration,
    ) -> Self {
        let server_name: Arc<dyn ResolveServerName + Send + Sync> = match server_name {
            Some(name) => Arc::new(FixedServerNameResolver::new(name)),
            None => Arc::new(DefaultServerNameResolver::default()),
        };
        Self {
            http,
            tls: Arc::new(tls),
            server_name,
            handshake_timeout,
        }
    }
}

impl Service<Uri> for HandshakeConnector {
    type Response = Connection;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Connection, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let server_name = match uri.scheme() {
            Some(scheme) if *scheme == Scheme::HTTPS => match self.server_name.resolve(&uri) {
                Ok(name) => Some(name),
                Err(e) => return Box::pin(async move { Err(e) }),
            },
            Some(scheme) if *scheme == Scheme::HTTP => None,
            _ => {
                let err = io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported scheme in {uri}"),
                );
                return Box::pin(async move { Err(err.into()) });
            }
        };

        let tls = Arc::clone(&self.tls);
        let limit = self.handshake_timeout;
        let dialing = self.http.call(uri);
        Box::pin(async move {
            let tcp = dialing.await?;
            let Some(server_name) = server_name else {
                return Ok(MaybeHttpsStream::Http(tcp));
            };

            let handshake =
                tokio_rustls::TlsConnector::from(tls).connect(server_name, TokioIo::new(tcp));
            match tokio::time::timeout(limit, handshake).await {
                Ok(stream) => Ok(MaybeHttpsStream::from(stream?)),
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("TLS handshake exceeded {limit:?}"),
                )
                .into()),
            }
        })
    }
}
