//! Outbound transports: pooled hyper clients, their factory, the
//! protocol-selecting wrapper, and the named registry.
//!
//! Everything that can perform one request/response exchange implements
//! [`RoundTrip`]. The registry hands out [`Transport`] values, which are
//! [`ProtocolSelectingTransport`]s over two [`PooledTransport`]s.

pub mod connector;
pub mod factory;
pub mod registry;
pub mod selecting;

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;

use crate::error::BackendError;
use connector::HandshakeConnector;

pub use factory::{TransportFactory, TransportSettings};
pub use registry::{TransportRegistry, UpdateSummary};
pub use selecting::{Protocol, ProtocolSelectingTransport};

pub type HttpClient = Client<HandshakeConnector, Body>;

/// The transport type stored in the registry.
pub type Transport = ProtocolSelectingTransport<PooledTransport>;

// async_trait is required here because transports are shared as
// Arc<dyn RoundTrip> and native async fn in traits does not support dyn dispatch.
#[async_trait]
pub trait RoundTrip: Send + Sync {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, BackendError>;
}

/// One connection pool plus the per-request response-header deadline.
///
/// The legacy client does not report when the request has been written, so
/// the response-header deadline starts when the exchange starts. It also
/// covers checking out a pooled connection or dialing a new one, which are
/// bounded on their own by the dial and handshake timeouts.
#[derive(Clone)]
pub struct PooledTransport {
    client: HttpClient,
    response_header_timeout: Option<Duration>,
}

impl PooledTransport {
    #[must_use]
    pub const fn new(client: HttpClient, response_header_timeout: Option<Duration>) -> Self {
        Self {
            client,
            response_header_timeout,
        }
    }
}

#[async_trait]
impl RoundTrip for PooledTransport {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, BackendError> {
        let pending = self.client.request(req);
        let response = match self.response_header_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| BackendError::ResponseHeaderTimeout(limit))??,
            None => pending.await?,
        };
        Ok(response.map(Body::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper_util::client::legacy::connect::HttpConnector;
    use hyper_util::rt::TokioExecutor;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn header_deadline_covers_a_stalled_handshake() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _held = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let connector = HandshakeConnector::new(
            http,
            crate::tls::default_client_config(),
            None,
            Duration::from_secs(30),
        );
        let transport = PooledTransport::new(
            Client::builder(TokioExecutor::new()).build(connector),
            Some(Duration::from_millis(200)),
        );

        let req = Request::builder()
            .uri(format!("https://{addr}/"))
            .body(Body::empty())
            .unwrap();
        let err = transport.round_trip(req).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::ResponseHeaderTimeout(limit) if limit == Duration::from_millis(200)
        ));
    }
}
