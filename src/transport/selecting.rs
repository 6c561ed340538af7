//! Per-request choice between an HTTP/1.1-only pool and an ALPN pool.
//!
//! Connection upgrades (WebSocket and friends) cannot ride HTTP/2 framing,
//! so a request whose `Connection` header carries the `upgrade` token goes
//! to the HTTP/1.1 delegate. Everything else goes to the delegate that
//! offers `h2` and falls back to HTTP/1.1 when the peer declines.

use async_trait::async_trait;
use axum::body::Body;
use hyper::header::CONNECTION;
use hyper::{HeaderMap, Request, Response};

use super::RoundTrip;
use crate::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
}

impl Protocol {
    #[must_use]
    pub fn for_request(headers: &HeaderMap) -> Self {
        if has_connection_token(headers, "upgrade") {
            Self::Http1
        } else {
            Self::Http2
        }
    }
}

/// True when any `Connection` header value lists `token` (case-insensitive).
#[must_use]
pub fn has_connection_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

#[derive(Clone)]
pub struct ProtocolSelectingTransport<T> {
    http1: T,
    http2: T,
}

impl<T> ProtocolSelectingTransport<T> {
    #[must_use]
    pub const fn new(http1: T, http2: T) -> Self {
        Self { http1, http2 }
    }

    #[must_use]
    pub const fn delegate(&self, protocol: Protocol) -> &T {
        match protocol {
            Protocol::Http1 => &self.http1,
            Protocol::Http2 => &self.http2,
        }
    }
}

#[async_trait]
impl<T: RoundTrip> RoundTrip for ProtocolSelectingTransport<T> {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, BackendError> {
        let protocol = Protocol::for_request(req.headers());
        tracing::trace!(?protocol, uri = %req.uri(), "dispatching request");
        self.delegate(protocol).round_trip(req).await
    }
}
