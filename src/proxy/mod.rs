//! Core HTTP request forwarding.
//!
//! [`forward_handler`] is the Axum fallback that receives every
//! non-`/health` request, resolves the upstream's servers transport from the
//! registry, and hands the request to [`ReverseProxy`]. Submodules handle
//! the URL rewrite ([`director`]), header hygiene ([`headers`]), failure
//! classification ([`classify`]), body streaming ([`stream`]), and
//! protocol-upgrade tunnels ([`upgrade`]).

pub mod classify;
pub mod director;
pub mod headers;
pub mod stream;
pub mod upgrade;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, Version};
use axum::response::Response;
use tokio::sync::oneshot;
use url::Url;

use crate::error::{BackendError, RelayError};
use crate::server::{AppState, Stats};
use crate::transport::RoundTrip;
use classify::{classify, error_response, status_text, Failure};
use director::Director;
use stream::{BufferPool, FlushInterval};

const REQUEST_ID: &str = "x-request-id";

/// Forwards requests to one fixed target through a caller-supplied transport.
#[derive(Clone)]
pub struct ReverseProxy {
    director: Arc<Director>,
    flush_interval: FlushInterval,
    buffers: Arc<BufferPool>,
    stats: Arc<Stats>,
}

impl ReverseProxy {
    pub fn new(
        target: &Url,
        flush_interval: FlushInterval,
        stats: Arc<Stats>,
    ) -> Result<Self, RelayError> {
        Ok(Self {
            director: Arc::new(Director::new(target)?),
            flush_interval,
            buffers: Arc::new(BufferPool::default()),
            stats,
        })
    }

    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Forward `req`, aborting the backend exchange if this future is
    /// dropped before the response headers arrive.
    ///
    /// The exchange runs on its own task. Dropping the returned future (the
    /// client disconnected) drops the signal sender, which the task observes
    /// as a cancellation and answers with 499.
    pub async fn forward(&self, transport: Arc<dyn RoundTrip>, req: Request) -> Response {
        let (client_gone_tx, client_gone_rx) = oneshot::channel::<()>();
        let proxy = self.clone();
        let exchange = tokio::spawn(async move {
            let cancelled = async move {
                let _ = client_gone_rx.await;
            };
            proxy.forward_until(transport.as_ref(), req, cancelled).await
        });

        let _client_gone = client_gone_tx;
        match exchange.await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "forwarding task failed");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Forward `req` through `transport` unless `cancelled` resolves first.
    pub async fn forward_until<F>(
        &self,
        transport: &dyn RoundTrip,
        mut req: Request,
        cancelled: F,
    ) -> Response
    where
        F: Future<Output = ()>,
    {
        let request_id = req
            .headers()
            .get(REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let upgrade = headers::prepare_request_headers(req.headers_mut(), client_ip);
        let client_upgrade = upgrade.is_some().then(|| hyper::upgrade::on(&mut req));

        if let Err(e) = self.director.direct(&mut req) {
            return self.fail(&request_id, &BackendError::Request(e));
        }

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            path = %path,
            upstream = %req.uri(),
            "forwarding request"
        );

        let outcome = {
            tokio::pin!(cancelled);
            tokio::select! {
                biased;
                () = &mut cancelled => Err(BackendError::Canceled),
                result = transport.round_trip(req) => result,
            }
        };
        let mut response = match outcome {
            Ok(response) => response,
            Err(e) => return self.fail(&request_id, &e),
        };
        *response.version_mut() = Version::default();

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            let Some(client_upgrade) = client_upgrade else {
                tracing::error!(
                    request_id = %request_id,
                    "backend switched protocols without an upgrade request"
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR);
            };
            let backend_upgrade = hyper::upgrade::on(&mut response);
            headers::prepare_response_headers(response.headers_mut(), true);
            upgrade::spawn_tunnel(client_upgrade, backend_upgrade, request_id);
            self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            return response;
        }

        headers::prepare_response_headers(response.headers_mut(), false);
        let interval = self.flush_interval.for_response(response.headers());
        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);

        let (parts, body) = response.into_parts();
        let body = stream::relay_body(body, interval, Arc::clone(&self.buffers));
        Response::from_parts(parts, body)
    }

    fn fail(&self, request_id: &str, err: &BackendError) -> Response {
        let failure = classify(err);
        let status = failure.status();
        tracing::debug!(
            request_id = %request_id,
            "'{} {}' caused by: {}",
            status.as_u16(),
            status_text(status),
            err
        );
        let counter = match failure {
            Failure::ClientClosed => &self.stats.client_closed,
            _ => &self.stats.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        error_response(status)
    }
}

pub async fn forward_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let transport = match state.registry.get(&state.upstream_transport).await {
        Ok(transport) => transport,
        Err(e) => {
            tracing::error!(
                servers_transport = %state.upstream_transport,
                error = %e,
                "no servers transport for upstream"
            );
            state.stats.failed.fetch_add(1, Ordering::Relaxed);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    state.proxy.forward(transport, req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::header::{CONNECTION, HOST, UPGRADE};
    use http_body_util::BodyExt;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records the outbound request and answers with a canned result.
    struct Canned {
        seen: Mutex<Option<(String, axum::http::HeaderMap)>>,
        reply: fn() -> Result<Response, BackendError>,
    }

    impl Canned {
        fn new(reply: fn() -> Result<Response, BackendError>) -> Self {
            Self {
                seen: Mutex::new(None),
                reply,
            }
        }
    }

    #[async_trait]
    impl RoundTrip for Canned {
        async fn round_trip(&self, req: Request) -> Result<Response, BackendError> {
            *self.seen.lock().unwrap() = Some((req.uri().to_string(), req.headers().clone()));
            (self.reply)()
        }
    }

    struct Stalled;

    #[async_trait]
    impl RoundTrip for Stalled {
        async fn round_trip(&self, _req: Request) -> Result<Response, BackendError> {
            std::future::pending().await
        }
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Never answers; raises the flag once the pending exchange is dropped.
    struct StalledUntilDropped(Arc<AtomicBool>);

    #[async_trait]
    impl RoundTrip for StalledUntilDropped {
        async fn round_trip(&self, _req: Request) -> Result<Response, BackendError> {
            let _dropped = SetOnDrop(Arc::clone(&self.0));
            std::future::pending().await
        }
    }

    fn proxy() -> ReverseProxy {
        let target = Url::parse("http://backend.internal:8080/base?k=v").unwrap();
        ReverseProxy::new(&target, FlushInterval::Immediate, Arc::new(Stats::new())).unwrap()
    }

    fn inbound(uri: &str) -> Request {
        let mut req = axum::http::Request::builder()
            .uri(uri)
            .header(HOST, "relay.local")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 50_000))));
        req
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn rewrites_request_for_target() {
        let proxy = proxy();
        let transport = Canned::new(|| Ok(Response::new(Body::from("ok"))));

        let response = proxy
            .forward_until(&transport, inbound("/items?page=2"), std::future::pending())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let (uri, headers) = transport.seen.lock().unwrap().take().unwrap();
        assert_eq!(uri, "http://backend.internal:8080/base/items?k=v&page=2");
        assert_eq!(headers[HOST], "backend.internal:8080");
        assert_eq!(headers["x-forwarded-for"], "192.0.2.7");
        assert_eq!(headers["x-forwarded-host"], "relay.local");
        assert_eq!(proxy.stats().forwarded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn cancellation_before_headers_is_499() {
        let proxy = proxy();
        let response = proxy
            .forward_until(&Stalled, inbound("/slow"), std::future::ready(()))
            .await;

        assert_eq!(response.status().as_u16(), 499);
        assert_eq!(body_text(response).await, "Client Closed Request");
        assert_eq!(proxy.stats().client_closed.load(Ordering::Relaxed), 1);
        assert_eq!(proxy.stats().failed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn dropped_client_aborts_the_exchange_with_499() {
        let proxy = proxy();
        let dropped = Arc::new(AtomicBool::new(false));
        let transport: Arc<dyn RoundTrip> = Arc::new(StalledUntilDropped(Arc::clone(&dropped)));

        let forwarding = proxy.forward(transport, inbound("/slow"));
        assert!(tokio::time::timeout(Duration::from_millis(50), forwarding)
            .await
            .is_err());

        // The exchange task notices the dropped handler on its next poll.
        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst)
                && proxy.stats().client_closed.load(Ordering::Relaxed) == 1
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(proxy.stats().client_closed.load(Ordering::Relaxed), 1);
        assert_eq!(proxy.stats().failed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn backend_failure_is_classified() {
        let proxy = proxy();
        let transport = Canned::new(|| {
            Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        });

        let response = proxy
            .forward_until(&transport, inbound("/"), std::future::pending())
            .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_text(response).await, "Bad Gateway");
        assert_eq!(proxy.stats().failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unrequested_protocol_switch_is_internal_error() {
        let proxy = proxy();
        let transport = Canned::new(|| {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
            Ok(response)
        });

        let response = proxy
            .forward_until(&transport, inbound("/ws"), std::future::pending())
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn response_hop_by_hop_headers_are_stripped() {
        let proxy = proxy();
        let transport = Canned::new(|| {
            let mut response = Response::new(Body::from("ok"));
            let headers = response.headers_mut();
            headers.insert(CONNECTION, "close".parse().unwrap());
            headers.insert(UPGRADE, "h2c".parse().unwrap());
            headers.insert("x-backend", "1".parse().unwrap());
            Ok(response)
        });

        let response = proxy
            .forward_until(&transport, inbound("/"), std::future::pending())
            .await;

        assert!(response.headers().get(CONNECTION).is_none());
        assert!(response.headers().get(UPGRADE).is_none());
        assert_eq!(response.headers()["x-backend"], "1");
        assert_eq!(body_text(response).await, "ok");
    }
}
