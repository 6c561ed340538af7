//! Maps a failed backend exchange onto the status code sent to the client.
//!
//! The checks run in a fixed order and the first match wins: a truncated
//! backend stream, then client cancellation, then timeouts. A TLS rejection
//! (certificate verification or a handshake alert) is not a network error
//! and ends up internal, like anything else left over. Other network errors
//! are bad gateway.

use std::error::Error as StdError;
use std::io;

use axum::body::Body;
use axum::response::Response;
use hyper::StatusCode;

use crate::error::BackendError;

/// Non-standard status for a client that went away before the backend answered.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;
const CLIENT_CLOSED_REQUEST_TEXT: &str = "Client Closed Request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Truncated,
    ClientClosed,
    Timeout,
    Network,
    Internal,
}

impl Failure {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::Truncated | Self::Network => StatusCode::BAD_GATEWAY,
            Self::ClientClosed => client_closed_request(),
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[must_use]
pub fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Reason phrase for `status`, including the non-standard 499.
#[must_use]
pub fn status_text(status: StatusCode) -> &'static str {
    if status.as_u16() == STATUS_CLIENT_CLOSED_REQUEST {
        CLIENT_CLOSED_REQUEST_TEXT
    } else {
        status.canonical_reason().unwrap_or("")
    }
}

#[must_use]
pub fn classify(err: &BackendError) -> Failure {
    let chain = source_chain(err);

    if chain.iter().any(|e| is_truncated(*e)) {
        return Failure::Truncated;
    }
    if matches!(err, BackendError::Canceled) {
        return Failure::ClientClosed;
    }
    if matches!(err, BackendError::ResponseHeaderTimeout(_)) || chain.iter().any(|e| is_timeout(*e))
    {
        return Failure::Timeout;
    }
    if chain.iter().any(|e| e.is::<rustls::Error>()) {
        return Failure::Internal;
    }
    if chain.iter().any(|e| is_network(*e)) {
        return Failure::Network;
    }
    Failure::Internal
}

/// A complete response whose body is the status text.
#[must_use]
pub fn error_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::from(status_text(status)));
    *response.status_mut() = status;
    response
}

fn source_chain(err: &BackendError) -> Vec<&(dyn StdError + 'static)> {
    let mut chain: Vec<&(dyn StdError + 'static)> = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err as &(dyn StdError + 'static));
    while let Some(e) = current {
        chain.push(e);
        // io::Error hides its payload from source(); surface it explicitly.
        current = match e.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
            Some(inner) => Some(inner as &(dyn StdError + 'static)),
            None => e.source(),
        };
    }
    chain
}

fn is_truncated(e: &(dyn StdError + 'static)) -> bool {
    if let Some(err) = e.downcast_ref::<hyper::Error>() {
        return err.is_incomplete_message();
    }
    e.downcast_ref::<io::Error>()
        .is_some_and(|err| err.kind() == io::ErrorKind::UnexpectedEof)
}

fn is_timeout(e: &(dyn StdError + 'static)) -> bool {
    if let Some(err) = e.downcast_ref::<hyper::Error>() {
        return err.is_timeout();
    }
    e.downcast_ref::<io::Error>()
        .is_some_and(|err| err.kind() == io::ErrorKind::TimedOut)
}

fn is_network(e: &(dyn StdError + 'static)) -> bool {
    if let Some(err) = e.downcast_ref::<hyper_util::client::legacy::Error>() {
        return err.is_connect();
    }
    e.is::<io::Error>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    fn io_err(kind: io::ErrorKind) -> BackendError {
        BackendError::Io(io::Error::new(kind, "backend"))
    }

    #[test]
    fn truncated_stream_is_bad_gateway() {
        let failure = classify(&io_err(io::ErrorKind::UnexpectedEof));
        assert_eq!(failure, Failure::Truncated);
        assert_eq!(failure.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn cancellation_is_client_closed_request() {
        let failure = classify(&BackendError::Canceled);
        assert_eq!(failure, Failure::ClientClosed);
        assert_eq!(failure.status().as_u16(), 499);
        assert_eq!(status_text(failure.status()), "Client Closed Request");
    }

    #[test]
    fn timeouts_are_gateway_timeout() {
        assert_eq!(
            classify(&io_err(io::ErrorKind::TimedOut)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            classify(&BackendError::ResponseHeaderTimeout(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn wrapped_timeout_is_found() {
        let inner = io::Error::new(io::ErrorKind::TimedOut, "handshake");
        let err = BackendError::Io(io::Error::new(io::ErrorKind::Other, inner));
        assert_eq!(classify(&err), Failure::Timeout);
    }

    #[test]
    fn other_network_errors_are_bad_gateway() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::InvalidData,
        ] {
            assert_eq!(classify(&io_err(kind)), Failure::Network, "{kind:?}");
        }
    }

    #[test]
    fn tls_rejections_are_internal() {
        let rejections = [
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
            rustls::Error::InvalidCertificate(rustls::CertificateError::NotValidForName),
            rustls::Error::AlertReceived(rustls::AlertDescription::CertificateRequired),
        ];
        for rejection in rejections {
            let err = BackendError::Io(io::Error::new(io::ErrorKind::InvalidData, rejection));
            assert_eq!(classify(&err), Failure::Internal, "{err}");
            assert_eq!(classify(&err).status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn stalled_tls_handshake_is_still_a_timeout() {
        let err = BackendError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "TLS handshake exceeded 10s",
        ));
        assert_eq!(classify(&err), Failure::Timeout);
    }

    #[test]
    fn non_network_errors_are_internal() {
        let err = http::Request::builder()
            .uri("http://[::1")
            .body(())
            .err()
            .unwrap();
        let failure = classify(&BackendError::Request(err));
        assert_eq!(failure, Failure::Internal);
        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn error_response_carries_status_text() {
        let response = error_response(StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "Gateway Timeout");
    }
}
