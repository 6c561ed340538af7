//! Hop-by-hop stripping and forwarding metadata.
//!
//! [`prepare_request_headers`] strips hop-by-hop headers (the fixed list
//! plus anything named in `Connection`), restores `Connection: Upgrade` and
//! `Upgrade` for protocol-upgrade requests, and records the client in
//! `X-Forwarded-For` / `X-Forwarded-Host`. `Host` itself is rewritten by
//! the director.

use std::net::IpAddr;
use std::sync::LazyLock;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use hyper::header::{CONNECTION, HOST, TE, UPGRADE};

use crate::transport::selecting::has_connection_token;

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "proxy-connection",
        "keep-alive",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "proxy-authorization",
        "proxy-authenticate",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// The protocol a request asks to switch to, if it is an upgrade request.
#[must_use]
pub fn upgrade_type(headers: &HeaderMap) -> Option<HeaderValue> {
    if has_connection_token(headers, "upgrade") {
        headers.get(UPGRADE).cloned()
    } else {
        None
    }
}

/// Remove hop-by-hop headers, including any header named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| name.trim().parse::<HeaderName>().ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Rewrite inbound headers for the outbound request. Returns the upgrade
/// protocol when the client asked for one.
pub fn prepare_request_headers(
    headers: &mut HeaderMap,
    client_ip: Option<IpAddr>,
) -> Option<HeaderValue> {
    let upgrade = upgrade_type(headers);
    let te_trailers = headers
        .get_all(TE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("trailers"));

    strip_hop_by_hop(headers);

    if te_trailers {
        headers.insert(TE, HeaderValue::from_static("trailers"));
    }
    if let Some(ref protocol) = upgrade {
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(UPGRADE, protocol.clone());
    }

    if let Some(original_host) = headers.get(HOST).cloned() {
        headers.insert(X_FORWARDED_HOST.clone(), original_host);
    }

    if let Some(ip) = client_ip {
        let prior: Vec<&str> = headers
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        let chain = if prior.is_empty() {
            ip.to_string()
        } else {
            format!("{}, {ip}", prior.join(", "))
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
    }

    upgrade
}

/// Strip hop-by-hop headers from a backend response. A `101` response keeps
/// its headers so the client can complete the switch.
pub fn prepare_response_headers(headers: &mut HeaderMap, switching_protocols: bool) {
    if !switching_protocols {
        strip_hop_by_hop(headers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Option<IpAddr> {
        Some("10.0.0.1".parse().unwrap())
    }

    #[test]
    fn strips_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive, x-session-hint".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert("x-session-hint", "abc".parse().unwrap());
        headers.insert("content-type", "application/json".parse().unwrap());

        let upgrade = prepare_request_headers(&mut headers, client());

        assert!(upgrade.is_none());
        assert!(headers.get("connection").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-session-hint").is_none());
        assert!(headers.get("content-type").is_some());
    }

    #[test]
    fn keeps_upgrade_headers_for_upgrade_requests() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive, Upgrade".parse().unwrap());
        headers.insert("upgrade", "websocket".parse().unwrap());

        let upgrade = prepare_request_headers(&mut headers, client());

        assert_eq!(upgrade.unwrap(), "websocket");
        assert_eq!(headers.get("connection").unwrap(), "Upgrade");
        assert_eq!(headers.get("upgrade").unwrap(), "websocket");
    }

    #[test]
    fn keeps_te_trailers_only() {
        let mut headers = HeaderMap::new();
        headers.insert("te", "gzip, trailers".parse().unwrap());
        prepare_request_headers(&mut headers, None);
        assert_eq!(headers.get("te").unwrap(), "trailers");

        let mut headers = HeaderMap::new();
        headers.insert("te", "gzip".parse().unwrap());
        prepare_request_headers(&mut headers, None);
        assert!(headers.get("te").is_none());
    }

    #[test]
    fn appends_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.append("x-forwarded-for", "1.2.3.4".parse().unwrap());
        headers.append("x-forwarded-for", "5.6.7.8".parse().unwrap());

        prepare_request_headers(&mut headers, client());

        assert_eq!(
            headers.get("x-forwarded-for").unwrap(),
            "1.2.3.4, 5.6.7.8, 10.0.0.1"
        );
    }

    #[test]
    fn records_original_host() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "relay.example.com".parse().unwrap());
        prepare_request_headers(&mut headers, None);
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "relay.example.com");
        assert!(headers.get("x-forwarded-for").is_none());
    }

    #[test]
    fn response_headers_stripped_unless_switching() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "Upgrade".parse().unwrap());
        headers.insert("upgrade", "websocket".parse().unwrap());
        headers.insert("content-length", "42".parse().unwrap());

        let mut switching = headers.clone();
        prepare_response_headers(&mut switching, true);
        assert_eq!(switching.len(), 3);

        prepare_response_headers(&mut headers, false);
        assert!(headers.get("connection").is_none());
        assert!(headers.get("upgrade").is_none());
        assert_eq!(headers.get("content-length").unwrap(), "42");
    }
}
