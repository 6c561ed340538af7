//! Rewrites an inbound request so it addresses the upstream target.

use axum::body::Body;
use hyper::header::{HeaderValue, HOST, USER_AGENT};
use hyper::http::uri::{Authority, Scheme};
use hyper::{Request, Uri, Version};
use url::Url;

use crate::error::RelayError;

/// The fixed target every request is redirected to.
#[derive(Debug, Clone)]
pub struct Director {
    scheme: Scheme,
    authority: Authority,
    path: String,
    query: String,
}

impl Director {
    pub fn new(target: &Url) -> Result<Self, RelayError> {
        let scheme: Scheme = target
            .scheme()
            .parse()
            .map_err(|_| invalid(target, "unsupported scheme"))?;
        let authority = target_authority(target)?;
        Ok(Self {
            scheme,
            authority,
            path: target.path().to_string(),
            query: target.query().unwrap_or_default().to_string(),
        })
    }

    #[must_use]
    pub const fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Point `req` at the target: scheme and authority from the target,
    /// paths joined with one slash, queries merged with `&`. The request is
    /// reset to a plain HTTP/1.1 message (the pool upgrades it to HTTP/2
    /// when ALPN agrees), `Host` names the target, and a missing
    /// `User-Agent` is sent empty.
    pub fn direct(&self, req: &mut Request<Body>) -> Result<(), hyper::http::Error> {
        let path = single_joining_slash(&self.path, req.uri().path());
        let query = join_query(&self.query, req.uri().query().unwrap_or_default());
        let path_and_query = if query.is_empty() {
            path
        } else {
            format!("{path}?{query}")
        };

        *req.uri_mut() = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()?;
        *req.version_mut() = Version::HTTP_11;

        let host = HeaderValue::from_str(self.authority.as_str())?;
        let headers = req.headers_mut();
        headers.insert(HOST, host);
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(""));
        }
        Ok(())
    }
}

fn target_authority(target: &Url) -> Result<Authority, RelayError> {
    let host = target
        .host_str()
        .ok_or_else(|| invalid(target, "missing host"))?;
    let authority = target
        .port()
        .map_or_else(|| host.to_string(), |port| format!("{host}:{port}"));
    authority
        .parse()
        .map_err(|_| invalid(target, "host is not a valid authority"))
}

fn invalid(target: &Url, reason: &str) -> RelayError {
    RelayError::InvalidUpstream {
        url: target.to_string(),
        reason: reason.to_string(),
    }
}

/// Join two path segments with exactly one slash between them.
#[must_use]
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

#[must_use]
pub fn join_query(target: &str, request: &str) -> String {
    if target.is_empty() || request.is_empty() {
        format!("{target}{request}")
    } else {
        format!("{target}&{request}")
    }
}
