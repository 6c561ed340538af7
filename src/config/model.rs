//! Serde data structures for the relay configuration file.
//!
//! [`Config`] is the root: one [`Upstream`] (the proxy target) and a map
//! of named [`ServersTransport`] definitions. Transport definitions are the
//! hot-reload surface handed to
//! [`TransportRegistry::update`](crate::transport::registry::TransportRegistry::update);
//! they derive `PartialEq` so the registry can detect changed entries
//! by plain value comparison.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tls::FileOrContent;

/// Name → transport definition. A `null` definition is kept as `None`:
/// the name stays registered and is served by the default transport.
pub type TransportConfigs = BTreeMap<String, Option<ServersTransport>>;

const fn default_flush_interval() -> i64 {
    100
}

fn is_default_flush_interval(v: &i64) -> bool {
    *v == default_flush_interval()
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero(v: &usize) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    pub upstream: Upstream,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub servers_transports: TransportConfigs,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Upstream {
    pub url: String,

    pub servers_transport: String,

    /// Milliseconds between response body flushes. Negative flushes after
    /// every chunk, zero only when the copy buffer fills.
    #[serde(
        default = "default_flush_interval",
        skip_serializing_if = "is_default_flush_interval"
    )]
    pub flush_interval: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ServersTransport {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_name: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub insecure_skip_verify: bool,

    #[serde(default, rename = "rootCAs", skip_serializing_if = "Vec::is_empty")]
    pub root_cas: Vec<FileOrContent>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<Certificate>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_idle_conns_per_host: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarding_timeouts: Option<ForwardingTimeouts>,
}

impl ServersTransport {
    /// Whether the definition asks for anything beyond the default TLS setup.
    #[must_use]
    pub fn customizes_tls(&self) -> bool {
        self.insecure_skip_verify || !self.root_cas.is_empty() || !self.certificates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Certificate {
    pub cert_file: FileOrContent,
    pub key_file: FileOrContent,
}

/// Per-transport timeout overrides, in milliseconds. Unset fields keep
/// the transport defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ForwardingTimeouts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dial_timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_header_timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_conn_timeout: Option<u64>,
}

impl ForwardingTimeouts {
    #[must_use]
    pub fn dial(&self) -> Option<Duration> {
        self.dial_timeout.map(Duration::from_millis)
    }

    #[must_use]
    pub fn response_header(&self) -> Option<Duration> {
        self.response_header_timeout.map(Duration::from_millis)
    }

    #[must_use]
    pub fn idle_conn(&self) -> Option<Duration> {
        self.idle_conn_timeout.map(Duration::from_millis)
    }
}
