//! mtls-relay is a reverse proxy whose outbound side speaks mutual TLS.
//!
//! Every inbound request is rewritten for one fixed upstream target and
//! sent through a named *servers transport*: a pair of pooled hyper clients
//! with their own root CAs, client certificates, server name, and timeouts.
//! Transport definitions are hot-reloaded from the config file; unchanged
//! definitions keep their warm connection pools.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, validate).
//! - [`config`] -- Configuration loading, validation, and hot-reloading via the
//!   [`ConfigSource`](config::ConfigSource) trait.
//! - [`error`] -- Error types using `thiserror`.
//! - [`health`] -- `GET /health` endpoint handler returning runtime diagnostics.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`proxy`] -- Request rewriting, streaming, upgrade tunnels, and mapping
//!   backend failures to status codes.
//! - [`server`] -- Axum server setup, shared application state, and graceful
//!   shutdown.
//! - [`tls`] -- PEM sources, certificate loading, and rustls client configs.
//! - [`transport`] -- Pooled outbound transports, their factory, per-request
//!   HTTP/1.1 vs HTTP/2 selection, and the named registry.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `file-backends` | All file format backends |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod tls;
pub mod transport;
