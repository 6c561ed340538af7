//! Configuration validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Config`] for structural
//! errors: a malformed upstream URL, an upstream pointing at an undeclared
//! servers transport, empty names, incomplete certificate pairs, and zero
//! timeouts. Returns every [`ValidationError`] found, with suggestions.

use url::Url;

use super::model::{Config, ServersTransport};
use crate::error::ValidationError;

const ROOT: &str = "(root)";

/// Validate the upstream URL. Returns `Ok(())` or a human-readable error.
pub fn validate_upstream_url(url: &str) -> Result<(), String> {
    match Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            if scheme != "http" && scheme != "https" {
                Err(format!(
                    "unsupported scheme '{scheme}' (expected http or https)"
                ))
            } else if parsed.host_str().is_none() {
                Err(format!("'{url}' has no host"))
            } else {
                Ok(())
            }
        }
        Err(_) => Err(format!("'{url}' is not a valid URL")),
    }
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let upstream = &config.upstream;

    if let Err(msg) = validate_upstream_url(&upstream.url) {
        errors.push(ValidationError {
            scope: "upstream".into(),
            field: "url".into(),
            message: msg,
            suggestion: if upstream.url.contains("://") {
                None
            } else {
                Some(format!("did you mean 'https://{}'?", upstream.url))
            },
        });
    }

    if upstream.servers_transport.is_empty() {
        errors.push(ValidationError {
            scope: "upstream".into(),
            field: "serversTransport".into(),
            message: "servers transport name cannot be empty".into(),
            suggestion: None,
        });
    } else if !config
        .servers_transports
        .contains_key(&upstream.servers_transport)
    {
        let declared: Vec<&str> = config.servers_transports.keys().map(String::as_str).collect();
        errors.push(ValidationError {
            scope: "upstream".into(),
            field: "serversTransport".into(),
            message: format!(
                "'{}' is not declared in serversTransports",
                upstream.servers_transport
            ),
            suggestion: if declared.is_empty() {
                None
            } else {
                Some(format!("declared: {}", declared.join(", ")))
            },
        });
    }

    for (name, transport) in &config.servers_transports {
        if name.trim().is_empty() {
            errors.push(ValidationError {
                scope: ROOT.into(),
                field: "serversTransports".into(),
                message: "servers transport name cannot be empty".into(),
                suggestion: None,
            });
            continue;
        }
        if let Some(transport) = transport {
            validate_transport(name, transport, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_transport(name: &str, transport: &ServersTransport, errors: &mut Vec<ValidationError>) {
    let scope = format!("serversTransports.{name}");

    for (i, certificate) in transport.certificates.iter().enumerate() {
        for (field, value) in [
            ("certFile", &certificate.cert_file),
            ("keyFile", &certificate.key_file),
        ] {
            if value.as_str().trim().is_empty() {
                errors.push(ValidationError {
                    scope: scope.clone(),
                    field: format!("certificates[{i}].{field}"),
                    message: format!("{field} cannot be empty"),
                    suggestion: Some("give a file path or inline PEM content".into()),
                });
            }
        }
    }

    for (i, root_ca) in transport.root_cas.iter().enumerate() {
        if root_ca.as_str().trim().is_empty() {
            errors.push(ValidationError {
                scope: scope.clone(),
                field: format!("rootCAs[{i}]"),
                message: "root CA cannot be empty".into(),
                suggestion: None,
            });
        }
    }

    if let Some(timeouts) = &transport.forwarding_timeouts {
        for (field, value) in [
            ("dialTimeout", timeouts.dial_timeout),
            ("responseHeaderTimeout", timeouts.response_header_timeout),
            ("idleConnTimeout", timeouts.idle_conn_timeout),
        ] {
            if value == Some(0) {
                errors.push(ValidationError {
                    scope: scope.clone(),
                    field: format!("forwardingTimeouts.{field}"),
                    message: "timeout must be greater than zero".into(),
                    suggestion: Some("omit the field to keep the default".into()),
                });
            }
        }
    }
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let mut lines = vec![format!(
        "  upstream: {} via '{}'\n  {} servers transports\n",
        config.upstream.url,
        config.upstream.servers_transport,
        config.servers_transports.len()
    )];

    for (name, transport) in &config.servers_transports {
        let Some(transport) = transport else {
            lines.push(format!("  {name}  -> (no definition, default transport)"));
            continue;
        };
        let server_name = if transport.server_name.is_empty() {
            "(url host)"
        } else {
            transport.server_name.as_str()
        };
        lines.push(format!("  {name}  -> server name: {server_name}"));
        lines.push(format!(
            "    root CAs: {}, client certificates: {}",
            transport.root_cas.len(),
            transport.certificates.len()
        ));
        if transport.insecure_skip_verify {
            lines.push("    insecure skip verify: on".into());
        }
    }

    format!("{} is valid\n{}", path, lines.join("\n"))
}
