//! Concrete [`ConfigSource`](super::ConfigSource) implementations.
//!
//! Provides file-based sources (YAML, JSON, TOML) gated by feature flags,
//! and the [`parse_config_str`] helper for format-specific deserialization.

pub mod file_source;

pub use file_source::FileSource;

use sha2::{Digest, Sha256};

use crate::config::model::Config;
use crate::error::RelayError;

/// Source name for a supported config file extension.
#[must_use]
pub fn format_name(ext: &str) -> Option<&'static str> {
    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => Some("yaml"),
        #[cfg(feature = "json")]
        "json" => Some("json"),
        #[cfg(feature = "toml")]
        "toml" => Some("toml"),
        _ => None,
    }
}

/// Parse a config string based on file extension.
pub fn parse_config_str(
    ext: &str,
    content: &str,
    path_display: &str,
) -> Result<Config, RelayError> {
    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|e| RelayError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "json")]
        "json" => serde_json::from_str(content).map_err(|e| RelayError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(|e| RelayError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        other => Err(RelayError::UnsupportedFormat(other.to_string())),
    }
}

/// Compute a lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
