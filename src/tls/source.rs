//! PEM material given either as a filesystem path or as inline content.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A certificate, key, or CA bundle: a path if something exists at that
/// exact string, inline PEM otherwise.
///
/// The check is a filesystem lookup, not a syntax check. Inline PEM that
/// happens to name an existing path is read as that path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FileOrContent(String);

impl FileOrContent {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_path(&self) -> bool {
        std::fs::metadata(&self.0).is_ok()
    }

    /// File bytes for a path, the literal bytes otherwise. Only a failed
    /// file read is an error.
    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        if self.is_path() {
            std::fs::read(&self.0)
        } else {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    /// Short label for logs; never prints inline key material.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.is_path() {
            self.0.clone()
        } else {
            format!("<inline, {} bytes>", self.0.len())
        }
    }
}

impl From<&str> for FileOrContent {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FileOrContent {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FileOrContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
