//! File-backed config source with SHA-256 change detection.
//!
//! [`FileSource`] serves any supported format; the parser is picked from
//! the file extension when the source is opened. Loading reads the file
//! through Tokio, validates the parsed config, and versions it by the hash
//! of the raw content, so a poll only reloads when the content changed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{format_name, parse_config_str, sha256_hex};
use crate::config::model::Config;
use crate::config::validation::validate;
use crate::config::{ConfigSource, ConfigVersion};
use crate::error::RelayError;

#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    ext: String,
    name: &'static str,
}

impl FileSource {
    /// Fails with [`RelayError::UnsupportedFormat`] for an extension no
    /// enabled format feature handles.
    pub fn open(path: &Path) -> Result<Self, RelayError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let name = format_name(ext).ok_or_else(|| RelayError::UnsupportedFormat(ext.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            ext: ext.to_string(),
            name,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_content(&self) -> Result<String, RelayError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelayError::ConfigFileNotFound {
                    path: self.path.clone(),
                }
            } else {
                RelayError::Io(e)
            }
        })
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn load(&self) -> Result<(Config, ConfigVersion), RelayError> {
        let content = self.read_content().await?;
        let config = parse_config_str(&self.ext, &content, &self.path.display().to_string())?;

        validate(&config).map_err(|errors| RelayError::ConfigValidation { errors })?;

        Ok((config, ConfigVersion::Hash(sha256_hex(content.as_bytes()))))
    }

    async fn has_changed(&self, current: &ConfigVersion) -> Result<bool, RelayError> {
        let content = self.read_content().await?;
        Ok(*current != ConfigVersion::Hash(sha256_hex(content.as_bytes())))
    }
}

#[cfg(all(test, feature = "yaml"))]
mod tests {
    use super::*;

    const CONFIG: &str = "\
upstream:
  url: http://127.0.0.1:9000
  serversTransport: plain
serversTransports:
  plain: {}
";

    fn write(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("relay.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn version_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, CONFIG);

        let source = FileSource::open(&path).unwrap();
        assert_eq!(source.name(), "yaml");
        let (config, version) = source.load().await.unwrap();
        assert_eq!(config.upstream.servers_transport, "plain");
        assert!(!source.has_changed(&version).await.unwrap());

        write(&dir, &CONFIG.replace("9000", "9001"));
        assert!(source.has_changed(&version).await.unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_reported_by_path() {
        let source = FileSource::open(Path::new("/nonexistent/relay.yaml")).unwrap();
        let err = source.load().await.unwrap_err();
        assert!(matches!(err, RelayError::ConfigFileNotFound { .. }));
    }

    #[tokio::test]
    async fn invalid_config_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, &CONFIG.replace("serversTransport: plain", "serversTransport: gone"));

        let err = FileSource::open(&path).unwrap().load().await.unwrap_err();
        assert!(matches!(err, RelayError::ConfigValidation { .. }));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = FileSource::open(Path::new("relay.ini")).unwrap_err();
        assert!(matches!(err, RelayError::UnsupportedFormat(ref ext) if ext == "ini"));
    }
}
