//! Blob sources that rule files are read from

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("unsupported rules source: {0}")]
    UnsupportedScheme(String),

    #[error("rules source {path} is not readable: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("blob not found: {0}")]
    NotFound(String),
}

/// One object listed by a blob source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobObject {
    /// Key relative to the source root, `/`-separated
    pub key: String,
    pub size: u64,
}

/// A listable, readable store of rule files
#[async_trait]
pub trait BlobSource: Send + Sync {
    async fn list(&self) -> Result<Vec<BlobObject>, BlobError>;

    async fn read_all(&self, key: &str) -> Result<Bytes, BlobError>;

    /// Release the underlying handle; called once after the refresh loop stops
    async fn close(&self) -> Result<(), BlobError> {
        Ok(())
    }
}

/// Open the blob source named by a `rules_source_path` setting.
///
/// Accepts `file:///abs/path` or a bare filesystem path. The secret is
/// reserved for remote stores and unused by the filesystem source.
pub fn open(location: &str, _secret: Option<&str>) -> Result<FsBlobSource, BlobError> {
    match location.split_once("://") {
        Some(("file", path)) => Ok(FsBlobSource::new(path)),
        Some((scheme, _)) => Err(BlobError::UnsupportedScheme(scheme.to_string())),
        None => Ok(FsBlobSource::new(location)),
    }
}

/// Filesystem directory used as a blob source
#[derive(Debug, Clone)]
pub struct FsBlobSource {
    root: PathBuf,
}

impl FsBlobSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn io_error(path: &Path, source: std::io::Error) -> BlobError {
        BlobError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl BlobSource for FsBlobSource {
    async fn list(&self) -> Result<Vec<BlobObject>, BlobError> {
        let mut objects = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| Self::io_error(&dir, e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Self::io_error(&dir, e))?
            {
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|e| Self::io_error(&path, e))?;

                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                objects.push(BlobObject {
                    key,
                    size: metadata.len(),
                });
            }
        }

        // Directory iteration order is platform-defined.
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(root = %self.root.display(), count = objects.len(), "Listed rule source");
        Ok(objects)
    }

    async fn read_all(&self, key: &str) -> Result<Bytes, BlobError> {
        if key.split('/').any(|part| part == "..") {
            return Err(BlobError::NotFound(key.to_string()));
        }
        let path = self.root.join(key);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }
}
