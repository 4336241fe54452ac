//! Per-item output directories and the `meta.json` summary record.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use super::item::WorkItem;

/// File name of the per-item summary record.
pub const META_FILE: &str = "meta.json";

/// Errors creating item directories or writing item files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File system failure.
    #[error("storage I/O error at {path}: {source}")]
    Io {
        /// Path being created or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The summary record could not be encoded.
    #[error("cannot encode metadata for {path}: {source}")]
    Encode {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Creates an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Resolves item directories below a run's data directory.
///
/// Cloning is cheap; the collaborator and the engine each hold one.
#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    /// Creates a resolver rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// The run's data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the item's directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created.
    pub async fn dir_for<T: WorkItem>(&self, item: &T) -> Result<PathBuf, StorageError> {
        let dir = self.data_dir.join(item.storage_location());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        Ok(dir)
    }

    /// Writes `{...attributes, "children": [identity strings]}` to the item's
    /// `meta.json`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the directory or file cannot be written.
    #[instrument(skip_all, fields(item = %item.id_string(), children = children.len()))]
    pub async fn write_meta<T: WorkItem>(
        &self,
        item: &T,
        children: &[T],
    ) -> Result<PathBuf, StorageError> {
        let mut meta = item.attributes();
        meta.insert(
            "children".to_string(),
            Value::Array(
                children
                    .iter()
                    .map(|child| Value::String(child.id_string()))
                    .collect(),
            ),
        );

        let path = self.dir_for(item).await?.join(META_FILE);
        let bytes = serde_json::to_vec(&meta).map_err(|source| StorageError::Encode {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        debug!(path = %path.display(), "metadata written");
        Ok(path)
    }
}
