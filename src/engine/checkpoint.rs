//! Durable snapshots of the pending queue, named by content hash.
//!
//! A checkpoint is the JSON document
//! `{"version": 1, "pending": [...], "skip_rules": [...]}` written to
//! `resume-<first 7 hex digits of its SHA-256>.json` at the data directory
//! root. Saving the same state twice yields the same file name, so resuming
//! and being interrupted again without progress does not pile up files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::item::{SkipRules, WorkItem};

/// Current checkpoint document version.
pub const CHECKPOINT_VERSION: u32 = 1;

const HASH_PREFIX_LEN: usize = 7;

/// Errors reading or writing a checkpoint. Always fatal to the run.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// File system failure.
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        /// Checkpoint path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The document could not be encoded or decoded.
    #[error("corrupt checkpoint {path}: {source}")]
    Decode {
        /// Checkpoint path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The document was written by an incompatible version.
    #[error("unsupported checkpoint version {found} in {path} (expected {CHECKPOINT_VERSION})")]
    Version {
        /// Checkpoint path.
        path: PathBuf,
        /// Version found in the file.
        found: u32,
    },
}

impl CheckpointError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    fn decode(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Decode {
            path: path.into(),
            source,
        }
    }
}

#[derive(Serialize)]
struct RecordRef<'a, T> {
    version: u32,
    pending: Vec<&'a T>,
    skip_rules: &'a SkipRules,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Deserialize)]
struct Record<T> {
    pending: Vec<T>,
    skip_rules: SkipRules,
}

/// Reads and writes checkpoints inside one data directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Creates a store writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Serializes `pending` (in order) and `skip_rules`, returning the file path.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the document cannot be encoded or written.
    #[instrument(skip(self, pending, skip_rules), fields(dir = %self.dir.display()))]
    pub async fn save<'a, T, I>(
        &self,
        pending: I,
        skip_rules: &SkipRules,
    ) -> Result<PathBuf, CheckpointError>
    where
        T: WorkItem,
        I: IntoIterator<Item = &'a T>,
    {
        let record = RecordRef {
            version: CHECKPOINT_VERSION,
            pending: pending.into_iter().collect(),
            skip_rules,
        };
        let count = record.pending.len();
        let bytes =
            serde_json::to_vec(&record).map_err(|e| CheckpointError::decode(&self.dir, e))?;

        let digest = format!("{:x}", Sha256::digest(&bytes));
        let name = format!("resume-{}.json", &digest[..HASH_PREFIX_LEN]);
        let path = self.dir.join(name);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CheckpointError::io(&self.dir, e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CheckpointError::io(&path, e))?;

        info!(path = %path.display(), pending = count, "checkpoint written");
        Ok(path)
    }

    /// Restores the pending items and skip rules saved at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] for unreadable, corrupt or
    /// version-mismatched files. Nothing is partially recovered.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn load<T: WorkItem>(path: &Path) -> Result<(Vec<T>, SkipRules), CheckpointError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CheckpointError::io(path, e))?;

        let header: Header =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::decode(path, e))?;
        if header.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Version {
                path: path.to_path_buf(),
                found: header.version,
            });
        }

        let record: Record<T> =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::decode(path, e))?;
        debug!(
            pending = record.pending.len(),
            skip_rules = record.skip_rules.len(),
            "checkpoint loaded"
        );
        Ok((record.pending, record.skip_rules))
    }
}
