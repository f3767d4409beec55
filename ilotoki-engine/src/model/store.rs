//! Local model directory
//!
//! Holds at most one model file. The acquisition state machine is the only
//! writer, so no locking happens here.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::model_config::ModelAsset;

#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The `models/` directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// On-disk location of `asset` inside the store.
    pub fn path_for(&self, asset: &ModelAsset) -> PathBuf {
        self.dir.join(&asset.filename)
    }

    /// True if a complete file exists at `path`.
    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    pub async fn ensure_directory(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Remove the whole directory. A missing directory is not an error.
    pub async fn delete(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                debug!("Removed model directory {:?}", self.dir);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// True if the directory is missing or has no entries.
    pub async fn is_empty(&self) -> bool {
        match tokio::fs::read_dir(&self.dir).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
            Err(_) => true,
        }
    }
}
