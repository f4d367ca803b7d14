//! On-disk session artifacts.
//!
//! Each session downloads into its own directory below a process-scoped
//! download root. Nothing else is persisted: the root is swept at startup
//! and shutdown, and the cleanup cascade erases a session's directory.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Deletes session artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Recursively deletes `path`. A missing path counts as success.
    ///
    /// # Errors
    ///
    /// - `ArtifactError::OutsideRoot` - Path does not belong to the store
    /// - `ArtifactError::Io` - Deletion failed
    async fn remove_artifacts(&self, path: &Path) -> Result<(), ArtifactError>;
}

/// Errors that occur while deleting artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("refusing to delete {path}: outside download root")]
    OutsideRoot { path: PathBuf },

    #[error("failed to delete {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Filesystem store confined to one download root.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root if needed and removes everything inside it.
    ///
    /// Returns how many entries were removed. Entries that fail to delete
    /// are logged and skipped.
    ///
    /// # Errors
    ///
    /// - `io::Error` - Root cannot be created or listed
    pub async fn sweep(&self) -> io::Result<usize> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match remove_path(&path).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %path.display(), "Sweep could not remove entry: {e}"),
            }
        }

        tracing::info!(root = %self.root.display(), removed, "Download root swept");
        Ok(removed)
    }
}

async fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn remove_artifacts(&self, path: &Path) -> Result<(), ArtifactError> {
        if !path.starts_with(&self.root) || path == self.root {
            return Err(ArtifactError::OutsideRoot {
                path: path.to_path_buf(),
            });
        }

        remove_path(path).await.map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Artifacts removed");
        Ok(())
    }
}
