//! File system utils.

use std::path::{Path, PathBuf};

use anyhow::Context;

pub struct FsHandler;

impl FsHandler {
    /// Remove a directory if present and create it again, empty.
    pub async fn recreate_dir(path: &Path) -> anyhow::Result<()> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(path)
                .await
                .with_context(|| format!("Failed to remove stale directory {}", path.display()))?;
        }

        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
        tracing::trace!("Recreated directory: {}", path.display());

        Ok(())
    }

    /// Write a file, creating its parent directories.
    pub async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        tokio::fs::write(path, contents)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Walk from `start` up through its ancestors and return the first
    /// `ancestor/relative` that exists.
    pub async fn find_in_ancestors(start: &Path, relative: &Path) -> Option<PathBuf> {
        for dir in start.ancestors() {
            let candidate = dir.join(relative);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                tracing::trace!(path = %candidate.display(), "Found file in ancestor directory");
                return Some(candidate);
            }
        }
        None
    }
}
