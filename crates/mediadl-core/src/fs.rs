//! Filesystem access used by the engine

use crate::error::MediaDlError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    /// Create a directory and any missing parents
    async fn create_dir_all(&self, path: &Path) -> Result<(), MediaDlError>;

    /// Remove a file; a file that is already gone is not an error
    async fn remove_file(&self, path: &Path) -> Result<(), MediaDlError>;

    /// `None` when the path is not a directory
    async fn is_empty_dir(&self, path: &Path) -> Result<Option<bool>, MediaDlError>;

    async fn remove_dir(&self, path: &Path) -> Result<(), MediaDlError>;
}

/// [`FileSystem`] backed by `tokio::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), MediaDlError> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<(), MediaDlError> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn is_empty_dir(&self, path: &Path) -> Result<Option<bool>, MediaDlError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let mut entries = tokio::fs::read_dir(path).await?;
        Ok(Some(entries.next_entry().await?.is_none()))
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), MediaDlError> {
        tokio::fs::remove_dir(path).await?;
        Ok(())
    }
}

/// Create `path` if it does not exist yet
pub async fn ensure_path_exists(fs: &dyn FileSystem, path: &Path) -> Result<(), MediaDlError> {
    if !fs.exists(path).await {
        fs.create_dir_all(path).await?;
    }
    Ok(())
}

/// Remove a file, then every parent directory left empty, stopping at the
/// first one with content. `root` itself is never removed.
///
/// Returns the number of directories removed.
pub async fn remove_with_empty_parents(
    fs: &dyn FileSystem,
    file: &Path,
    root: &Path,
) -> Result<usize, MediaDlError> {
    fs.remove_file(file).await?;

    let mut removed = 0;
    let mut dir = file.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        match fs.is_empty_dir(current).await? {
            Some(true) => {
                debug!("Removing empty directory {}", current.display());
                fs.remove_dir(current).await?;
                removed += 1;
            }
            Some(false) => break,
            None => {}
        }
        dir = current.parent();
    }

    Ok(removed)
}
