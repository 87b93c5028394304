//! Durable record of visited pages, one file per alias.
//!
//! The file is a JSON array of URL strings. It is rewritten in full after
//! every completed page; the write goes to a temporary sibling that is then
//! renamed over the old file, so a crash mid-write leaves the previous
//! checkpoint intact.

use std::future::Future;
use std::path::{Path, PathBuf};

use crate::error::CrawlError;
use crate::models::VisitedSet;

/// Load/save boundary for resume state.
pub trait CheckpointStore: Send + Sync + Clone {
    /// Visited pages for `alias`. Never fails: a missing or corrupt
    /// checkpoint yields an empty set (redo work rather than lose resume).
    fn load(&self, alias: &str) -> impl Future<Output = VisitedSet> + Send;

    /// Replace the stored set for `alias` with `visited`.
    fn save(
        &self,
        alias: &str,
        visited: &VisitedSet,
    ) -> impl Future<Output = Result<(), CrawlError>> + Send;
}

/// Checkpoint files under a state directory: `{dir}/{alias}_scraped_pages.json`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{alias}_scraped_pages.json"))
    }

    /// Delete the checkpoint for `alias` so the next run starts fresh.
    pub async fn reset(&self, alias: &str) -> Result<bool, CrawlError> {
        let path = self.path_for(alias);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(%alias, path = %path.display(), "Checkpoint removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &Path) -> Result<Option<VisitedSet>, CrawlError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CrawlError::CheckpointCorrupt {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        };
        let urls: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| CrawlError::CheckpointCorrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Some(urls.into_iter().collect()))
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, alias: &str) -> VisitedSet {
        let path = self.path_for(alias);
        match self.read(&path).await {
            Ok(Some(visited)) => {
                tracing::info!(%alias, pages = visited.len(), "Loaded checkpoint");
                visited
            }
            Ok(None) => {
                tracing::debug!(%alias, path = %path.display(), "No checkpoint, starting fresh");
                VisitedSet::new()
            }
            Err(e) => {
                tracing::warn!(%alias, error = %e, "Ignoring unreadable checkpoint, starting fresh");
                VisitedSet::new()
            }
        }
    }

    async fn save(&self, alias: &str, visited: &VisitedSet) -> Result<(), CrawlError> {
        let path = self.path_for(alias);
        let encoded = serde_json::to_vec(&visited.sorted())?;
        write_atomic(&path, &encoded).await?;
        tracing::debug!(%alias, pages = visited.len(), "Saved checkpoint");
        Ok(())
    }
}

/// Write `bytes` to a temporary sibling of `path`, then rename it into place.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CrawlError> {
    let write_failed = |e: std::io::Error| CrawlError::WriteFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_failed)?;
    Ok(())
}
