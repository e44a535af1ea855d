//! Directory-backed queue.  Items are the regular files of the directory in
//! file-name order; removing an item unlinks the file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sleepy_proto::protocol::{ItemRef, QueueItem};
use tracing::{info, warn};

use super::{PlaylistSource, SourceError};

#[derive(Debug, Default, Clone)]
pub struct LocalSource;

impl LocalSource {
    pub fn new() -> Self {
        Self
    }

    async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
        let io_err = |source| SourceError::Local {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => files.push(entry.path()),
                Ok(_) => {}
                Err(e) => warn!("skipping {:?}: {}", entry.path(), e),
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl PlaylistSource for LocalSource {
    async fn count(&self, locator: &str) -> Result<usize, SourceError> {
        Ok(self.list(Path::new(locator)).await?.len())
    }

    async fn item_at(&self, locator: &str, index: usize) -> Result<Option<QueueItem>, SourceError> {
        let files = self.list(Path::new(locator)).await?;
        Ok(files.into_iter().nth(index).map(|path| {
            let title = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let path = path.to_string_lossy().into_owned();
            QueueItem {
                content_ref: path.clone(),
                title,
                item_ref: ItemRef(path),
            }
        }))
    }

    async fn remove(&self, _locator: &str, item: &ItemRef) -> Result<bool, SourceError> {
        let path = PathBuf::from(&item.0);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("deleted file: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("file already gone: {}", path.display());
                Ok(false)
            }
            Err(source) => Err(SourceError::Local { path, source }),
        }
    }
}
