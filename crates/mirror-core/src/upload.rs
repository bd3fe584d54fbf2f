use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StorageError;
use crate::ports::{CloudStorage, FOLDER_MIME};
use crate::types::UploadProgress;

/// Mirrors `path` below `parent`: folders become remote folders, files are
/// uploaded one by one. Returns a shareable link to the top-level item.
pub async fn upload_recursive(
    storage: &dyn CloudStorage,
    path: &Path,
    parent: &str,
    progress: &UploadProgress,
) -> Result<String, StorageError> {
    let is_folder = tokio::fs::metadata(path).await?.is_dir();
    let root_id = upload_entry(storage, path, parent, progress).await?;

    if is_folder {
        let mut pending: Vec<(PathBuf, String)> = vec![(path.to_path_buf(), root_id.clone())];
        while let Some((dir, remote_dir)) = pending.pop() {
            for child in sorted_children(&dir).await? {
                let child_is_dir = tokio::fs::metadata(&child).await?.is_dir();
                let id = upload_entry(storage, &child, &remote_dir, progress).await?;
                if child_is_dir {
                    pending.push((child, id));
                }
            }
        }
    }

    storage.create_shareable_link(&root_id, is_folder).await
}

async fn upload_entry(
    storage: &dyn CloudStorage,
    path: &Path,
    parent: &str,
    progress: &UploadProgress,
) -> Result<String, StorageError> {
    let meta = tokio::fs::metadata(path).await?;
    let (mime, size) = if meta.is_dir() { (FOLDER_MIME, 0) } else { (mime_for(path), meta.len()) };
    debug!(path=%path.display(), mime, size, "upload entry");
    storage.upload_path(path, mime, parent, size, progress).await
}

async fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut children = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        children.push(entry.path());
    }
    children.sort();
    Ok(children)
}

/// Content type by extension. Storage sniffs anything we do not know.
pub fn mime_for(path: &Path) -> &'static str {
    mime_guess::from_path(path).first_raw().unwrap_or("application/octet-stream")
}
