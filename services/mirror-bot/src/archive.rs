use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mirror_core::ports::Archiver;
use mirror_core::ArchiveError;
use tokio::process::Command;
use tracing::info;

/// Archives with the system `tar`.
#[derive(Clone, Debug, Default)]
pub struct TarArchiver;

#[async_trait]
impl Archiver for TarArchiver {
    async fn archive(&self, source: &Path, dest_name: &str) -> Result<u64, ArchiveError> {
        let parent = source.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let name = source
            .file_name()
            .ok_or_else(|| ArchiveError::Failed(format!("{} has no file name", source.display())))?;
        let dest = parent.join(dest_name);

        let out = Command::new("tar")
            .arg("-cf")
            .arg(&dest)
            .arg("-C")
            .arg(&parent)
            .arg(name)
            .output()
            .await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(ArchiveError::Failed(format!("tar exited with {}: {}", out.status, stderr.trim())));
        }

        let size = tokio::fs::metadata(&dest).await?.len();
        info!(dest=%dest.display(), size, "archive: created");
        Ok(size)
    }

    async fn free_space(&self, path: &Path) -> Result<u64, ArchiveError> {
        let path = path.to_path_buf();
        let free = tokio::task::spawn_blocking(move || fs2::available_space(&path))
            .await
            .map_err(|e| ArchiveError::Failed(e.to_string()))??;
        Ok(free)
    }
}
