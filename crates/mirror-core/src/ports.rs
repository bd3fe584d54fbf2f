//! Collaborator contracts the coordinator depends on.
//!
//! Every adapter is injected as a trait object so the coordinator can be
//! driven by in-memory doubles.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{ArchiveError, ChatError, DaemonError, StorageError};
use crate::types::{ChatId, CompletionNotice, DaemonStatus, Gid, MessageId, MessageRef, UploadProgress, UserId};

/// Mime type that makes [`CloudStorage::upload_path`] create a folder.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

#[async_trait]
pub trait DownloadDaemon: Send + Sync {
    /// Queues `uri` into `dir`, asking the daemon to use `gid`. Returns the id
    /// the daemon actually assigned.
    async fn submit(&self, uri: &str, dir: &Path, gid: &Gid) -> Result<Gid, DaemonError>;
    async fn remove(&self, gid: &Gid) -> Result<(), DaemonError>;
    async fn status(&self, gid: &Gid) -> Result<DaemonStatus, DaemonError>;
    /// Path of the downloaded content, `None` while only metadata exists.
    async fn file_path(&self, gid: &Gid) -> Result<Option<PathBuf>, DaemonError>;
    async fn file_size(&self, gid: &Gid) -> Result<u64, DaemonError>;
    /// `Some(next)` when `gid` fetched metadata and queued `next` for the files.
    async fn metadata_follow_up(&self, gid: &Gid) -> Result<Option<Gid>, DaemonError>;
    async fn error_message(&self, gid: &Gid) -> Result<Option<String>, DaemonError>;
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_message(
        &self,
        chat: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> Result<MessageRef, ChatError>;
    async fn edit_message(&self, message: &MessageRef, text: &str) -> Result<(), ChatError>;
    async fn delete_message(&self, message: &MessageRef) -> Result<(), ChatError>;
    async fn is_chat_admin(&self, chat: ChatId, user: UserId) -> Result<bool, ChatError>;
}

#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Uploads one file, or creates one folder when `mime` is [`FOLDER_MIME`].
    /// Returns the remote id.
    async fn upload_path(
        &self,
        path: &Path,
        mime: &str,
        parent: &str,
        size: u64,
        progress: &UploadProgress,
    ) -> Result<String, StorageError>;
    async fn create_shareable_link(&self, remote_id: &str, is_folder: bool) -> Result<String, StorageError>;
}

#[async_trait]
pub trait Archiver: Send + Sync {
    /// Archives `source` into `dest_name` beside it. Returns the archive size.
    async fn archive(&self, source: &Path, dest_name: &str) -> Result<u64, ArchiveError>;
    async fn free_space(&self, path: &Path) -> Result<u64, ArchiveError>;
}

/// Fire-and-forget completion webhook.
#[async_trait]
pub trait ExternalNotifier: Send + Sync {
    async fn notify(&self, notice: &CompletionNotice);
}
