use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

pub type ChatId = i64;
pub type MessageId = i64;
pub type UserId = i64;

/// Download-daemon job identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gid(String);

impl Gid {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh 16 hex digit id, the format aria2 accepts for caller-assigned GIDs.
    pub fn generate() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        Self(hex::encode(&bytes[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Gid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A message in some chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat: ChatId,
    pub message: MessageId,
}

/// Who asked for a download, and where.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub chat: ChatId,
    pub message: MessageId,
    pub user: UserId,
    /// Display handle, e.g. `@name` or an HTML user mention.
    pub username: String,
    /// User credited when the request was itself a reply.
    pub replied_user: Option<String>,
}

impl Origin {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef { chat: self.chat, message: self.message }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Queued,
    Downloading,
    Uploading,
}

/// Filename-policy state of a job. Sticky once resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadAllowed {
    Unknown,
    Allowed,
    Disallowed,
}

/// Stable identity of a job. Survives GID re-keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey(pub u64);

/// Upload byte counter shared between the storage adapter and the registry.
#[derive(Clone, Debug, Default)]
pub struct UploadProgress(Arc<AtomicU64>);

impl UploadProgress {
    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
pub struct Job {
    pub key: JobKey,
    pub gid: Gid,
    pub origin: Origin,
    pub archive_before_upload: bool,
    pub phase: JobPhase,
    pub download_allowed: DownloadAllowed,
    pub uploaded: UploadProgress,
    pub uploaded_prev: u64,
    pub last_upload_sample: Option<Instant>,
    pub upload_speed: u64,
    pub upload_size: u64,
    pub file_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub work_dir: PathBuf,
}

impl Job {
    /// Folds the current upload counter into the speed sample. Only moves the
    /// sample when bytes moved, so an idle re-render is byte-identical.
    pub fn sample_upload(&mut self, now: Instant) {
        let current = self.uploaded.get();
        if current == self.uploaded_prev {
            return;
        }
        if let Some(last) = self.last_upload_sample {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            if elapsed > 0.0 {
                self.upload_speed = ((current - self.uploaded_prev) as f64 / elapsed) as u64;
            }
        }
        self.uploaded_prev = current;
        self.last_upload_sample = Some(now);
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            gid: self.gid.clone(),
            chat: self.origin.chat,
            message: self.origin.message,
            username: self.origin.username.clone(),
            phase: self.phase,
            download_allowed: self.download_allowed,
            archive_before_upload: self.archive_before_upload,
            file_name: self.file_name.clone(),
            uploaded_bytes: self.uploaded.get(),
            start_time: self.start_time,
        }
    }
}

/// Serializable view of a job for inspection endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct JobSummary {
    pub gid: Gid,
    pub chat: ChatId,
    pub message: MessageId,
    pub username: String,
    pub phase: JobPhase,
    pub download_allowed: DownloadAllowed,
    pub archive_before_upload: bool,
    pub file_name: Option<String>,
    pub uploaded_bytes: u64,
    pub start_time: DateTime<Utc>,
}

/// The aggregate status message currently shown in a chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatStatus {
    pub message: MessageRef,
    pub last_text: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Start,
    Stop,
    Complete,
    Error,
}

/// Lifecycle notification from the download daemon. Carries only the id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaemonEvent {
    pub kind: EventKind,
    pub gid: Gid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaemonState {
    Active,
    Waiting,
    Paused,
    Error,
    Complete,
    Removed,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DaemonState::Active => "active",
            DaemonState::Waiting => "waiting",
            DaemonState::Paused => "paused",
            DaemonState::Error => "error",
            DaemonState::Complete => "complete",
            DaemonState::Removed => "removed",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonFile {
    pub path: String,
    pub uris: Vec<String>,
}

/// Transfer counters reported by the daemon for one job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub state: DaemonState,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub speed: u64,
    pub files: Vec<DaemonFile>,
}

/// Scope granted to a bulk cancel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Cancels every job in the registry.
    Elevated,
    /// Cancels only jobs started in the requester's chat.
    ChatAdmin,
}

/// Body of the external completion webhook.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionNotice {
    pub successful: bool,
    pub file: NoticeFile,
    pub origin_chat: ChatId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NoticeFile {
    pub name: Option<String>,
    pub url: Option<String>,
    pub size: Option<String>,
}
