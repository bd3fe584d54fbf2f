#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mirror_core::ports::{Archiver, ChatPlatform, CloudStorage, DownloadDaemon, ExternalNotifier};
use mirror_core::{
    ArchiveError, ChatError, ChatId, Collaborators, CompletionNotice, Coordinator, DaemonError, DaemonFile,
    DaemonState, DaemonStatus, Gid, MessageId, MessageRef, Origin, RetryPolicy, Settings, StorageError,
    UploadProgress, UserId,
};
use tempfile::TempDir;

// ---- Download daemon ----

#[derive(Clone, Debug)]
pub struct FakeJob {
    pub status: DaemonStatus,
    pub file_path: Option<PathBuf>,
    pub size: u64,
    pub follow_up: Option<Gid>,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct FakeDaemon {
    jobs: Mutex<HashMap<Gid, FakeJob>>,
    submitted: Mutex<Vec<(String, Gid)>>,
    removed: Mutex<Vec<Gid>>,
    /// Id the daemon hands back instead of the requested one.
    pub assign: Mutex<Option<Gid>>,
    pub fail_submit: Mutex<Option<String>>,
    pub fail_remove: Mutex<Option<String>>,
}

impl FakeDaemon {
    pub fn assign_next(&self, gid: &str) {
        *self.assign.lock().unwrap() = Some(Gid::from(gid));
    }

    pub fn submitted(&self) -> Vec<(String, Gid)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<Gid> {
        self.removed.lock().unwrap().clone()
    }

    pub fn insert(&self, gid: &Gid, job: FakeJob) {
        self.jobs.lock().unwrap().insert(gid.clone(), job);
    }

    pub fn edit(&self, gid: &Gid, f: impl FnOnce(&mut FakeJob)) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(gid) {
            f(job);
        }
    }

    /// Marks `gid` active with a single file `name` inside `work_dir`.
    pub fn set_active_file(&self, gid: &Gid, work_dir: &Path, name: &str, total: u64, completed: u64) {
        let path = work_dir.join(name);
        self.edit(gid, |job| {
            job.status = DaemonStatus {
                state: DaemonState::Active,
                total_bytes: total,
                completed_bytes: completed,
                speed: 100,
                files: vec![DaemonFile { path: path.to_string_lossy().into_owned(), uris: vec![] }],
            };
            job.file_path = Some(path);
            job.size = total;
        });
    }

    fn with_job<T>(&self, gid: &Gid, f: impl FnOnce(&FakeJob) -> T) -> Result<T, DaemonError> {
        self.jobs
            .lock()
            .unwrap()
            .get(gid)
            .map(f)
            .ok_or_else(|| DaemonError::UnknownGid(gid.clone()))
    }
}

fn waiting(uri: &str) -> FakeJob {
    FakeJob {
        status: DaemonStatus {
            state: DaemonState::Waiting,
            total_bytes: 0,
            completed_bytes: 0,
            speed: 0,
            files: vec![DaemonFile { path: String::new(), uris: vec![uri.to_string()] }],
        },
        file_path: None,
        size: 0,
        follow_up: None,
        error: None,
    }
}

#[async_trait]
impl DownloadDaemon for FakeDaemon {
    async fn submit(&self, uri: &str, dir: &Path, gid: &Gid) -> Result<Gid, DaemonError> {
        if let Some(e) = self.fail_submit.lock().unwrap().clone() {
            return Err(DaemonError::Rpc(e));
        }
        std::fs::create_dir_all(dir).map_err(|e| DaemonError::Rpc(e.to_string()))?;
        let assigned = self.assign.lock().unwrap().take().unwrap_or_else(|| gid.clone());
        self.submitted.lock().unwrap().push((uri.to_string(), assigned.clone()));
        self.jobs.lock().unwrap().insert(assigned.clone(), waiting(uri));
        Ok(assigned)
    }

    async fn remove(&self, gid: &Gid) -> Result<(), DaemonError> {
        if let Some(e) = self.fail_remove.lock().unwrap().clone() {
            return Err(DaemonError::Rpc(e));
        }
        self.removed.lock().unwrap().push(gid.clone());
        self.edit(gid, |job| job.status.state = DaemonState::Removed);
        Ok(())
    }

    async fn status(&self, gid: &Gid) -> Result<DaemonStatus, DaemonError> {
        self.with_job(gid, |j| j.status.clone())
    }

    async fn file_path(&self, gid: &Gid) -> Result<Option<PathBuf>, DaemonError> {
        self.with_job(gid, |j| j.file_path.clone())
    }

    async fn file_size(&self, gid: &Gid) -> Result<u64, DaemonError> {
        self.with_job(gid, |j| j.size)
    }

    async fn metadata_follow_up(&self, gid: &Gid) -> Result<Option<Gid>, DaemonError> {
        self.with_job(gid, |j| j.follow_up.clone())
    }

    async fn error_message(&self, gid: &Gid) -> Result<Option<String>, DaemonError> {
        self.with_job(gid, |j| j.error.clone())
    }
}

// ---- Chat ----

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sent {
    pub message: MessageRef,
    pub reply_to: Option<MessageId>,
    pub text: String,
}

#[derive(Default)]
pub struct FakeChat {
    next_id: Mutex<MessageId>,
    sent: Mutex<Vec<Sent>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    deleted: Mutex<Vec<MessageRef>>,
    gone: Mutex<HashSet<MessageRef>>,
    admins: Mutex<HashSet<(ChatId, UserId)>>,
}

impl FakeChat {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat: ChatId) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.message.chat == chat).collect()
    }

    pub fn replies_to(&self, message: &MessageRef) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| s.message.chat == message.chat && s.reply_to == Some(message.message))
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().unwrap().clone()
    }

    /// Makes later edits of `message` fail as if it was deleted by a user.
    pub fn mark_gone(&self, message: MessageRef) {
        self.gone.lock().unwrap().insert(message);
    }

    pub fn add_admin(&self, chat: ChatId, user: UserId) {
        self.admins.lock().unwrap().insert((chat, user));
    }
}

#[async_trait]
impl ChatPlatform for FakeChat {
    async fn send_message(
        &self,
        chat: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> Result<MessageRef, ChatError> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let message = MessageRef { chat, message: 1000 + *next };
        self.sent.lock().unwrap().push(Sent { message, reply_to, text: text.to_string() });
        Ok(message)
    }

    async fn edit_message(&self, message: &MessageRef, text: &str) -> Result<(), ChatError> {
        if self.gone.lock().unwrap().contains(message) {
            return Err(ChatError::MessageGone);
        }
        self.edits.lock().unwrap().push((*message, text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<(), ChatError> {
        self.deleted.lock().unwrap().push(*message);
        Ok(())
    }

    async fn is_chat_admin(&self, chat: ChatId, user: UserId) -> Result<bool, ChatError> {
        Ok(self.admins.lock().unwrap().contains(&(chat, user)))
    }
}

// ---- Cloud storage ----

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Uploaded {
    pub name: String,
    pub mime: String,
    pub parent: String,
    pub id: String,
}

#[derive(Default)]
pub struct FakeStorage {
    uploads: Mutex<Vec<Uploaded>>,
    links: Mutex<Vec<(String, bool)>>,
    pub link: Mutex<Option<String>>,
    pub fail: Mutex<Option<String>>,
}

impl FakeStorage {
    pub fn uploads(&self) -> Vec<Uploaded> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn links(&self) -> Vec<(String, bool)> {
        self.links.lock().unwrap().clone()
    }

    pub fn set_link(&self, url: &str) {
        *self.link.lock().unwrap() = Some(url.to_string());
    }
}

#[async_trait]
impl CloudStorage for FakeStorage {
    async fn upload_path(
        &self,
        path: &Path,
        mime: &str,
        parent: &str,
        size: u64,
        progress: &UploadProgress,
    ) -> Result<String, StorageError> {
        if let Some(e) = self.fail.lock().unwrap().clone() {
            return Err(StorageError::Request(e));
        }
        let mut uploads = self.uploads.lock().unwrap();
        let id = format!("id-{}", uploads.len() + 1);
        uploads.push(Uploaded {
            name: path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            mime: mime.to_string(),
            parent: parent.to_string(),
            id: id.clone(),
        });
        progress.add(size);
        Ok(id)
    }

    async fn create_shareable_link(&self, remote_id: &str, is_folder: bool) -> Result<String, StorageError> {
        self.links.lock().unwrap().push((remote_id.to_string(), is_folder));
        Ok(self
            .link
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("https://drive.test/{remote_id}")))
    }
}

// ---- Archiver ----

pub struct FakeArchiver {
    pub free: Mutex<Result<u64, String>>,
    archived: Mutex<Vec<(PathBuf, String)>>,
}

impl Default for FakeArchiver {
    fn default() -> Self {
        Self { free: Mutex::new(Ok(u64::MAX)), archived: Mutex::new(Vec::new()) }
    }
}

impl FakeArchiver {
    pub fn archived(&self) -> Vec<(PathBuf, String)> {
        self.archived.lock().unwrap().clone()
    }
}

#[async_trait]
impl Archiver for FakeArchiver {
    async fn archive(&self, source: &Path, dest_name: &str) -> Result<u64, ArchiveError> {
        let dest = source.with_file_name(dest_name);
        std::fs::write(&dest, b"tarball")?;
        self.archived.lock().unwrap().push((source.to_path_buf(), dest_name.to_string()));
        Ok(7)
    }

    async fn free_space(&self, _path: &Path) -> Result<u64, ArchiveError> {
        self.free.lock().unwrap().clone().map_err(ArchiveError::Failed)
    }
}

// ---- Webhook ----

#[derive(Default)]
pub struct FakeNotifier {
    notices: Mutex<Vec<CompletionNotice>>,
}

impl FakeNotifier {
    pub fn notices(&self) -> Vec<CompletionNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalNotifier for FakeNotifier {
    async fn notify(&self, notice: &CompletionNotice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

// ---- Harness ----

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub daemon: Arc<FakeDaemon>,
    pub chat: Arc<FakeChat>,
    pub storage: Arc<FakeStorage>,
    pub archiver: Arc<FakeArchiver>,
    pub notifier: Arc<FakeNotifier>,
    pub root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let root = TempDir::new().unwrap();
        let mut settings = Settings::new(root.path(), "parent-folder");
        settings.event_retry = RetryPolicy { attempts: 8, delay: Duration::from_millis(5) };
        settings.status_interval = Duration::from_secs(3600);
        settings.status_teardown_delay = Duration::from_millis(20);
        settings.reply_ttl = Duration::from_millis(20);
        settings.idle_status_ttl = Duration::from_millis(20);
        configure(&mut settings);

        let daemon = Arc::new(FakeDaemon::default());
        let chat = Arc::new(FakeChat::default());
        let storage = Arc::new(FakeStorage::default());
        let archiver = Arc::new(FakeArchiver::default());
        let notifier = Arc::new(FakeNotifier::default());
        let coordinator = Coordinator::new(
            settings,
            Collaborators {
                daemon: daemon.clone(),
                chat: chat.clone(),
                storage: storage.clone(),
                archiver: archiver.clone(),
                notifier: Some(notifier.clone()),
            },
        );
        Self { coordinator, daemon, chat, storage, archiver, notifier, root }
    }

    /// Submits `uri` for a user in `chat`, from command message `message`.
    pub async fn submit(&self, chat: ChatId, message: MessageId, user: &str, uri: &str) -> Gid {
        self.coordinator
            .submit_download(origin(chat, message, user), uri, false)
            .await
            .unwrap()
    }

    pub async fn work_dir(&self, gid: &Gid) -> PathBuf {
        self.coordinator.registry().get_by_gid(gid).await.unwrap().work_dir
    }
}

pub fn origin(chat: ChatId, message: MessageId, user: &str) -> Origin {
    Origin {
        chat,
        message,
        user: message,
        username: format!("@{user}"),
        replied_user: None,
    }
}

pub async fn event(h: &Harness, kind: mirror_core::EventKind, gid: &Gid) {
    h.coordinator
        .handle_event(mirror_core::DaemonEvent { kind, gid: gid.clone() })
        .await;
}

/// Polls `check` until it holds, for fire-and-forget side effects.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
