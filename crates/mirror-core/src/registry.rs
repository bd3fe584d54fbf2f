//! The authoritative table of in-flight downloads.
//!
//! Jobs are stored under a stable [`JobKey`] and indexed by GID, so a re-key
//! keeps the job's identity. Lookups return clones and report absence as
//! `None`: callers treat a missing job as already cleaned up.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::lock::KeyedLock;
use crate::types::{
    ChatId, ChatStatus, DownloadAllowed, Gid, Job, JobKey, JobPhase, MessageId, MessageRef, Origin,
    UploadProgress,
};

#[derive(Default)]
struct Tables {
    next_key: u64,
    jobs: HashMap<JobKey, Job>,
    by_gid: HashMap<Gid, JobKey>,
    statuses: BTreeMap<ChatId, ChatStatus>,
    cancelled_dls: HashMap<Gid, JobKey>,
    cancelled_users: BTreeMap<ChatId, Vec<String>>,
}

impl Tables {
    fn job_mut(&mut self, gid: &Gid) -> Option<&mut Job> {
        let key = self.by_gid.get(gid)?;
        self.jobs.get_mut(key)
    }
}

#[derive(Default)]
pub struct Registry {
    tables: RwLock<Tables>,
    status_locks: KeyedLock<ChatId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_download(
        &self,
        gid: Gid,
        work_dir: PathBuf,
        origin: Origin,
        archive_before_upload: bool,
    ) -> Result<JobKey, RegistryError> {
        let mut t = self.tables.write().await;
        if t.by_gid.contains_key(&gid) {
            return Err(RegistryError::DuplicateGid(gid));
        }
        t.next_key += 1;
        let key = JobKey(t.next_key);
        let job = Job {
            key,
            gid: gid.clone(),
            origin,
            archive_before_upload,
            phase: JobPhase::Queued,
            download_allowed: DownloadAllowed::Unknown,
            uploaded: UploadProgress::default(),
            uploaded_prev: 0,
            last_upload_sample: None,
            upload_speed: 0,
            upload_size: 0,
            file_name: None,
            start_time: Utc::now(),
            work_dir,
        };
        t.by_gid.insert(gid, key);
        t.jobs.insert(key, job);
        Ok(key)
    }

    pub async fn get_by_gid(&self, gid: &Gid) -> Option<Job> {
        let t = self.tables.read().await;
        t.by_gid.get(gid).and_then(|k| t.jobs.get(k)).cloned()
    }

    pub async fn get_by_key(&self, key: JobKey) -> Option<Job> {
        self.tables.read().await.jobs.get(&key).cloned()
    }

    /// Finds the job started by the given command message.
    pub async fn get_by_origin_message(&self, chat: ChatId, message: MessageId) -> Option<Job> {
        let t = self.tables.read().await;
        t.jobs
            .values()
            .find(|j| j.origin.chat == chat && j.origin.message == message)
            .cloned()
    }

    /// Applies `f` to the job if it is still registered.
    pub async fn update<F: FnOnce(&mut Job)>(&self, gid: &Gid, f: F) -> bool {
        let mut t = self.tables.write().await;
        match t.job_mut(gid) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    /// Marks the job as downloading. A late Start never pulls a job back out
    /// of `Uploading`; returns false then, or when the job is gone.
    pub async fn move_to_active(&self, gid: &Gid) -> bool {
        let mut t = self.tables.write().await;
        match t.job_mut(gid) {
            Some(job) if job.phase != JobPhase::Uploading => {
                job.phase = JobPhase::Downloading;
                true
            }
            _ => false,
        }
    }

    /// Re-keys a job whose daemon id changed, e.g. a metadata fetch followed
    /// by the real download. The job goes back to `Queued` because the new
    /// daemon job has not started yet.
    pub async fn change_gid(&self, old: &Gid, new: Gid) -> bool {
        let mut t = self.tables.write().await;
        if t.by_gid.contains_key(&new) {
            return false;
        }
        let Some(key) = t.by_gid.remove(old) else {
            return false;
        };
        if let Some(job) = t.jobs.get_mut(&key) {
            job.gid = new.clone();
            job.phase = JobPhase::Queued;
        }
        if let Some(k) = t.cancelled_dls.remove(old) {
            t.cancelled_dls.insert(new.clone(), k);
        }
        t.by_gid.insert(new, key);
        true
    }

    /// Removes a job from every index. Returns it if it was still there.
    pub async fn delete_download(&self, gid: &Gid) -> Option<Job> {
        let mut t = self.tables.write().await;
        let key = t.by_gid.remove(gid)?;
        t.jobs.remove(&key)
    }

    /// Snapshot of all jobs, earliest-started first.
    pub async fn downloads(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.tables.read().await.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.key.cmp(&b.key)));
        jobs
    }

    pub async fn for_each_download<F: FnMut(&Job)>(&self, mut f: F) {
        for job in self.downloads().await {
            f(&job);
        }
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // ---- Aggregate status handles ----

    pub async fn add_status(&self, message: MessageRef, last_text: String) {
        self.tables
            .write()
            .await
            .statuses
            .insert(message.chat, ChatStatus { message, last_text });
    }

    pub async fn get_status(&self, chat: ChatId) -> Option<ChatStatus> {
        self.tables.read().await.statuses.get(&chat).cloned()
    }

    pub async fn delete_status(&self, chat: ChatId) -> Option<ChatStatus> {
        self.tables.write().await.statuses.remove(&chat)
    }

    /// Drops the handle only if it still points at `message`.
    pub async fn delete_status_if(&self, message: &MessageRef) -> bool {
        let mut t = self.tables.write().await;
        if t.statuses.get(&message.chat).is_some_and(|s| s.message == *message) {
            t.statuses.remove(&message.chat);
            true
        } else {
            false
        }
    }

    /// Records the text now shown in `message`, if it is still the chat's
    /// status message.
    pub async fn set_status_text(&self, message: &MessageRef, text: String) -> bool {
        let mut t = self.tables.write().await;
        match t.statuses.get_mut(&message.chat) {
            Some(s) if s.message == *message => {
                s.last_text = text;
                true
            }
            _ => false,
        }
    }

    pub async fn statuses(&self) -> Vec<ChatStatus> {
        self.tables.read().await.statuses.values().cloned().collect()
    }

    pub async fn for_each_status<F: FnMut(&ChatStatus)>(&self, mut f: F) {
        for status in self.statuses().await {
            f(&status);
        }
    }

    /// Runs `work` after every status operation queued earlier for `chat`,
    /// and before any queued later.
    pub async fn set_status_lock<F, T>(&self, chat: ChatId, work: F) -> T
    where
        F: Future<Output = T>,
    {
        self.status_locks.run(chat, work).await
    }

    // ---- Bulk-cancel bookkeeping ----

    pub async fn add_cancelled(&self, job: &Job) {
        let mut t = self.tables.write().await;
        t.cancelled_dls.insert(job.gid.clone(), job.key);
        let users = t.cancelled_users.entry(job.origin.chat).or_default();
        if !users.contains(&job.origin.username) {
            users.push(job.origin.username.clone());
        }
    }

    pub async fn is_cancelled(&self, gid: &Gid) -> bool {
        self.tables.read().await.cancelled_dls.contains_key(gid)
    }

    pub async fn cancelled_dls(&self) -> Vec<Gid> {
        let mut gids: Vec<Gid> = self.tables.read().await.cancelled_dls.keys().cloned().collect();
        gids.sort();
        gids
    }

    pub async fn for_each_cancelled_dl<F: FnMut(&Gid)>(&self, mut f: F) {
        for gid in self.cancelled_dls().await {
            f(&gid);
        }
    }

    /// Chats with a pending batched cancel notice, with their distinct users.
    pub async fn cancelled_chats(&self) -> Vec<(ChatId, Vec<String>)> {
        self.tables
            .read()
            .await
            .cancelled_users
            .iter()
            .map(|(chat, users)| (*chat, users.clone()))
            .collect()
    }

    pub async fn for_each_cancelled_chat<F: FnMut(ChatId, &[String])>(&self, mut f: F) {
        for (chat, users) in self.cancelled_chats().await {
            f(chat, &users);
        }
    }

    pub async fn remove_cancelled_message(&self, chat: ChatId) {
        self.tables.write().await.cancelled_users.remove(&chat);
    }

    pub async fn remove_cancelled_dls(&self, gid: &Gid) {
        self.tables.write().await.cancelled_dls.remove(gid);
    }

    /// Takes `username` out of a chat's pending notice.
    pub async fn forget_cancelled_user(&self, chat: ChatId, username: &str) {
        let mut t = self.tables.write().await;
        if let Some(users) = t.cancelled_users.get_mut(&chat) {
            users.retain(|u| u != username);
            if users.is_empty() {
                t.cancelled_users.remove(&chat);
            }
        }
    }
}
