//! Daemon lifecycle notifications.
//!
//! ```text
//! Queued --Start--> Downloading --Complete(files)--> Uploading --> cleanup(success)
//!                               \-Complete(metadata)--> re-key, Queued
//!                               \-Complete(nothing)---> cleanup(failure)
//! Queued|Downloading --Stop|Error--> cleanup
//! ```
//!
//! Notifications can beat the registration they refer to, so every handler
//! resolves its job through the bounded event retry before giving up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::filename::{self, METADATA_NAME};
use crate::format::format_size;
use crate::types::{DaemonEvent, DownloadAllowed, EventKind, Gid, Job, JobPhase};
use crate::upload::upload_recursive;
use crate::Coordinator;

impl Coordinator {
    /// Feeds daemon notifications into the coordinator. Each one is handled
    /// on its own task, like the daemon's own callbacks would be.
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: mpsc::Receiver<DaemonEvent>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let this = this.clone();
                tokio::spawn(async move { this.handle_event(event).await });
            }
            info!("event loop: daemon event stream closed");
        })
    }

    pub async fn handle_event(self: &Arc<Self>, event: DaemonEvent) {
        debug!(gid=%event.gid, kind=?event.kind, "daemon event");
        match event.kind {
            EventKind::Start => self.on_start(&event.gid).await,
            EventKind::Stop => self.on_stop(&event.gid).await,
            EventKind::Complete => self.on_complete(&event.gid).await,
            EventKind::Error => self.on_error(&event.gid).await,
        }
    }

    /// Resolves `gid`, retrying while registration may still be in flight.
    async fn await_registered(&self, gid: &Gid, kind: EventKind) -> Option<Job> {
        let found = self
            .settings
            .event_retry
            .until_found(|| self.registry.get_by_gid(gid))
            .await;
        if found.is_none() {
            warn!(gid=%gid, kind=?kind, "no registered download after retries, dropping event");
        }
        found
    }

    pub(crate) async fn on_start(self: &Arc<Self>, gid: &Gid) {
        let Some(job) = self.await_registered(gid, EventKind::Start).await else {
            return;
        };
        if !self.registry.move_to_active(gid).await {
            return;
        }
        info!(gid=%gid, "download started");

        match self.daemon.status(gid).await {
            Ok(status) => {
                let file = filename::find_file_path(&status.files, &job.work_dir);
                let name = filename::display_name(&file, &job.work_dir);
                if self.resolve_download_allowed(gid, &name).await.cancel {
                    self.cancel_single(gid, None).await;
                }
            }
            Err(e) => warn!(gid=%gid, "start: status lookup failed: {e}"),
        }

        self.ensure_status_timer();
    }

    pub(crate) async fn on_stop(self: &Arc<Self>, gid: &Gid) {
        let Some(job) = self.await_registered(gid, EventKind::Stop).await else {
            return;
        };
        info!(gid=%gid, "download stopped");
        let mut message = String::from("Download stopped.");
        if job.download_allowed == DownloadAllowed::Disallowed {
            message.push_str(" Blacklisted file name.");
        }
        self.cleanup(gid, &message, None).await;
    }

    pub(crate) async fn on_error(self: &Arc<Self>, gid: &Gid) {
        if self.await_registered(gid, EventKind::Error).await.is_none() {
            return;
        }
        let mut message = String::from("Download error.");
        match self.daemon.error_message(gid).await {
            Ok(Some(detail)) if !detail.is_empty() => {
                warn!(gid=%gid, "download error: {detail}");
                message.push(' ');
                message.push_str(&detail);
            }
            Ok(_) => warn!(gid=%gid, "download error"),
            Err(e) => warn!(gid=%gid, "download error, detail unavailable: {e}"),
        }
        self.cleanup(gid, &message, None).await;
    }

    pub(crate) async fn on_complete(self: &Arc<Self>, gid: &Gid) {
        let Some(job) = self.await_registered(gid, EventKind::Complete).await else {
            return;
        };

        let path = match self.daemon.file_path(gid).await {
            Ok(path) => path,
            Err(e) => {
                warn!(gid=%gid, "complete: file lookup failed: {e}");
                self.cleanup(gid, "Upload failed. Could not get downloaded files.", None).await;
                return;
            }
        };

        match path {
            Some(path) => self.on_files_ready(job, path).await,
            None => self.on_no_files(gid).await,
        }
    }

    async fn on_no_files(self: &Arc<Self>, gid: &Gid) {
        match self.daemon.metadata_follow_up(gid).await {
            Ok(Some(next)) => {
                if self.registry.change_gid(gid, next.clone()).await {
                    info!(gid=%gid, next=%next, "complete: metadata fetched, following new download");
                    self.refresh_statuses().await;
                } else {
                    debug!(gid=%gid, next=%next, "complete: metadata job already gone");
                }
            }
            Ok(None) => {
                info!(gid=%gid, "complete: no files and not metadata");
                self.cleanup(gid, "Upload failed. Could not get files.", None).await;
            }
            Err(e) => {
                warn!(gid=%gid, "complete: metadata check failed: {e}");
                self.cleanup(gid, "Upload failed. Could not check if the file is metadata.", None).await;
            }
        }
    }

    async fn on_files_ready(self: &Arc<Self>, job: Job, path: PathBuf) {
        let gid = &job.gid;
        let size = match self.daemon.file_size(gid).await {
            Ok(size) => size,
            Err(e) => {
                warn!(gid=%gid, "complete: size lookup failed: {e}");
                self.cleanup(gid, "Upload failed. Could not get file size.", None).await;
                return;
            }
        };

        let name = filename::name_from_path(&path, &job.work_dir).unwrap_or_else(|| METADATA_NAME.to_string());
        let marked = self
            .registry
            .update(gid, |j| {
                j.phase = JobPhase::Uploading;
                j.file_name = Some(name.clone());
                j.upload_size = size;
            })
            .await;
        if !marked {
            debug!(gid=%gid, "complete: download cleaned up meanwhile");
            return;
        }

        if self.resolve_download_allowed(gid, &name).await.state == DownloadAllowed::Disallowed {
            self.cleanup(gid, "Upload failed. Blacklisted file name.", None).await;
            return;
        }

        info!(gid=%gid, path=%path.display(), "complete: uploading");
        let top = filename::top_level_path(&path, &job.work_dir).unwrap_or(path);
        self.upload(&job, top, name, size).await;
    }

    async fn upload(self: &Arc<Self>, job: &Job, path: PathBuf, name: String, size: u64) {
        let gid = &job.gid;
        let is_dir = tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false);

        let (path, name, size) = if job.archive_before_upload && is_dir {
            match self.archive_if_room(&path, &name, size).await {
                Ok(archived) => archived,
                Err(e) => {
                    self.cleanup(gid, &format!("Failed to upload <code>{name}</code> to Drive. {e}"), None)
                        .await;
                    return;
                }
            }
        } else {
            (path, name, size)
        };

        self.registry
            .update(gid, |j| {
                j.file_name = Some(name.clone());
                j.upload_size = size;
            })
            .await;

        let uploaded = upload_recursive(self.storage.as_ref(), &path, &self.settings.upload_parent, &job.uploaded).await;
        match uploaded {
            Ok(url) => {
                info!(gid=%gid, url=%url, "upload: done");
                let message = if size > 0 {
                    format!("<a href='{url}'>{name}</a> ({})", format_size(size))
                } else {
                    format!("<a href='{url}'>{name}</a>")
                };
                self.cleanup(gid, &message, Some(&url)).await;
            }
            Err(e) => {
                warn!(gid=%gid, path=%path.display(), "upload failed: {e}");
                self.cleanup(gid, &format!("Failed to upload <code>{name}</code> to Drive. {e}"), None).await;
            }
        }
    }

    /// Archives `path` when the disk has room for the archive, otherwise
    /// leaves it as is.
    async fn archive_if_room(
        &self,
        path: &Path,
        name: &str,
        size: u64,
    ) -> Result<(PathBuf, String, u64), crate::error::ArchiveError> {
        let unarchived = (path.to_path_buf(), name.to_string(), size);
        let free = match self.archiver.free_space(&self.settings.download_root).await {
            Ok(free) => free,
            Err(e) => {
                warn!(path=%path.display(), "archive: free space unknown, uploading as is: {e}");
                return Ok(unarchived);
            }
        };
        if free <= size {
            info!(path=%path.display(), free, size, "archive: not enough space, uploading as is");
            return Ok(unarchived);
        }

        let dest = format!("{name}.tar");
        let archived_size = self.archiver.archive(path, &dest).await?;
        let archive_path = path.with_file_name(&dest);
        info!(path=%archive_path.display(), size=archived_size, "archive: done");
        Ok((archive_path, dest, archived_size))
    }
}
