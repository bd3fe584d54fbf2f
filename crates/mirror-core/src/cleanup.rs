//! Terminal handling: exactly-once teardown, single and bulk cancellation,
//! and the sticky filename policy that can trigger a cancellation.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::filename::METADATA_NAME;
use crate::format::format_size;
use crate::types::{CompletionNotice, DownloadAllowed, Gid, Job, JobPhase, MessageRef, NoticeFile, Role};
use crate::Coordinator;

/// Outcome of consulting the filename policy for one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub state: DownloadAllowed,
    /// Set only on the call that resolved the job to `Disallowed` while it
    /// could still be cancelled.
    pub cancel: bool,
}

type CancelFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

impl Coordinator {
    /// Tears a job down. The first caller for a GID wins; later calls find
    /// nothing and return.
    pub async fn cleanup(self: &Arc<Self>, gid: &Gid, message: &str, url: Option<&str>) {
        let bulk_cancelled = self.registry.is_cancelled(gid).await;
        let Some(job) = self.registry.delete_download(gid).await else {
            debug!(gid=%gid, "cleanup: download already cleaned up");
            return;
        };
        info!(gid=%gid, success=url.is_some(), "cleanup");

        // A bulk cancel already told this chat.
        if !bulk_cancelled {
            let text = match &job.origin.replied_user {
                Some(user) => format!("{message}\n\ncc: {user}"),
                None => message.to_string(),
            };
            if let Err(e) = self.chat.send_message(job.origin.chat, Some(job.origin.message), &text).await {
                warn!(gid=%gid, chat=%job.origin.chat, "cleanup: reply failed: {e}");
            }
        }

        self.notify_external(&job, url);
        self.registry.remove_cancelled_dls(gid).await;
        self.refresh_statuses().await;
        spawn_remove_dir(job.work_dir);
    }

    fn notify_external(&self, job: &Job, url: Option<&str>) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let notice = CompletionNotice {
            successful: url.is_some(),
            file: NoticeFile {
                name: job.file_name.clone().filter(|n| n != METADATA_NAME),
                url: url.map(str::to_string),
                size: (job.upload_size > 0).then(|| format_size(job.upload_size)),
            },
            origin_chat: job.origin.chat,
        };
        tokio::spawn(async move { notifier.notify(&notice).await });
    }

    /// Cancels one job on behalf of `requester`. Returns whether a
    /// cancellation was started; uploads are never interrupted.
    pub fn cancel_single<'a>(self: &'a Arc<Self>, gid: &'a Gid, requester: Option<MessageRef>) -> CancelFuture<'a> {
        self.cancel_job(gid, requester, true)
    }

    fn cancel_job<'a>(
        self: &'a Arc<Self>,
        gid: &'a Gid,
        requester: Option<MessageRef>,
        confirm_elsewhere: bool,
    ) -> CancelFuture<'a> {
        Box::pin(async move {
            let Some(job) = self.registry.get_by_gid(gid).await else {
                return false;
            };
            if job.phase == JobPhase::Uploading {
                if let Some(to) = requester {
                    self.reply_ephemeral(to, "Upload in progress. Cannot cancel.").await;
                }
                return false;
            }

            if let Err(e) = self.daemon.remove(gid).await {
                warn!(gid=%gid, "cancel: daemon remove failed: {e}");
                if let Some(to) = requester {
                    self.reply_ephemeral(to, &format!("Failed to cancel the download. {e}")).await;
                }
                return false;
            }
            info!(gid=%gid, "cancel: removed from daemon");

            // The daemon only reports a stop for downloads it had started.
            let never_started = self
                .registry
                .get_by_gid(gid)
                .await
                .is_some_and(|j| j.phase == JobPhase::Queued);
            if never_started {
                self.on_stop(gid).await;
            }

            if let Some(to) = requester {
                if confirm_elsewhere && to.chat != job.origin.chat {
                    self.reply_ephemeral(to, "The download was canceled.").await;
                }
            }
            true
        })
    }

    /// Cancels every job `role` may reach and sends one notice per affected
    /// chat. Returns how many cancellations were started.
    pub async fn cancel_all(self: &Arc<Self>, role: Role, requester: MessageRef) -> usize {
        let targets: Vec<Job> = self
            .registry
            .downloads()
            .await
            .into_iter()
            .filter(|j| role == Role::Elevated || j.origin.chat == requester.chat)
            .collect();
        info!(chat=%requester.chat, role=?role, targets=targets.len(), "cancel all");

        for job in &targets {
            self.registry.add_cancelled(job).await;
        }

        let mut cancelled: Vec<Job> = Vec::new();
        let mut refused: Vec<Job> = Vec::new();
        for job in targets {
            if self.cancel_job(&job.gid, Some(requester), false).await {
                cancelled.push(job);
            } else {
                refused.push(job);
            }
        }

        // Refused jobs still finish normally and notify on their own.
        for job in &refused {
            self.registry.remove_cancelled_dls(&job.gid).await;
            let still_named = cancelled
                .iter()
                .any(|c| c.origin.chat == job.origin.chat && c.origin.username == job.origin.username);
            if !still_named {
                self.registry.forget_cancelled_user(job.origin.chat, &job.origin.username).await;
            }
        }

        // The notice goes out once the daemon stops have been torn down.
        let settled = self
            .settings
            .event_retry
            .until_found(|| async {
                for job in &cancelled {
                    if self.registry.get_by_gid(&job.gid).await.is_some() {
                        return None;
                    }
                }
                Some(())
            })
            .await;
        if settled.is_none() {
            warn!(chat=%requester.chat, "cancel all: some downloads still pending teardown");
        }

        for (chat, users) in self.registry.cancelled_chats().await {
            let text = format!("{}: Your downloads have been manually cancelled.", users.join(", "));
            if let Err(e) = self.chat.send_message(chat, None, &text).await {
                warn!(chat=%chat, "cancel all: notice failed: {e}");
            }
            self.registry.remove_cancelled_message(chat).await;
        }

        cancelled.len()
    }

    /// Consults the filename policy for `gid` unless it already resolved.
    /// Both outcomes are sticky.
    pub async fn resolve_download_allowed(&self, gid: &Gid, filename: &str) -> Resolution {
        let policy = &self.settings.policy;
        let mut resolution = Resolution { state: DownloadAllowed::Unknown, cancel: false };
        self.registry
            .update(gid, |job| {
                if job.download_allowed == DownloadAllowed::Unknown {
                    job.download_allowed = policy.check_filename(filename);
                    resolution.cancel =
                        job.download_allowed == DownloadAllowed::Disallowed && job.phase != JobPhase::Uploading;
                }
                resolution.state = job.download_allowed;
            })
            .await;
        if resolution.cancel {
            info!(gid=%gid, filename=%filename, "blacklisted file name, cancelling");
        }
        resolution
    }
}

fn spawn_remove_dir(dir: PathBuf) {
    tokio::spawn(async move {
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(dir=%dir.display(), "cleanup: deleted work dir"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir=%dir.display(), "cleanup: failed to delete work dir: {e}"),
        }
    });
}
