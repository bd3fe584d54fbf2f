//! Aggregate status messages.
//!
//! The text is computed once per refresh from every registered job, then each
//! chat with a displayed status gets the lines of its own jobs. Edits are only
//! sent when the text changed; a status whose message vanished is dropped.

use std::sync::{Arc, Weak};

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::filename;
use crate::format::transfer_line;
use crate::types::{ChatId, DaemonState, Gid, Job, JobPhase, MessageRef};
use crate::Coordinator;

pub const NO_ACTIVE_DOWNLOADS: &str = "No active downloads";

const LINE_SEPARATOR: &str = "\n\n";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobLine {
    pub gid: Gid,
    pub chat: ChatId,
    pub text: String,
}

/// One rendering of every registered job, earliest-started first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub lines: Vec<JobLine>,
}

impl Aggregate {
    pub fn job_count(&self) -> usize {
        self.lines.len()
    }

    pub fn text(&self) -> String {
        render(self.lines.iter())
    }

    /// Only the lines of jobs started in `chat`.
    pub fn text_for_chat(&self, chat: ChatId) -> String {
        render(self.lines.iter().filter(|l| l.chat == chat))
    }
}

fn render<'a>(lines: impl Iterator<Item = &'a JobLine>) -> String {
    let text = lines.map(|l| l.text.as_str()).collect::<Vec<_>>().join(LINE_SEPARATOR);
    if text.is_empty() {
        NO_ACTIVE_DOWNLOADS.to_string()
    } else {
        text
    }
}

impl Coordinator {
    pub async fn build_aggregate(self: &Arc<Self>) -> Aggregate {
        let now = Instant::now();
        let mut lines = Vec::new();
        for job in self.registry.downloads().await {
            let text = if job.phase == JobPhase::Uploading {
                self.upload_line(&job.gid, now).await
            } else {
                Some(self.download_line(&job).await)
            };
            // None: cleaned up while we were rendering.
            if let Some(text) = text {
                lines.push(JobLine { gid: job.gid, chat: job.origin.chat, text });
            }
        }
        Aggregate { lines }
    }

    pub async fn aggregate_status_text(self: &Arc<Self>) -> String {
        self.build_aggregate().await.text()
    }

    async fn upload_line(&self, gid: &Gid, now: Instant) -> Option<String> {
        let mut line = None;
        self.registry
            .update(gid, |job| {
                job.sample_upload(now);
                let name = job.file_name.as_deref().unwrap_or(filename::METADATA_NAME);
                line = Some(transfer_line(name, job.upload_size, job.uploaded_prev, job.upload_speed, Some("Uploading")));
            })
            .await;
        line
    }

    async fn download_line(self: &Arc<Self>, job: &Job) -> String {
        let status = match self.daemon.status(&job.gid).await {
            Ok(status) => status,
            Err(e) => return format!("Error: {} - {e}", job.gid),
        };

        let file = filename::find_file_path(&status.files, &job.work_dir);
        let name = filename::display_name(&file, &job.work_dir);
        if self.resolve_download_allowed(&job.gid, &name).await.cancel {
            let this = self.clone();
            let gid = job.gid.clone();
            tokio::spawn(async move {
                this.cancel_single(&gid, None).await;
            });
        }

        match status.state {
            DaemonState::Active => transfer_line(&name, status.total_bytes, status.completed_bytes, status.speed, None),
            DaemonState::Waiting => format!("<i>{name}</i> - Queued"),
            state => format!("<i>{name}</i> - {state}"),
        }
    }

    /// Re-renders every displayed aggregate status. Stops the timer and
    /// schedules the messages for deletion once nothing is registered.
    pub async fn refresh_statuses(self: &Arc<Self>) {
        let aggregate = self.build_aggregate().await;
        for status in self.registry.statuses().await {
            let chat = status.message.chat;
            let text = aggregate.text_for_chat(chat);
            self.registry.set_status_lock(chat, self.edit_status(chat, text)).await;
        }

        if self.registry.is_empty().await {
            self.stop_status_timer();
            self.schedule_status_teardown();
        }
    }

    async fn edit_status(&self, chat: ChatId, text: String) {
        // Re-read under the lock: the handle may have been replaced meanwhile.
        let Some(current) = self.registry.get_status(chat).await else {
            return;
        };
        if current.last_text == text {
            return;
        }
        match self.chat.edit_message(&current.message, &text).await {
            Ok(()) | Err(ChatError::NotModified) => {
                self.registry.set_status_text(&current.message, text).await;
            }
            Err(ChatError::MessageGone) => {
                debug!(chat=%chat, message=%current.message.message, "status message gone, dropping handle");
                self.registry.delete_status_if(&current.message).await;
            }
            Err(e) => warn!(chat=%chat, "status edit failed: {e}"),
        }
    }

    fn schedule_status_teardown(self: &Arc<Self>) {
        let this = self.clone();
        let delay = self.settings.status_teardown_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            if !this.registry.is_empty().await {
                return;
            }
            for status in this.registry.statuses().await {
                let message = status.message;
                this.registry
                    .set_status_lock(message.chat, async {
                        if this.registry.delete_status_if(&message).await {
                            if let Err(e) = this.chat.delete_message(&message).await {
                                debug!(chat=%message.chat, "status teardown: delete failed: {e}");
                            }
                        }
                    })
                    .await;
            }
        });
    }

    /// Starts the periodic refresh unless it already runs.
    pub fn ensure_status_timer(self: &Arc<Self>) {
        let mut timer = self.status_timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *timer = Some(token.clone());
        drop(timer);

        info!(interval_ms = self.settings.status_interval.as_millis() as u64, "status timer started");
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.settings.status_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(interval) => {}
                }
                let Some(this) = weak.upgrade() else {
                    break;
                };
                this.refresh_statuses().await;
            }
        });
    }

    pub fn stop_status_timer(&self) {
        let token = self.status_timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(token) = token {
            token.cancel();
            info!("status timer stopped");
        }
    }

    pub fn is_status_timer_running(&self) -> bool {
        self.status_timer.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Answers a status command with a fresh aggregate message, replacing the
    /// chat's previous one.
    pub async fn send_status_message(self: &Arc<Self>, command: MessageRef) {
        let chat = command.chat;
        self.registry
            .set_status_lock(chat, async {
                if let Some(old) = self.registry.delete_status(chat).await {
                    if let Err(e) = self.chat.delete_message(&old.message).await {
                        debug!(chat=%chat, "old status delete failed: {e}");
                    }
                }

                let aggregate = self.build_aggregate().await;
                let text = aggregate.text_for_chat(chat);
                let sent = match self.chat.send_message(chat, Some(command.message), &text).await {
                    Ok(sent) => sent,
                    Err(e) => {
                        warn!(chat=%chat, "status send failed: {e}");
                        return;
                    }
                };

                if aggregate.job_count() == 0 {
                    self.delete_later(vec![sent, command], self.settings.idle_status_ttl);
                } else {
                    self.registry.add_status(sent, text).await;
                    self.ensure_status_timer();
                }
            })
            .await;
    }
}
