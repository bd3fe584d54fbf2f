use std::sync::{Arc, Mutex};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoordinatorError, DaemonError, Result};
use crate::ports::{Archiver, ChatPlatform, CloudStorage, DownloadDaemon, ExternalNotifier};
use crate::registry::Registry;
use crate::settings::Settings;
use crate::types::{Gid, MessageRef, Origin};

/// The external adapters the coordinator drives.
pub struct Collaborators {
    pub daemon: Arc<dyn DownloadDaemon>,
    pub chat: Arc<dyn ChatPlatform>,
    pub storage: Arc<dyn CloudStorage>,
    pub archiver: Arc<dyn Archiver>,
    /// `None` when the completion webhook is disabled.
    pub notifier: Option<Arc<dyn ExternalNotifier>>,
}

/// Download-lifecycle coordinator: owns the registry and reacts to daemon
/// notifications, chat commands and the status timer.
pub struct Coordinator {
    pub(crate) registry: Registry,
    pub(crate) daemon: Arc<dyn DownloadDaemon>,
    pub(crate) chat: Arc<dyn ChatPlatform>,
    pub(crate) storage: Arc<dyn CloudStorage>,
    pub(crate) archiver: Arc<dyn Archiver>,
    pub(crate) notifier: Option<Arc<dyn ExternalNotifier>>,
    pub(crate) settings: Settings,
    pub(crate) status_timer: Mutex<Option<CancellationToken>>,
}

impl Coordinator {
    pub fn new(settings: Settings, collaborators: Collaborators) -> Arc<Self> {
        Arc::new(Self {
            registry: Registry::new(),
            daemon: collaborators.daemon,
            chat: collaborators.chat,
            storage: collaborators.storage,
            archiver: collaborators.archiver,
            notifier: collaborators.notifier,
            settings,
            status_timer: Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registers a job and hands `uri` to the daemon.
    ///
    /// The job is in the registry before the daemon is asked, under the GID
    /// the daemon is asked to use, so notifications for it always have
    /// something to resolve against.
    pub async fn submit_download(self: &Arc<Self>, origin: Origin, uri: &str, archive: bool) -> Result<Gid> {
        if !self.settings.policy.is_url_allowed(uri) {
            info!(chat=%origin.chat, "submit: blacklisted url rejected");
            return Err(CoordinatorError::BlacklistedUrl);
        }

        let gid = Gid::generate();
        let work_dir = self.settings.download_root.join(Uuid::new_v4().to_string());
        self.registry.add_download(gid.clone(), work_dir.clone(), origin, archive).await?;

        match self.daemon.submit(uri, &work_dir, &gid).await {
            Ok(assigned) => {
                if assigned != gid && !self.registry.change_gid(&gid, assigned.clone()).await {
                    warn!(gid=%gid, assigned=%assigned, "submit: could not re-key to daemon id");
                    // The daemon download belongs to whichever job holds `assigned`.
                    let e = DaemonError::GidInUse(assigned);
                    self.cleanup(&gid, &format!("Failed to start the download. {e}"), None).await;
                    return Err(CoordinatorError::Daemon(e));
                }
                info!(gid=%assigned, uri=%uri, "submit: download queued");
                Ok(assigned)
            }
            Err(e) => {
                warn!(gid=%gid, "submit: daemon rejected download: {e}");
                self.cleanup(&gid, &format!("Failed to start the download. {e}"), None).await;
                Err(CoordinatorError::Daemon(e))
            }
        }
    }

    /// Replies to `to`, then deletes the reply and `to` after the reply TTL.
    pub async fn reply_ephemeral(self: &Arc<Self>, to: MessageRef, text: &str) {
        self.reply_for(to, text, self.settings.reply_ttl).await;
    }

    /// Like [`Coordinator::reply_ephemeral`] with an explicit lifetime.
    pub async fn reply_for(self: &Arc<Self>, to: MessageRef, text: &str, ttl: std::time::Duration) {
        let sent = match self.chat.send_message(to.chat, Some(to.message), text).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(chat=%to.chat, "reply failed: {e}");
                return;
            }
        };
        self.delete_later(vec![sent, to], ttl);
    }

    pub(crate) fn delete_later(self: &Arc<Self>, messages: Vec<MessageRef>, after: std::time::Duration) {
        let chat = self.chat.clone();
        tokio::spawn(async move {
            sleep(after).await;
            for m in messages {
                if let Err(e) = chat.delete_message(&m).await {
                    debug!(chat=%m.chat, message=%m.message, "auto-delete failed: {e}");
                }
            }
        });
    }
}
