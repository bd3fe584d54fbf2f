use std::path::PathBuf;
use std::time::Duration;

use crate::policy::Policy;
use crate::retry::RetryPolicy;

/// Coordinator knobs. The binary builds this from its environment config.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Every job gets a UUID-named work dir directly below this.
    pub download_root: PathBuf,
    /// Remote folder uploads land in.
    pub upload_parent: String,
    pub policy: Policy,
    /// Race absorption for notifications that beat registration.
    pub event_retry: RetryPolicy,
    pub status_interval: Duration,
    /// Delay before deleting aggregate messages once nothing is active.
    pub status_teardown_delay: Duration,
    /// Lifetime of transient replies.
    pub reply_ttl: Duration,
    /// Lifetime of a status reply sent when nothing is active.
    pub idle_status_ttl: Duration,
}

impl Settings {
    pub fn new(download_root: impl Into<PathBuf>, upload_parent: impl Into<String>) -> Self {
        Self {
            download_root: download_root.into(),
            upload_parent: upload_parent.into(),
            policy: Policy::default(),
            event_retry: RetryPolicy::default(),
            status_interval: Duration::from_secs(4),
            status_teardown_delay: Duration::from_secs(5),
            reply_ttl: Duration::from_secs(10),
            idle_status_ttl: Duration::from_secs(60),
        }
    }
}
