//! Download-lifecycle coordinator
//!
//! Tracks mirror jobs from submission to teardown in front of a download
//! daemon, a chat platform and a cloud store, all injected as trait objects.

mod aggregator;
mod cleanup;
mod coordinator;
mod error;
mod lock;
mod reconciler;
mod registry;
mod retry;
mod settings;
mod types;
mod upload;

pub mod filename;
pub mod format;
pub mod policy;
pub mod ports;

pub use aggregator::{Aggregate, JobLine, NO_ACTIVE_DOWNLOADS};
pub use cleanup::Resolution;
pub use coordinator::{Collaborators, Coordinator};
pub use error::{ArchiveError, ChatError, CoordinatorError, DaemonError, RegistryError, Result, StorageError};
pub use lock::KeyedLock;
pub use policy::Policy;
pub use registry::Registry;
pub use retry::RetryPolicy;
pub use settings::Settings;
pub use types::{
    ChatId, ChatStatus, CompletionNotice, DaemonEvent, DaemonFile, DaemonState, DaemonStatus, DownloadAllowed,
    EventKind, Gid, Job, JobKey, JobPhase, JobSummary, MessageId, MessageRef, NoticeFile, Origin, Role,
    UploadProgress, UserId,
};
pub use upload::{mime_for, upload_recursive};
