use thiserror::Error;

use crate::types::Gid;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Download daemon unreachable: {0}")]
    Connection(String),

    #[error("Unknown download id: {0}")]
    UnknownGid(Gid),

    /// The daemon handed back an id another job already holds.
    #[error("Download id {0} is already in use")]
    GidInUse(Gid),

    #[error("{0}")]
    Rpc(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    /// The message to edit or delete no longer exists.
    #[error("Message not found")]
    MessageGone,

    /// The edit would not change the message.
    #[error("Message is not modified")]
    NotModified,

    #[error("Chat API error: {0}")]
    Api(String),

    #[error("Chat transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage auth failed: {0}")]
    Auth(String),

    #[error("Storage request failed: {0}")]
    Request(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Download {0} is already registered")]
    DuplicateGid(Gid),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Download failed. Blacklisted URL.")]
    BlacklistedUrl,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to start the download. {0}")]
    Daemon(#[from] DaemonError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
