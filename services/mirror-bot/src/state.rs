use std::sync::Arc;

use mirror_core::Coordinator;

use crate::auth::AccessPolicy;
use crate::config::AppConfig;
use crate::drive::DriveClient;
use crate::telegram::TelegramClient;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub telegram: Arc<TelegramClient>,
    pub drive: Arc<DriveClient>,
    pub config: AppConfig,
    pub access: AccessPolicy,
}

impl AppState {
    pub fn new(
        coordinator: Arc<Coordinator>,
        telegram: Arc<TelegramClient>,
        drive: Arc<DriveClient>,
        config: AppConfig,
    ) -> Self {
        let access = AccessPolicy {
            sudo_users: config.sudo_users.clone(),
            authorized_chats: config.authorized_chats.clone(),
        };
        Self { coordinator, telegram, drive, config, access }
    }
}
