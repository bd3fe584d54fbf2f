//! Telegram command handling: long-polls updates and turns commands into
//! coordinator calls.

use std::time::Duration;

use mirror_core::ports::ChatPlatform;
use mirror_core::{CoordinatorError, MessageRef, Origin, Role, NO_ACTIVE_DOWNLOADS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Authorization;
use crate::commands::{parse_command, Command};
use crate::drive::{file_link, files_list_message};
use crate::state::SharedState;
use crate::telegram::{Message, User};

const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Lifetime of `/list` and `/getFolder` replies.
const LINK_REPLY_TTL: Duration = Duration::from_secs(60);

const START_TEXT: &str = "You should know the commands already. Happy mirroring.";
const UNAUTHORIZED: &str = "You aren't authorized to use this bot here.";
const NO_PERMISSION: &str = "You do not have permission to do that.";
const FOREIGN_CHAT: &str = "You cannot use this bot here.";
const CANCEL_NO_REPLY: &str = "Reply to the command message, or the bot's download confirmation message \
     for the download that you want to cancel.";
const CANCEL_UNKNOWN: &str = "Reply to the command message, or the bot's download confirmation message \
     for the download that you want to cancel. Also make sure that the download even active.";

/// What a sender may do with `/cancelMirror`.
#[derive(Debug, PartialEq, Eq)]
enum Gate {
    Allow,
    AdminLookup,
    Deny(&'static str),
}

fn cancel_gate(auth: Authorization) -> Gate {
    match auth {
        Authorization::Sudo | Authorization::DownloadOwner | Authorization::AuthorizedChatAllAdmins => Gate::Allow,
        Authorization::AuthorizedChat => Gate::AdminLookup,
        Authorization::Unauthorized => Gate::Deny(FOREIGN_CHAT),
    }
}

/// Scope of `/cancelAll`, or the refusal text.
fn cancel_all_role(auth: Authorization, is_admin: bool) -> Result<Role, &'static str> {
    match auth {
        Authorization::Sudo => Ok(Role::Elevated),
        Authorization::AuthorizedChatAllAdmins => Ok(Role::ChatAdmin),
        Authorization::AuthorizedChat if is_admin => Ok(Role::ChatAdmin),
        Authorization::AuthorizedChat | Authorization::DownloadOwner => Err(NO_PERMISSION),
        Authorization::Unauthorized => Err(FOREIGN_CHAT),
    }
}

pub async fn run_update_loop(state: SharedState, cancel: CancellationToken) {
    info!("telegram: polling for updates");
    let mut offset = 0i64;
    loop {
        let updates = tokio::select! {
            _ = cancel.cancelled() => break,
            r = state.telegram.get_updates(offset) => r,
        };
        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(message) = update.message else { continue };
                    let state = state.clone();
                    tokio::spawn(async move { handle_message(state, message).await });
                }
            }
            Err(e) => {
                warn!("telegram: getUpdates failed: {e}");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
    info!("telegram: update loop stopped");
}

async fn handle_message(state: SharedState, message: Message) {
    let Some(text) = message.text.as_deref() else { return };
    let Some(command) = parse_command(text, state.config.commands_bot_name.as_deref()) else { return };
    let Some(from) = message.from.as_ref() else { return };
    let here = message.message_ref();
    let coordinator = &state.coordinator;
    debug!(chat=%here.chat, user=%from.id, ?command, "bot: command");

    let replied = message.reply_to_message.as_deref();
    let replied_job = match replied {
        Some(r) => coordinator.registry().get_by_origin_message(r.chat.id, r.message_id).await,
        None => None,
    };
    let all_admins = message.chat.all_members_are_administrators;
    let auth = state
        .access
        .classify(from.id, here.chat, all_admins, replied_job.as_ref().map(|j| j.origin.user));

    match command {
        Command::CancelMirror => {
            let (Some(_), Some(job)) = (replied, replied_job) else {
                let text = if replied.is_some() { CANCEL_UNKNOWN } else { CANCEL_NO_REPLY };
                coordinator.reply_ephemeral(here, text).await;
                return;
            };
            let allowed = match cancel_gate(auth) {
                Gate::Allow => true,
                Gate::AdminLookup => is_admin(&state, here, from).await,
                Gate::Deny(text) => {
                    coordinator.reply_ephemeral(here, text).await;
                    return;
                }
            };
            if !allowed {
                coordinator.reply_ephemeral(here, NO_PERMISSION).await;
                return;
            }
            info!(gid=%job.gid, user=%from.id, "bot: cancel requested");
            coordinator.cancel_single(&job.gid, Some(here)).await;
        }
        Command::CancelAll => {
            // Replying to an own download does not widen the bulk scope.
            let auth = state.access.classify(from.id, here.chat, all_admins, None);
            let admin = auth.needs_admin_check() && is_admin(&state, here, from).await;
            match cancel_all_role(auth, admin) {
                Ok(role) => {
                    let cancelled = coordinator.cancel_all(role, here).await;
                    info!(chat=%here.chat, ?role, cancelled, "bot: cancel all");
                    if cancelled == 0 {
                        coordinator.reply_ephemeral(here, NO_ACTIVE_DOWNLOADS).await;
                    }
                }
                Err(text) => coordinator.reply_ephemeral(here, text).await,
            }
        }
        _ if !auth.is_authorized() => coordinator.reply_ephemeral(here, UNAUTHORIZED).await,
        Command::Start => coordinator.reply_ephemeral(here, START_TEXT).await,
        Command::Mirror { url, archive } => {
            let origin = Origin {
                chat: here.chat,
                message: here.message,
                user: from.id,
                username: from.mention(),
                replied_user: replied.and_then(|r| r.from.as_ref()).map(User::mention),
            };
            match coordinator.submit_download(origin, &url, archive).await {
                Ok(gid) => {
                    info!(gid=%gid, chat=%here.chat, archive, "bot: mirror started");
                    coordinator.send_status_message(here).await;
                }
                // Already reported to the origin by cleanup.
                Err(CoordinatorError::Daemon(_)) => {}
                Err(e) => coordinator.reply_ephemeral(here, &e.to_string()).await,
            }
        }
        Command::MirrorStatus => coordinator.send_status_message(here).await,
        Command::GetFolder => {
            let link = file_link(&state.config.gdrive_parent_dir_id, true);
            coordinator
                .reply_for(here, &format!("<a href='{link}'>Drive mirror folder</a>"), LINK_REPLY_TTL)
                .await;
        }
        Command::List { query } => {
            let text = match state.drive.list_files(&query, &state.config.gdrive_parent_dir_id).await {
                Ok(files) => files_list_message(&files),
                Err(e) => {
                    warn!(query=%query, "bot: drive list failed: {e}");
                    "Failed to fetch the list of files".to_string()
                }
            };
            coordinator.reply_for(here, &text, LINK_REPLY_TTL).await;
        }
    }
}

async fn is_admin(state: &SharedState, here: MessageRef, from: &User) -> bool {
    match state.telegram.is_chat_admin(here.chat, from.id).await {
        Ok(admin) => admin,
        Err(e) => {
            warn!(chat=%here.chat, user=%from.id, "bot: admin lookup failed: {e}");
            false
        }
    }
}
