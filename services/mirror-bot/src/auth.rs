use mirror_core::{ChatId, UserId};

/// How a command sender is allowed to act, strongest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    Sudo,
    /// Replying to a download they started.
    DownloadOwner,
    /// Authorized chat where everyone is an admin.
    AuthorizedChatAllAdmins,
    /// Authorized chat; admin rights need a lookup.
    AuthorizedChat,
    Unauthorized,
}

impl Authorization {
    pub fn is_authorized(self) -> bool {
        self != Authorization::Unauthorized
    }

    /// Whether cancelling needs a chat-admin lookup first.
    pub fn needs_admin_check(self) -> bool {
        self == Authorization::AuthorizedChat
    }
}

#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    pub sudo_users: Vec<UserId>,
    pub authorized_chats: Vec<ChatId>,
}

impl AccessPolicy {
    /// `replied_owner` is the starter of the download the message replies to.
    pub fn classify(
        &self,
        user: UserId,
        chat: ChatId,
        all_members_are_administrators: bool,
        replied_owner: Option<UserId>,
    ) -> Authorization {
        if self.sudo_users.contains(&user) {
            return Authorization::Sudo;
        }
        if replied_owner == Some(user) {
            return Authorization::DownloadOwner;
        }
        if self.authorized_chats.contains(&chat) {
            if all_members_are_administrators {
                return Authorization::AuthorizedChatAllAdmins;
            }
            return Authorization::AuthorizedChat;
        }
        Authorization::Unauthorized
    }
}
