use async_trait::async_trait;

use crate::domain::{ChatId, MessageId, UserId};

/// Closed error set reported by a platform gateway.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("admin rights required")]
    AdminRequired,

    #[error("not a participant of the chat")]
    NotParticipant,

    #[error("invite link already expired")]
    AlreadyExpired,

    #[error("message is not modified")]
    NotModified,

    #[error("invalid message id")]
    InvalidMessageId,

    #[error("invalid channel")]
    InvalidChannel,

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Errors that will not go away by retrying: the message or channel is gone,
    /// or the bot lost its rights there.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            GatewayError::AdminRequired
                | GatewayError::NotParticipant
                | GatewayError::InvalidMessageId
                | GatewayError::InvalidChannel
        )
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// How a chat is referenced by a human: numeric id or public `@username`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatRef {
    Id(ChatId),
    Username(String),
}

impl std::fmt::Display for ChatRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRef::Id(id) => write!(f, "{}", id.0),
            ChatRef::Username(name) => write!(f, "@{name}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Channel,
    Group,
    Private,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: ChatId,
    pub title: Option<String>,
    pub kind: ChatKind,
}

impl ChatInfo {
    /// Title for operator-facing text, falling back to the numeric id.
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(t) if !t.trim().is_empty() => t.clone(),
            _ => format!("Channel {}", self.id.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberRole {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberRole {
    pub fn is_elevated(self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Administrator)
    }

    pub fn is_present(self) -> bool {
        !matches!(self, MemberRole::Left | MemberRole::Banned)
    }
}

/// Membership of one user in one chat, with the capabilities we care about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemberInfo {
    pub role: MemberRole,
    pub can_edit_messages: bool,
    pub can_invite_users: bool,
}

impl MemberInfo {
    pub fn owner() -> Self {
        Self {
            role: MemberRole::Owner,
            can_edit_messages: true,
            can_invite_users: true,
        }
    }
}

/// The bot's own account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceAccount {
    pub id: UserId,
    pub username: String,
}

/// Capability boundary around the messaging platform.
///
/// Every call is one round-trip and may fail transiently or permanently; callers
/// decide which outcomes are acceptable.
#[async_trait]
pub trait PlatformGateway: Send + Sync {
    fn service_account(&self) -> &ServiceAccount;

    /// New invite link for `channel`: direct join, unlimited uses.
    async fn create_invite_link(&self, channel: ChatId) -> GatewayResult<String>;

    async fn revoke_invite_link(&self, channel: ChatId, link: &str) -> GatewayResult<()>;

    async fn edit_message_text(
        &self,
        channel: ChatId,
        message: MessageId,
        html: &str,
    ) -> GatewayResult<()>;

    async fn get_chat_member(&self, chat: ChatId, user: UserId) -> GatewayResult<MemberInfo>;

    async fn get_chat(&self, chat: &ChatRef) -> GatewayResult<ChatInfo>;

    async fn message_exists(&self, chat: ChatId, message: MessageId) -> GatewayResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_are_the_permanent_ones() {
        assert!(GatewayError::InvalidMessageId.is_structural());
        assert!(GatewayError::AdminRequired.is_structural());
        assert!(!GatewayError::NotModified.is_structural());
        assert!(!GatewayError::Other("timeout".to_string()).is_structural());
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let mut info = ChatInfo {
            id: ChatId(-1001),
            title: Some("  ".to_string()),
            kind: ChatKind::Channel,
        };
        assert_eq!(info.display_name(), "Channel -1001");
        info.title = Some("News".to_string());
        assert_eq!(info.display_name(), "News");
    }
}
