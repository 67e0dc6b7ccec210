//! Telegram adapter (teloxide).
//!
//! This crate implements the `ilg-core` PlatformGateway over the Telegram Bot API
//! and hosts the update handlers for the operator chat.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{ChatMemberKind, ParseMode, Recipient},
    ApiError, RequestError,
};

use tokio::time::sleep;
use tracing::debug;

pub mod handlers;
pub mod router;

use ilg_core::{
    domain::{ChatId, MessageId, UserId},
    gateway::{
        ChatInfo, ChatKind, ChatRef, GatewayError, GatewayResult, MemberInfo, MemberRole,
        PlatformGateway, ServiceAccount,
    },
};

#[derive(Clone)]
pub struct TelegramGateway {
    bot: Bot,
    account: ServiceAccount,
}

impl TelegramGateway {
    /// Resolve the bot's own account via `getMe`.
    pub async fn connect(bot: Bot) -> std::result::Result<Self, RequestError> {
        let me = bot.get_me().await?;
        let account = ServiceAccount {
            id: UserId(me.user.id.0 as i64),
            username: me.username().to_string(),
        };
        Ok(Self { bot, account })
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: RequestError) -> GatewayError {
        match e {
            RequestError::Api(api) => classify(&api_description(&api)),
            other => GatewayError::Other(format!("telegram error: {other}")),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> GatewayResult<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        debug!(wait = ?d, "telegram flood control, retrying");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

fn api_description(e: &ApiError) -> String {
    match e {
        ApiError::Unknown(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map a Bot API error description onto the gateway's closed error set.
pub fn classify(description: &str) -> GatewayError {
    let d = description.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| d.contains(n));

    if has(&["message is not modified"]) {
        GatewayError::NotModified
    } else if has(&["invite_hash_expired", "invite link expired", "invite link is expired"]) {
        GatewayError::AlreadyExpired
    } else if has(&[
        "message to edit not found",
        "message_id_invalid",
        "message id invalid",
        "message not found",
        "message can't be edited",
    ]) {
        GatewayError::InvalidMessageId
    } else if has(&[
        "not enough rights",
        "chat_admin_required",
        "need administrator rights",
        "have no rights",
    ]) {
        GatewayError::AdminRequired
    } else if has(&[
        "user_not_participant",
        "user not participant",
        "bot is not a member",
        "not a member of",
        "user not found",
        "participant_id_invalid",
    ]) {
        GatewayError::NotParticipant
    } else if has(&[
        "chat not found",
        "channel_invalid",
        "channel_private",
        "peer_id_invalid",
        "chat_id_invalid",
        "username_not_occupied",
    ]) {
        GatewayError::InvalidChannel
    } else {
        GatewayError::Other(description.to_string())
    }
}

fn chat_kind(chat: &teloxide::types::Chat) -> ChatKind {
    if chat.is_channel() {
        ChatKind::Channel
    } else if chat.is_private() {
        ChatKind::Private
    } else {
        ChatKind::Group
    }
}

fn member_info(kind: &ChatMemberKind) -> MemberInfo {
    let plain = |role| MemberInfo {
        role,
        can_edit_messages: false,
        can_invite_users: false,
    };
    match kind {
        ChatMemberKind::Owner(_) => MemberInfo::owner(),
        ChatMemberKind::Administrator(a) => MemberInfo {
            role: MemberRole::Administrator,
            can_edit_messages: a.can_edit_messages,
            can_invite_users: a.can_invite_users,
        },
        ChatMemberKind::Member => plain(MemberRole::Member),
        ChatMemberKind::Restricted(_) => plain(MemberRole::Restricted),
        ChatMemberKind::Left => plain(MemberRole::Left),
        ChatMemberKind::Banned(_) => plain(MemberRole::Banned),
    }
}

#[async_trait]
impl PlatformGateway for TelegramGateway {
    fn service_account(&self) -> &ServiceAccount {
        &self.account
    }

    async fn create_invite_link(&self, channel: ChatId) -> GatewayResult<String> {
        let link = self
            .with_retry(|| {
                self.bot
                    .create_chat_invite_link(Self::tg_chat(channel))
                    .creates_join_request(false)
            })
            .await?;
        Ok(link.invite_link)
    }

    async fn revoke_invite_link(&self, channel: ChatId, link: &str) -> GatewayResult<()> {
        self.with_retry(|| {
            self.bot
                .revoke_chat_invite_link(Self::tg_chat(channel), link.to_string())
        })
        .await?;
        Ok(())
    }

    async fn edit_message_text(
        &self,
        channel: ChatId,
        message: MessageId,
        html: &str,
    ) -> GatewayResult<()> {
        self.with_retry(|| {
            self.bot
                .edit_message_text(
                    Self::tg_chat(channel),
                    Self::tg_msg_id(message),
                    html.to_string(),
                )
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn get_chat_member(&self, chat: ChatId, user: UserId) -> GatewayResult<MemberInfo> {
        let member = self
            .with_retry(|| {
                self.bot.get_chat_member(
                    Self::tg_chat(chat),
                    teloxide::types::UserId(user.0 as u64),
                )
            })
            .await?;
        Ok(member_info(&member.kind))
    }

    async fn get_chat(&self, chat: &ChatRef) -> GatewayResult<ChatInfo> {
        let recipient = match chat {
            ChatRef::Id(id) => Recipient::Id(Self::tg_chat(*id)),
            ChatRef::Username(name) => Recipient::ChannelUsername(format!("@{name}")),
        };
        let found = self
            .with_retry(|| self.bot.get_chat(recipient.clone()))
            .await?;
        Ok(ChatInfo {
            id: ChatId(found.id.0),
            title: found.title().map(str::to_string),
            kind: chat_kind(&found),
        })
    }

    /// The Bot API has no read-by-id for channel posts; probe with a no-op
    /// reply-markup edit instead.
    async fn message_exists(&self, chat: ChatId, message: MessageId) -> GatewayResult<bool> {
        let probe = self
            .with_retry(|| {
                self.bot
                    .edit_message_reply_markup(Self::tg_chat(chat), Self::tg_msg_id(message))
            })
            .await;
        match probe {
            Ok(_) | Err(GatewayError::NotModified) => Ok(true),
            Err(GatewayError::InvalidMessageId) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_bot_api_descriptions() {
        assert_eq!(
            classify("Bad Request: message is not modified: specified new message content and reply markup are exactly the same"),
            GatewayError::NotModified
        );
        assert_eq!(
            classify("Bad Request: message to edit not found"),
            GatewayError::InvalidMessageId
        );
        assert_eq!(
            classify("Bad Request: MESSAGE_ID_INVALID"),
            GatewayError::InvalidMessageId
        );
        assert_eq!(
            classify("Bad Request: not enough rights to manage chat invite link"),
            GatewayError::AdminRequired
        );
        assert_eq!(
            classify("Bad Request: CHAT_ADMIN_REQUIRED"),
            GatewayError::AdminRequired
        );
        assert_eq!(
            classify("Forbidden: bot is not a member of the channel chat"),
            GatewayError::NotParticipant
        );
        assert_eq!(
            classify("Bad Request: user not found"),
            GatewayError::NotParticipant
        );
        assert_eq!(
            classify("Bad Request: INVITE_HASH_EXPIRED"),
            GatewayError::AlreadyExpired
        );
        assert_eq!(classify("Bad Request: chat not found"), GatewayError::InvalidChannel);
        assert_eq!(
            classify("Internal Server Error"),
            GatewayError::Other("Internal Server Error".to_string())
        );
    }

    #[test]
    fn structural_classes_quarantine() {
        assert!(classify("Bad Request: chat not found").is_structural());
        assert!(!classify("Bad Request: message is not modified").is_structural());
        assert!(!classify("Bad Gateway").is_structural());
    }

    #[test]
    fn member_kinds_map_to_roles() {
        assert_eq!(member_info(&ChatMemberKind::Member).role, MemberRole::Member);
        assert_eq!(member_info(&ChatMemberKind::Left).role, MemberRole::Left);
        assert!(!member_info(&ChatMemberKind::Member).can_invite_users);
    }
}
