use tracing::debug;

use crate::{
    domain::{ChatId, UserId},
    gateway::{GatewayError, MemberInfo, PlatformGateway},
};

/// What the bot must be able to do in a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelRole {
    /// Hosts the anchor message: needs message editing.
    Public,
    /// Its invite link rotates: needs invite management.
    Private,
}

impl ChannelRole {
    pub fn required_right(self) -> &'static str {
        match self {
            ChannelRole::Public => "Edit Messages",
            ChannelRole::Private => "Invite Users",
        }
    }

    fn bot_has_capability(self, member: &MemberInfo) -> bool {
        match self {
            ChannelRole::Public => member.can_edit_messages,
            ChannelRole::Private => member.can_invite_users,
        }
    }
}

/// Whose membership failed the check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subject {
    Operator,
    Bot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IneligibleReason {
    NotMember,
    InsufficientPermission,
    LookupFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ineligible {
    pub subject: Subject,
    pub reason: IneligibleReason,
}

/// Check that `user` administers `channel` and that the bot holds the right
/// needed for `role` there.
pub async fn check(
    gateway: &dyn PlatformGateway,
    channel: ChatId,
    user: UserId,
    role: ChannelRole,
) -> Result<(), Ineligible> {
    let operator = member(gateway, channel, user, Subject::Operator).await?;
    if !operator.role.is_elevated() {
        return Err(Ineligible {
            subject: Subject::Operator,
            reason: IneligibleReason::InsufficientPermission,
        });
    }

    let bot_id = gateway.service_account().id;
    let bot = member(gateway, channel, bot_id, Subject::Bot).await?;
    if !bot.role.is_elevated() || !role.bot_has_capability(&bot) {
        return Err(Ineligible {
            subject: Subject::Bot,
            reason: IneligibleReason::InsufficientPermission,
        });
    }

    Ok(())
}

async fn member(
    gateway: &dyn PlatformGateway,
    channel: ChatId,
    user: UserId,
    subject: Subject,
) -> Result<MemberInfo, Ineligible> {
    match gateway.get_chat_member(channel, user).await {
        Ok(m) if m.role.is_present() => Ok(m),
        Ok(_) | Err(GatewayError::NotParticipant) => Err(Ineligible {
            subject,
            reason: IneligibleReason::NotMember,
        }),
        Err(e) => {
            debug!(channel = channel.0, user = user.0, error = %e, "member lookup failed");
            Err(Ineligible {
                subject,
                reason: IneligibleReason::LookupFailed,
            })
        }
    }
}
