//! Operator-facing reply text (Telegram HTML parse mode).

use chrono::{DateTime, Utc};

use crate::{
    commands::CommandError,
    eligibility::{ChannelRole, Ineligible, IneligibleReason, Subject},
    onboarding::Reply,
    pair::LinkedPair,
    gateway::GatewayError,
    rotation::{RefreshSummary, RevokeOutcome, Rotation, RotationError},
    template::TIMESTAMP_FORMAT,
};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn utc(at: DateTime<Utc>) -> String {
    format!("{} UTC", at.format(TIMESTAMP_FORMAT))
}

/// Display names of a pair's two channels, resolved by the adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairLabel {
    pub public: String,
    pub private: String,
}

impl PairLabel {
    /// Fallback when title lookups fail.
    pub fn from_ids(pair: &LinkedPair) -> Self {
        Self {
            public: format!("Channel {}", pair.public_channel_id.0),
            private: format!("Channel {}", pair.private_channel_id.0),
        }
    }
}

pub fn welcome(first_name: &str, rotation_hours: u64) -> String {
    format!(
        "👋 Hello, {}!\n\n\
         I keep your private channel safe by rotating its invite link every \
         {rotation_hours} hours and updating a post in your public channel with the fresh link.\n\n\
         Use /add to link a public and a private channel.",
        escape_html(first_name)
    )
}

pub fn help(rotation_hours: u64) -> String {
    format!(
        "<b>How it works</b>\n\n\
         1. Add me as admin to your public channel with <i>Edit Messages</i>.\n\
         2. Add me as admin to your private channel with <i>Invite Users</i>.\n\
         3. Send /add and follow the steps.\n\n\
         Every {rotation_hours} hours I create a new invite link, put it into the chosen \
         post and revoke the old one.\n\n\
         <b>Commands</b>\n\
         /add - link channels\n\
         /remove - unlink channels\n\
         /status - show linked channels\n\
         /refresh [id] - rotate links now\n\
         /cancel - abort the current step"
    )
}

pub fn not_allowed() -> String {
    "⛔ You are not allowed to use this bot.".to_string()
}

pub fn no_pairs() -> String {
    "❌ You don't have any linked channels yet. Use /add to link channels.".to_string()
}

pub fn store_unavailable() -> String {
    "❌ Could not load your linked channels. Please try again later.".to_string()
}

pub fn cancelled(had_session: bool) -> String {
    if had_session {
        "❌ Operation cancelled.".to_string()
    } else {
        "Nothing to cancel.".to_string()
    }
}

pub fn ask_public_channel() -> String {
    "1️⃣ Send me your <b>public</b> channel: forward a post from it, or send its \
     @username, t.me link or numeric id.\n\n\
     I need to be an admin there with <i>Edit Messages</i>.\n\n\
     Send /cancel to abort."
        .to_string()
}

pub fn command_error(err: &CommandError) -> String {
    match err {
        CommandError::Unknown(name) => {
            format!("Unknown command /{}. See /help.", escape_html(name))
        }
        CommandError::InvalidArgument { command, arg } => format!(
            "❌ /{command} expects a numeric channel id, got <code>{}</code>.",
            escape_html(arg)
        ),
    }
}

fn role_name(role: ChannelRole) -> &'static str {
    match role {
        ChannelRole::Public => "public",
        ChannelRole::Private => "private",
    }
}

pub fn ineligible(role: ChannelRole, why: Ineligible) -> String {
    let body = match (why.subject, why.reason) {
        (Subject::Operator, IneligibleReason::NotMember) => {
            "You are not a member of this channel.".to_string()
        }
        (Subject::Operator, IneligibleReason::InsufficientPermission) => {
            "You are not an admin in this channel.".to_string()
        }
        (Subject::Bot, IneligibleReason::NotMember) => {
            "I am not a member of this channel. Add me as an admin first.".to_string()
        }
        (Subject::Bot, IneligibleReason::InsufficientPermission) => format!(
            "I am not an admin in this channel or lack the <i>{}</i> permission.",
            role.required_right()
        ),
        (_, IneligibleReason::LookupFailed) => {
            "I couldn't check permissions in this channel. Please try again.".to_string()
        }
    };
    format!("❌ {body}\n\nSend another {} channel or /cancel.", role_name(role))
}

/// Text for an onboarding step result. `None` for [`Reply::Ignored`].
pub fn onboarding_reply(reply: &Reply) -> Option<String> {
    let text = match reply {
        Reply::Ignored => return None,
        Reply::ChannelNotRecognized { role } => format!(
            "❌ I couldn't identify a channel from your message.\n\n\
             Forward a post from your {} channel, or send its @username or id.",
            role_name(*role)
        ),
        Reply::ChannelLookupFailed { role } => format!(
            "❌ I couldn't look up that channel right now. Please send your {} channel again.",
            role_name(*role)
        ),
        Reply::SameChannel => {
            "❌ The private channel must be different from the public one.".to_string()
        }
        Reply::Ineligible { role, why } => ineligible(*role, *why),
        Reply::PublicAccepted { public } => format!(
            "✅ Public channel set: <b>{}</b>\n\n\
             2️⃣ Now send me your <b>private</b> channel. Its invite link is the one I will rotate.\n\n\
             I need to be an admin there with <i>Invite Users</i>.\n\n\
             Send /cancel to abort.",
            escape_html(&public.display_name())
        ),
        Reply::PrivateAccepted { private } => format!(
            "✅ Private channel set: <b>{}</b>\n\n\
             3️⃣ Finally, send the id of the post in your public channel that should carry \
             the invite link (a number like <code>123</code>, or the post's t.me link).\n\n\
             Send /cancel to abort.",
            escape_html(&private.display_name())
        ),
        Reply::InvalidMessageId => "❌ Please send a valid message id (a positive number).".to_string(),
        Reply::MessageNotFound => {
            "❌ I couldn't find that message in the public channel.".to_string()
        }
        Reply::LinkFailed => {
            "❌ There was an error linking your channels. Please try again later.".to_string()
        }
        Reply::Linked {
            pair,
            public,
            private,
        } => format!(
            "✅ <b>Channels successfully linked!</b>\n\n\
             📢 <b>Public Channel:</b> {}\n\
             🔒 <b>Private Channel:</b> {}\n\
             📝 <b>Message ID:</b> {}\n\n\
             The invite link will be rotated automatically.\n\
             Use /status to check your linked channels.",
            escape_html(&public.display_name()),
            escape_html(&private.display_name()),
            pair.anchor_message_id.0
        ),
        Reply::InvalidSelection { max } => {
            format!("❌ Please send a number between 1 and {max}.")
        }
        Reply::Removed { key } => format!(
            "✅ <b>Channels unlinked.</b>\n\n\
             The invite link of the pair for public channel <code>{}</code> will no longer be rotated.",
            key.public_channel.0
        ),
        Reply::RemoveFailed => {
            "❌ There was an error removing your linked channels. Please try again later."
                .to_string()
        }
    };
    Some(text)
}

pub fn remove_prompt(labels: &[PairLabel]) -> String {
    let mut out = String::from("Send the number of the pair to unlink:\n\n");
    for (i, label) in labels.iter().enumerate() {
        out.push_str(&format!(
            "<b>{}.</b> Public: {} | Private: {}\n",
            i + 1,
            escape_html(&label.public),
            escape_html(&label.private)
        ));
    }
    out.push_str("\nSend /cancel to abort.");
    out
}

pub fn status(entries: &[(LinkedPair, PairLabel)]) -> String {
    if entries.is_empty() {
        return no_pairs();
    }

    let mut out = String::from("<b>Your linked channels</b>\n");
    for (i, (pair, label)) in entries.iter().enumerate() {
        out.push_str(&format!(
            "\n<b>{}. Channel Pair</b>\n\
             📢 <b>Public:</b> {} (<code>{}</code>)\n\
             🔒 <b>Private:</b> {}\n\
             📝 <b>Message ID:</b> {}\n",
            i + 1,
            escape_html(&label.public),
            pair.public_channel_id.0,
            escape_html(&label.private),
            pair.anchor_message_id.0
        ));
        match pair.last_rotated_at {
            Some(at) => out.push_str(&format!("🕒 <b>Last Update:</b> {}\n", utc(at))),
            None => out.push_str("🕒 <b>Last Update:</b> never\n"),
        }
        out.push_str(&format!(
            "⏰ <b>Next Update:</b> {}\n",
            utc(pair.next_rotation_at)
        ));
        if pair.quarantined {
            out.push_str("⛔ <b>Paused</b> after repeated failures. Use /refresh to retry.\n");
        } else if pair.consecutive_failures > 0 {
            out.push_str(&format!(
                "⚠️ {} failed attempt(s)\n",
                pair.consecutive_failures
            ));
        }
        if let Some(reason) = pair.last_failure.as_deref().filter(|_| pair.consecutive_failures > 0) {
            out.push_str(&format!("<i>{}</i>\n", escape_html(reason)));
        }
    }
    out
}

pub fn rotation_result(result: &Result<Rotation, RotationError>) -> String {
    match result {
        Ok(rotation) => {
            let mut out = format!(
                "✅ Invite link updated at {}.",
                utc(rotation.rotated_at)
            );
            if let RevokeOutcome::Failed(_) = rotation.revoke {
                out.push_str("\n⚠️ The previous link could not be revoked.");
            }
            out
        }
        Err(RotationError::NotFound(_)) => "❌ That channel pair is not linked.".to_string(),
        Err(RotationError::NotDue(_)) => "✅ The invite link was just updated.".to_string(),
        Err(e) => format!(
            "❌ Failed to update the invite link.\n\n{}\n\n<i>{}</i>",
            rotation_failure_hint(e),
            escape_html(&e.to_string())
        ),
    }
}

/// What the operator can do about a failed rotation, by step and cause.
fn rotation_failure_hint(err: &RotationError) -> &'static str {
    match err {
        RotationError::CreateLink(GatewayError::AdminRequired | GatewayError::NotParticipant) => {
            "Make sure I am still an admin in the <b>private</b> channel with the \
             <i>Invite Users</i> right."
        }
        RotationError::EditMessage(GatewayError::AdminRequired | GatewayError::NotParticipant) => {
            "Make sure I am still an admin in the <b>public</b> channel with the \
             <i>Edit Messages</i> right."
        }
        RotationError::EditMessage(GatewayError::InvalidMessageId) => {
            "The post carrying the invite link no longer exists. \
             Send /add to link the pair again with a new post."
        }
        RotationError::CreateLink(GatewayError::InvalidChannel)
        | RotationError::EditMessage(GatewayError::InvalidChannel) => {
            "One of the channels is gone or I can no longer access it. \
             Check that I am still a member of both channels."
        }
        RotationError::Persist(_) => {
            "The new link is already posted but could not be saved. \
             It will be replaced on the next update."
        }
        _ => "This looks temporary. Please try again in a few minutes.",
    }
}

pub fn refresh_summary(summary: RefreshSummary) -> String {
    match (summary.succeeded, summary.failed) {
        (0, 0) => no_pairs(),
        (ok, 0) => format!("✅ Updated {ok} invite link(s)."),
        (ok, failed) => format!(
            "⚠️ Updated {ok} invite link(s), {failed} failed.\n\n\
             Please check that I am still an admin in both channels \
             (<i>Invite Users</i> in the private one, <i>Edit Messages</i> in the public one) \
             and that the post carrying the link still exists. See /status for details."
        ),
    }
}
