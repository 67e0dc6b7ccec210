//! Telegram update handlers for the operator chat.
//!
//! - allow-list check
//! - `/commands` and inline buttons decode into closed `ilg-core` types
//! - everything else feeds the onboarding conversation

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, ParseMode},
};
use tracing::warn;

use ilg_core::{
    commands::CallbackAction,
    domain::{ChatId, PairKey, UserId},
    formatting::{self, PairLabel},
    gateway::{ChatRef, PlatformGateway},
    pair::LinkedPair,
};

use crate::router::AppState;
mod callback;
mod commands;
mod conversation;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Operators talk to the bot in private; group chatter is not for us.
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(user_id) = msg.from().map(|u| u.id.0 as i64) else {
        return Ok(());
    };

    if !state.cfg.is_user_allowed(user_id) {
        send_html(&bot, msg.chat.id, &formatting::not_allowed(), None).await;
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state, UserId(user_id)).await;
        }
    }

    let _guard = state.user_locks.lock_user(user_id).await;
    conversation::handle_input(bot, msg, state, UserId(user_id)).await
}

/// Send an operator reply; failures are logged, never propagated.
pub(crate) async fn send_html(
    bot: &Bot,
    chat: teloxide::types::ChatId,
    html: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) {
    let mut req = bot
        .send_message(chat, html.to_string())
        .parse_mode(ParseMode::Html)
        .disable_web_page_preview(true);
    if let Some(k) = keyboard {
        req = req.reply_markup(k);
    }
    if let Err(e) = req.await {
        warn!(chat = chat.0, error = %e, "failed to send reply");
    }
}

fn button(label: &str, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label.to_string(), action.encode())
}

pub(crate) fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("➕ Add Channels", CallbackAction::Add)],
        vec![
            button("❓ Help", CallbackAction::Help),
            button("🔄 Refresh All", CallbackAction::RefreshAll),
        ],
    ])
}

pub(crate) fn refresh_buttons(pairs: &[LinkedPair]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = pairs
        .iter()
        .enumerate()
        .map(|(i, p)| {
            vec![button(
                &format!("🔄 Update #{}", i + 1),
                CallbackAction::Refresh(p.public_channel_id),
            )]
        })
        .collect();
    if pairs.len() > 1 {
        rows.push(vec![button("🔄 Refresh All", CallbackAction::RefreshAll)]);
    }
    InlineKeyboardMarkup::new(rows)
}

/// Channel titles for operator-facing lists, falling back to ids.
pub(crate) async fn pair_label(state: &AppState, pair: &LinkedPair) -> PairLabel {
    let fallback = PairLabel::from_ids(pair);
    let public = state.gateway.get_chat(&ChatRef::Id(pair.public_channel_id)).await;
    let private = state.gateway.get_chat(&ChatRef::Id(pair.private_channel_id)).await;
    PairLabel {
        public: public.map(|c| c.display_name()).unwrap_or(fallback.public),
        private: private.map(|c| c.display_name()).unwrap_or(fallback.private),
    }
}

pub(crate) async fn refresh_one(state: &AppState, owner: UserId, public: ChatId) -> String {
    let result = state.executor.rotate(PairKey::new(owner, public)).await;
    if let Err(e) = &result {
        if !e.is_skip() {
            warn!(owner = owner.0, channel = public.0, error = %e, "manual refresh failed");
        }
    }
    formatting::rotation_result(&result)
}

pub(crate) async fn refresh_all(state: &AppState, owner: UserId) -> String {
    match state.executor.rotate_all_for_owner(owner).await {
        Ok(summary) => formatting::refresh_summary(summary),
        Err(e) => {
            warn!(owner = owner.0, error = %e, "failed to list pairs for refresh");
            formatting::store_unavailable()
        }
    }
}
