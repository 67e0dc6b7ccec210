use std::sync::Arc;

use teloxide::prelude::*;
use tracing::debug;

use ilg_core::{commands::CallbackAction, domain::UserId, formatting};

use crate::router::AppState;

use super::{refresh_all, refresh_one, send_html};

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let user_id = q.from.id.0 as i64;
    // Private chat ids equal user ids; fall back to that when the message is gone.
    let chat = q
        .message
        .as_ref()
        .map(|m| m.chat.id)
        .unwrap_or(teloxide::types::ChatId(user_id));

    if !state.cfg.is_user_allowed(user_id) {
        let _ = bot
            .answer_callback_query(cb_id)
            .text("Unauthorized".to_string())
            .await;
        return Ok(());
    }

    let Some(action) = q.data.as_deref().and_then(CallbackAction::decode) else {
        let _ = bot
            .answer_callback_query(cb_id)
            .text("Unknown action".to_string())
            .await;
        return Ok(());
    };
    debug!(user = user_id, action = ?action, "callback received");

    let user = UserId(user_id);
    match action {
        CallbackAction::Help => {
            let _ = bot.answer_callback_query(cb_id).await;
            send_html(&bot, chat, &formatting::help(state.rotation_hours()), None).await;
        }
        CallbackAction::Add => {
            let _ = bot.answer_callback_query(cb_id).await;
            state.onboarding.begin_link(user).await;
            send_html(&bot, chat, &formatting::ask_public_channel(), None).await;
        }
        CallbackAction::RefreshAll => {
            let _ = bot
                .answer_callback_query(cb_id)
                .text("Updating invite links...".to_string())
                .await;
            let text = refresh_all(&state, user).await;
            send_html(&bot, chat, &text, None).await;
        }
        CallbackAction::Refresh(public) => {
            let _ = bot
                .answer_callback_query(cb_id)
                .text("Updating invite link...".to_string())
                .await;
            let text = refresh_one(&state, user, public).await;
            send_html(&bot, chat, &text, None).await;
        }
    }

    Ok(())
}
