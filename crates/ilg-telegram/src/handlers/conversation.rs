use std::sync::Arc;

use teloxide::prelude::*;
use tracing::info;

use ilg_core::{
    domain::{ChatId, UserId},
    formatting,
    onboarding::{ConversationInput, Reply},
};

use crate::router::AppState;

use super::{refresh_buttons, refresh_one, send_html};

fn input_from(msg: &Message) -> Option<ConversationInput> {
    if let Some(chat) = msg.forward_from_chat().filter(|c| c.is_channel()) {
        return Some(ConversationInput::ForwardedFromChannel(ChatId(chat.id.0)));
    }
    msg.text().map(|t| ConversationInput::Text(t.to_string()))
}

/// Feed one non-command message into the caller's onboarding session.
pub async fn handle_input(
    bot: Bot,
    msg: Message,
    state: Arc<AppState>,
    user: UserId,
) -> ResponseResult<()> {
    let Some(input) = input_from(&msg) else {
        return Ok(());
    };

    let reply = state.onboarding.handle(user, input).await;
    let Some(text) = formatting::onboarding_reply(&reply) else {
        return Ok(());
    };

    send_html(&bot, msg.chat.id, &text, None).await;

    let Reply::Linked { pair, .. } = &reply else {
        return Ok(());
    };

    // First rotation right away so the anchor carries a link before the next tick.
    info!(pair = %pair.key(), "running first rotation");
    let result = refresh_one(&state, user, pair.public_channel_id).await;
    send_html(
        &bot,
        msg.chat.id,
        &result,
        Some(refresh_buttons(std::slice::from_ref(pair))),
    )
    .await;

    Ok(())
}
