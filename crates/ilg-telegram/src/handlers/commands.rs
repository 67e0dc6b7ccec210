use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{debug, warn};

use ilg_core::{
    commands::Command,
    domain::UserId,
    formatting::{self, PairLabel},
    pair::LinkedPair,
};

use crate::router::AppState;

use super::{main_menu, pair_label, refresh_all, refresh_buttons, refresh_one, send_html};

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    state: Arc<AppState>,
    user: UserId,
) -> ResponseResult<()> {
    let chat = msg.chat.id;
    let text = msg.text().unwrap_or("");

    let cmd = match Command::parse(text) {
        Some(Ok(cmd)) => cmd,
        Some(Err(e)) => {
            send_html(&bot, chat, &formatting::command_error(&e), None).await;
            return Ok(());
        }
        None => return Ok(()),
    };
    debug!(user = user.0, command = ?cmd, "command received");

    match cmd {
        Command::Start => {
            let first_name = msg
                .from()
                .map(|u| u.first_name.clone())
                .unwrap_or_else(|| "there".to_string());
            send_html(
                &bot,
                chat,
                &formatting::welcome(&first_name, state.rotation_hours()),
                Some(main_menu()),
            )
            .await;
        }
        Command::Help => {
            send_html(&bot, chat, &formatting::help(state.rotation_hours()), None).await;
        }
        Command::Add => {
            state.onboarding.begin_link(user).await;
            send_html(&bot, chat, &formatting::ask_public_channel(), None).await;
        }
        Command::Remove => {
            let pairs = match state.onboarding.begin_remove(user).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(user = user.0, error = %e, "failed to list pairs for removal");
                    send_html(&bot, chat, &formatting::store_unavailable(), None).await;
                    return Ok(());
                }
            };
            if pairs.is_empty() {
                send_html(&bot, chat, &formatting::no_pairs(), None).await;
                return Ok(());
            }
            let labels = labels_for(&state, &pairs).await;
            send_html(&bot, chat, &formatting::remove_prompt(&labels), None).await;
        }
        Command::Status => {
            let pairs = match state.store.list_for_owner(user).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(user = user.0, error = %e, "failed to list pairs for status");
                    send_html(&bot, chat, &formatting::store_unavailable(), None).await;
                    return Ok(());
                }
            };
            let labels = labels_for(&state, &pairs).await;
            let keyboard = (!pairs.is_empty()).then(|| refresh_buttons(&pairs));
            let entries: Vec<(LinkedPair, PairLabel)> = pairs.into_iter().zip(labels).collect();
            send_html(&bot, chat, &formatting::status(&entries), keyboard).await;
        }
        Command::Refresh(None) => {
            let text = refresh_all(&state, user).await;
            send_html(&bot, chat, &text, None).await;
        }
        Command::Refresh(Some(public)) => {
            let text = refresh_one(&state, user, public).await;
            send_html(&bot, chat, &text, None).await;
        }
        Command::Cancel => {
            let had = state.onboarding.cancel(user).await;
            send_html(&bot, chat, &formatting::cancelled(had), None).await;
        }
    }

    Ok(())
}

async fn labels_for(state: &AppState, pairs: &[LinkedPair]) -> Vec<PairLabel> {
    let mut labels = Vec::with_capacity(pairs.len());
    for pair in pairs {
        labels.push(pair_label(state, pair).await);
    }
    labels
}
