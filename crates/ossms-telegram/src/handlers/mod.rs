//! Telegram update handlers.
//!
//! The teloxide entry points only unpack updates into a [`ChatContext`]; the
//! work happens in platform-free functions that talk to the store and the
//! `MessagingPort`, so polling and webhook delivery share one code path.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message, User},
};
use tracing::warn;

use ossms_core::{
    domain::{ChatId, ChatMessageId, MessageRef},
    messaging::types::InlineKeyboard,
    registration::Registrant,
};

use crate::router::AppState;

mod callback;
mod commands;
mod text;

#[cfg(test)]
pub(crate) mod testing;

/// Who sent an update, and where to answer.
#[derive(Clone, Debug)]
pub struct ChatContext {
    pub chat_id: ChatId,
    pub user: Registrant,
}

impl ChatContext {
    fn from_user(chat_id: i64, user: &User) -> Self {
        let display_name = match &user.last_name {
            Some(last) => format!("{} {}", user.first_name, last),
            None => user.first_name.clone(),
        };
        let display_name = display_name.trim().to_string();
        Self {
            chat_id: ChatId(chat_id),
            user: Registrant {
                external_id: user.id.0.to_string(),
                username: user.username.clone(),
                display_name: (!display_name.is_empty()).then_some(display_name),
            },
        }
    }
}

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let data = q.data.clone().unwrap_or_default();
    let origin = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: ChatMessageId(m.id.0),
    });

    let Some(origin) = origin.filter(|_| !data.is_empty()) else {
        // Always answer the callback so the client stops spinning.
        if let Err(e) = state.messenger.answer_callback_query(&q.id, None).await {
            warn!("answer_callback_query failed: {e}");
        }
        return Ok(());
    };

    let ctx = ChatContext::from_user(origin.chat_id.0, &q.from);
    callback::handle_callback(&state, &ctx, &q.id, origin, &data).await;
    Ok(())
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let ctx = ChatContext::from_user(msg.chat.id.0, user);

    if text.trim_start().starts_with('/') {
        commands::handle_command(&state, &ctx, text).await;
    } else {
        text::handle_text(&state, &ctx, text).await;
    }
    Ok(())
}

/// Send and log on failure; handlers never abort on a chat send error.
pub(crate) async fn reply(state: &AppState, chat_id: ChatId, html: &str) {
    if let Err(e) = state.messenger.send_html(chat_id, html).await {
        warn!(chat_id = chat_id.0, "send failed: {e}");
    }
}

pub(crate) async fn reply_with_keyboard(
    state: &AppState,
    chat_id: ChatId,
    html: &str,
    keyboard: InlineKeyboard,
) {
    if let Err(e) = state
        .messenger
        .send_inline_keyboard(chat_id, html, keyboard)
        .await
    {
        warn!(chat_id = chat_id.0, "send failed: {e}");
    }
}
