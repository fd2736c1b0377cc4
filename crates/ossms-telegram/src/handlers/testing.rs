//! Recording messenger for handler tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ossms_core::{
    config::Config,
    domain::{ChatId, ChatMessageId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    registration::Registrant,
    store::RelayStore,
    Result,
};

use super::ChatContext;
use crate::router::AppState;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Sent {
    Html(i64, String),
    Keyboard(i64, String, InlineKeyboard),
    Edit(MessageRef, String),
    EditKeyboard(MessageRef, String, InlineKeyboard),
    Answer(String, Option<String>),
}

#[derive(Default)]
pub(crate) struct RecordingMessenger {
    pub(crate) sent: Mutex<Vec<Sent>>,
}

impl RecordingMessenger {
    pub(crate) fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Text of the most recent send/edit.
    pub(crate) fn last_text(&self) -> String {
        match self.sent.lock().unwrap().last() {
            Some(Sent::Html(_, t))
            | Some(Sent::Keyboard(_, t, _))
            | Some(Sent::Edit(_, t))
            | Some(Sent::EditKeyboard(_, t, _)) => t.clone(),
            other => panic!("no text sent, last was {other:?}"),
        }
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Html(chat_id.0, html.to_string()));
        Ok(MessageRef {
            chat_id,
            message_id: ChatMessageId(1),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Edit(msg, html.to_string()));
        Ok(())
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::EditKeyboard(msg, html.to_string(), keyboard));
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Keyboard(chat_id.0, html.to_string(), keyboard));
        Ok(MessageRef {
            chat_id,
            message_id: ChatMessageId(2),
        })
    }

    async fn answer_callback_query(&self, id: &str, text: Option<&str>) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Answer(id.to_string(), text.map(str::to_string)));
        Ok(())
    }
}

pub(crate) fn state() -> (AppState, Arc<RecordingMessenger>) {
    let cfg = Config::from_lookup(|k| (k == "TELEGRAM_BOT_TOKEN").then(|| "1:test".to_string()))
        .unwrap();
    let messenger = Arc::new(RecordingMessenger::default());
    let state = AppState::new(
        Arc::new(cfg),
        Arc::new(RelayStore::new()),
        messenger.clone(),
    );
    (state, messenger)
}

pub(crate) fn ctx(user_id: i64) -> ChatContext {
    ChatContext {
        chat_id: ChatId(user_id),
        user: Registrant {
            external_id: user_id.to_string(),
            username: Some("alice".to_string()),
            display_name: Some("Alice A".to_string()),
        },
    }
}
