use std::sync::Arc;

use async_trait::async_trait;
use teloxide::{
    dispatching::Dispatcher,
    dptree,
    prelude::*,
    types::{Update, UpdateKind},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ossms_core::{
    config::Config,
    errors::Error,
    messaging::port::MessagingPort,
    ports::BotWebhook,
    registration::{PendingRegistrations, Registrar},
    store::RelayStore,
    Result,
};

use crate::handlers;

/// Shared state for every bot handler.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<RelayStore>,
    pub registrar: Registrar,
    pub messenger: Arc<dyn MessagingPort>,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<RelayStore>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        let pending = Arc::new(PendingRegistrations::new(cfg.registration_timeout));
        Self {
            registrar: Registrar::new(store.clone(), pending),
            cfg,
            store,
            messenger,
        }
    }
}

/// Long-poll Telegram until `shutdown` is cancelled.
pub async fn run_polling(
    bot: Bot,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(me) = bot.get_me().await {
        info!("bot started (polling): @{}", me.username());
    }

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        match token.shutdown() {
            Ok(done) => done.await,
            Err(e) => debug!("dispatcher not running: {e}"),
        }
    });

    dispatcher.dispatch().await;
    info!("polling stopped");
    Ok(())
}

/// Webhook entry point: raw update JSON in, same handlers as polling.
pub struct TelegramWebhook {
    bot: Bot,
    state: Arc<AppState>,
    secret: Option<String>,
}

impl TelegramWebhook {
    pub fn new(bot: Bot, state: Arc<AppState>) -> Self {
        let secret = state.cfg.telegram_webhook_secret.clone();
        Self { bot, state, secret }
    }
}

#[async_trait]
impl BotWebhook for TelegramWebhook {
    async fn process_update(&self, update: serde_json::Value) -> Result<()> {
        let update: Update = serde_json::from_value(update)?;
        let outcome = match update.kind {
            UpdateKind::Message(msg) => handlers::handle_message(msg, self.state.clone()).await,
            UpdateKind::CallbackQuery(q) => {
                handlers::handle_callback(q, self.state.clone()).await
            }
            other => {
                debug!(update = update.id, "ignoring update kind: {other:?}");
                Ok(())
            }
        };
        outcome.map_err(|e| Error::External(format!("telegram handler error: {e}")))
    }

    async fn set_webhook(&self, url: &str) -> Result<()> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::invalid(format!("bad webhook url '{url}': {e}")))?;

        let mut req = self.bot.set_webhook(parsed);
        if let Some(secret) = &self.secret {
            req = req.secret_token(secret.clone());
        }
        req.await
            .map_err(|e| Error::External(format!("telegram setWebhook failed: {e}")))?;
        info!(url, "telegram webhook set");
        Ok(())
    }

    fn webhook_secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }
}

/// Drop any webhook so long polling receives updates.
pub async fn clear_webhook(bot: &Bot) {
    if let Err(e) = bot.delete_webhook().await {
        warn!("failed to delete telegram webhook: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{state, Sent};
    use ossms_core::domain::{ChatId, ChatMessageId, MessageRef};
    use serde_json::{json, Value};

    fn webhook() -> (TelegramWebhook, Arc<crate::handlers::testing::RecordingMessenger>) {
        let (state, messenger) = state();
        (TelegramWebhook::new(Bot::new("1:test"), Arc::new(state)), messenger)
    }

    fn private_message(message_id: i32, text: &str) -> Value {
        json!({
            "message_id": message_id,
            "date": 1_700_000_000,
            "chat": { "id": 4242, "type": "private", "first_name": "Alice", "username": "alice" },
            "from": { "id": 4242, "is_bot": false, "first_name": "Alice", "username": "alice" },
            "text": text,
        })
    }

    #[tokio::test]
    async fn message_update_reaches_command_handler() {
        let (hook, messenger) = webhook();
        let mut message = private_message(5, "/mychatid");
        message["entities"] = json!([{ "type": "bot_command", "offset": 0, "length": 9 }]);

        hook.process_update(json!({ "update_id": 1001, "message": message }))
            .await
            .unwrap();

        let sent = messenger.take();
        assert_eq!(sent.len(), 1);
        let Sent::Html(chat, text) = &sent[0] else {
            panic!("expected html reply, got {:?}", sent[0]);
        };
        assert_eq!(*chat, 4242);
        assert!(text.contains("<b>Chat ID:</b> <code>4242</code>"));
        assert!(text.contains("<b>User ID:</b> <code>4242</code>"));
    }

    #[tokio::test]
    async fn callback_update_is_answered() {
        let (hook, messenger) = webhook();
        hook.process_update(json!({
            "update_id": 1002,
            "callback_query": {
                "id": "cbq-1",
                "from": { "id": 4242, "is_bot": false, "first_name": "Alice" },
                "chat_instance": "ci-1",
                "data": "unregister:cancel",
                "message": private_message(9, "Unregister?"),
            },
        }))
        .await
        .unwrap();

        let origin = MessageRef {
            chat_id: ChatId(4242),
            message_id: ChatMessageId(9),
        };
        assert_eq!(
            messenger.take(),
            vec![
                Sent::Edit(origin, "❌ Unregistration cancelled.".to_string()),
                Sent::Answer("cbq-1".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn other_update_kinds_are_ignored() {
        let (hook, messenger) = webhook();
        hook.process_update(json!({
            "update_id": 1003,
            "edited_message": private_message(6, "/mychatid"),
        }))
        .await
        .unwrap();
        assert!(messenger.take().is_empty());
    }

    #[tokio::test]
    async fn malformed_update_is_an_error() {
        let (hook, messenger) = webhook();
        let err = hook
            .process_update(json!({ "message": "not an update" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Json(_)));
        assert!(messenger.take().is_empty());
    }

    #[test]
    fn secret_comes_from_config() {
        let (hook, _) = webhook();
        assert_eq!(hook.webhook_secret(), None);
    }
}
