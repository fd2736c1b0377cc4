//! Fake ports for router tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use ossms_core::{
    domain::{ChatId, ChatMessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    ports::{BotWebhook, SmsBalance, SmsGateway},
    relay::RelayService,
    store::RelayStore,
    Result,
};

use crate::server::HttpState;

#[derive(Default)]
pub(crate) struct FakeMessenger {
    pub(crate) fail: bool,
    pub(crate) sent: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        if self.fail {
            return Err(Error::External("telegram error: bot was blocked".to_string()));
        }
        self.sent.lock().unwrap().push((chat_id.0, html.to_string()));
        Ok(MessageRef {
            chat_id,
            message_id: ChatMessageId(1),
        })
    }

    async fn edit_html(&self, _msg: MessageRef, _html: &str) -> Result<()> {
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        _keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.send_html(chat_id, html).await
    }

    async fn answer_callback_query(&self, _id: &str, _text: Option<&str>) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeSms {
    pub(crate) configured: bool,
    pub(crate) sent: Mutex<Vec<(String, String)>>,
    pub(crate) webhooks: Mutex<Vec<String>>,
}

#[async_trait]
impl SmsGateway for FakeSms {
    fn provider(&self) -> &'static str {
        "Twilio"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn sender_number(&self) -> Option<&str> {
        self.configured.then_some("+15550001111")
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }

    async fn balance(&self) -> Result<SmsBalance> {
        Ok(if self.configured {
            SmsBalance {
                balance: "9.50".to_string(),
                currency: "USD".to_string(),
            }
        } else {
            SmsBalance::default()
        })
    }

    async fn configure_inbound_webhook(&self, url: &str) -> Result<usize> {
        self.webhooks.lock().unwrap().push(url.to_string());
        Ok(1)
    }
}

#[derive(Default)]
pub(crate) struct FakeBot {
    pub(crate) secret: Option<String>,
    pub(crate) updates: Mutex<Vec<Value>>,
    pub(crate) webhooks: Mutex<Vec<String>>,
}

#[async_trait]
impl BotWebhook for FakeBot {
    async fn process_update(&self, update: Value) -> Result<()> {
        if update.get("update_id").is_none() {
            return Err(Error::invalid("missing update_id"));
        }
        self.updates.lock().unwrap().push(update);
        Ok(())
    }

    async fn set_webhook(&self, url: &str) -> Result<()> {
        self.webhooks.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn webhook_secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }
}

pub(crate) struct Harness {
    pub(crate) state: HttpState,
    pub(crate) messenger: Arc<FakeMessenger>,
    pub(crate) sms: Arc<FakeSms>,
    pub(crate) bot: Arc<FakeBot>,
}

pub(crate) fn harness_with(messenger: FakeMessenger, sms: FakeSms, bot: FakeBot) -> Harness {
    let messenger = Arc::new(messenger);
    let sms = Arc::new(sms);
    let bot = Arc::new(bot);
    let relay = RelayService::new(Arc::new(RelayStore::new()), messenger.clone(), sms.clone());
    Harness {
        state: HttpState {
            relay,
            bot: bot.clone(),
            public_url: None,
            sms_signing_key: None,
        },
        messenger,
        sms,
        bot,
    }
}

pub(crate) fn harness() -> Harness {
    harness_with(
        FakeMessenger::default(),
        FakeSms::default(),
        FakeBot::default(),
    )
}
