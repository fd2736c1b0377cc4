use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{InlineKeyboard, MessagingCapabilities},
    Result,
};

/// Chat delivery port.
///
/// The relay only ever needs to push HTML text into a chat and drive a couple
/// of inline-keyboard confirmations; the Telegram adapter implements it.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;
    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()>;

    /// Edit a message and replace its inline keyboard.
    ///
    /// Platforms without keyboards only get the text edit.
    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        _keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.edit_html(msg, html).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
