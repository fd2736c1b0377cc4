//! Relay control flow: inbound event → store (pending) → outbound delivery →
//! store (delivered/failed).

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    domain::{ChatId, MessageStatus, NewMessage, RelayMessage},
    formatting::sms_notification_html,
    messaging::port::MessagingPort,
    ports::SmsGateway,
    store::RelayStore,
    Result,
};

/// Origin recorded for chat sends that did not say who they are from.
pub const API_ORIGIN: &str = "API";
/// Origin recorded for outbound SMS when no sender number is configured.
pub const SMS_ORIGIN: &str = "SMS";

#[derive(Clone, Debug)]
pub enum RelayOutcome {
    /// No subscriber has registered the sending number; nothing was recorded.
    NoSubscriber,
    /// The subscriber paused forwarding; nothing was recorded.
    Paused,
    Delivered(RelayMessage),
    Failed { message: RelayMessage, reason: String },
}

impl RelayOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    pub fn message(&self) -> Option<&RelayMessage> {
        match self {
            Self::Delivered(m) | Self::Failed { message: m, .. } => Some(m),
            Self::NoSubscriber | Self::Paused => None,
        }
    }
}

#[derive(Clone)]
pub struct RelayService {
    store: Arc<RelayStore>,
    messenger: Arc<dyn MessagingPort>,
    sms: Arc<dyn SmsGateway>,
}

impl RelayService {
    pub fn new(
        store: Arc<RelayStore>,
        messenger: Arc<dyn MessagingPort>,
        sms: Arc<dyn SmsGateway>,
    ) -> Self {
        Self {
            store,
            messenger,
            sms,
        }
    }

    pub fn store(&self) -> &Arc<RelayStore> {
        &self.store
    }

    pub fn sms(&self) -> &Arc<dyn SmsGateway> {
        &self.sms
    }

    /// Forward an SMS received by the telephony provider to its subscriber's chat.
    pub async fn relay_inbound_sms(&self, from: &str, body: &str) -> Result<RelayOutcome> {
        let Some(subscriber) = self.store.find_subscriber_by_phone(from).await else {
            info!(from, "no subscriber registered for sender");
            return Ok(RelayOutcome::NoSubscriber);
        };
        if !subscriber.is_active {
            info!(from, subscriber = %subscriber.id, "subscriber paused; not forwarding");
            return Ok(RelayOutcome::Paused);
        }

        let message = self
            .store
            .create_message(NewMessage {
                origin_phone: from.to_string(),
                destination_id: subscriber.external_id.clone(),
                body: body.to_string(),
            })
            .await?;

        let outcome = match subscriber.chat_id() {
            Some(chat_id) => self.deliver_to_chat(message, chat_id, from).await?,
            None => {
                let reason = format!(
                    "external id {} is not a chat id",
                    subscriber.external_id
                );
                self.finish(message, Err(reason)).await?
            }
        };
        info!(from, delivered = outcome.is_delivered(), "inbound SMS relayed");
        Ok(outcome)
    }

    /// Send text straight into a chat (dashboard/API integrations).
    pub async fn relay_to_chat(
        &self,
        chat_id: ChatId,
        body: &str,
        from: Option<&str>,
    ) -> Result<RelayOutcome> {
        let origin = from
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(API_ORIGIN);

        let message = self
            .store
            .create_message(NewMessage {
                origin_phone: origin.to_string(),
                destination_id: chat_id.0.to_string(),
                body: body.to_string(),
            })
            .await?;

        let display_from = from
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("External Service");
        self.deliver_to_chat(message, chat_id, display_from).await
    }

    /// Send an SMS through the telephony provider.
    pub async fn send_sms(&self, to: &str, body: &str) -> Result<RelayOutcome> {
        let origin = self.sms.sender_number().unwrap_or(SMS_ORIGIN).to_string();
        let message = self
            .store
            .create_message(NewMessage {
                origin_phone: origin,
                destination_id: to.to_string(),
                body: body.to_string(),
            })
            .await?;

        let sent = if self.sms.is_configured() {
            self.sms.send_sms(to, body).await.map_err(|e| e.to_string())
        } else {
            Err(format!("{} is not configured", self.sms.provider()))
        };
        self.finish(message, sent).await
    }

    async fn deliver_to_chat(
        &self,
        message: RelayMessage,
        chat_id: ChatId,
        display_from: &str,
    ) -> Result<RelayOutcome> {
        let html = sms_notification_html(display_from, &message.body, message.created_at);
        let sent = self
            .messenger
            .send_html(chat_id, &html)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string());
        self.finish(message, sent).await
    }

    async fn finish(
        &self,
        message: RelayMessage,
        sent: std::result::Result<(), String>,
    ) -> Result<RelayOutcome> {
        let status = if sent.is_ok() {
            MessageStatus::Delivered
        } else {
            MessageStatus::Failed
        };
        let updated = self
            .store
            .update_message_status(&message.id, status)
            .await?
            .unwrap_or(message);

        Ok(match sent {
            Ok(()) => RelayOutcome::Delivered(updated),
            Err(reason) => {
                warn!(message = %updated.id, %reason, "delivery failed");
                RelayOutcome::Failed {
                    message: updated,
                    reason,
                }
            }
        })
    }
}
