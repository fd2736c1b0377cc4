use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatMessageId(pub i32);

/// A stable reference to a message sent into a chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: ChatMessageId,
}

/// Internal subscriber id (opaque, assigned by the store).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub String);

/// Internal relay message id (opaque, assigned by the store).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

macro_rules! opaque_id {
    ($t:ty) => {
        impl $t {
            pub(crate) fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(SubscriberId);
opaque_id!(MessageId);

/// A registered recipient of relayed SMS.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: SubscriberId,
    /// Platform user id (Telegram user id as a string). Unique across subscribers.
    pub external_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
}

impl Subscriber {
    /// Chat to deliver into. Private chats share the user's numeric id.
    pub fn chat_id(&self) -> Option<ChatId> {
        self.external_id.trim().parse::<i64>().ok().map(ChatId)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubscriber {
    pub external_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Partial update. `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubscriberPatch {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl SubscriberPatch {
    pub fn active(is_active: bool) -> Self {
        Self {
            is_active: Some(is_active),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, s: &mut Subscriber) {
        if let Some(v) = self.username {
            s.username = Some(v);
        }
        if let Some(v) = self.display_name {
            s.display_name = Some(v);
        }
        if let Some(v) = self.phone_number {
            s.phone_number = Some(v);
        }
        if let Some(v) = self.is_active {
            s.is_active = v;
        }
    }
}

/// Delivery status of a relayed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Failed,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// `pending -> {delivered, failed}`; rewriting the current status is a no-op.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        self == next || !self.is_terminal()
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(Error::invalid(format!(
                "unknown message status '{other}' (expected pending, delivered or failed)"
            ))),
        }
    }
}

/// One unit of SMS content bridged in either direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub id: MessageId,
    pub origin_phone: String,
    pub destination_id: String,
    pub body: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

/// Creation input. There is deliberately no status: new messages start `pending`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub origin_phone: String,
    pub destination_id: String,
    pub body: String,
}

/// Derived summary of store contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_subscribers: usize,
    pub messages_today: usize,
    pub messages_total: usize,
    pub success_rate: String,
    pub active_sessions: usize,
    pub uptime: String,
    pub last_updated: DateTime<Utc>,
}

impl AggregateStats {
    pub fn zeroed(now: DateTime<Utc>) -> Self {
        Self {
            total_subscribers: 0,
            messages_today: 0,
            messages_total: 0,
            success_rate: "0%".to_string(),
            active_sessions: 0,
            uptime: "0d 0h 0m".to_string(),
            last_updated: now,
        }
    }
}
