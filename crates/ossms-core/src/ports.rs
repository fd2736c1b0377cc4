use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Account balance reported by the SMS provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsBalance {
    pub balance: String,
    pub currency: String,
}

impl Default for SmsBalance {
    fn default() -> Self {
        Self {
            balance: "0".to_string(),
            currency: "USD".to_string(),
        }
    }
}

/// Telephony provider port (Twilio today).
#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Provider name shown on the dashboard.
    fn provider(&self) -> &'static str;

    /// Credentials and sender number are all present.
    fn is_configured(&self) -> bool;

    /// Number outbound SMS are sent from, when configured.
    fn sender_number(&self) -> Option<&str>;

    async fn send_sms(&self, to: &str, body: &str) -> Result<()>;

    async fn balance(&self) -> Result<SmsBalance>;

    /// Point every provider-owned number's inbound SMS hook at `webhook_url`.
    /// Returns how many numbers were updated.
    async fn configure_inbound_webhook(&self, webhook_url: &str) -> Result<usize>;
}

/// Bot platform webhook port.
///
/// Lets the HTTP surface hand raw platform updates to the bot adapter without
/// depending on the bot SDK.
#[async_trait]
pub trait BotWebhook: Send + Sync {
    /// Process one raw update payload (Telegram `Update` JSON).
    async fn process_update(&self, update: serde_json::Value) -> Result<()>;

    /// Register `url` with the platform as the update webhook.
    async fn set_webhook(&self, url: &str) -> Result<()>;

    /// Expected value of the webhook secret header, if one is configured.
    fn webhook_secret(&self) -> Option<&str>;
}
