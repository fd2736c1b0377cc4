//! Twilio adapter (outbound SMS, balance, inbound webhook wiring).
//!
//! Talks to the Twilio REST API (`2010-04-01`) with basic auth.

pub mod signature;
pub mod twiml;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use ossms_core::{
    config::{TwilioSettings, DEFAULT_TWILIO_API_BASE},
    errors::Error,
    ports::{SmsBalance, SmsGateway},
    Result,
};

const API_VERSION: &str = "2010-04-01";

#[derive(Clone, Debug)]
struct Credentials {
    account_sid: String,
    auth_token: String,
    phone_number: String,
}

#[derive(Clone, Debug)]
pub struct TwilioClient {
    creds: Option<Credentials>,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Option<String>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncomingNumbersPage {
    #[serde(default)]
    incoming_phone_numbers: Vec<IncomingNumber>,
}

#[derive(Debug, Deserialize)]
struct IncomingNumber {
    sid: String,
    #[serde(default)]
    phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    code: Option<i64>,
}

impl TwilioClient {
    pub fn new(settings: &TwilioSettings) -> Self {
        let creds = match (
            settings.account_sid.clone(),
            settings.auth_token.clone(),
            settings.phone_number.clone(),
        ) {
            (Some(account_sid), Some(auth_token), Some(phone_number)) => Some(Credentials {
                account_sid,
                auth_token,
                phone_number,
            }),
            _ => None,
        };

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client build");

        let base_url = if settings.api_base.trim().is_empty() {
            DEFAULT_TWILIO_API_BASE.to_string()
        } else {
            settings.api_base.trim_end_matches('/').to_string()
        };

        Self {
            creds,
            base_url,
            http,
        }
    }

    /// Override the API base (tests point this at a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Auth token for webhook signature checks, when configured.
    pub fn auth_token(&self) -> Option<&str> {
        self.creds.as_ref().map(|c| c.auth_token.as_str())
    }

    fn creds(&self) -> Result<&Credentials> {
        self.creds
            .as_ref()
            .ok_or_else(|| Error::Config("Twilio is not configured".to_string()))
    }

    fn account_url(&self, creds: &Credentials, tail: &str) -> String {
        format!(
            "{}/{API_VERSION}/Accounts/{}/{tail}",
            self.base_url, creds.account_sid
        )
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(ApiErrorBody {
                message: Some(m),
                code,
            }) => match code {
                Some(c) => format!("{m} (code {c})"),
                None => m,
            },
            _ => body.chars().take(200).collect(),
        };
        Err(Error::External(format!(
            "twilio {what} failed: {status} {detail}"
        )))
    }
}

#[async_trait]
impl SmsGateway for TwilioClient {
    fn provider(&self) -> &'static str {
        "Twilio"
    }

    fn is_configured(&self) -> bool {
        self.creds.is_some()
    }

    fn sender_number(&self) -> Option<&str> {
        self.creds.as_ref().map(|c| c.phone_number.as_str())
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<()> {
        let creds = self.creds()?;
        let resp = self
            .http
            .post(self.account_url(creds, "Messages.json"))
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(&[
                ("To", to),
                ("From", creds.phone_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| Error::External(format!("twilio request error: {e}")))?;
        Self::check(resp, "send").await?;
        info!(to, "SMS sent");
        Ok(())
    }

    /// Current balance. Falls back to `0 USD` when unconfigured or unreachable.
    async fn balance(&self) -> Result<SmsBalance> {
        let Some(creds) = self.creds.as_ref() else {
            return Ok(SmsBalance::default());
        };

        let fetched = async {
            let resp = self
                .http
                .get(self.account_url(creds, "Balance.json"))
                .basic_auth(&creds.account_sid, Some(&creds.auth_token))
                .send()
                .await
                .map_err(|e| Error::External(format!("twilio request error: {e}")))?;
            let resp = Self::check(resp, "balance").await?;
            resp.json::<BalanceResponse>()
                .await
                .map_err(|e| Error::External(format!("twilio json error: {e}")))
        }
        .await;

        match fetched {
            Ok(b) => {
                let default = SmsBalance::default();
                Ok(SmsBalance {
                    balance: b.balance.unwrap_or(default.balance),
                    currency: b.currency.unwrap_or(default.currency),
                })
            }
            Err(e) => {
                warn!("twilio balance unavailable: {e}");
                Ok(SmsBalance::default())
            }
        }
    }

    async fn configure_inbound_webhook(&self, webhook_url: &str) -> Result<usize> {
        let creds = self.creds()?;
        let resp = self
            .http
            .get(self.account_url(creds, "IncomingPhoneNumbers.json"))
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .send()
            .await
            .map_err(|e| Error::External(format!("twilio request error: {e}")))?;
        let page: IncomingNumbersPage = Self::check(resp, "number list")
            .await?
            .json()
            .await
            .map_err(|e| Error::External(format!("twilio json error: {e}")))?;

        let mut updated = 0;
        for number in &page.incoming_phone_numbers {
            let resp = self
                .http
                .post(self.account_url(
                    creds,
                    &format!("IncomingPhoneNumbers/{}.json", number.sid),
                ))
                .basic_auth(&creds.account_sid, Some(&creds.auth_token))
                .form(&[("SmsUrl", webhook_url), ("SmsMethod", "POST")])
                .send()
                .await
                .map_err(|e| Error::External(format!("twilio request error: {e}")))?;
            Self::check(resp, "number update").await?;
            info!(
                sid = %number.sid,
                number = number.phone_number.as_deref().unwrap_or("?"),
                "inbound SMS webhook set"
            );
            updated += 1;
        }
        Ok(updated)
    }
}
