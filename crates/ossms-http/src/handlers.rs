//! Request handlers for the webhook and dashboard API.

use std::str::FromStr;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use ossms_core::{
    domain::{
        AggregateStats, ChatId, MessageId, MessageStatus, RelayMessage, Subscriber,
        SubscriberId, SubscriberPatch,
    },
    relay::RelayOutcome,
};
use ossms_twilio::{signature, twiml};

use crate::{
    error::{ApiError, ApiResult},
    server::HttpState,
};

pub const TELEGRAM_WEBHOOK_PATH: &str = "/api/telegram/webhook";
pub const SMS_WEBHOOK_PATH: &str = "/api/sms/webhook";

const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
const SMS_ACK: &str = "SMS received and forwarded to Telegram";

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ============== Webhooks ==============

/// POST /api/telegram/webhook
pub async fn telegram_webhook(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(update): Json<Value>,
) -> Response {
    if let Some(expected) = state.bot.webhook_secret() {
        let received = headers
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if received != Some(expected) {
            warn!("invalid or missing telegram secret token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    match state.bot.process_update(update).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            warn!("telegram webhook error: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error").into_response()
        }
    }
}

fn form_value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

/// POST /api/sms/webhook (Twilio inbound SMS, form encoded)
pub async fn sms_webhook(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> ApiResult<Response> {
    if let Some(token) = &state.sms_signing_key {
        let url = match &state.public_url {
            Some(base) => format!("{base}{SMS_WEBHOOK_PATH}"),
            None => format!("{}{SMS_WEBHOOK_PATH}", request_base_url(&headers)?),
        };
        let received = headers
            .get(signature::HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !signature::verify(token, &url, &params, received) {
            warn!("rejected SMS webhook with bad signature");
            return Err(ApiError::Status(
                StatusCode::FORBIDDEN,
                "invalid Twilio signature".to_string(),
            ));
        }
    }

    let (Some(from), Some(body)) = (form_value(&params, "From"), form_value(&params, "Body"))
    else {
        return Err(ApiError::bad_request("From and Body are required"));
    };

    let outcome = state.relay.relay_inbound_sms(from, body).await?;
    let xml = match outcome {
        RelayOutcome::Delivered(_) => twiml::message_response(SMS_ACK),
        _ => twiml::empty_response(),
    };
    Ok(([(header::CONTENT_TYPE, twiml::CONTENT_TYPE)], xml).into_response())
}

// ============== Dashboard: stats & subscribers ==============

pub async fn get_stats(State(state): State<HttpState>) -> Json<AggregateStats> {
    Json(state.store().get_stats().await)
}

pub async fn list_users(State(state): State<HttpState>) -> Json<Vec<Subscriber>> {
    Json(state.store().list_subscribers().await)
}

pub async fn get_user(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Subscriber>> {
    state
        .store()
        .get_subscriber(&SubscriberId(id))
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User"))
}

pub async fn update_user(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    patch: Result<Json<SubscriberPatch>, JsonRejection>,
) -> ApiResult<Json<Subscriber>> {
    let Json(patch) = patch?;
    state
        .store()
        .update_subscriber(&SubscriberId(id), patch)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User"))
}

pub async fn delete_user(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    if state.store().delete_subscriber(&SubscriberId(id)).await {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::not_found("User"))
    }
}

/// Messages addressed to an external (Telegram) id.
pub async fn user_messages(
    State(state): State<HttpState>,
    Path(external_id): Path<String>,
) -> Json<Vec<RelayMessage>> {
    Json(state.store().list_messages_for_subscriber(&external_id).await)
}

// ============== Dashboard: messages ==============

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

pub async fn list_messages(
    State(state): State<HttpState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<RelayMessage>>> {
    let Query(q) = query?;
    Ok(Json(state.store().list_messages(q.limit).await))
}

pub async fn get_message(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RelayMessage>> {
    state
        .store()
        .get_message(&MessageId(id))
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Message"))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

pub async fn update_message_status(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<Json<RelayMessage>> {
    let Json(body) = body?;
    let status = MessageStatus::from_str(&body.status)?;
    state
        .store()
        .update_message_status(&MessageId(id), status)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Message"))
}

// ============== Outbound sends ==============

#[derive(Debug, Deserialize)]
pub struct SendSmsRequest {
    pub to: Option<String>,
    pub message: Option<String>,
}

fn present(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

/// POST /api/sms/send
pub async fn send_sms(
    State(state): State<HttpState>,
    body: Result<Json<SendSmsRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body?;
    let (Some(to), Some(message)) = (present(body.to), present(body.message)) else {
        return Err(ApiError::bad_request("to and message are required"));
    };
    let outcome = state.relay.send_sms(&to, &message).await?;
    Ok(Json(json!({ "success": outcome.is_delivered() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToChatRequest {
    pub chat_id: Option<Value>,
    pub message: Option<String>,
    pub from_number: Option<String>,
}

/// Chat ids arrive as JSON numbers or numeric strings.
fn parse_chat_id(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    v.as_str().and_then(|s| s.trim().parse::<i64>().ok())
}

/// POST /api/telegram/send
pub async fn send_to_chat(
    State(state): State<HttpState>,
    body: Result<Json<SendToChatRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body?;
    let chat_id = body.chat_id.as_ref().and_then(parse_chat_id);
    let (Some(chat_id), Some(message)) = (chat_id, present(body.message)) else {
        return Err(ApiError::bad_request("chatId and message are required"));
    };

    match state
        .relay
        .relay_to_chat(ChatId(chat_id), &message, body.from_number.as_deref())
        .await?
    {
        RelayOutcome::Delivered(m) => Ok(Json(json!({
            "success": true,
            "message": "Message sent successfully",
            "id": m.id,
        }))),
        RelayOutcome::Failed { reason, .. } => Err(ApiError::Status(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to send message: {reason}"),
        )),
        RelayOutcome::NoSubscriber | RelayOutcome::Paused => Err(ApiError::Status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to send message".to_string(),
        )),
    }
}

// ============== Provider status & webhook setup ==============

#[derive(Debug, Serialize)]
pub struct SmsStatus {
    pub configured: bool,
    pub balance: String,
    pub currency: String,
    pub provider: &'static str,
}

pub async fn sms_status(State(state): State<HttpState>) -> ApiResult<Json<SmsStatus>> {
    let sms = state.relay.sms();
    let balance = sms.balance().await?;
    Ok(Json(SmsStatus {
        configured: sms.is_configured(),
        balance: balance.balance,
        currency: balance.currency,
        provider: sms.provider(),
    }))
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSetup {
    pub telegram: bool,
    pub sms: bool,
    pub webhook_url: String,
}

/// `proto://host` of the incoming request (behind proxies, `X-Forwarded-Proto` wins).
pub fn request_base_url(headers: &HeaderMap) -> ApiResult<String> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ApiError::bad_request("Host header is required"))?;
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|p| p.split(',').next())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("http");
    Ok(format!("{proto}://{host}"))
}

/// Point both platforms' webhooks at `base_url`. Failures are logged and reported as `false`.
pub async fn configure_webhooks(state: &HttpState, base_url: &str) -> WebhookSetup {
    let base_url = base_url.trim_end_matches('/');

    let telegram = match state
        .bot
        .set_webhook(&format!("{base_url}{TELEGRAM_WEBHOOK_PATH}"))
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!("telegram webhook setup failed: {e}");
            false
        }
    };

    let sms_gateway = state.relay.sms();
    let sms = if sms_gateway.is_configured() {
        match sms_gateway
            .configure_inbound_webhook(&format!("{base_url}{SMS_WEBHOOK_PATH}"))
            .await
        {
            Ok(n) => {
                info!(numbers = n, "SMS webhook configured");
                true
            }
            Err(e) => {
                warn!("SMS webhook setup failed: {e}");
                false
            }
        }
    } else {
        false
    };

    WebhookSetup {
        telegram,
        sms,
        webhook_url: base_url.to_string(),
    }
}

/// POST /api/setup/webhooks
pub async fn setup_webhooks(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> ApiResult<Json<WebhookSetup>> {
    let base = request_base_url(&headers)?;
    Ok(Json(configure_webhooks(&state, &base).await))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_accepts_numbers_and_strings() {
        assert_eq!(parse_chat_id(&json!(123)), Some(123));
        assert_eq!(parse_chat_id(&json!("-100200")), Some(-100200));
        assert_eq!(parse_chat_id(&json!("abc")), None);
        assert_eq!(parse_chat_id(&json!(null)), None);
    }

    #[test]
    fn base_url_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(request_base_url(&headers).is_err());

        headers.insert(header::HOST, "relay.example.com".parse().unwrap());
        assert_eq!(
            request_base_url(&headers).unwrap(),
            "http://relay.example.com"
        );

        headers.insert("x-forwarded-proto", "https, http".parse().unwrap());
        assert_eq!(
            request_base_url(&headers).unwrap(),
            "https://relay.example.com"
        );
    }
}
