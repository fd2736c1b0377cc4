//! HTTP server built on axum: routes, middleware and shared state.

use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use ossms_core::{errors::Error, ports::BotWebhook, relay::RelayService, store::RelayStore, Result};

use crate::handlers::{self, SMS_WEBHOOK_PATH, TELEGRAM_WEBHOOK_PATH};

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct HttpState {
    pub relay: RelayService,
    pub bot: Arc<dyn BotWebhook>,
    /// Public base URL, used to reconstruct signed webhook URLs.
    pub public_url: Option<String>,
    /// Twilio auth token when inbound SMS signatures are enforced.
    pub sms_signing_key: Option<String>,
}

impl HttpState {
    pub fn store(&self) -> &Arc<RelayStore> {
        self.relay.store()
    }
}

pub fn router(state: HttpState) -> Router {
    let webhooks = Router::new()
        .route(TELEGRAM_WEBHOOK_PATH, post(handlers::telegram_webhook))
        .route(SMS_WEBHOOK_PATH, post(handlers::sms_webhook));

    let api = Router::new()
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/users", get(handlers::list_users))
        .route(
            "/api/users/{id}",
            get(handlers::get_user)
                .patch(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .route("/api/users/{id}/messages", get(handlers::user_messages))
        .route("/api/messages", get(handlers::list_messages))
        .route("/api/messages/{id}", get(handlers::get_message))
        .route(
            "/api/messages/{id}/status",
            patch(handlers::update_message_status),
        )
        .route("/api/sms/send", post(handlers::send_sms))
        .route("/api/telegram/send", post(handlers::send_to_chat))
        .route("/api/sms/status", get(handlers::sms_status))
        .route("/api/setup/webhooks", post(handlers::setup_webhooks))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/health", get(handlers::health))
        .merge(webhooks)
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn serve(addr: &str, state: HttpState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::External(format!("failed to bind {addr}: {e}")))?;

    info!("HTTP server listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::External(format!("http server error: {e}")))?;

    info!("HTTP server stopped");
    Ok(())
}
