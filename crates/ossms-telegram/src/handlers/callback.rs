use tracing::{info, warn};

use ossms_core::domain::{MessageRef, Subscriber, SubscriberId, SubscriberPatch};

use super::{commands::settings_view, ChatContext};
use crate::router::AppState;

/// Inline keyboard actions, encoded as `callback_data`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CallbackAction {
    UnregisterConfirm(SubscriberId),
    UnregisterCancel,
    Pause,
    Resume,
}

impl CallbackAction {
    pub(crate) fn data(&self) -> String {
        match self {
            Self::UnregisterConfirm(id) => format!("unregister:confirm:{id}"),
            Self::UnregisterCancel => "unregister:cancel".to_string(),
            Self::Pause => "settings:pause".to_string(),
            Self::Resume => "settings:resume".to_string(),
        }
    }

    pub(crate) fn parse(data: &str) -> Option<Self> {
        match data.split(':').collect::<Vec<_>>().as_slice() {
            ["unregister", "confirm", id] if !id.is_empty() => {
                Some(Self::UnregisterConfirm(SubscriberId::from(*id)))
            }
            ["unregister", "cancel"] => Some(Self::UnregisterCancel),
            ["settings", "pause"] => Some(Self::Pause),
            ["settings", "resume"] => Some(Self::Resume),
            _ => None,
        }
    }
}

pub(crate) async fn handle_callback(
    state: &AppState,
    ctx: &ChatContext,
    callback_id: &str,
    origin: MessageRef,
    data: &str,
) {
    let toast = match CallbackAction::parse(data) {
        Some(action) => apply(state, ctx, origin, action).await,
        None => Some("Unknown action"),
    };

    // Always answer callback query eventually.
    if let Err(e) = state
        .messenger
        .answer_callback_query(callback_id, toast)
        .await
    {
        warn!("answer_callback_query failed: {e}");
    }
}

/// Runs the action and edits the originating message. Returns an optional toast.
async fn apply(
    state: &AppState,
    ctx: &ChatContext,
    origin: MessageRef,
    action: CallbackAction,
) -> Option<&'static str> {
    let own = state
        .store
        .get_subscriber_by_external_id(&ctx.user.external_id)
        .await;

    match action {
        CallbackAction::UnregisterConfirm(id) => {
            // Only the subscriber themselves may confirm.
            let Some(s) = own.filter(|s| s.id == id) else {
                edit(state, origin, "❌ This registration no longer exists.").await;
                return Some("Not registered");
            };
            state.store.delete_subscriber(&s.id).await;
            info!(subscriber = %s.id, "subscriber unregistered");
            edit(
                state,
                origin,
                "✅ Successfully unregistered! Use /register to sign up again.",
            )
            .await;
            None
        }
        CallbackAction::UnregisterCancel => {
            edit(state, origin, "❌ Unregistration cancelled.").await;
            None
        }
        CallbackAction::Pause => set_forwarding(state, origin, own, false).await,
        CallbackAction::Resume => set_forwarding(state, origin, own, true).await,
    }
}

async fn set_forwarding(
    state: &AppState,
    origin: MessageRef,
    own: Option<Subscriber>,
    active: bool,
) -> Option<&'static str> {
    let Some(s) = own else {
        edit(state, origin, "❌ You're not registered.").await;
        return Some("Not registered");
    };
    let updated = match state
        .store
        .update_subscriber(&s.id, SubscriberPatch::active(active))
        .await
    {
        Ok(Some(updated)) => updated,
        Ok(None) => {
            edit(state, origin, "❌ You're not registered.").await;
            return Some("Not registered");
        }
        Err(e) => {
            warn!(subscriber = %s.id, "forwarding toggle failed: {e}");
            return Some("Update failed");
        }
    };
    let (html, keyboard) = settings_view(&updated);
    if let Err(e) = state
        .messenger
        .edit_inline_keyboard(origin, &html, keyboard)
        .await
    {
        warn!("edit failed: {e}");
    }
    Some(if active {
        "Forwarding resumed"
    } else {
        "Forwarding paused"
    })
}

async fn edit(state: &AppState, origin: MessageRef, html: &str) {
    if let Err(e) = state.messenger.edit_html(origin, html).await {
        warn!("edit failed: {e}");
    }
}
