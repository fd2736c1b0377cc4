use ossms_core::{
    domain::Subscriber,
    formatting::{escape_html, history_html, local_date},
    messaging::types::{InlineButton, InlineKeyboard},
};

use super::{callback::CallbackAction, reply, reply_with_keyboard, ChatContext};
use crate::router::AppState;

/// Body preview length in `/history`.
const HISTORY_PREVIEW_CHARS: usize = 80;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

const WELCOME: &str = "🤖 <b>Welcome to OSSMSBot!</b>\n\n\
I'm your SMS gateway bot. Here's what I can do:\n\n\
📱 <b>Receive SMS messages</b> and forward them to you instantly\n\
📝 <b>Register your phone number</b> to receive SMS\n\
🔔 <b>Get notifications</b> for all incoming messages\n\
🆔 <b>Get your Chat ID</b> for SMS service integration\n\
⚙️ <b>Manage your settings</b> with simple commands\n\n\
<b>Available Commands:</b>\n\
/help - Show this help message\n\
/register - Register your phone number\n\
/status - Check your registration status\n\
/mychatid - Get your chat ID for SMS forwarding\n\
/unregister - Remove your phone number\n\
/settings - Configure notification preferences\n\n\
To get started:\n\
1. Use /mychatid to get your Chat ID\n\
2. Use /register to link your phone number";

const HELP: &str = "📚 <b>OSSMSBot Commands</b>\n\n\
🔰 <b>Basic Commands:</b>\n\
/start - Welcome message and overview\n\
/help - Show this help menu\n\
/register - Register your phone number\n\
/cancel - Abort a registration in progress\n\
/status - Check registration status\n\
/mychatid - Get your chat ID for SMS forwarding\n\n\
🔧 <b>Management Commands:</b>\n\
/unregister - Remove phone number\n\
/settings - Pause or resume forwarding\n\
/history - View recent messages\n\n\
📞 <b>Phone Registration:</b>\n\
Use /register and follow the prompts to link your phone number. Once registered, \
you'll receive all SMS messages sent from that number.\n\n\
🔐 <b>Security:</b>\n\
Your phone number is only used for SMS forwarding. Use /unregister anytime to remove it.";

fn not_registered() -> &'static str {
    "❌ You're not registered yet. Use /register to get started!"
}

fn forwarding_label(s: &Subscriber) -> &'static str {
    if s.is_active {
        "Active"
    } else {
        "Paused"
    }
}

fn phone_label(s: &Subscriber) -> String {
    escape_html(s.phone_number.as_deref().unwrap_or("not set"))
}

fn register_prompt(timeout_minutes: u64) -> String {
    format!(
        "📱 <b>Phone Number Registration</b>\n\n\
Please send your phone number in international format:\n\
Examples:\n\
• +1 555 123 4567 (US)\n\
• +966 50 123 4567 (Saudi Arabia)\n\
• +44 20 7946 0958 (UK)\n\n\
Type your phone number or use /cancel to abort registration.\n\
This request expires in {timeout_minutes} min."
    )
}

pub(crate) fn settings_view(s: &Subscriber) -> (String, InlineKeyboard) {
    let html = format!(
        "⚙️ <b>Settings</b>\n\n\
📱 Phone: {}\n\
🔔 Forwarding: {}",
        phone_label(s),
        forwarding_label(s)
    );
    let button = if s.is_active {
        InlineButton::new("⏸ Pause forwarding", CallbackAction::Pause.data())
    } else {
        InlineButton::new("▶️ Resume forwarding", CallbackAction::Resume.data())
    };
    (html, InlineKeyboard::single_row(vec![button]))
}

pub async fn handle_command(state: &AppState, ctx: &ChatContext, text: &str) {
    let (cmd, _arg) = parse_command(text);
    let chat_id = ctx.chat_id;
    let external_id = ctx.user.external_id.as_str();

    match cmd.as_str() {
        "start" => reply(state, chat_id, WELCOME).await,

        "help" => reply(state, chat_id, HELP).await,

        "register" => match state.registrar.begin(chat_id, external_id).await {
            Some(existing) => {
                let html = format!(
                    "✅ You're already registered with phone number: {}\n\n\
Use /unregister to remove it or /settings to modify preferences.",
                    phone_label(&existing)
                );
                reply(state, chat_id, &html).await;
            }
            None => {
                let minutes = state.registrar.pending().ttl().as_secs().div_ceil(60);
                reply(state, chat_id, &register_prompt(minutes)).await;
            }
        },

        "cancel" => {
            let html = if state.registrar.pending().close(chat_id).await {
                "❌ Registration cancelled."
            } else {
                "Nothing to cancel."
            };
            reply(state, chat_id, html).await;
        }

        "status" => {
            let Some(s) = state.store.get_subscriber_by_external_id(external_id).await else {
                reply(state, chat_id, not_registered()).await;
                return;
            };
            let received = state
                .store
                .list_messages_for_subscriber(&s.external_id)
                .await
                .len();
            let html = format!(
                "📊 <b>Your Registration Status</b>\n\n\
✅ Status: {}\n\
📱 Phone: {}\n\
📅 Registered: {}\n\
💬 Messages received: {received}\n\n\
Use /unregister to remove registration or /settings for preferences.",
                forwarding_label(&s),
                phone_label(&s),
                local_date(s.registered_at),
            );
            reply(state, chat_id, &html).await;
        }

        "mychatid" => {
            let html = format!(
                "🆔 <b>Your Chat ID Information</b>\n\n\
<b>Chat ID:</b> <code>{}</code>\n\
<b>User ID:</b> <code>{}</code>\n\n\
Use your Chat ID to let SMS services send messages directly to this chat \
(<code>POST /api/telegram/send</code>).\n\n\
⚠️ Only share it with services you trust.",
                chat_id.0,
                escape_html(external_id)
            );
            reply(state, chat_id, &html).await;
        }

        "history" => {
            let Some(s) = state.store.get_subscriber_by_external_id(external_id).await else {
                reply(state, chat_id, not_registered()).await;
                return;
            };
            let mut recent = state.store.list_messages_for_subscriber(&s.external_id).await;
            recent.truncate(state.cfg.history_limit);
            reply(state, chat_id, &history_html(&recent, HISTORY_PREVIEW_CHARS)).await;
        }

        "settings" => {
            let Some(s) = state.store.get_subscriber_by_external_id(external_id).await else {
                reply(state, chat_id, not_registered()).await;
                return;
            };
            let (html, keyboard) = settings_view(&s);
            reply_with_keyboard(state, chat_id, &html, keyboard).await;
        }

        "unregister" => {
            let Some(s) = state.store.get_subscriber_by_external_id(external_id).await else {
                reply(state, chat_id, "❌ You're not registered.").await;
                return;
            };
            let html = format!(
                "⚠️ <b>Confirm Unregistration</b>\n\n\
Are you sure you want to unregister phone number {}?\n\n\
This action cannot be undone.",
                phone_label(&s)
            );
            let keyboard = InlineKeyboard::single_row(vec![
                InlineButton::new(
                    "✅ Yes, unregister",
                    CallbackAction::UnregisterConfirm(s.id.clone()).data(),
                ),
                InlineButton::new("❌ Cancel", CallbackAction::UnregisterCancel.data()),
            ]);
            reply_with_keyboard(state, chat_id, &html, keyboard).await;
        }

        _ => {
            reply(
                state,
                chat_id,
                "❓ Unknown command. Use /help to see what I can do.",
            )
            .await
        }
    }
}
