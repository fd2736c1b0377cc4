use tracing::{info, warn};

use ossms_core::{formatting::escape_html, registration::RegistrationStep};

use super::{reply, ChatContext};
use crate::router::AppState;

/// Plain text: a phone number when a registration is open, otherwise a hint.
pub async fn handle_text(state: &AppState, ctx: &ChatContext, text: &str) {
    let chat_id = ctx.chat_id;
    if !state
        .registrar
        .pending()
        .is_open(chat_id, &ctx.user.external_id)
        .await
    {
        reply(
            state,
            chat_id,
            "ℹ️ I forward SMS to this chat. Use /register to link a phone number or /help for commands.",
        )
        .await;
        return;
    }

    let step = match state
        .registrar
        .submit_phone(chat_id, ctx.user.clone(), text)
        .await
    {
        Ok(step) => step,
        Err(e) => {
            warn!(chat_id = chat_id.0, "registration failed: {e}");
            reply(
                state,
                chat_id,
                "❌ Registration failed. Please try again with /register.",
            )
            .await;
            return;
        }
    };

    let html = match step {
        RegistrationStep::Registered(s) => {
            info!(subscriber = %s.id, "subscriber registered");
            format!(
                "✅ <b>Registration Successful!</b>\n\n\
Your phone number {} has been registered.\n\
You'll now receive all SMS messages sent from this number.\n\n\
🆔 <b>Your Chat ID:</b> <code>{}</code>\n\n\
Use /mychatid anytime to view this information again.",
                escape_html(s.phone_number.as_deref().unwrap_or_default()),
                chat_id.0
            )
        }
        RegistrationStep::InvalidPhone(_) => "❌ Invalid phone number format. Please use international \
format like +1234567890 or use /cancel to abort."
            .to_string(),
        RegistrationStep::PhoneTaken(phone) => format!(
            "❌ {} is already registered to another account. Use /register to try a different number.",
            escape_html(&phone)
        ),
        RegistrationStep::AlreadyRegistered(s) => format!(
            "✅ You're already registered with phone number: {}",
            escape_html(s.phone_number.as_deref().unwrap_or("not set"))
        ),
    };
    reply(state, chat_id, &html).await;
}
