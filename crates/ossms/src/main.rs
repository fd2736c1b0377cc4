use std::sync::Arc;

use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ossms_core::{
    config::Config,
    messaging::{port::MessagingPort, throttled::ThrottledMessenger},
    ports::{BotWebhook, SmsGateway},
    relay::RelayService,
    store::RelayStore,
};
use ossms_http::{configure_webhooks, HttpState};
use ossms_telegram::{
    router::{clear_webhook, run_polling, AppState, TelegramWebhook},
    TelegramMessenger,
};
use ossms_twilio::TwilioClient;

#[tokio::main]
async fn main() -> Result<(), ossms_core::Error> {
    ossms_core::logging::init("ossms")?;

    let cfg = Arc::new(Config::load()?);
    let store = Arc::new(RelayStore::new());
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Throttle outbound Telegram traffic; the adapter still retries once on RetryAfter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        cfg.telegram_throttle,
    ));

    let twilio = TwilioClient::new(&cfg.twilio);
    if !twilio.is_configured() {
        warn!("Twilio credentials missing; outbound SMS is disabled");
    }
    let sms_signing_key = cfg
        .twilio
        .validate_signature
        .then(|| twilio.auth_token().map(str::to_string))
        .flatten();
    let sms: Arc<dyn SmsGateway> = Arc::new(twilio);

    let relay = RelayService::new(store.clone(), messenger.clone(), sms);
    let bot_state = Arc::new(AppState::new(cfg.clone(), store, messenger));
    let webhook: Arc<dyn BotWebhook> =
        Arc::new(TelegramWebhook::new(bot.clone(), bot_state.clone()));

    let http_state = HttpState {
        relay,
        bot: webhook,
        public_url: cfg.public_url.clone(),
        sms_signing_key,
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
            shutdown.cancel();
        });
    }

    // Webhooks when we have a public URL, long polling otherwise.
    let polling = match &cfg.public_url {
        Some(base) => {
            let setup = configure_webhooks(&http_state, base).await;
            info!(
                telegram = setup.telegram,
                sms = setup.sms,
                "webhooks configured for {}",
                setup.webhook_url
            );
            None
        }
        None => {
            info!("no public URL; using long polling");
            clear_webhook(&bot).await;
            Some(tokio::spawn(run_polling(bot, bot_state, shutdown.clone())))
        }
    };

    let served = ossms_http::serve(&cfg.http_addr(), http_state, shutdown.clone()).await;
    shutdown.cancel();

    if let Some(handle) = polling {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("telegram polling failed: {e}"),
            Err(e) => error!("telegram polling task panicked: {e}"),
        }
    }

    served
}
