use std::{env, fs, path::Path, time::Duration};

use crate::{errors::Error, messaging::throttled::ThrottleConfig, Result};

pub const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Typed relay configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_webhook_secret: Option<String>,
    pub telegram_throttle: ThrottleConfig,

    // Twilio
    pub twilio: TwilioSettings,

    // HTTP surface
    pub http_bind: String,
    pub port: u16,
    /// Public HTTPS base used when registering webhooks. `None` means polling.
    pub public_url: Option<String>,

    // Chat behavior
    pub registration_timeout: Duration,
    pub history_limit: usize,
}

#[derive(Clone, Debug, Default)]
pub struct TwilioSettings {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub phone_number: Option<String>,
    pub api_base: String,
    pub validate_signature: bool,
}

impl TwilioSettings {
    /// All three credentials present.
    pub fn is_configured(&self) -> bool {
        self.account_sid.is_some() && self.auth_token.is_some() && self.phone_number.is_some()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build from an arbitrary key lookup (the process environment in `load`).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).and_then(non_empty);

        let telegram_bot_token = var("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let telegram_webhook_secret = var("TELEGRAM_WEBHOOK_SECRET");

        let defaults = ThrottleConfig::default();
        let telegram_throttle = ThrottleConfig {
            global_min_interval: var("TELEGRAM_MIN_INTERVAL_MS")
                .and_then(|s| parse_u64(&s))
                .map(Duration::from_millis)
                .unwrap_or(defaults.global_min_interval),
            per_chat_min_interval: var("TELEGRAM_CHAT_INTERVAL_MS")
                .and_then(|s| parse_u64(&s))
                .map(Duration::from_millis)
                .unwrap_or(defaults.per_chat_min_interval),
        };

        let twilio = TwilioSettings {
            account_sid: var("TWILIO_ACCOUNT_SID"),
            auth_token: var("TWILIO_AUTH_TOKEN"),
            phone_number: var("TWILIO_PHONE_NUMBER"),
            api_base: var("TWILIO_API_BASE")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_TWILIO_API_BASE.to_string()),
            validate_signature: var("TWILIO_VALIDATE_SIGNATURE")
                .map(|s| parse_bool(&s))
                .unwrap_or(false),
        };

        let http_bind = var("HTTP_BIND").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("PORT must be a port number, got '{raw}'")))?,
            None => 5000,
        };

        let public_url = var("PUBLIC_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .or_else(|| var("REPLIT_DOMAINS").and_then(|d| public_url_from_domains(&d)));

        let registration_timeout = Duration::from_secs(
            var("REGISTRATION_TIMEOUT_SECS")
                .and_then(|s| parse_u64(&s))
                .unwrap_or(300),
        );
        let history_limit = var("HISTORY_LIMIT")
            .and_then(|s| parse_u64(&s))
            .map(|n| n.clamp(1, 50) as usize)
            .unwrap_or(5);

        Ok(Self {
            telegram_bot_token,
            telegram_webhook_secret,
            telegram_throttle,
            twilio,
            http_bind,
            port,
            public_url,
            registration_timeout,
            history_limit,
        })
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_bind, self.port)
    }
}

/// First comma-separated domain as an `https://` base.
fn public_url_from_domains(domains: &str) -> Option<String> {
    domains
        .split(',')
        .map(str::trim)
        .find(|d| !d.is_empty())
        .map(|d| format!("https://{}", d.trim_end_matches('/')))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }
        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_u64(s: &str) -> Option<u64> {
    s.trim().parse::<u64>().ok()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
