//! Phone-number registration conversation state.
//!
//! `/register` opens a pending registration for a chat; the next text message
//! in that chat is treated as the phone number until the registration expires
//! or is cancelled.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
    time::Duration,
};

use regex::Regex;
use tokio::{sync::Mutex, time::Instant};

use crate::{
    domain::{ChatId, NewSubscriber, Subscriber},
    errors::Error,
    store::RelayStore,
    Result,
};

fn e164() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("valid regex"))
}

/// Normalize a user-typed phone number to E.164 (`+15551234567`).
///
/// Spaces, dashes, dots and parentheses are dropped before validation.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    if e164().is_match(&compact) {
        Ok(compact)
    } else {
        Err(Error::invalid(format!(
            "'{}' is not an international phone number like +1234567890",
            raw.trim()
        )))
    }
}

/// Who is registering, as reported by the chat platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registrant {
    pub external_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug)]
struct Pending {
    external_id: String,
    expires_at: Instant,
}

/// Open registrations keyed by chat.
pub struct PendingRegistrations {
    ttl: Duration,
    inner: Mutex<HashMap<i64, Pending>>,
}

impl PendingRegistrations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn open(&self, chat_id: ChatId, external_id: &str) {
        self.open_at(chat_id, external_id, Instant::now()).await
    }

    pub async fn open_at(&self, chat_id: ChatId, external_id: &str, now: Instant) {
        let mut map = self.inner.lock().await;
        map.retain(|_, p| p.expires_at > now);
        map.insert(
            chat_id.0,
            Pending {
                external_id: external_id.to_string(),
                expires_at: now + self.ttl,
            },
        );
    }

    /// True when `chat_id` has an unexpired registration for `external_id`.
    pub async fn is_open(&self, chat_id: ChatId, external_id: &str) -> bool {
        self.is_open_at(chat_id, external_id, Instant::now()).await
    }

    pub async fn is_open_at(&self, chat_id: ChatId, external_id: &str, now: Instant) -> bool {
        let mut map = self.inner.lock().await;
        let Some(expired) = map.get(&chat_id.0).map(|p| p.expires_at <= now) else {
            return false;
        };
        if expired {
            map.remove(&chat_id.0);
            return false;
        }
        map.get(&chat_id.0)
            .is_some_and(|p| p.external_id == external_id)
    }

    /// Close the registration for `chat_id`. Returns whether one was open.
    pub async fn close(&self, chat_id: ChatId) -> bool {
        self.inner.lock().await.remove(&chat_id.0).is_some()
    }
}

/// Result of feeding a text message into an open registration.
#[derive(Clone, Debug)]
pub enum RegistrationStep {
    Registered(Subscriber),
    InvalidPhone(String),
    PhoneTaken(String),
    AlreadyRegistered(Subscriber),
}

/// Registration flow over the store.
#[derive(Clone)]
pub struct Registrar {
    store: Arc<RelayStore>,
    pending: Arc<PendingRegistrations>,
}

impl Registrar {
    pub fn new(store: Arc<RelayStore>, pending: Arc<PendingRegistrations>) -> Self {
        Self { store, pending }
    }

    pub fn pending(&self) -> &PendingRegistrations {
        &self.pending
    }

    /// Start a registration. Returns the existing subscriber if already registered.
    pub async fn begin(&self, chat_id: ChatId, external_id: &str) -> Option<Subscriber> {
        if let Some(existing) = self.store.get_subscriber_by_external_id(external_id).await {
            return Some(existing);
        }
        self.pending.open(chat_id, external_id).await;
        None
    }

    /// Complete a registration with the phone number the user typed.
    ///
    /// Invalid numbers leave the registration open; every other outcome closes it.
    pub async fn submit_phone(
        &self,
        chat_id: ChatId,
        who: Registrant,
        raw_phone: &str,
    ) -> Result<RegistrationStep> {
        let phone = match normalize_phone(raw_phone) {
            Ok(p) => p,
            Err(e) => return Ok(RegistrationStep::InvalidPhone(e.to_string())),
        };

        if self.store.find_subscriber_by_phone(&phone).await.is_some() {
            self.pending.close(chat_id).await;
            return Ok(RegistrationStep::PhoneTaken(phone));
        }

        // The store repeats both uniqueness checks under its lock, so a
        // concurrent registration surfaces here as a conflict.
        let created = self
            .store
            .create_subscriber(NewSubscriber {
                external_id: who.external_id.clone(),
                username: who.username,
                display_name: who.display_name,
                phone_number: Some(phone.clone()),
            })
            .await;
        self.pending.close(chat_id).await;

        match created {
            Ok(s) => Ok(RegistrationStep::Registered(s)),
            Err(Error::Conflict(_)) => {
                match self.store.get_subscriber_by_external_id(&who.external_id).await {
                    Some(existing) => Ok(RegistrationStep::AlreadyRegistered(existing)),
                    None => Ok(RegistrationStep::PhoneTaken(phone)),
                }
            }
            Err(e) => Err(e),
        }
    }
}
