//! In-memory relay store.
//!
//! Sole owner of subscriber and message state for the lifetime of the process,
//! and the only place aggregate statistics are computed. All three collections
//! sit behind one mutex so stats always observe a consistent snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    domain::{
        AggregateStats, MessageId, MessageStatus, NewMessage, NewSubscriber, RelayMessage,
        Subscriber, SubscriberId, SubscriberPatch,
    },
    errors::Error,
    registration::normalize_phone,
    stats::{self, StatsClock},
    Result,
};

#[derive(Debug)]
struct Entry<T> {
    /// Insertion order; breaks timestamp ties so "newest first" is stable.
    seq: u64,
    record: T,
}

#[derive(Debug)]
struct StoreState {
    next_seq: u64,
    subscribers: HashMap<SubscriberId, Entry<Subscriber>>,
    by_external_id: HashMap<String, SubscriberId>,
    messages: HashMap<MessageId, Entry<RelayMessage>>,
    stats: AggregateStats,
}

impl StoreState {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Normalize `phone` and make sure no other subscriber holds it.
    fn claim_phone(&self, phone: &str, owner: Option<&SubscriberId>) -> Result<String> {
        let phone = normalize_phone(phone)?;
        let taken = self.subscribers.values().any(|e| {
            e.record.phone_number.as_deref() == Some(phone.as_str())
                && Some(&e.record.id) != owner
        });
        if taken {
            return Err(Error::conflict(format!(
                "phone number {phone} is already registered"
            )));
        }
        Ok(phone)
    }

    fn recompute(&mut self, started_at: DateTime<Utc>) {
        let clock = StatsClock::at(Utc::now(), started_at);
        self.stats = stats::compute(
            self.subscribers.values().map(|e| &e.record),
            self.messages.values().map(|e| &e.record),
            clock,
        );
    }
}

pub struct RelayStore {
    started_at: DateTime<Utc>,
    state: Mutex<StoreState>,
}

impl Default for RelayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStore {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            state: Mutex::new(StoreState {
                next_seq: 0,
                subscribers: HashMap::new(),
                by_external_id: HashMap::new(),
                messages: HashMap::new(),
                stats: AggregateStats::zeroed(now),
            }),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // ============== Subscribers ==============

    /// Register a subscriber.
    ///
    /// A duplicate external id or a phone number held by someone else is a
    /// [`Error::Conflict`]; a phone number that is not E.164 is rejected.
    pub async fn create_subscriber(&self, input: NewSubscriber) -> Result<Subscriber> {
        let external_id = input.external_id.trim().to_string();
        if external_id.is_empty() {
            return Err(Error::invalid("externalId is required"));
        }

        let mut st = self.state.lock().await;
        if st.by_external_id.contains_key(&external_id) {
            return Err(Error::conflict(format!(
                "subscriber with external id {external_id} already exists"
            )));
        }
        let phone_number = match non_blank(input.phone_number) {
            Some(p) => Some(st.claim_phone(&p, None)?),
            None => None,
        };

        let subscriber = Subscriber {
            id: SubscriberId::generate(),
            external_id: external_id.clone(),
            username: non_blank(input.username),
            display_name: non_blank(input.display_name),
            phone_number,
            is_active: true,
            registered_at: Utc::now(),
        };

        let seq = st.bump_seq();
        st.by_external_id
            .insert(external_id, subscriber.id.clone());
        st.subscribers.insert(
            subscriber.id.clone(),
            Entry {
                seq,
                record: subscriber.clone(),
            },
        );
        st.recompute(self.started_at);

        Ok(subscriber)
    }

    pub async fn get_subscriber(&self, id: &SubscriberId) -> Option<Subscriber> {
        let st = self.state.lock().await;
        st.subscribers.get(id).map(|e| e.record.clone())
    }

    pub async fn get_subscriber_by_external_id(&self, external_id: &str) -> Option<Subscriber> {
        let st = self.state.lock().await;
        let id = st.by_external_id.get(external_id.trim())?;
        st.subscribers.get(id).map(|e| e.record.clone())
    }

    /// Subscriber that registered `phone`.
    pub async fn find_subscriber_by_phone(&self, phone: &str) -> Option<Subscriber> {
        let st = self.state.lock().await;
        st.subscribers
            .values()
            .find(|e| e.record.phone_number.as_deref() == Some(phone))
            .map(|e| e.record.clone())
    }

    /// Merge `patch` into a subscriber. `Ok(None)` when it does not exist.
    ///
    /// A supplied phone number goes through the same checks as registration.
    pub async fn update_subscriber(
        &self,
        id: &SubscriberId,
        mut patch: SubscriberPatch,
    ) -> Result<Option<Subscriber>> {
        let mut st = self.state.lock().await;
        if !st.subscribers.contains_key(id) {
            return Ok(None);
        }
        if let Some(phone) = patch.phone_number.take() {
            patch.phone_number = Some(st.claim_phone(&phone, Some(id))?);
        }

        let Some(entry) = st.subscribers.get_mut(id) else {
            return Ok(None);
        };
        patch.apply(&mut entry.record);
        let updated = entry.record.clone();
        st.recompute(self.started_at);
        Ok(Some(updated))
    }

    pub async fn delete_subscriber(&self, id: &SubscriberId) -> bool {
        let mut st = self.state.lock().await;
        let Some(removed) = st.subscribers.remove(id) else {
            return false;
        };
        st.by_external_id.remove(&removed.record.external_id);
        st.recompute(self.started_at);
        true
    }

    /// Most recently registered first.
    pub async fn list_subscribers(&self) -> Vec<Subscriber> {
        let st = self.state.lock().await;
        let mut entries: Vec<&Entry<Subscriber>> = st.subscribers.values().collect();
        entries.sort_by(|a, b| {
            b.record
                .registered_at
                .cmp(&a.record.registered_at)
                .then(b.seq.cmp(&a.seq))
        });
        entries.into_iter().map(|e| e.record.clone()).collect()
    }

    // ============== Messages ==============

    /// Record a new message. Status always starts `pending`.
    pub async fn create_message(&self, input: NewMessage) -> Result<RelayMessage> {
        let origin_phone = required(input.origin_phone, "originPhone")?;
        let destination_id = required(input.destination_id, "destinationId")?;
        if input.body.trim().is_empty() {
            return Err(Error::invalid("body is required"));
        }

        let message = RelayMessage {
            id: MessageId::generate(),
            origin_phone,
            destination_id,
            body: input.body,
            status: MessageStatus::Pending,
            created_at: Utc::now(),
        };

        let mut st = self.state.lock().await;
        let seq = st.bump_seq();
        st.messages.insert(
            message.id.clone(),
            Entry {
                seq,
                record: message.clone(),
            },
        );
        st.recompute(self.started_at);

        Ok(message)
    }

    pub async fn get_message(&self, id: &MessageId) -> Option<RelayMessage> {
        let st = self.state.lock().await;
        st.messages.get(id).map(|e| e.record.clone())
    }

    /// Messages addressed to `destination_id`, newest first.
    pub async fn list_messages_for_subscriber(&self, destination_id: &str) -> Vec<RelayMessage> {
        let st = self.state.lock().await;
        newest_first(
            st.messages
                .values()
                .filter(|e| e.record.destination_id == destination_id),
            None,
        )
    }

    /// All messages newest first, truncated to `limit` when given.
    pub async fn list_messages(&self, limit: Option<usize>) -> Vec<RelayMessage> {
        let st = self.state.lock().await;
        newest_first(st.messages.values(), limit)
    }

    /// Set a message's delivery status.
    ///
    /// `Ok(None)` when the message does not exist. Moving a delivered/failed
    /// message to a different status is a [`Error::Conflict`].
    pub async fn update_message_status(
        &self,
        id: &MessageId,
        status: MessageStatus,
    ) -> Result<Option<RelayMessage>> {
        let mut st = self.state.lock().await;
        let Some(entry) = st.messages.get_mut(id) else {
            return Ok(None);
        };

        let current = entry.record.status;
        if !current.can_transition_to(status) {
            return Err(Error::conflict(format!(
                "message {id} is already {current}; cannot change to {status}"
            )));
        }

        entry.record.status = status;
        let updated = entry.record.clone();
        st.recompute(self.started_at);
        Ok(Some(updated))
    }

    // ============== Stats ==============

    /// Snapshot of aggregate stats, refreshed so time-dependent fields are current.
    pub async fn get_stats(&self) -> AggregateStats {
        let mut st = self.state.lock().await;
        st.recompute(self.started_at);
        st.stats.clone()
    }
}

fn newest_first<'a>(
    entries: impl Iterator<Item = &'a Entry<RelayMessage>>,
    limit: Option<usize>,
) -> Vec<RelayMessage> {
    let mut entries: Vec<&Entry<RelayMessage>> = entries.collect();
    entries.sort_by(|a, b| {
        b.record
            .created_at
            .cmp(&a.record.created_at)
            .then(b.seq.cmp(&a.seq))
    });
    entries
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|e| e.record.clone())
        .collect()
}

fn required(value: String, field: &str) -> Result<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(Error::invalid(format!("{field} is required")));
    }
    Ok(v.to_string())
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_sub(external_id: &str, phone: Option<&str>) -> NewSubscriber {
        NewSubscriber {
            external_id: external_id.to_string(),
            username: Some("alice".to_string()),
            display_name: Some("Alice A".to_string()),
            phone_number: phone.map(|p| p.to_string()),
        }
    }

    fn new_msg(to: &str, body: &str) -> NewMessage {
        NewMessage {
            origin_phone: "+15551234567".to_string(),
            destination_id: to.to_string(),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn created_subscriber_round_trips() {
        let store = RelayStore::new();
        let before = Utc::now();
        let created = store
            .create_subscriber(new_sub("tg1", Some("+15551234567")))
            .await
            .unwrap();

        let got = store.get_subscriber(&created.id).await.unwrap();
        assert_eq!(got, created);
        assert_eq!(got.external_id, "tg1");
        assert_eq!(got.phone_number.as_deref(), Some("+15551234567"));
        assert_eq!(got.display_name.as_deref(), Some("Alice A"));
        assert!(got.is_active);
        assert!(got.registered_at >= before && got.registered_at <= Utc::now());

        let by_ext = store.get_subscriber_by_external_id("tg1").await.unwrap();
        assert_eq!(by_ext.id, created.id);
    }

    #[tokio::test]
    async fn external_id_is_required() {
        let store = RelayStore::new();
        let err = store.create_subscriber(new_sub("  ", None)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.get_stats().await.total_subscribers, 0);
    }

    #[tokio::test]
    async fn duplicate_external_id_conflicts() {
        let store = RelayStore::new();
        store.create_subscriber(new_sub("tg1", None)).await.unwrap();
        let err = store
            .create_subscriber(new_sub("tg1", Some("+15550000000")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.list_subscribers().await.len(), 1);
        assert_eq!(store.get_stats().await.total_subscribers, 1);
    }

    #[tokio::test]
    async fn subscriber_count_tracks_creates_and_deletes() {
        let store = RelayStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let s = store
                .create_subscriber(new_sub(&format!("tg{i}"), None))
                .await
                .unwrap();
            ids.push(s.id);
        }
        for id in ids.iter().take(2) {
            assert!(store.delete_subscriber(id).await);
        }
        assert_eq!(store.get_stats().await.total_subscribers, 3);

        // Deleted external ids can register again.
        assert!(store.get_subscriber_by_external_id("tg0").await.is_none());
        store.create_subscriber(new_sub("tg0", None)).await.unwrap();
        assert_eq!(store.get_stats().await.total_subscribers, 4);
    }

    #[tokio::test]
    async fn deleting_unknown_subscriber_is_false() {
        let store = RelayStore::new();
        store.create_subscriber(new_sub("tg1", None)).await.unwrap();
        assert!(!store.delete_subscriber(&SubscriberId::from("nope")).await);
        assert_eq!(store.get_stats().await.total_subscribers, 1);
    }

    #[tokio::test]
    async fn update_merges_only_supplied_fields() {
        let store = RelayStore::new();
        let s = store
            .create_subscriber(new_sub("tg1", Some("+15551234567")))
            .await
            .unwrap();

        let updated = store
            .update_subscriber(&s.id, SubscriberPatch::active(false))
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.phone_number, s.phone_number);
        assert_eq!(updated.username, s.username);
        assert_eq!(updated.registered_at, s.registered_at);
        assert_eq!(store.get_stats().await.active_sessions, 0);

        assert!(store
            .update_subscriber(&SubscriberId::from("missing"), SubscriberPatch::default())
            .await
            .unwrap()
            .is_none());
    }

    fn phone_patch(phone: &str) -> SubscriberPatch {
        SubscriberPatch {
            phone_number: Some(phone.to_string()),
            ..SubscriberPatch::default()
        }
    }

    #[tokio::test]
    async fn phone_numbers_stay_unique() {
        let store = RelayStore::new();
        let first = store
            .create_subscriber(new_sub("1", Some("+15551234567")))
            .await
            .unwrap();
        let second = store.create_subscriber(new_sub("2", None)).await.unwrap();

        let err = store
            .create_subscriber(new_sub("3", Some("+1 555 123 4567")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let err = store
            .update_subscriber(&second.id, phone_patch("+15551234567"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.get_subscriber(&second.id).await.unwrap().phone_number, None);

        // Re-saving your own number is fine, and input is normalized.
        let same = store
            .update_subscriber(&first.id, phone_patch("+1 (555) 123-4567"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(same.phone_number.as_deref(), Some("+15551234567"));

        let holders = store
            .list_subscribers()
            .await
            .into_iter()
            .filter(|s| s.phone_number.as_deref() == Some("+15551234567"))
            .count();
        assert_eq!(holders, 1);
        assert_eq!(store.get_stats().await.total_subscribers, 2);
    }

    #[tokio::test]
    async fn malformed_phone_is_rejected() {
        let store = RelayStore::new();
        let s = store.create_subscriber(new_sub("1", None)).await.unwrap();

        let err = store
            .update_subscriber(&s.id, phone_patch("not a phone"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.get_subscriber(&s.id).await.unwrap().phone_number, None);

        let err = store
            .create_subscriber(new_sub("2", Some("5551234")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.get_subscriber_by_external_id("2").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_registrations_cannot_share_a_phone() {
        let store = std::sync::Arc::new(RelayStore::new());
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .create_subscriber(new_sub(&format!("u{i}"), Some("+15551234567")))
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for t in tasks {
            if t.await.unwrap().is_ok() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.list_subscribers().await.len(), 1);
    }

    #[tokio::test]
    async fn subscribers_listed_newest_first() {
        let store = RelayStore::new();
        for id in ["a", "b", "c"] {
            store.create_subscriber(new_sub(id, None)).await.unwrap();
        }
        let order: Vec<String> = store
            .list_subscribers()
            .await
            .into_iter()
            .map(|s| s.external_id)
            .collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn phone_lookup() {
        let store = RelayStore::new();
        let s = store
            .create_subscriber(new_sub("tg1", Some("+15551234567")))
            .await
            .unwrap();
        assert_eq!(
            store.find_subscriber_by_phone("+15551234567").await.map(|x| x.id),
            Some(s.id)
        );
        assert!(store.find_subscriber_by_phone("+19999999999").await.is_none());
    }

    #[tokio::test]
    async fn messages_always_start_pending() {
        let store = RelayStore::new();
        let input: NewMessage = serde_json::from_str(
            r#"{"originPhone":"+15551234567","destinationId":"tg1","body":"hi","status":"delivered"}"#,
        )
        .unwrap();
        let m = store.create_message(input).await.unwrap();
        assert_eq!(m.status, MessageStatus::Pending);
        assert_eq!(store.get_message(&m.id).await.unwrap().status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn message_fields_are_required() {
        let store = RelayStore::new();
        let mut m = new_msg("tg1", "hi");
        m.origin_phone = String::new();
        assert!(matches!(
            store.create_message(m).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            store.create_message(new_msg("", "hi")).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            store.create_message(new_msg("tg1", " ")).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert_eq!(store.get_stats().await.messages_total, 0);
    }

    #[tokio::test]
    async fn messages_for_subscriber_filtered_newest_first() {
        let store = RelayStore::new();
        let a1 = store.create_message(new_msg("a", "1")).await.unwrap();
        store.create_message(new_msg("b", "2")).await.unwrap();
        let a3 = store.create_message(new_msg("a", "3")).await.unwrap();

        let got = store.list_messages_for_subscriber("a").await;
        assert_eq!(
            got.iter().map(|m| m.id.clone()).collect::<Vec<_>>(),
            vec![a3.id, a1.id]
        );
        assert!(got.iter().all(|m| m.destination_id == "a"));
        assert!(store.list_messages_for_subscriber("zzz").await.is_empty());
    }

    #[tokio::test]
    async fn list_messages_with_limit() {
        let store = RelayStore::new();
        for i in 0..4 {
            store
                .create_message(new_msg("a", &format!("m{i}")))
                .await
                .unwrap();
        }
        let all = store.list_messages(None).await;
        assert_eq!(
            all.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(),
            vec!["m3", "m2", "m1", "m0"]
        );
        let head = store.list_messages(Some(2)).await;
        assert_eq!(
            head.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(),
            vec!["m3", "m2"]
        );
        assert!(store.list_messages(Some(0)).await.is_empty());
    }

    #[tokio::test]
    async fn success_rate_follows_status_changes() {
        let store = RelayStore::new();
        assert_eq!(store.get_stats().await.success_rate, "0%");

        let m1 = store.create_message(new_msg("a", "1")).await.unwrap();
        let m2 = store.create_message(new_msg("a", "2")).await.unwrap();
        let m3 = store.create_message(new_msg("a", "3")).await.unwrap();
        assert_eq!(store.get_stats().await.success_rate, "0%");

        store
            .update_message_status(&m1.id, MessageStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(store.get_stats().await.success_rate, "33.3%");

        store
            .update_message_status(&m2.id, MessageStatus::Delivered)
            .await
            .unwrap();
        store
            .update_message_status(&m3.id, MessageStatus::Failed)
            .await
            .unwrap();
        let stats = store.get_stats().await;
        assert_eq!(stats.success_rate, "66.7%");
        assert_eq!(stats.messages_total, 3);
        assert_eq!(stats.messages_today, 3);
    }

    #[tokio::test]
    async fn status_update_on_unknown_id_is_none() {
        let store = RelayStore::new();
        store.create_message(new_msg("a", "1")).await.unwrap();
        let got = store
            .update_message_status(&MessageId::from("nope"), MessageStatus::Delivered)
            .await
            .unwrap();
        assert!(got.is_none());
        assert_eq!(store.get_stats().await.messages_total, 1);
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let store = RelayStore::new();
        let m = store.create_message(new_msg("a", "1")).await.unwrap();
        store
            .update_message_status(&m.id, MessageStatus::Failed)
            .await
            .unwrap();

        let err = store
            .update_message_status(&m.id, MessageStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Same-status write is accepted.
        let again = store
            .update_message_status(&m.id, MessageStatus::Failed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn relay_scenario_end_to_end() {
        let store = RelayStore::new();
        store
            .create_subscriber(NewSubscriber {
                external_id: "tg123".to_string(),
                phone_number: Some("+15551234567".to_string()),
                ..NewSubscriber::default()
            })
            .await
            .unwrap();

        let m = store
            .create_message(NewMessage {
                origin_phone: "+15551234567".to_string(),
                destination_id: "tg123".to_string(),
                body: "hi".to_string(),
            })
            .await
            .unwrap();

        let stats = store.get_stats().await;
        assert_eq!(stats.messages_total, 1);
        assert_eq!(stats.success_rate, "0%");

        store
            .update_message_status(&m.id, MessageStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(store.get_stats().await.success_rate, "100.0%");
    }

    #[tokio::test]
    async fn stats_snapshot_is_detached() {
        let store = RelayStore::new();
        let mut snap = store.get_stats().await;
        snap.total_subscribers = 42;
        assert_eq!(store.get_stats().await.total_subscribers, 0);
    }
}
