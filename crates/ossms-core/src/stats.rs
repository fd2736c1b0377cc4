//! Aggregate statistics derived from the store collections.
//!
//! Everything here is a pure function of its inputs; the store calls
//! [`compute`] under its lock after every mutation.

use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};

use crate::domain::{AggregateStats, MessageStatus, RelayMessage, Subscriber};

/// Inputs that do not come from the collections themselves.
#[derive(Clone, Copy, Debug)]
pub struct StatsClock {
    pub now: DateTime<Utc>,
    pub day_start: DateTime<Utc>,
    pub uptime: Duration,
}

impl StatsClock {
    pub fn at(now: DateTime<Utc>, started_at: DateTime<Utc>) -> Self {
        Self {
            now,
            day_start: start_of_local_day(now.with_timezone(&Local)),
            uptime: (now - started_at).to_std().unwrap_or_default(),
        }
    }
}

pub fn compute<'a>(
    subscribers: impl IntoIterator<Item = &'a Subscriber>,
    messages: impl IntoIterator<Item = &'a RelayMessage>,
    clock: StatsClock,
) -> AggregateStats {
    let (mut total_subscribers, mut active_sessions) = (0usize, 0usize);
    for s in subscribers {
        total_subscribers += 1;
        if s.is_active {
            active_sessions += 1;
        }
    }

    let (mut messages_total, mut messages_today, mut delivered) = (0usize, 0usize, 0usize);
    for m in messages {
        messages_total += 1;
        if m.created_at >= clock.day_start {
            messages_today += 1;
        }
        if m.status == MessageStatus::Delivered {
            delivered += 1;
        }
    }

    AggregateStats {
        total_subscribers,
        messages_today,
        messages_total,
        success_rate: format_success_rate(delivered, messages_total),
        active_sessions,
        uptime: format_uptime(clock.uptime),
        last_updated: clock.now,
    }
}

/// `"<pct>%"` with one decimal, or `"0%"` while nothing has been delivered.
///
/// The zero case is always the bare `"0%"`, never `"0.0%"`: an empty store
/// and a store holding only pending or failed messages report the same value,
/// so a freshly relayed, still-pending message reads `"0%"`.
pub fn format_success_rate(delivered: usize, total: usize) -> String {
    if total == 0 || delivered == 0 {
        return "0%".to_string();
    }
    let pct = delivered as f64 / total as f64 * 100.0;
    format!("{pct:.1}%")
}

/// `"<days>d <hours>h <minutes>m"`.
pub fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let mins = (secs % 3_600) / 60;
    format!("{days}d {hours}h {mins}m")
}

/// Local midnight of `now`'s calendar day, as UTC.
pub fn start_of_local_day(now: DateTime<Local>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        // Midnight skipped by a DST jump: fall back to wall-clock arithmetic.
        None => (now - (now.naive_local() - midnight)).with_timezone(&Utc),
    }
}
