//! Formatting utilities (Telegram HTML for relayed messages).

use chrono::{DateTime, Local, Utc};

use crate::domain::{MessageStatus, RelayMessage};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Local wall-clock time for chat output.
pub fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn local_date(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

/// Chat notification for a relayed SMS.
pub fn sms_notification_html(from: &str, body: &str, at: DateTime<Utc>) -> String {
    format!(
        "📱 <b>New SMS Message</b>\n\n\
From: {}\n\
Time: {}\n\n\
Message:\n{}",
        escape_html(from),
        local_time(at),
        escape_html(body)
    )
}

pub fn status_icon(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Pending => "⏳",
        MessageStatus::Delivered => "✅",
        MessageStatus::Failed => "❌",
    }
}

/// One line per message for `/history`.
pub fn history_html(messages: &[RelayMessage], preview_len: usize) -> String {
    if messages.is_empty() {
        return "📭 No messages yet.".to_string();
    }

    let mut lines = vec![format!("📜 <b>Last {} messages</b>\n", messages.len())];
    for m in messages {
        lines.push(format!(
            "{} <code>{}</code> from {}\n{}",
            status_icon(m.status),
            local_time(m.created_at),
            escape_html(&m.origin_phone),
            escape_html(&truncate_text(&m.body, preview_len))
        ));
    }
    lines.join("\n")
}

pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

/// Split chat HTML into chunks of at most `limit` bytes.
///
/// Breaks at line boundaries. A single over-long line is cut at a char
/// boundary, moved back so it never lands inside an entity (`&amp;`) or a tag.
/// Generated HTML never spans a tag across lines.
pub fn split_html_lines(html: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if html.len() <= limit {
        return vec![html.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();
    for line in html.split_inclusive('\n') {
        if chunk.len() + line.len() > limit && !chunk.is_empty() {
            out.push(std::mem::take(&mut chunk));
        }
        let mut rest = line;
        while rest.len() > limit {
            let cut = markup_safe_cut(rest, limit);
            out.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        chunk.push_str(rest);
    }
    if !chunk.trim().is_empty() {
        out.push(chunk);
    }
    out
}

fn markup_safe_cut(s: &str, max: usize) -> usize {
    let cut = floor_char_boundary(s, max);
    let head = &s[..cut];
    let open = match (head.rfind('&'), head.rfind('<')) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    match open {
        Some(i) if i > 0 && !head[i..].contains([';', '>']) => i,
        _ => cut,
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut idx = max.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    if idx == 0 {
        // First char alone is wider than `max`.
        s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
    } else {
        idx
    }
}
