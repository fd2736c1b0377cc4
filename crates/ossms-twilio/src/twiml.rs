//! TwiML replies for the inbound SMS webhook.

pub const CONTENT_TYPE: &str = "text/xml";

/// `<Response><Message>…</Message></Response>` with `text` XML-escaped.
pub fn message_response(text: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
        escape_xml(text)
    )
}

/// Empty response: acknowledge without replying to the sender.
pub fn empty_response() -> String {
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>".to_string()
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_escaped() {
        let xml = message_response("Tom & Jerry <3");
        assert!(xml.ends_with("<Response><Message>Tom &amp; Jerry &lt;3</Message></Response>"));
    }

    #[test]
    fn empty() {
        assert!(empty_response().contains("<Response></Response>"));
    }
}
