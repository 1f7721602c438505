//! Inbound payload normalization
//!
//! Two upstream senders post mail to us: one as a JSON body, one as
//! multipart form fields. Both are folded into [`RawInboundPayload`] and then
//! validated into a single [`CanonicalInbound`] record. Everything here is
//! pure so it can be tested without I/O.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::models::{CanonicalInbound, OneOrMany, RawInboundPayload};
use crate::common::{normalize_address, ValidationResult};

static BARE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[^\s@<>(),;:"\[\]]+@[^\s@<>(),;:"\[\]]+$"#).expect("valid address regex")
});

static NAMED_MAILBOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:"?(?P<name>[^"<]*?)"?\s*)?<(?P<addr>[^<>\s]+)>\s*$"#)
        .expect("valid mailbox regex")
});

/// A parsed `Display Name <address>` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

pub fn is_plausible_address(value: &str) -> bool {
    BARE_ADDRESS.is_match(value.trim())
}

/// Parses `addr`, `<addr>`, `Name <addr>` or `"Name" <addr>`
pub fn parse_mailbox(raw: &str) -> Option<Mailbox> {
    let trimmed = raw.trim();
    if let Some(caps) = NAMED_MAILBOX.captures(trimmed) {
        let address = caps.name("addr")?.as_str().trim();
        if !is_plausible_address(address) {
            return None;
        }
        let name = caps
            .name("name")
            .map(|m| m.as_str().trim().to_string())
            .filter(|n| !n.is_empty());
        return Some(Mailbox {
            name,
            address: normalize_address(address),
        });
    }

    if is_plausible_address(trimmed) {
        return Some(Mailbox {
            name: None,
            address: normalize_address(trimmed),
        });
    }

    None
}

/// Splits an address list on `,`/`;` outside quoted display names
pub fn split_address_list(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }

        match ch {
            '\\' => {
                escaped = true;
                current.push(ch);
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '<' if !in_quotes => {
                in_angle = true;
                current.push(ch);
            }
            '>' if !in_quotes => {
                in_angle = false;
                current.push(ch);
            }
            ',' | ';' if !in_quotes && !in_angle => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }

    out
}

/// Display name from the local part: punctuation becomes spaces and each
/// word is capitalized. `jane.doe_smith@x.com` -> `Jane Doe Smith`.
pub fn derive_sender_name(address: &str) -> String {
    let local = address.split('@').next().unwrap_or("").trim();

    let name = local
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    if name.is_empty() {
        address.trim().to_string()
    } else {
        name
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `<ABC@host>` -> `abc@host`; empty input yields None
pub fn normalize_message_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|ch| matches!(ch, '<' | '>')).trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

/// Splits a References / In-Reply-To value into normalized ids
pub fn parse_message_id_list(raw: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let bracketed: Vec<&str> = raw
        .split('<')
        .skip(1)
        .filter_map(|part| part.split('>').next())
        .collect();

    let pieces: Vec<&str> = if bracketed.is_empty() {
        raw.split_whitespace().collect()
    } else {
        bracketed
    };

    for piece in pieces {
        if let Some(id) = normalize_message_id(piece) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Parses a raw RFC 5322 header block, unfolding continuation lines
pub fn parse_header_block(raw: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in raw.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    headers
}

fn header_lookup(headers: Option<&Value>, name: &str) -> Option<String> {
    match headers? {
        Value::Object(map) => map
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| match value {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
                _ => None,
            }),
        Value::String(raw) => parse_header_block(raw)
            .into_iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value),
        _ => None,
    }
}

/// Envelope arrives as an object (JSON sender) or a JSON string (form sender)
fn envelope_object(envelope: Option<&Value>) -> Option<Value> {
    match envelope? {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed @ Value::Object(_)) => Some(parsed),
            _ => None,
        },
        obj @ Value::Object(_) => Some(obj.clone()),
        _ => None,
    }
}

fn envelope_recipients(envelope: Option<&Value>) -> Vec<String> {
    let to = match envelope.and_then(|e| e.get("to")) {
        Some(to) => to,
        None => return Vec::new(),
    };

    let raw: Vec<String> = match to {
        Value::String(s) => split_address_list(s),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    raw.iter()
        .filter_map(|r| parse_mailbox(r))
        .map(|m| m.address)
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Folds multipart form fields into the wire payload. Unknown fields
/// (attachments, spam scores, charsets) are ignored.
pub fn payload_from_form_fields(fields: Vec<(String, String)>) -> RawInboundPayload {
    let mut payload = RawInboundPayload::default();

    for (name, value) in fields {
        match name.as_str() {
            "from" => payload.from = Some(value),
            "to" => payload.to = Some(OneOrMany::One(value)),
            "subject" => payload.subject = Some(value),
            "text" => payload.text = Some(value),
            "html" => payload.html = Some(value),
            "envelope" => payload.envelope = Some(Value::String(value)),
            "headers" => payload.headers = Some(Value::String(value)),
            "message_id" => payload.message_id = Some(value),
            "in_reply_to" => payload.in_reply_to = Some(value),
            "references" => payload.references = Some(value),
            "reply_to" => payload.reply_to = Some(value),
            "from_name" => payload.from_name = Some(value),
            _ => {}
        }
    }

    payload
}

/// Validates a wire payload into the canonical record.
///
/// `from`, `to` and `subject` are mandatory; every missing one is reported,
/// and nothing is defaulted.
pub fn normalize(payload: RawInboundPayload) -> Result<CanonicalInbound, ValidationResult> {
    let mut validation = ValidationResult::new();

    let to_raw = payload.to.as_ref().map(OneOrMany::joined);
    validation.require("from", payload.from.as_deref());
    validation.require("to", to_raw.as_deref());
    validation.require("subject", payload.subject.as_deref());

    let sender = payload.from.as_deref().and_then(parse_mailbox);
    if sender.is_none() && !validation.has_error("from") {
        validation.add_error("from", "must contain a valid email address");
    }

    let envelope = envelope_object(payload.envelope.as_ref());
    let mut recipients: Vec<String> = Vec::new();
    for address in envelope_recipients(envelope.as_ref()) {
        if !recipients.contains(&address) {
            recipients.push(address);
        }
    }

    let header_recipients: Vec<String> = to_raw
        .as_deref()
        .map(split_address_list)
        .unwrap_or_default()
        .iter()
        .filter_map(|r| parse_mailbox(r))
        .map(|m| m.address)
        .collect();
    if header_recipients.is_empty() && !validation.has_error("to") {
        validation.add_error("to", "must contain a valid email address");
    }
    for address in header_recipients {
        if !recipients.contains(&address) {
            recipients.push(address);
        }
    }

    validation.into_result()?;

    // Both are Some once validation passed
    let (sender, subject) = match (sender, payload.subject) {
        (Some(sender), Some(subject)) => (sender, subject),
        _ => {
            let mut result = ValidationResult::new();
            result.add_error("from", "is required");
            return Err(result);
        }
    };

    let from_name = non_blank(payload.from_name)
        .map(|n| n.trim().to_string())
        .or(sender.name)
        .unwrap_or_else(|| derive_sender_name(&sender.address));

    let headers = payload.headers.as_ref();

    let reply_to = non_blank(payload.reply_to)
        .or_else(|| header_lookup(headers, "Reply-To"))
        .and_then(|r| parse_mailbox(&r))
        .map(|m| m.address);

    let message_id = non_blank(payload.message_id)
        .or_else(|| header_lookup(headers, "Message-ID"))
        .and_then(|raw| normalize_message_id(&raw));

    let in_reply_to = non_blank(payload.in_reply_to)
        .or_else(|| header_lookup(headers, "In-Reply-To"))
        .and_then(|raw| parse_message_id_list(&raw).into_iter().next());

    let references = non_blank(payload.references)
        .or_else(|| header_lookup(headers, "References"))
        .map(|raw| parse_message_id_list(&raw))
        .unwrap_or_default();

    Ok(CanonicalInbound {
        from_address: sender.address,
        from_name,
        to_address: recipients[0].clone(),
        recipients,
        subject: subject.trim().to_string(),
        text: non_blank(payload.text),
        html: non_blank(payload.html),
        reply_to,
        message_id,
        in_reply_to,
        references,
        envelope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_payload(value: Value) -> RawInboundPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_derive_sender_name() {
        assert_eq!(derive_sender_name("jane.doe@example.com"), "Jane Doe");
        assert_eq!(derive_sender_name("jane_doe-smith@example.com"), "Jane Doe Smith");
        assert_eq!(derive_sender_name("recruiting+team@acme.io"), "Recruiting Team");
        assert_eq!(derive_sender_name("hr@acme.io"), "Hr");
        assert_eq!(derive_sender_name("...@acme.io"), "...@acme.io");
    }

    #[test]
    fn test_parse_mailbox_variants() {
        assert_eq!(
            parse_mailbox("Jane Doe <Jane@Example.com>"),
            Some(Mailbox {
                name: Some("Jane Doe".to_string()),
                address: "jane@example.com".to_string()
            })
        );
        assert_eq!(
            parse_mailbox("\"Doe, Jane\" <jane@example.com>").unwrap().name,
            Some("Doe, Jane".to_string())
        );
        assert_eq!(
            parse_mailbox("<hr@acme.io>"),
            Some(Mailbox {
                name: None,
                address: "hr@acme.io".to_string()
            })
        );
        assert_eq!(parse_mailbox("not an address"), None);
        assert_eq!(parse_mailbox("Jane <broken>"), None);
    }

    #[test]
    fn test_split_address_list_respects_quotes() {
        let parts = split_address_list("\"Doe, Jane\" <jane@x.com>, bob@y.com; <c@z.com>");
        assert_eq!(
            parts,
            vec!["\"Doe, Jane\" <jane@x.com>", "bob@y.com", "<c@z.com>"]
        );
    }

    #[test]
    fn test_message_id_helpers() {
        assert_eq!(
            normalize_message_id(" <ABC.123@mail.acme.io> "),
            Some("abc.123@mail.acme.io".to_string())
        );
        assert_eq!(normalize_message_id("<>"), None);
        assert_eq!(
            parse_message_id_list("<a@x> <B@y>\r\n <a@x>"),
            vec!["a@x".to_string(), "b@y".to_string()]
        );
        assert_eq!(parse_message_id_list("plain@id"), vec!["plain@id".to_string()]);
    }

    #[test]
    fn test_parse_header_block_unfolds() {
        let headers = parse_header_block(
            "Message-ID: <m1@acme.io>\nReferences: <a@x>\n <b@y>\nSubject: Hi",
        );
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[1], ("References".to_string(), "<a@x> <b@y>".to_string()));
    }

    #[test]
    fn test_normalize_json_payload() {
        let canonical = normalize(json_payload(json!({
            "from": "Acme Recruiting <Talent@Acme.io>",
            "to": "jane@mail.interviewsfirst.com",
            "subject": "  Interview invitation ",
            "text": "Hello Jane",
            "html": "",
            "envelope": {"to": ["Jane@Mail.InterviewsFirst.com"], "from": "bounce@acme.io"},
            "headers": {"Message-ID": "<MSG-1@acme.io>", "In-Reply-To": "<Q1@ses.test>"}
        })))
        .unwrap();

        assert_eq!(canonical.from_address, "talent@acme.io");
        assert_eq!(canonical.from_name, "Acme Recruiting");
        assert_eq!(canonical.to_address, "jane@mail.interviewsfirst.com");
        assert_eq!(canonical.recipients, vec!["jane@mail.interviewsfirst.com"]);
        assert_eq!(canonical.subject, "Interview invitation");
        assert_eq!(canonical.text.as_deref(), Some("Hello Jane"));
        assert_eq!(canonical.html, None);
        assert_eq!(canonical.message_id.as_deref(), Some("msg-1@acme.io"));
        assert_eq!(canonical.in_reply_to.as_deref(), Some("q1@ses.test"));
    }

    #[test]
    fn test_normalize_form_fields() {
        let payload = payload_from_form_fields(vec![
            ("from".to_string(), "mark.twain-smith@acme.io".to_string()),
            ("to".to_string(), "other@x.com, jane@mail.test".to_string()),
            ("subject".to_string(), "Offer".to_string()),
            (
                "envelope".to_string(),
                r#"{"to":["jane@mail.test"],"from":"mark.twain-smith@acme.io"}"#.to_string(),
            ),
            (
                "headers".to_string(),
                "Message-ID: <form-1@acme.io>\nReply-To: Hiring <hiring@acme.io>\n".to_string(),
            ),
            ("attachment1".to_string(), "ignored".to_string()),
        ]);

        let canonical = normalize(payload).unwrap();
        assert_eq!(canonical.from_name, "Mark Twain Smith");
        assert_eq!(canonical.to_address, "jane@mail.test");
        assert_eq!(canonical.recipients, vec!["jane@mail.test", "other@x.com"]);
        assert_eq!(canonical.reply_to.as_deref(), Some("hiring@acme.io"));
        assert_eq!(canonical.message_id.as_deref(), Some("form-1@acme.io"));
        assert!(canonical.envelope.is_some());
    }

    #[test]
    fn test_explicit_from_name_wins() {
        let canonical = normalize(json_payload(json!({
            "from": "Someone <someone@acme.io>",
            "from_name": "Acme HR",
            "to": ["a@x.com", "b@x.com"],
            "subject": "s"
        })))
        .unwrap();
        assert_eq!(canonical.from_name, "Acme HR");
        assert_eq!(canonical.recipients, vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_missing_required_fields_all_reported() {
        let err = normalize(json_payload(json!({"text": "body only"}))).unwrap_err();
        assert!(err.has_error("from"));
        assert!(err.has_error("to"));
        assert!(err.has_error("subject"));

        let err = normalize(json_payload(json!({
            "from": "a@x.com", "to": "b@x.com", "subject": "   "
        })))
        .unwrap_err();
        assert!(err.has_error("subject"));
        assert_eq!(err.errors.len(), 1);
    }

    #[test]
    fn test_unparsable_addresses_rejected() {
        let err = normalize(json_payload(json!({
            "from": "nobody", "to": "also nobody", "subject": "s"
        })))
        .unwrap_err();
        assert!(err.has_error("from"));
        assert!(err.has_error("to"));
    }
}
