// src/services/email.rs
//! Reply templates for thread replies

use html_escape::{encode_safe, encode_text};

/// The message being answered, as shown in the quoted block
#[derive(Debug, Clone)]
pub struct QuotedMessage<'a> {
    pub from_name: Option<&'a str>,
    pub from_address: &'a str,
    pub received_at: &'a str,
    pub text: Option<&'a str>,
    pub html: Option<&'a str>,
}

/// Prefix with a single `Re: `, leaving an existing one alone
pub fn reply_subject(original: &str) -> String {
    let trimmed = original.trim();
    let already = trimmed
        .get(..3)
        .map(|p| p.eq_ignore_ascii_case("re:"))
        .unwrap_or(false);
    if already {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

/// Plain text to HTML paragraphs, escaped
pub fn text_to_html(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", encode_text(p).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn quote_header(quoted: &QuotedMessage<'_>) -> String {
    let who = match quoted.from_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{} &lt;{}&gt;", encode_text(name), encode_text(quoted.from_address)),
        None => encode_text(quoted.from_address).to_string(),
    };
    format!("On {}, {} wrote:", encode_text(quoted.received_at), who)
}

/// Reply body followed by the quoted original. The original's HTML is never
/// embedded as markup; its text (or escaped HTML source) is quoted.
pub fn render_reply_html(reply_html: &str, quoted: &QuotedMessage<'_>) -> String {
    let quoted_body = match (quoted.text, quoted.html) {
        (Some(text), _) if !text.trim().is_empty() => text_to_html(text),
        (_, Some(html)) => format!("<pre>{}</pre>", encode_safe(html)),
        _ => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .quote {{ border-left: 3px solid #ccc; margin: 16px 0 0 0; padding-left: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="reply">
{}
    </div>
    <div class="quote">
        <p>{}</p>
{}
    </div>
</body>
</html>"#,
        reply_html,
        quote_header(quoted),
        quoted_body
    )
}

/// Text part of a reply with `>` quoting
pub fn render_reply_text(reply_text: &str, quoted: &QuotedMessage<'_>) -> String {
    let sender = match quoted.from_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{} <{}>", name, quoted.from_address),
        None => quoted.from_address.to_string(),
    };
    let mut out = format!(
        "{}\n\nOn {}, {} wrote:\n",
        reply_text.trim_end(),
        quoted.received_at,
        sender
    );
    if let Some(text) = quoted.text {
        for line in text.lines() {
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
