use astropost_core::Email;

use crate::sanitize_header;

/// What a reply or forward inherits from the message it answers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadContext {
    pub thread_id: Option<String>,
    pub subject: String,
    pub quoted: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

pub fn reply_subject(original: &str) -> String {
    if original.to_lowercase().starts_with("re:") {
        original.to_string()
    } else {
        format!("Re: {}", original)
    }
}

pub fn forward_subject(original: &str) -> String {
    if original.to_lowercase().starts_with("fwd:") {
        original.to_string()
    } else {
        format!("Fwd: {}", original)
    }
}

/// A non-empty `subject` is kept as given.
pub fn build_reply(original: &Email, subject: &str) -> ThreadContext {
    let subject = if subject.trim().is_empty() {
        reply_subject(&original.subject)
    } else {
        subject.to_string()
    };
    let quoted = format!(
        "\n\nOn {}, {} wrote:\n{}",
        original.date, original.sender, original.snippet
    );

    let in_reply_to = original
        .message_id
        .as_deref()
        .map(sanitize_header)
        .filter(|id| !id.is_empty());
    let references = in_reply_to.as_ref().map(|id| {
        let prior = original.references.as_deref().unwrap_or_default();
        sanitize_header(&format!("{} {}", prior, id))
    });

    ThreadContext {
        thread_id: Some(original.thread_id.clone()).filter(|id| !id.is_empty()),
        subject,
        quoted,
        in_reply_to,
        references,
    }
}

pub fn build_forward(original: &Email, subject: &str) -> ThreadContext {
    let subject = if subject.trim().is_empty() {
        forward_subject(&original.subject)
    } else {
        subject.to_string()
    };
    let mut quoted = String::new();
    quoted.push_str("\n\n---------- Forwarded message ---------\n");
    quoted.push_str(&format!("From: {}\n", original.sender));
    quoted.push_str(&format!("Date: {}\n", original.date));
    quoted.push_str(&format!("Subject: {}\n\n", original.subject));
    quoted.push_str(&original.body);

    ThreadContext {
        subject,
        quoted,
        ..ThreadContext::default()
    }
}
