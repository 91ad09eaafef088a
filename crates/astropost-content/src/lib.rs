use anyhow::Result;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};

use astropost_core::AttachmentMeta;

pub mod compose;
pub mod threading;

pub use compose::{
    HtmlStyle, RenderedBody, is_full_html, render_body, render_markdown, render_verbatim_body,
    sanitize_body,
};
pub use threading::{ThreadContext, build_forward, build_reply, forward_subject, reply_subject};

pub const NO_SUBJECT: &str = "(No Subject)";
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Header and body fields of one raw RFC 822 message.
#[derive(Debug, Clone, Default)]
pub struct ParsedEmail {
    pub subject: String,
    pub sender: String,
    pub to: String,
    pub cc: String,
    pub date: String,
    pub message_id: Option<String>,
    pub references: Option<String>,
    pub body: String,
    pub attachments: Vec<AttachmentMeta>,
}

pub fn parse_email(raw: &[u8], width_cols: usize) -> Result<ParsedEmail> {
    let parsed = mailparse::parse_mail(raw)?;
    let header = |name: &str| {
        parsed
            .headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut attachments = Vec::new();
    collect_attachments(&parsed, &mut attachments)?;

    Ok(ParsedEmail {
        subject: header("Subject").unwrap_or_else(|| NO_SUBJECT.to_string()),
        sender: header("From").unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        to: header("To").unwrap_or_default(),
        cc: header("Cc").unwrap_or_default(),
        date: header("Date").unwrap_or_default(),
        message_id: header("Message-ID"),
        references: header("References"),
        body: body_from_parsed(&parsed, width_cols),
        attachments,
    })
}

/// Readable body of a message: the first inline text/plain part, else the
/// first inline text/html part converted to text, else an empty string.
pub fn extract_body(raw: &[u8], width_cols: usize) -> Result<String> {
    let parsed = mailparse::parse_mail(raw)?;
    Ok(body_from_parsed(&parsed, width_cols))
}

pub fn extract_attachments(raw: &[u8]) -> Result<Vec<AttachmentMeta>> {
    let parsed = mailparse::parse_mail(raw)?;
    let mut attachments = Vec::new();
    collect_attachments(&parsed, &mut attachments)?;
    Ok(attachments)
}

pub fn html_to_text(html: &str, width_cols: usize) -> String {
    let sanitized = sanitize_html(html);
    let text = html2text::from_read(sanitized.as_bytes(), width_cols);
    let text = html_escape::decode_html_entities(&text).to_string();
    normalize_display_text(&text).trim().to_string()
}

/// Strips CR and LF so a value cannot start a new header line.
pub fn sanitize_header(value: &str) -> String {
    value.replace(['\r', '\n'], "").trim().to_string()
}

pub fn extract_email(input: &str) -> String {
    let trimmed = input.trim();
    if let (Some(start), Some(end)) = (trimmed.find('<'), trimmed.rfind('>')) {
        if start < end {
            return trimmed[start + 1..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn body_from_parsed(parsed: &ParsedMail, width_cols: usize) -> String {
    match select_body(parsed) {
        Some(BodyPart::Text(text)) => normalize_newlines(&text).trim().to_string(),
        Some(BodyPart::Html(html)) => html_to_text(&html, width_cols),
        None => String::new(),
    }
}

enum BodyPart {
    Text(String),
    Html(String),
}

fn select_body(parsed: &ParsedMail) -> Option<BodyPart> {
    if parsed.subparts.is_empty() {
        let ctype = parsed.ctype.mimetype.to_lowercase();
        let body = parsed.get_body().ok().filter(|b| !b.trim().is_empty())?;
        return if ctype == "text/html" {
            Some(BodyPart::Html(body))
        } else if ctype.starts_with("text/") {
            Some(BodyPart::Text(body))
        } else {
            None
        };
    }

    let mut text_plain: Option<String> = None;
    let mut text_html: Option<String> = None;

    walk_parts(parsed, &mut |part| {
        if is_attachment_disposition(part) {
            return;
        }
        // Later parts replace earlier ones of the same type.
        let slot = match part.ctype.mimetype.to_lowercase().as_str() {
            "text/plain" => &mut text_plain,
            "text/html" => &mut text_html,
            _ => return,
        };
        if let Ok(body) = part.get_body() {
            if !body.trim().is_empty() {
                *slot = Some(body);
            }
        }
    });

    text_plain
        .map(BodyPart::Text)
        .or_else(|| text_html.map(BodyPart::Html))
}

fn is_attachment_disposition(part: &ParsedMail) -> bool {
    matches!(
        part.get_content_disposition().disposition,
        DispositionType::Attachment
    )
}

fn sanitize_html(html: &str) -> String {
    // ammonia drops script and style elements together with their contents.
    ammonia::Builder::default().clean(html).to_string()
}

fn walk_parts<F>(parsed: &ParsedMail, cb: &mut F)
where
    F: FnMut(&ParsedMail),
{
    cb(parsed);
    for part in &parsed.subparts {
        walk_parts(part, cb);
    }
}

fn collect_attachments(parsed: &ParsedMail, out: &mut Vec<AttachmentMeta>) -> Result<()> {
    if parsed.subparts.is_empty() {
        let ctype = parsed.ctype.mimetype.to_lowercase();
        let disposition = parsed.get_content_disposition();
        let filename = disposition
            .params
            .get("filename")
            .cloned()
            .or_else(|| parsed.ctype.params.get("name").cloned());

        let is_attachment =
            matches!(disposition.disposition, DispositionType::Attachment) || filename.is_some();

        if is_attachment {
            let body = parsed.get_body_raw()?;
            out.push(AttachmentMeta {
                filename: filename.unwrap_or_else(|| "attachment".to_string()),
                mime: ctype,
                size: body.len(),
            });
        }
        return Ok(());
    }

    for part in &parsed.subparts {
        collect_attachments(part, out)?;
    }
    Ok(())
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn normalize_display_text(text: &str) -> String {
    let normalized = normalize_newlines(text);
    let mut out_lines: Vec<&str> = Vec::new();
    let mut prev_blank = false;
    for line in normalized.split('\n') {
        let trimmed = line.trim();
        if is_horizontal_rule(trimmed) {
            continue;
        }
        let is_blank = trimmed.is_empty();
        if is_blank {
            if prev_blank {
                continue;
            }
            prev_blank = true;
            out_lines.push("");
        } else {
            prev_blank = false;
            out_lines.push(line.trim_end());
        }
    }
    out_lines.join("\n")
}

fn is_horizontal_rule(trimmed: &str) -> bool {
    let mut count = 0usize;
    for ch in trimmed.chars() {
        if ch.is_whitespace() {
            continue;
        }
        if !matches!(ch, '-' | '_' | '=' | '*' | '~' | '─' | '━') {
            return false;
        }
        count += 1;
    }
    count >= 3
}
