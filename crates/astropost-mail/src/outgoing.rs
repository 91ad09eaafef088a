//! Assembling outgoing messages into the raw RFC 822 bytes the send
//! endpoint expects.

use std::path::{Path, PathBuf};

use lettre::message::{Attachment, Mailbox, Message, MultiPart, SinglePart, header::ContentType};
use mailparse::{MailAddr, addrparse};
use tracing::debug;

use astropost_content::{
    HtmlStyle, ThreadContext, render_body, render_verbatim_body, sanitize_header,
};

use crate::error::{GmailError, Result};

/// A message as the user composed it, before reply/forward context is resolved.
#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub from: Option<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
    pub reply_to_id: Option<String>,
    pub forward_id: Option<String>,
    /// Send a rendered HTML alternative next to the plain part.
    pub html: bool,
    pub html_style: HtmlStyle,
    /// Skip fence unwrapping and send the body exactly as given.
    pub verbatim: bool,
}

impl OutgoingEmail {
    pub fn new(to: Vec<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to,
            subject: subject.into(),
            body: body.into(),
            html: true,
            ..Self::default()
        }
    }

    pub fn is_threaded(&self) -> bool {
        self.reply_to_id.is_some() || self.forward_id.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.to.iter().all(|addr| addr.trim().is_empty()) {
            return Err(GmailError::Compose("at least one --to recipient is required".to_string()));
        }
        if self.reply_to_id.is_some() && self.forward_id.is_some() {
            return Err(GmailError::Compose(
                "a message cannot be both a reply and a forward".to_string(),
            ));
        }
        if self.subject.trim().is_empty() && !self.is_threaded() {
            return Err(GmailError::Compose(
                "a subject is required unless replying or forwarding".to_string(),
            ));
        }
        Ok(())
    }

    /// Context for a message that starts a new thread.
    pub fn fresh_context(&self) -> ThreadContext {
        ThreadContext {
            subject: self.subject.clone(),
            ..ThreadContext::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl OutgoingAttachment {
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self {
            filename,
            mime,
            data,
        })
    }
}

/// Reads every attachment that exists. Missing paths are returned separately
/// so the caller can report them; unreadable files are an error.
pub fn load_attachments(paths: &[PathBuf]) -> Result<(Vec<OutgoingAttachment>, Vec<String>)> {
    let mut loaded = Vec::new();
    let mut skipped = Vec::new();
    for path in paths {
        if !path.exists() {
            debug!(path = %path.display(), "attachment not found, skipping");
            skipped.push(path.display().to_string());
            continue;
        }
        loaded.push(OutgoingAttachment::from_path(path)?);
    }
    Ok((loaded, skipped))
}

pub fn build_raw_message(
    email: &OutgoingEmail,
    from: &str,
    thread: &ThreadContext,
    attachments: &[OutgoingAttachment],
) -> Result<Vec<u8>> {
    let to = parse_mailboxes(&email.to)?;
    let cc = parse_mailboxes(&email.cc)?;
    let bcc = parse_mailboxes(&email.bcc)?;
    if to.is_empty() && cc.is_empty() && bcc.is_empty() {
        return Err(GmailError::Compose("no recipients".to_string()));
    }

    let mut builder = Message::builder()
        .from(parse_mailbox(from)?)
        .subject(sanitize_header(&thread.subject))
        .keep_bcc();
    for addr in to {
        builder = builder.to(addr);
    }
    for addr in cc {
        builder = builder.cc(addr);
    }
    for addr in bcc {
        builder = builder.bcc(addr);
    }
    if let Some(id) = &thread.in_reply_to {
        builder = builder.in_reply_to(id.clone());
    }
    if let Some(refs) = &thread.references {
        builder = builder.references(refs.clone());
    }

    let render = if email.verbatim {
        render_verbatim_body
    } else {
        render_body
    };
    let rendered = render(&email.body, Some(&thread.quoted), &email.html_style);
    let built = if attachments.is_empty() {
        if email.html {
            builder.multipart(MultiPart::alternative_plain_html(rendered.text, rendered.html))
        } else {
            builder.singlepart(SinglePart::plain(rendered.text))
        }
    } else {
        let mut mixed = if email.html {
            MultiPart::mixed().multipart(MultiPart::alternative_plain_html(
                rendered.text,
                rendered.html,
            ))
        } else {
            MultiPart::mixed().singlepart(SinglePart::plain(rendered.text))
        };
        for attachment in attachments {
            let mime = ContentType::parse(&attachment.mime).map_err(|e| {
                GmailError::Compose(format!("{}: {}: {e}", attachment.filename, attachment.mime))
            })?;
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone()).body(attachment.data.clone(), mime),
            );
        }
        builder.multipart(mixed)
    };

    let message = built.map_err(|e| GmailError::Compose(e.to_string()))?;
    Ok(message.formatted())
}

fn parse_mailbox(input: &str) -> Result<Mailbox> {
    let trimmed = input.trim();
    if let (Some(start), Some(end)) = (trimmed.find('<'), trimmed.rfind('>')) {
        if start < end {
            let name = trimmed[..start].trim().trim_matches('"').trim();
            let addr = trimmed[start + 1..end].trim();
            let name = Some(name.to_string()).filter(|n| !n.is_empty());
            return Ok(Mailbox::new(name, parse_address(addr)?));
        }
    }
    Ok(Mailbox::new(None, parse_address(trimmed)?))
}

fn parse_address(addr: &str) -> Result<lettre::Address> {
    addr.parse()
        .map_err(|e| GmailError::Compose(format!("invalid address {addr:?}: {e}")))
}

/// Each entry may itself be a comma separated list.
fn parse_mailboxes(entries: &[String]) -> Result<Vec<Mailbox>> {
    let mut out = Vec::new();
    for entry in entries {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed = addrparse(trimmed)
            .map_err(|e| GmailError::Compose(format!("invalid address list {trimmed:?}: {e}")))?;
        mailaddrs_to_mailboxes(&parsed, &mut out)?;
    }
    Ok(out)
}

fn mailaddrs_to_mailboxes(addrs: &[MailAddr], out: &mut Vec<Mailbox>) -> Result<()> {
    for addr in addrs {
        match addr {
            MailAddr::Single(info) => {
                out.push(Mailbox::new(info.display_name.clone(), parse_address(&info.addr)?));
            }
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    out.push(Mailbox::new(info.display_name.clone(), parse_address(&info.addr)?));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use mailparse::{MailHeaderMap, parse_mail};

    use astropost_content::ThreadContext;

    use super::{OutgoingAttachment, OutgoingEmail, build_raw_message, load_attachments};
    use crate::error::GmailError;

    fn draft() -> OutgoingEmail {
        let mut email = OutgoingEmail::new(
            vec!["Bob <bob@example.com>".to_string()],
            "Status",
            "**All** good.",
        );
        email.cc = vec!["carol@example.com, dave@example.com".to_string()];
        email.bcc = vec!["eve@example.com".to_string()];
        email
    }

    #[test]
    fn validation_rules() {
        assert!(draft().validate().is_ok());

        let mut no_subject = draft();
        no_subject.subject = "  ".to_string();
        assert!(matches!(no_subject.validate(), Err(GmailError::Compose(_))));
        no_subject.reply_to_id = Some("m1".to_string());
        assert!(no_subject.validate().is_ok());

        let mut both = draft();
        both.reply_to_id = Some("m1".to_string());
        both.forward_id = Some("m2".to_string());
        assert!(both.validate().is_err());

        let mut nobody = draft();
        nobody.to.clear();
        assert!(nobody.validate().is_err());
    }

    #[test]
    fn new_message_has_alternative_parts_and_keeps_bcc() {
        let email = draft();
        let raw = build_raw_message(&email, "Me <me@example.com>", &email.fresh_context(), &[])
            .unwrap();
        let parsed = parse_mail(&raw).unwrap();
        assert_eq!(parsed.headers.get_first_value("Subject").as_deref(), Some("Status"));
        assert!(parsed.headers.get_first_value("From").unwrap().contains("me@example.com"));
        assert!(parsed.headers.get_first_value("To").unwrap().contains("bob@example.com"));
        let cc = parsed.headers.get_first_value("Cc").unwrap();
        assert!(cc.contains("carol@example.com") && cc.contains("dave@example.com"));
        assert!(parsed.headers.get_first_value("Bcc").unwrap().contains("eve@example.com"));
        assert!(parsed.headers.get_first_value("In-Reply-To").is_none());

        assert_eq!(parsed.ctype.mimetype, "multipart/alternative");
        assert_eq!(parsed.subparts.len(), 2);
        assert_eq!(parsed.subparts[0].ctype.mimetype, "text/plain");
        assert_eq!(parsed.subparts[0].get_body().unwrap().trim(), "**All** good.");
        assert_eq!(parsed.subparts[1].ctype.mimetype, "text/html");
        assert!(parsed.subparts[1].get_body().unwrap().contains("<strong>All</strong>"));
    }

    #[test]
    fn reply_sets_threading_headers_and_quote() {
        let email = draft();
        let thread = ThreadContext {
            thread_id: Some("t1".to_string()),
            subject: "Re: Lunch".to_string(),
            quoted: "\n\nOn Mon, Alice wrote:\nnoon?".to_string(),
            in_reply_to: Some("<m1@example.com>".to_string()),
            references: Some("<m0@example.com> <m1@example.com>".to_string()),
        };
        let raw = build_raw_message(&email, "me@example.com", &thread, &[]).unwrap();
        let parsed = parse_mail(&raw).unwrap();
        assert_eq!(parsed.headers.get_first_value("Subject").as_deref(), Some("Re: Lunch"));
        assert_eq!(
            parsed.headers.get_first_value("In-Reply-To").as_deref(),
            Some("<m1@example.com>")
        );
        assert_eq!(
            parsed.headers.get_first_value("References").as_deref(),
            Some("<m0@example.com> <m1@example.com>")
        );
        let text = parsed.subparts[0].get_body().unwrap();
        assert!(text.contains("Alice wrote:"));
        assert!(parsed.subparts[1].get_body().unwrap().contains("<blockquote"));
    }

    #[test]
    fn verbatim_body_is_sent_unchanged() {
        let doc = "<html><body><pre>Notes\n```\nmake\n```\nBye</pre></body></html>";
        let mut email = OutgoingEmail::new(vec!["bob@example.com".to_string()], "Notes", doc);
        email.verbatim = true;
        let raw = build_raw_message(&email, "me@example.com", &email.fresh_context(), &[]).unwrap();
        let parsed = parse_mail(&raw).unwrap();
        let html = parsed.subparts[1].get_body().unwrap().replace("\r\n", "\n");
        assert!(html.contains("Notes\n```\nmake\n```\nBye"));
        let text = parsed.subparts[0].get_body().unwrap();
        assert!(text.contains("Notes") && text.contains("Bye"));
    }

    #[test]
    fn plain_only_message() {
        let mut email = draft();
        email.html = false;
        let raw = build_raw_message(&email, "me@example.com", &email.fresh_context(), &[]).unwrap();
        let parsed = parse_mail(&raw).unwrap();
        assert_eq!(parsed.ctype.mimetype, "text/plain");
        assert!(parsed.subparts.is_empty());
    }

    #[test]
    fn attachments_make_a_mixed_message() {
        let email = draft();
        let attachment = OutgoingAttachment {
            filename: "report.pdf".to_string(),
            mime: "application/pdf".to_string(),
            data: b"%PDF-1.4 fake".to_vec(),
        };
        let raw = build_raw_message(&email, "me@example.com", &email.fresh_context(), &[attachment])
            .unwrap();
        let parsed = parse_mail(&raw).unwrap();
        assert_eq!(parsed.ctype.mimetype, "multipart/mixed");
        assert_eq!(parsed.subparts[0].ctype.mimetype, "multipart/alternative");
        let file = &parsed.subparts[1];
        assert_eq!(file.ctype.mimetype, "application/pdf");
        assert_eq!(
            file.get_content_disposition().params.get("filename").map(String::as_str),
            Some("report.pdf")
        );
        assert_eq!(file.get_body_raw().unwrap(), b"%PDF-1.4 fake");
    }

    #[test]
    fn missing_attachments_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("notes.txt");
        std::fs::write(&present, "hello").unwrap();
        let missing = dir.path().join("gone.pdf");

        let (loaded, skipped) = load_attachments(&[present, missing.clone()]).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].filename, "notes.txt");
        assert_eq!(loaded[0].mime, "text/plain");
        assert_eq!(skipped, vec![missing.display().to_string()]);
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("blob.zzqx");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();
        let attachment = OutgoingAttachment::from_path(&path).unwrap();
        assert_eq!(attachment.mime, "application/octet-stream");
    }

    #[test]
    fn invalid_address_is_rejected() {
        let mut email = draft();
        email.to = vec!["not an address".to_string()];
        let err = build_raw_message(&email, "me@example.com", &email.fresh_context(), &[])
            .unwrap_err();
        assert!(matches!(err, GmailError::Compose(_)));
    }
}
