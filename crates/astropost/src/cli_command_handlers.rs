use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use astropost_core::{Email, Label, truncate_chars};
use astropost_mail::{
    Authenticator, GmailClient, ListQuery, MailApi, OutgoingEmail, StoredToken, TokenStore,
};
use astropost_summary::{NO_EMAILS, Summarizer};
use serde_json::json;
use tracing::{info, warn};

use super::{
    AppConfig, AuthCommand, BatchArgs, CliCommand, IdsArgs, ListArgs, SendArgs, batch_subject,
    format_size, output_ok, render_panel, render_table,
};
use crate::scan_ui_mod::run_scan;

const DEFAULT_SCAN_QUERY: &str = "is:unread in:inbox";

pub(crate) fn run_cli(
    rt: &Arc<tokio::runtime::Runtime>,
    command: CliCommand,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    match command {
        CliCommand::List(args) => {
            let query = list_query(&args, config.list.default_count);
            let client = connect(rt, config)?;
            let emails = rt.block_on(client.list_emails(&query))?;
            print_emails(&emails, json)
        }
        CliCommand::Search(args) => {
            let query = ListQuery::search(args.query, args.count);
            let client = connect(rt, config)?;
            let emails = rt.block_on(client.list_emails(&query))?;
            print_emails(&emails, json)
        }
        CliCommand::Show(args) => {
            let client = connect(rt, config)?;
            let email = rt.block_on(client.get_email(&args.id))?;
            if json {
                return output_ok(serde_json::to_value(&email)?);
            }
            let title = format!("Email ID: {}", email.id);
            println!("{}", render_panel(&title, &email_panel_body(&email)));
            if args.attachments {
                println!("{}", attachment_listing(&email));
            }
            Ok(())
        }
        CliCommand::Send(args) => run_send(rt, args, config, json),
        CliCommand::Archive(args) => run_label_command(rt, config, LabelAction::Archive, args, json),
        CliCommand::Unread(args) => run_label_command(rt, config, LabelAction::Unread, args, json),
        CliCommand::Read(args) => run_label_command(rt, config, LabelAction::Read, args, json),
        CliCommand::Trash(args) => run_label_command(rt, config, LabelAction::Trash, args, json),
        CliCommand::Labels => {
            let client = connect(rt, config)?;
            let labels = rt.block_on(client.list_labels())?;
            if json {
                return output_ok(json!(labels));
            }
            println!("{}", labels_table(&labels));
            Ok(())
        }
        CliCommand::Batch(args) => run_batch(rt, args, config, json),
        CliCommand::Auth(cmd) => run_auth(rt, cmd.command, config, json),
        CliCommand::Scan(args) => {
            if json {
                bail!("scan is interactive and cannot be combined with --json");
            }
            let query = ListQuery::search(
                args.query.unwrap_or_else(|| DEFAULT_SCAN_QUERY.to_string()),
                args.count,
            );
            let client = connect(rt, config)?;
            let summarizer = optional_summarizer(config);
            run_scan(rt, &client, summarizer.as_ref(), query)
        }
        CliCommand::Summarize(args) => {
            let query = match args.query {
                Some(q) => ListQuery::search(q, args.count),
                None => ListQuery::inbox(args.count),
            };
            let summarizer = Summarizer::new(config.summary_config()?)?;
            let client = connect(rt, config)?;
            let emails = rt.block_on(client.list_emails(&query))?;
            let summary = if emails.is_empty() {
                NO_EMAILS.to_string()
            } else {
                rt.block_on(summarizer.summarize_inbox(&emails))?
            };
            if json {
                return output_ok(json!({ "count": emails.len(), "summary": summary }));
            }
            println!("{summary}");
            Ok(())
        }
    }
}

fn connect(rt: &Arc<tokio::runtime::Runtime>, config: &AppConfig) -> Result<GmailClient> {
    let auth = Authenticator::new(config.auth_settings());
    Ok(rt.block_on(GmailClient::connect(auth, config.api_base.as_deref()))?)
}

/// Scan still works without an LLM; `s` then reports that summaries are off.
fn optional_summarizer(config: &AppConfig) -> Option<Summarizer> {
    let built = config
        .summary_config()
        .and_then(|c| Ok(Summarizer::new(c)?));
    match built {
        Ok(summarizer) => Some(summarizer),
        Err(err) => {
            warn!(error = %err, "summaries disabled");
            None
        }
    }
}

/// `-l` takes label names, which only the search syntax resolves for user
/// labels, so labels always become `label:` terms.
fn list_query(args: &ListArgs, default_count: usize) -> ListQuery {
    let mut terms: Vec<String> = Vec::new();
    if let Some(q) = args.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        terms.push(q.to_string());
    }
    if args.unread {
        terms.push("is:unread".to_string());
    }
    for label in args.labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        if label.contains(char::is_whitespace) {
            terms.push(format!("label:\"{label}\""));
        } else {
            terms.push(format!("label:{label}"));
        }
    }
    let max_results = args.count.unwrap_or(default_count);
    if terms.is_empty() {
        return ListQuery::inbox(max_results);
    }
    ListQuery::search(terms.join(" "), max_results)
}

fn email_rows(emails: &[Email]) -> Vec<Vec<String>> {
    emails
        .iter()
        .map(|email| {
            vec![
                email.id.clone(),
                truncate_chars(&email.date, 25),
                truncate_chars(&email.sender, 40),
                truncate_chars(&email.subject, 60),
            ]
        })
        .collect()
}

fn print_emails(emails: &[Email], json: bool) -> Result<()> {
    if json {
        return output_ok(json!({ "count": emails.len(), "emails": emails }));
    }
    if emails.is_empty() {
        println!("No emails found.");
        return Ok(());
    }
    let title = format!("Latest {} Emails", emails.len());
    println!(
        "{}",
        render_table(&title, &["ID", "Date", "From", "Subject"], &email_rows(emails))
    );
    Ok(())
}

fn email_panel_body(email: &Email) -> String {
    format!(
        "From: {}\nDate: {}\nSubject: {}\n\n{}",
        email.sender, email.date, email.subject, email.body
    )
}

fn attachment_listing(email: &Email) -> String {
    if email.attachments.is_empty() {
        return "No attachments.".to_string();
    }
    let mut out = format!("Attachments ({}):", email.attachments.len());
    for attachment in &email.attachments {
        out.push_str(&format!(
            "\n  - {} ({}, {})",
            attachment.filename,
            attachment.mime,
            format_size(attachment.size)
        ));
    }
    out
}

fn labels_table(labels: &[Label]) -> String {
    let rows: Vec<Vec<String>> = labels
        .iter()
        .map(|label| vec![label.id.clone(), label.name.clone(), label.kind.clone()])
        .collect();
    render_table(&format!("{} Labels", labels.len()), &["ID", "Name", "Type"], &rows)
}

fn read_body(args: &SendArgs) -> Result<String> {
    match &args.file {
        Some(path) => {
            if !path.is_file() {
                bail!("Body file {} not found.", path.display());
            }
            Ok(std::fs::read_to_string(path)?)
        }
        None => Ok(args.body.clone().unwrap_or_default()),
    }
}

fn outgoing_from_args(args: SendArgs, body: String, config: &AppConfig) -> OutgoingEmail {
    let mut email = OutgoingEmail::new(args.to, args.subject.unwrap_or_default(), body);
    email.cc = args.cc;
    email.bcc = args.bcc;
    email.from = args.from.or_else(|| config.send.from.clone());
    email.attachments = args.attachments;
    email.reply_to_id = args.reply_to;
    email.forward_id = args.forward;
    email.html = config.send.html;
    email.html_style = config.html_style();
    email
}

fn run_send(
    rt: &Arc<tokio::runtime::Runtime>,
    args: SendArgs,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    let body = read_body(&args)?;
    let yes = args.yes;
    let email = outgoing_from_args(args, body, config);
    if email.body.trim().is_empty() && !email.is_threaded() && !yes {
        eprintln!("Warning: Sending email with empty body.");
    }
    for path in &email.attachments {
        if !path.exists() {
            eprintln!("Warning: Attachment {} not found. Skipping.", path.display());
        }
    }
    email.validate()?;

    let client = connect(rt, config)?;
    let receipt = rt.block_on(client.send_email(&email))?;
    if json {
        return output_ok(json!(receipt));
    }
    println!("Email sent successfully! ID: {}", receipt.id);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelAction {
    Archive,
    Unread,
    Read,
    Trash,
}

impl LabelAction {
    fn name(self) -> &'static str {
        match self {
            LabelAction::Archive => "archive",
            LabelAction::Unread => "unread",
            LabelAction::Read => "read",
            LabelAction::Trash => "trash",
        }
    }

    fn done_message(self, id: &str) -> String {
        match self {
            LabelAction::Archive => format!("Archived email {id}."),
            LabelAction::Unread => format!("Marked email {id} as unread."),
            LabelAction::Read => format!("Marked email {id} as read."),
            LabelAction::Trash => format!("Moved email {id} to trash."),
        }
    }

    async fn apply(self, api: &dyn MailApi, id: &str) -> astropost_mail::Result<()> {
        match self {
            LabelAction::Archive => api.archive(id).await,
            LabelAction::Unread => api.mark_unread(id).await,
            LabelAction::Read => api.mark_read(id).await,
            LabelAction::Trash => api.trash_email(id).await,
        }
    }
}

/// Applies the action to every id, collecting failures instead of stopping.
async fn apply_to_all(
    api: &dyn MailApi,
    action: LabelAction,
    ids: &[String],
) -> (Vec<String>, Vec<(String, String)>) {
    let mut done = Vec::new();
    let mut failed = Vec::new();
    for id in ids {
        match action.apply(api, id).await {
            Ok(()) => {
                info!(action = action.name(), %id, "label change applied");
                done.push(id.clone());
            }
            Err(err) => failed.push((id.clone(), err.to_string())),
        }
    }
    (done, failed)
}

fn run_label_command(
    rt: &Arc<tokio::runtime::Runtime>,
    config: &AppConfig,
    action: LabelAction,
    args: IdsArgs,
    json: bool,
) -> Result<()> {
    let client = connect(rt, config)?;
    let (done, failed) = rt.block_on(apply_to_all(&client, action, &args.ids));
    if !json {
        for id in &done {
            println!("{}", action.done_message(id));
        }
        for (id, err) in &failed {
            eprintln!("Failed to {} {id}: {err}", action.name());
        }
    }
    if !failed.is_empty() {
        let detail: Vec<String> = failed.iter().map(|(id, err)| format!("{id}: {err}")).collect();
        bail!(
            "{} of {} emails could not be updated ({})",
            failed.len(),
            args.ids.len(),
            detail.join("; ")
        );
    }
    if json {
        return output_ok(json!({ "action": action.name(), "ids": done }));
    }
    Ok(())
}

/// `<prefix>*.txt` files in `dir`, sorted by name.
fn batch_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Directory {} not found.", dir.display());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path.extension().is_some_and(|ext| ext == "txt")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn batch_html(text: &str) -> String {
    format!(
        "<html><body><pre>{}</pre></body></html>",
        html_escape::encode_text(text)
    )
}

fn run_batch(
    rt: &Arc<tokio::runtime::Runtime>,
    args: BatchArgs,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    let files = batch_files(&args.dir, &args.prefix)?;
    if files.is_empty() {
        if json {
            return output_ok(json!({ "dry_run": args.dry_run, "messages": [] }));
        }
        println!("No email text files found in {}", args.dir.display());
        return Ok(());
    }

    let client = if args.dry_run {
        None
    } else {
        Some(connect(rt, config)?)
    };
    let mut results = Vec::with_capacity(files.len());
    for path in &files {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        let subject = batch_subject(stem, &args.prefix);
        let Some(client) = &client else {
            if !json {
                println!(
                    "DRY RUN: Would send email to '{}' with subject '{}' from file '{}'",
                    args.to, subject, file_name
                );
            }
            results.push(json!({ "file": file_name, "subject": subject }));
            continue;
        };
        let text = std::fs::read_to_string(path)?;
        let mut email = OutgoingEmail::new(vec![args.to.clone()], subject.clone(), batch_html(&text));
        email.from = config.send.from.clone();
        email.verbatim = true;
        let receipt = rt.block_on(client.send_email(&email))?;
        if !json {
            println!("Sent '{}' to {} (ID: {})", subject, args.to, receipt.id);
        }
        results.push(json!({ "file": file_name, "subject": subject, "id": receipt.id }));
    }
    if json {
        return output_ok(json!({ "dry_run": args.dry_run, "messages": results }));
    }
    Ok(())
}

fn describe_expiry(token: &StoredToken) -> String {
    match token.expiry {
        Some(expiry) if token.is_expired() => format!("{} (expired)", expiry.to_rfc3339()),
        Some(expiry) => expiry.to_rfc3339(),
        None => "unknown".to_string(),
    }
}

fn run_auth(
    rt: &Arc<tokio::runtime::Runtime>,
    command: AuthCommand,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    let settings = config.auth_settings();
    match command {
        AuthCommand::Login => {
            let auth = Authenticator::new(settings);
            auth.store().delete()?;
            let token = rt.block_on(auth.authorize_and_save())?;
            let path = auth.store().path().display().to_string();
            if json {
                return output_ok(json!({ "token_path": path, "scopes": token.scopes }));
            }
            println!("Authorized. Token saved to {path}");
            Ok(())
        }
        AuthCommand::Status => {
            let store = TokenStore::new(settings.token_path.clone());
            let path = store.path().display().to_string();
            let Some(token) = store.load()? else {
                if json {
                    return output_ok(json!({ "token_path": path, "present": false }));
                }
                println!("No token stored at {path}. Run `astropost auth login`.");
                return Ok(());
            };
            let refreshable = token.refresh_token.is_some();
            if json {
                return output_ok(json!({
                    "token_path": path,
                    "present": true,
                    "expiry": token.expiry,
                    "expired": token.is_expired(),
                    "refreshable": refreshable,
                    "scopes": token.scopes,
                }));
            }
            println!("Token: {path}");
            println!("Expiry: {}", describe_expiry(&token));
            println!("Refreshable: {}", if refreshable { "yes" } else { "no" });
            println!("Scopes:");
            for scope in &token.scopes {
                println!("  - {scope}");
            }
            Ok(())
        }
        AuthCommand::Logout => {
            let store = TokenStore::new(settings.token_path.clone());
            let path = store.path().display().to_string();
            let existed = store.path().exists();
            store.delete()?;
            if json {
                return output_ok(json!({ "token_path": path, "removed": existed }));
            }
            if existed {
                println!("Removed token at {path}");
            } else {
                println!("No token stored at {path}.");
            }
            Ok(())
        }
    }
}
