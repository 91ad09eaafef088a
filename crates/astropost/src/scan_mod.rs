use crossterm::event::KeyCode;

use astropost_core::{Email, LABEL_UNREAD};
use astropost_mail::{ListQuery, MailApi};
use astropost_summary::Summarizer;

const PAGE_LINES: u16 = 10;
/// From, Date, Subject and a blank line above the body.
const PREVIEW_HEADER_LINES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanAction {
    None,
    Quit,
    Archive,
    MarkRead,
    MarkUnread,
    Trash,
    Summarize,
    Refresh,
}

impl ScanAction {
    /// Status shown while the action is in flight, for the slow ones.
    pub(crate) fn busy_message(self) -> Option<&'static str> {
        match self {
            ScanAction::Summarize => Some("Summarizing..."),
            ScanAction::Refresh => Some("Refreshing..."),
            _ => None,
        }
    }
}

pub(crate) struct ScanState {
    pub(crate) emails: Vec<Email>,
    pub(crate) selected: usize,
    pub(crate) full_view: bool,
    /// Preview lines scrolled past; back to zero whenever the message changes.
    pub(crate) scroll: u16,
    pub(crate) status: String,
    /// LLM summary of the selected message, cleared when the selection moves.
    pub(crate) summary: Option<String>,
}

impl ScanState {
    pub(crate) fn new(emails: Vec<Email>) -> Self {
        let status = loaded_status(emails.len());
        Self {
            emails,
            selected: 0,
            full_view: false,
            scroll: 0,
            status,
            summary: None,
        }
    }

    pub(crate) fn selected_email(&self) -> Option<&Email> {
        self.emails.get(self.selected)
    }

    pub(crate) fn handle_key(&mut self, code: KeyCode) -> ScanAction {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => ScanAction::Quit,
            KeyCode::Char('j') | KeyCode::Down if self.full_view => {
                self.scroll_by(1);
                ScanAction::None
            }
            KeyCode::Char('k') | KeyCode::Up if self.full_view => {
                self.scroll_by(-1);
                ScanAction::None
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.move_selection(1);
                ScanAction::None
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.move_selection(-1);
                ScanAction::None
            }
            KeyCode::PageDown | KeyCode::Char(' ') => {
                self.scroll_by(PAGE_LINES as i32);
                ScanAction::None
            }
            KeyCode::PageUp => {
                self.scroll_by(-(PAGE_LINES as i32));
                ScanAction::None
            }
            KeyCode::Enter => {
                if self.selected_email().is_some() {
                    self.full_view = !self.full_view;
                    self.scroll = 0;
                }
                ScanAction::None
            }
            KeyCode::Char('g') => ScanAction::Refresh,
            KeyCode::Char(c) if self.selected_email().is_none() => {
                if matches!(c, 'a' | 'r' | 'u' | 'd' | 's') {
                    self.status = "Nothing selected.".to_string();
                }
                ScanAction::None
            }
            KeyCode::Char('a') => ScanAction::Archive,
            KeyCode::Char('r') => ScanAction::MarkRead,
            KeyCode::Char('u') => ScanAction::MarkUnread,
            KeyCode::Char('d') => ScanAction::Trash,
            KeyCode::Char('s') => ScanAction::Summarize,
            _ => ScanAction::None,
        }
    }

    fn move_selection(&mut self, delta: isize) {
        if self.emails.is_empty() {
            return;
        }
        let last = self.emails.len() - 1;
        let next = self.selected.saturating_add_signed(delta).min(last);
        if next != self.selected {
            self.selected = next;
            self.scroll = 0;
            self.summary = None;
        }
    }

    /// Scrolling stops with the last body line at the top of the pane.
    fn scroll_by(&mut self, delta: i32) {
        let Some(email) = self.selected_email() else {
            return;
        };
        let summary_lines = self.summary.as_ref().map_or(0, |s| s.lines().count() + 2);
        let total = PREVIEW_HEADER_LINES + summary_lines + email.body.lines().count();
        let last = i32::try_from(total.saturating_sub(1)).unwrap_or(i32::MAX);
        let next = (i32::from(self.scroll) + delta).clamp(0, last.min(i32::from(u16::MAX)));
        self.scroll = u16::try_from(next).unwrap_or(u16::MAX);
    }

    fn remove_selected(&mut self) {
        if self.selected < self.emails.len() {
            self.emails.remove(self.selected);
        }
        if self.selected >= self.emails.len() {
            self.selected = self.emails.len().saturating_sub(1);
        }
        self.full_view = false;
        self.scroll = 0;
        self.summary = None;
    }

    fn set_unread(&mut self, unread: bool) {
        let Some(email) = self.emails.get_mut(self.selected) else {
            return;
        };
        email.label_ids.retain(|label| label != LABEL_UNREAD);
        if unread {
            email.label_ids.push(LABEL_UNREAD.to_string());
        }
    }

    fn replace_emails(&mut self, emails: Vec<Email>) {
        self.emails = emails;
        self.selected = self.selected.min(self.emails.len().saturating_sub(1));
        self.full_view = false;
        self.scroll = 0;
        self.summary = None;
        self.status = loaded_status(self.emails.len());
    }
}

fn loaded_status(count: usize) -> String {
    match count {
        0 => "No unread messages.".to_string(),
        1 => "1 message.".to_string(),
        n => format!("{n} messages."),
    }
}

/// Runs one mailbox action for the selected message and records the outcome
/// in the status line. Failures never end the loop.
pub(crate) async fn perform(
    state: &mut ScanState,
    action: ScanAction,
    api: &dyn MailApi,
    summarizer: Option<&Summarizer>,
    query: &ListQuery,
) {
    if action == ScanAction::Refresh {
        match api.list_emails(query).await {
            Ok(emails) => state.replace_emails(emails),
            Err(err) => state.status = format!("Error: {err}"),
        }
        return;
    }
    let Some(email) = state.selected_email() else {
        return;
    };
    let id = email.id.clone();
    let subject = email.subject.clone();

    match action {
        ScanAction::Archive | ScanAction::Trash => {
            let (result, verb) = if action == ScanAction::Archive {
                (api.archive(&id).await, "Archived")
            } else {
                (api.trash_email(&id).await, "Trashed")
            };
            match result {
                Ok(()) => {
                    state.remove_selected();
                    state.status = format!("{verb}: {subject}");
                }
                Err(err) => state.status = format!("Error: {err}"),
            }
        }
        ScanAction::MarkRead | ScanAction::MarkUnread => {
            let unread = action == ScanAction::MarkUnread;
            let result = if unread {
                api.mark_unread(&id).await
            } else {
                api.mark_read(&id).await
            };
            match result {
                Ok(()) => {
                    state.set_unread(unread);
                    state.status = if unread {
                        format!("Marked unread: {subject}")
                    } else {
                        format!("Marked read: {subject}")
                    };
                }
                Err(err) => state.status = format!("Error: {err}"),
            }
        }
        ScanAction::Summarize => {
            let Some(summarizer) = summarizer else {
                state.status = "Summaries are not configured.".to_string();
                return;
            };
            let Some(email) = state.selected_email() else {
                return;
            };
            match summarizer.summarize_email(email).await {
                Ok(summary) => {
                    state.summary = Some(summary);
                    state.status = "Summary ready.".to_string();
                }
                Err(err) => state.status = format!("Error: {err}"),
            }
        }
        ScanAction::None | ScanAction::Quit | ScanAction::Refresh => {}
    }
}
