use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use unicode_width::UnicodeWidthStr;

use astropost_core::truncate_chars;
use astropost_mail::{ListQuery, MailApi};
use astropost_summary::Summarizer;

use crate::scan_mod::{ScanAction, ScanState, perform};

const PREVIEW_CHARS: usize = 1500;
const KEY_HINTS: &str = "j/k move  Enter full  PgUp/PgDn scroll  a archive  r read  u unread  d trash  s summarize  g refresh  q quit";

pub(crate) fn run_scan(
    rt: &Arc<tokio::runtime::Runtime>,
    api: &dyn MailApi,
    summarizer: Option<&Summarizer>,
    query: ListQuery,
) -> Result<()> {
    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        return Err(anyhow::anyhow!("`astropost scan` requires an interactive terminal"));
    }
    let emails = rt.block_on(api.list_emails(&query))?;
    let mut state = ScanState::new(emails);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result: Result<()> = loop {
        if let Err(err) = terminal.draw(|frame| render_scan(frame, &state)) {
            break Err(err.into());
        }
        match event::poll(Duration::from_millis(250)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => break Err(err.into()),
        }
        let key = match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => key,
            Ok(_) => continue,
            Err(err) => break Err(err.into()),
        };
        let action = state.handle_key(key.code);
        match action {
            ScanAction::Quit => break Ok(()),
            ScanAction::None => {}
            action => {
                if let Some(message) = action.busy_message() {
                    state.status = message.to_string();
                    if let Err(err) = terminal.draw(|frame| render_scan(frame, &state)) {
                        break Err(err.into());
                    }
                }
                rt.block_on(perform(&mut state, action, api, summarizer, &query));
            }
        }
    };

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn render_scan(frame: &mut Frame, state: &ScanState) {
    let area = frame.area();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(2)])
        .split(area);

    if state.full_view {
        render_preview(frame, rows[0], state, usize::MAX);
    } else {
        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(rows[0]);
        render_list(frame, panes[0], state);
        render_preview(frame, panes[1], state, PREVIEW_CHARS);
    }
    render_status(frame, rows[1], state);
}

fn fit(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    for ch in text.chars() {
        if out.width() + 1 >= width {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    out
}

fn render_list(frame: &mut Frame, area: Rect, state: &ScanState) {
    let inner_width = area.width.saturating_sub(4) as usize;
    let items: Vec<ListItem> = state
        .emails
        .iter()
        .map(|email| {
            let marker = if email.is_unread() { "● " } else { "  " };
            let from = fit(&email.sender, inner_width.saturating_sub(2));
            let subject = fit(&email.subject, inner_width.saturating_sub(2));
            let date = fit(&email.date, inner_width.saturating_sub(2));
            ListItem::new(Text::from(vec![
                Line::from(vec![
                    Span::styled(marker, Style::default().fg(Color::Cyan)),
                    Span::styled(from, Style::default().add_modifier(Modifier::BOLD)),
                ]),
                Line::from(format!("  {subject}")),
                Line::from(Span::styled(
                    format!("  {date}"),
                    Style::default().fg(Color::DarkGray),
                )),
            ]))
        })
        .collect();
    let title = format!(" Unread ({}) ", state.emails.len());
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().bg(Color::Blue).fg(Color::White));
    let mut list_state = ListState::default();
    if !state.emails.is_empty() {
        list_state.select(Some(state.selected));
    }
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn render_preview(frame: &mut Frame, area: Rect, state: &ScanState, max_chars: usize) {
    let block = Block::default().borders(Borders::ALL).title(" Preview ");
    let Some(email) = state.selected_email() else {
        frame.render_widget(Paragraph::new("Inbox zero.").block(block), area);
        return;
    };
    let mut lines = vec![
        Line::from(vec![
            Span::styled("From: ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(email.sender.clone()),
        ]),
        Line::from(vec![
            Span::styled("Date: ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(email.date.clone()),
        ]),
        Line::from(vec![
            Span::styled("Subject: ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(email.subject.clone()),
        ]),
        Line::from(""),
    ];
    if let Some(summary) = &state.summary {
        lines.push(Line::from(Span::styled(
            "Summary",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
        lines.extend(summary.lines().map(|l| Line::from(l.to_string())));
        lines.push(Line::from(""));
    }
    let body = if email.body.trim().is_empty() {
        email.snippet.clone()
    } else {
        truncate_chars(&email.body, max_chars)
    };
    lines.extend(body.lines().map(|l| Line::from(l.to_string())));
    let paragraph = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((state.scroll, 0));
    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, state: &ScanState) {
    let text = Text::from(vec![
        Line::from(Span::styled(
            state.status.clone(),
            Style::default().fg(Color::Yellow),
        )),
        Line::from(Span::styled(KEY_HINTS, Style::default().fg(Color::DarkGray))),
    ]);
    frame.render_widget(Paragraph::new(text), area);
}

#[cfg(test)]
mod tests {
    use super::fit;

    #[test]
    fn fit_truncates_with_ellipsis() {
        assert_eq!(fit("short", 10), "short");
        assert_eq!(fit("a longer line", 6), "a lon…");
    }
}
