use anyhow::Result;
use serde_json::{Value as JsonValue, json};
use unicode_width::UnicodeWidthStr;

use super::CLI_SCHEMA_VERSION;

pub(crate) fn output_ok(value: JsonValue) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": true,
            "result": value
        }))?
    );
    Ok(())
}

pub(crate) fn output_error(message: &str) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": false,
            "error": message
        }))?
    );
    Ok(())
}

fn pad(cell: &str, width: usize) -> String {
    let fill = width.saturating_sub(cell.width());
    format!("{cell}{}", " ".repeat(fill))
}

fn rule(widths: &[usize], left: char, mid: char, right: char) -> String {
    let mut line = String::new();
    line.push(left);
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            line.push(mid);
        }
        line.push_str(&"─".repeat(width + 2));
    }
    line.push(right);
    line
}

/// Boxed table with a centered title line. Cells are expected to be single
/// line; callers truncate them beforehand.
pub(crate) fn render_table(title: &str, headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.width()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.width());
        }
    }
    let total = widths.iter().map(|w| w + 3).sum::<usize>() + 1;

    let mut out = Vec::with_capacity(rows.len() + 5);
    let indent = total.saturating_sub(title.width()) / 2;
    out.push(format!("{}{}", " ".repeat(indent), title));
    out.push(rule(&widths, '┌', '┬', '┐'));
    let header_cells: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| pad(h, *w))
        .collect();
    out.push(format!("│ {} │", header_cells.join(" │ ")));
    out.push(rule(&widths, '├', '┼', '┤'));
    for row in rows {
        let cells: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(i, w)| pad(row.get(i).map(String::as_str).unwrap_or(""), *w))
            .collect();
        out.push(format!("│ {} │", cells.join(" │ ")));
    }
    out.push(rule(&widths, '└', '┴', '┘'));
    out.join("\n")
}

/// Box around free text, sized to its widest line, with the title set into
/// the top border.
pub(crate) fn render_panel(title: &str, body: &str) -> String {
    let lines: Vec<String> = body
        .lines()
        .map(|line| line.replace('\t', "    "))
        .collect();
    let title_width = title.width() + 2;
    let inner = lines
        .iter()
        .map(|l| l.width())
        .max()
        .unwrap_or(0)
        .max(title_width);

    let lead = (inner + 2 - title_width) / 2;
    let trail = inner + 2 - title_width - lead;
    let mut out = Vec::with_capacity(lines.len() + 2);
    out.push(format!(
        "╭{} {title} {}╮",
        "─".repeat(lead),
        "─".repeat(trail)
    ));
    for line in &lines {
        out.push(format!("│ {} │", pad(line, inner)));
    }
    out.push(format!("╰{}╯", "─".repeat(inner + 2)));
    out.join("\n")
}

/// Upper-cases the first letter of every alphabetic run and lower-cases the
/// rest, so `o'neil` becomes `O'Neil`.
pub(crate) fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_alpha = false;
    for ch in input.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

pub(crate) fn batch_subject(stem: &str, prefix: &str) -> String {
    let name = stem.strip_prefix(prefix).unwrap_or(stem).replace('_', " ");
    format!("Update for {}", title_case(&name))
}

pub(crate) fn format_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MB", (bytes as f64 / (1024.0 * 1024.0)).round() as usize)
    } else if bytes >= 1024 {
        format!("{} KB", (bytes as f64 / 1024.0).round() as usize)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use unicode_width::UnicodeWidthStr;

    use super::{batch_subject, format_size, render_panel, render_table, title_case};

    #[test]
    fn title_case_follows_word_runs() {
        assert_eq!(title_case("john doe"), "John Doe");
        assert_eq!(title_case("MARY-ann o'neil"), "Mary-Ann O'Neil");
        assert_eq!(title_case("3rd floor"), "3Rd Floor");
    }

    #[test]
    fn batch_subject_strips_prefix() {
        assert_eq!(batch_subject("email_to_jane_smith", "email_to_"), "Update for Jane Smith");
        assert_eq!(batch_subject("notes", "email_to_"), "Update for Notes");
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3 MB");
    }

    #[test]
    fn table_rows_share_width() {
        let rows = vec![
            vec!["abc".to_string(), "Zoë".to_string()],
            vec!["a".to_string(), "longer subject".to_string()],
        ];
        let out = render_table("Latest 2 Emails", &["ID", "Subject"], &rows);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0].trim(), "Latest 2 Emails");
        let width = lines[1].width();
        assert!(lines[1..].iter().all(|l| l.width() == width));
        assert!(out.contains("│ ID  │ Subject        │"));
    }

    #[test]
    fn panel_wraps_body() {
        let out = render_panel("Email ID: 1", "From: a@b.c\n\nhello");
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].contains(" Email ID: 1 "));
        assert_eq!(lines.len(), 5);
        let width = lines[0].width();
        assert!(lines.iter().all(|l| l.width() == width));
    }
}
