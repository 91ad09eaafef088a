//! Turning a composed body into the plain and HTML parts of an outgoing message.

use std::sync::OnceLock;

use html_escape::{encode_double_quoted_attribute, encode_text};
use pulldown_cmark::{Event, Options, Parser, html};
use regex::Regex;

use astropost_core::DEFAULT_TEXT_WIDTH;

use crate::html_to_text;

const DEFAULT_FONT_FAMILY: &str = "Arial, sans-serif";
const QUOTE_STYLE: &str = "border-left: 2px solid #ccc; padding-left: 10px; color: #555;";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlStyle {
    pub font_family: String,
}

impl Default for HtmlStyle {
    fn default() -> Self {
        Self {
            font_family: DEFAULT_FONT_FAMILY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBody {
    pub text: String,
    pub html: String,
}

fn fenced_block() -> Option<&'static Regex> {
    static FENCED: OnceLock<Option<Regex>> = OnceLock::new();
    FENCED
        .get_or_init(|| Regex::new(r"(?s)```(?:\w+)?\n(.*?)```").ok())
        .as_ref()
}

/// Unwraps the first fenced code block if there is one, otherwise trims.
/// Generated drafts often arrive wrapped in a fence.
pub fn sanitize_body(text: &str) -> String {
    if let Some(inner) = fenced_block()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
    {
        return inner.as_str().trim().to_string();
    }
    text.trim().to_string()
}

pub fn is_full_html(text: &str) -> bool {
    let lower = text.trim_start().to_ascii_lowercase();
    lower.starts_with("<!doctype html") || lower.starts_with("<html")
}

/// Markdown to an HTML fragment. Single newlines become `<br />`.
pub fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(text, options).map(|event| match event {
        Event::SoftBreak => Event::HardBreak,
        other => other,
    });
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

pub fn quoted_html(quoted: &str) -> String {
    let escaped = encode_text(quoted).replace('\n', "<br>");
    format!("<br><br><blockquote style='{QUOTE_STYLE}'>{escaped}</blockquote>")
}

pub fn wrap_html(content: &str, style: &HtmlStyle) -> String {
    let font_family = style.font_family.trim();
    let font_family = if font_family.is_empty() {
        DEFAULT_FONT_FAMILY
    } else {
        font_family
    };
    let body_style = format!("font-family: {font_family}; line-height: 1.6; color: #333;");
    format!(
        "<html><body style=\"{}\"><div style=\"max-width: 600px; margin: 0 auto;\">{}</div></body></html>",
        encode_double_quoted_attribute(&body_style),
        content
    )
}

/// Builds both alternatives for a message body. `quoted` is the reply or
/// forward block appended after the new content.
pub fn render_body(body: &str, quoted: Option<&str>, style: &HtmlStyle) -> RenderedBody {
    render_clean_body(sanitize_body(body), quoted, style)
}

/// Like [`render_body`] but the body is used as given, fences included.
pub fn render_verbatim_body(body: &str, quoted: Option<&str>, style: &HtmlStyle) -> RenderedBody {
    render_clean_body(body.to_string(), quoted, style)
}

fn render_clean_body(clean: String, quoted: Option<&str>, style: &HtmlStyle) -> RenderedBody {
    let quoted = quoted.filter(|q| !q.is_empty());

    if is_full_html(&clean) {
        let mut text = html_to_text(&clean, DEFAULT_TEXT_WIDTH);
        let mut html = clean.clone();
        if let Some(quoted) = quoted {
            text.push_str(quoted);
            let block = quoted_html(quoted);
            match html.to_ascii_lowercase().rfind("</body>") {
                Some(pos) => html.insert_str(pos, &block),
                None => html.push_str(&block),
            }
        }
        return RenderedBody { text, html };
    }

    let mut text = clean.clone();
    let mut fragment = render_markdown(&clean);
    if let Some(quoted) = quoted {
        text.push_str(quoted);
        fragment.push_str(&quoted_html(quoted));
    }
    RenderedBody {
        text,
        html: wrap_html(&fragment, style),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        HtmlStyle, is_full_html, quoted_html, render_body, render_markdown, render_verbatim_body,
        sanitize_body,
    };

    #[test]
    fn sanitize_extracts_fenced_block() {
        let text = "Sure, here is the draft:\n```markdown\nHi Bob,\n\nSee you Friday.\n```\nLet me know.";
        assert_eq!(sanitize_body(text), "Hi Bob,\n\nSee you Friday.");
    }

    #[test]
    fn sanitize_handles_bare_fence_and_plain_text() {
        assert_eq!(sanitize_body("```\nbody\n```"), "body");
        assert_eq!(sanitize_body("  just text \n"), "just text");
        assert_eq!(sanitize_body("```no newline```"), "```no newline```");
    }

    #[test]
    fn full_html_detection_ignores_case_and_leading_space() {
        assert!(is_full_html("  <!DOCTYPE html><html></html>"));
        assert!(is_full_html("<HTML><body>x</body></HTML>"));
        assert!(!is_full_html("<h1>Hello</h1>"));
    }

    #[test]
    fn markdown_renders_emphasis_tables_and_line_breaks() {
        let html = render_markdown("**bold** line\nnext line\n\n| a | b |\n|---|---|\n| 1 | 2 |");
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("<br />"));
        assert!(html.contains("<table>"));
    }

    #[test]
    fn inline_html_passes_through_markdown() {
        let html = render_markdown("<h1>Hello</h1>\n\nThis is **HTML**.");
        assert!(html.contains("<h1>Hello</h1>"));
    }

    #[test]
    fn quoted_block_escapes_and_breaks_lines() {
        let block = quoted_html("\n\nOn Mon, A <a@x.com> wrote:\nhi");
        assert!(block.starts_with("<br><br><blockquote style='border-left: 2px solid #ccc;"));
        assert!(block.contains("A &lt;a@x.com&gt; wrote:<br>hi"));
    }

    #[test]
    fn render_body_wraps_markdown_and_appends_quote() {
        let rendered = render_body("Thanks!", Some("\n\nOn Mon, A wrote:\nhello"), &HtmlStyle::default());
        assert_eq!(rendered.text, "Thanks!\n\nOn Mon, A wrote:\nhello");
        assert!(rendered.html.starts_with("<html><body style=\"font-family: Arial, sans-serif;"));
        assert!(rendered.html.contains("<p>Thanks!</p>"));
        assert!(rendered.html.contains("<blockquote"));
        assert!(rendered.html.ends_with("</div></body></html>"));
    }

    #[test]
    fn render_body_keeps_full_html_documents() {
        let doc = "<!doctype html><html><body><p>Report</p></body></html>";
        let rendered = render_body(doc, Some("\n\nquoted"), &HtmlStyle::default());
        assert!(rendered.html.starts_with("<!doctype html>"));
        assert!(rendered.html.contains("<blockquote"));
        assert!(rendered.html.ends_with("</body></html>"));
        assert!(rendered.text.contains("Report"));
        assert!(rendered.text.ends_with("quoted"));
    }

    #[test]
    fn custom_font_family_is_used() {
        let style = HtmlStyle {
            font_family: "Georgia, serif".to_string(),
        };
        let rendered = render_body("x", None, &style);
        assert!(rendered.html.contains("font-family: Georgia, serif;"));
    }

    #[test]
    fn verbatim_body_keeps_fenced_blocks_in_place() {
        let doc = "<html><body><pre>Weekly report\nAll systems nominal.\n```\ncargo test\n```\nThanks</pre></body></html>";
        let rendered = render_verbatim_body(doc, None, &HtmlStyle::default());
        assert_eq!(rendered.html, doc);
        assert!(rendered.text.contains("Weekly report"));
        assert!(rendered.text.contains("cargo test"));
        assert!(rendered.text.contains("Thanks"));

        let unwrapped = render_body(doc, None, &HtmlStyle::default());
        assert!(!unwrapped.text.contains("Weekly report"));
    }
}
