use chrono::{DateTime, Utc};
use serde_json::Value;

use nous_review::flashcards::{Card, PracticeState};

/// ANSI color codes
#[allow(dead_code)]
pub struct Color;

#[allow(dead_code)]
impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";
}

pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

/// Render the question side of a card
pub fn render_front(card: &Card, use_color: bool) -> String {
    match card.data.as_ref() {
        Some(data) => render_field(data, &["front", "question", "text"], use_color)
            .unwrap_or_else(|| render_json(data)),
        None => paint("(no content)", Color::GRAY, use_color),
    }
}

/// Render the answer side of a card, if it has one
pub fn render_back(card: &Card, use_color: bool) -> Option<String> {
    card.data
        .as_ref()
        .and_then(|data| render_field(data, &["back", "answer"], use_color))
}

fn render_field(data: &Value, keys: &[&str], use_color: bool) -> Option<String> {
    let markup = keys
        .iter()
        .find_map(|key| data.get(*key).and_then(|v| v.as_str()))?;
    Some(wrap(&card_text(markup, use_color), "  ", 80).join("\n"))
}

fn render_json(data: &Value) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
}

pub fn state_label(state: PracticeState) -> String {
    match state {
        PracticeState::New => "new".to_string(),
        PracticeState::Learning { step } => format!("learning (step {})", step + 1),
        PracticeState::Due => "review".to_string(),
        PracticeState::Deleted => "deleted".to_string(),
    }
}

/// Human-friendly distance from `now` to `due`
pub fn describe_due(due: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = due - now;
    if delta.num_seconds() < 60 {
        "now".to_string()
    } else if delta.num_minutes() < 60 {
        format!("in {}m", delta.num_minutes())
    } else if delta.num_hours() < 24 {
        format!("in {}h", delta.num_hours())
    } else {
        format!("in {}d", delta.num_days())
    }
}

/// Flatten a card field's markup into terminal text.
///
/// Line-breaking tags become newlines, bold and underlined runs are
/// highlighted when color is on, and every other tag is dropped.
fn card_text(markup: &str, use_color: bool) -> String {
    let mut text = String::with_capacity(markup.len());
    let mut chars = markup.chars();

    while let Some(ch) = chars.next() {
        if ch != '<' {
            text.push(ch);
            continue;
        }
        let tag: String = chars.by_ref().take_while(|&c| c != '>').collect();
        let closing = tag.starts_with('/');
        let name = tag
            .trim_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match name.as_str() {
            "br" => text.push('\n'),
            "div" | "p" | "li" if closing => text.push('\n'),
            "b" | "strong" | "u" if use_color => {
                text.push_str(if closing { Color::RESET } else { Color::CYAN });
            }
            _ => {}
        }
    }

    // &amp; last, so "&amp;lt;" stays a literal "&lt;"
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim_end()
        .to_string()
}

/// Columns a string takes up on screen, ignoring ANSI escapes
fn visible_width(s: &str) -> usize {
    let mut width = 0;
    let mut in_escape = false;
    for ch in s.chars() {
        match ch {
            '\x1b' => in_escape = true,
            'm' if in_escape => in_escape = false,
            _ if in_escape => {}
            _ => width += 1,
        }
    }
    width
}

/// Word-wrap to `width` visible columns, indenting every non-empty line
fn wrap(text: &str, indent: &str, width: usize) -> Vec<String> {
    let room = width.saturating_sub(indent.len()).max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut line = String::new();
        let mut used = 0;
        for word in paragraph.split_whitespace() {
            let word_width = visible_width(word);
            if used > 0 && used + 1 + word_width > room {
                lines.push(format!("{}{}", indent, line));
                line.clear();
                used = 0;
            }
            if used > 0 {
                line.push(' ');
                used += 1;
            }
            line.push_str(word);
            used += word_width;
        }
        if line.is_empty() {
            lines.push(String::new());
        } else {
            lines.push(format!("{}{}", indent, line));
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_render_front_prefers_front_field() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let card = Card::new(1, 1, now)
            .with_data(serde_json::json!({ "front": "<b>hola</b> &amp; adios", "back": "hello" }));

        assert_eq!(render_front(&card, false), "  hola & adios");
        assert_eq!(render_back(&card, false).as_deref(), Some("  hello"));
    }

    #[test]
    fn test_describe_due() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(describe_due(now, now), "now");
        assert_eq!(describe_due(now + Duration::minutes(10), now), "in 10m");
        assert_eq!(describe_due(now + Duration::hours(5), now), "in 5h");
        assert_eq!(describe_due(now + Duration::days(4), now), "in 4d");
    }

    #[test]
    fn test_wrap_long_line() {
        let text = "word ".repeat(30);
        let lines = wrap(text.trim(), "  ", 20);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.len() <= 20));
    }

    #[test]
    fn test_card_text_breaks_lines_and_decodes_once() {
        let text = card_text("<div>one</div><div>two<br/>three</div>&amp;lt;", false);
        assert_eq!(text, "one\ntwo\nthree\n&lt;");
    }

    #[test]
    fn test_bold_is_highlighted_only_with_color() {
        let plain = card_text("a <b>key</b> term", false);
        assert_eq!(plain, "a key term");

        let colored = card_text("a <b>key</b> term", true);
        assert_eq!(colored, format!("a {}key{} term", Color::CYAN, Color::RESET));
        // Escapes do not count towards the wrap width
        assert_eq!(visible_width(&colored), plain.len());
    }
}
