use std::sync::LazyLock;

use regex::Regex;

use super::html::strip_html;

static FONT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<font[^>]*color=["']#006621["'][^>]*>(.*?)</font>"#).unwrap()
});
static SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<span[^>]*style=["'][^"']*color:\s*#006621[^"']*["'][^>]*>(.*?)</span>"#)
        .unwrap()
});
// "T Poppi, B Uzkent, A Garg - Journal, 2026" with an optional trailing ellipsis.
static STRUCTURAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^([A-Z][A-Za-z\u{00C0}-\u{017F}]*\s+[A-Za-z\u{00C0}-\u{017F}]+",
        r"(?:,\s*[A-Z][A-Za-z\u{00C0}-\u{017F}]*\s+[A-Za-z\u{00C0}-\u{017F}]+)*",
        r"(?:,?\s*(?:…|\.\.\.))?)",
        r"\s*-\s*(.+?,\s*\d{4})",
    ))
    .unwrap()
});

/// Ways an alert template lays out the "authors - venue, year" line.
///
/// Tried in [`Recognizer::DEFAULT_ORDER`]; a new template gets a new variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recognizer {
    /// Green `<font>`/`<span>` region used by Scholar alerts.
    StyledRegion,
    /// Name list, dash, `venue, YYYY` at the start of the block text.
    Structural,
    /// First text line split on `" - "`.
    FirstLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Byline {
    pub authors: String,
    pub venue: String,
    /// Plain text after the byline, the source of the snippet.
    pub rest: String,
    /// `None` when no recognizer matched and `rest` is the whole block.
    pub matched: Option<Recognizer>,
}

impl Recognizer {
    pub const DEFAULT_ORDER: &'static [Recognizer] =
        &[Recognizer::StyledRegion, Recognizer::Structural, Recognizer::FirstLine];

    pub fn recognize(self, block: &str) -> Option<Byline> {
        let (authors, venue, rest) = match self {
            Recognizer::StyledRegion => styled_region(block)?,
            Recognizer::Structural => structural(&strip_html(block))?,
            Recognizer::FirstLine => first_line(&strip_html(block))?,
        };
        Some(Byline { authors, venue, rest, matched: Some(self) })
    }
}

/// Run recognizers in order; the first match wins.
pub fn recognize(block: &str, order: &[Recognizer]) -> Byline {
    order
        .iter()
        .find_map(|r| r.recognize(block))
        .unwrap_or_else(|| Byline {
            authors: String::new(),
            venue: String::new(),
            rest: strip_html(block),
            matched: None,
        })
}

fn styled_region(block: &str) -> Option<(String, String, String)> {
    let caps = FONT_RE.captures(block).or_else(|| SPAN_RE.captures(block))?;
    let region = caps.get(0)?;
    let (authors, venue) = split_byline(&strip_html(&caps[1]));
    let rest = strip_html(&block[region.end()..]);
    Some((authors, venue, rest))
}

fn structural(text: &str) -> Option<(String, String, String)> {
    let caps = STRUCTURAL_RE.captures(text)?;
    let end = caps.get(0)?.end();
    Some((
        caps[1].trim().to_string(),
        caps[2].trim().to_string(),
        text[end..].trim().to_string(),
    ))
}

fn first_line(text: &str) -> Option<(String, String, String)> {
    let (line, rest) = text.split_once('\n').unwrap_or((text, ""));
    let (authors, venue) = line.split_once(" - ")?;
    Some((authors.trim().to_string(), venue.trim().to_string(), rest.trim().to_string()))
}

fn split_byline(text: &str) -> (String, String) {
    match text.split_once(" - ") {
        Some((authors, venue)) => (authors.trim().to_string(), venue.trim().to_string()),
        None => (text.trim().to_string(), String::new()),
    }
}
