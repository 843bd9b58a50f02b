use std::sync::LazyLock;

use regex::Regex;

use super::blocks::TitleBlock;
use super::byline::{self, Recognizer};
use super::PaperRecord;

static FOOTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)Cited by|Related articles|All \d+ versions|Save|See all recommendations|",
        r"This message was sent by Google Scholar|List alerts|Cancel alert|",
        r"following new recommended articles|following new articles",
    ))
    .unwrap()
});
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(20\d{2})\b").unwrap());

/// Turn one segmented block into a record. Never fails: an unrecognized
/// byline leaves authors and venue empty.
pub fn extract_record(block: &TitleBlock<'_>, order: &[Recognizer]) -> PaperRecord {
    let byline = byline::recognize(block.block, order);
    let year = year_from_venue(&byline.venue);
    PaperRecord {
        title: block.title.clone(),
        authors: byline.authors,
        venue: byline.venue,
        year,
        snippet: clean_snippet(&byline.rest),
        link: block.link.clone(),
    }
}

/// Cut the text at the first footer marker ("Cited by", "Save", ...).
pub fn clean_snippet(text: &str) -> String {
    let cut = FOOTER_RE.find(text).map(|m| m.start()).unwrap_or(text.len());
    text[..cut].trim().to_string()
}

/// First 20xx year in a venue string.
pub fn year_from_venue(venue: &str) -> Option<String> {
    YEAR_RE.captures(venue).map(|c| c[1].to_string())
}
