pub mod blocks;
pub mod byline;
pub mod extract;
pub mod html;

use serde::Serialize;

pub use blocks::Segmenter;
use byline::Recognizer;

/// One paper found in an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaperRecord {
    pub title: String,
    pub authors: String,
    pub venue: String,
    pub year: Option<String>,
    pub snippet: String,
    pub link: String,
}

/// Two-pass pipeline: HTML → title blocks → records. No network access.
pub fn parse_papers(html: &str, segmenter: &Segmenter) -> Vec<PaperRecord> {
    segmenter
        .segment(html)
        .iter()
        .map(|b| extract::extract_record(b, Recognizer::DEFAULT_ORDER))
        .collect()
}
