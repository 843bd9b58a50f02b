use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::html::{decode_entities, flatten_text};

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s+[^>]*?href\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>(.*?)</a>"#).unwrap()
});
static FORMAT_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:\[(?:PDF|HTML|BOOK|CITATION)\]\s*)+").unwrap());

/// Titles shorter than this are navigation links, not papers.
pub const MIN_TITLE_LEN: usize = 15;

/// Link texts that mark alert chrome rather than papers. Matched as whole words.
pub const SKIP_WORDS: &[&str] = &[
    "google scholar",
    "unsubscribe",
    "alert",
    "manage",
    "delete",
    "create",
    "cancel",
    "forward",
    "edit",
    "settings",
    "why this ad",
    "see all recommendations",
    "see all",
];

static DEFAULT_SKIP_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| skip_pattern(SKIP_WORDS).map(|p| Regex::new(&p).unwrap()));

/// One paper's slice of the alert: its title link and the HTML that follows it.
#[derive(Debug, Clone)]
pub struct TitleBlock<'a> {
    pub title: String,
    pub link: String,
    pub block: &'a str,
}

/// Candidate title anchor that passed the filters, with its byte span.
struct Candidate {
    title: String,
    link: String,
    start: usize,
    end: usize,
}

/// Splits alert HTML into per-paper blocks, one per title link.
#[derive(Debug, Clone)]
pub struct Segmenter {
    min_title_len: usize,
    skip_re: Option<Regex>,
}

impl Default for Segmenter {
    fn default() -> Self {
        Segmenter { min_title_len: MIN_TITLE_LEN, skip_re: DEFAULT_SKIP_RE.clone() }
    }
}

impl Segmenter {
    /// Fails when the skip list cannot be compiled, e.g. a list large enough
    /// to exceed the regex size limit.
    pub fn new<S: AsRef<str>>(min_title_len: usize, skip_words: &[S]) -> Result<Self, regex::Error> {
        let skip_re = skip_pattern(skip_words).map(|p| Regex::new(&p)).transpose()?;
        Ok(Segmenter { min_title_len, skip_re })
    }

    /// Title links in document order, filtered and de-duplicated, each with
    /// the HTML up to the next candidate link.
    pub fn segment<'a>(&self, html: &'a str) -> Vec<TitleBlock<'a>> {
        let candidates = self.candidates(html);

        let mut seen = HashSet::new();
        let mut blocks = Vec::with_capacity(candidates.len());
        for (i, cand) in candidates.iter().enumerate() {
            if !seen.insert(cand.title.to_lowercase()) {
                debug!(title = %cand.title, "duplicate title dropped");
                continue;
            }
            let end = candidates.get(i + 1).map(|next| next.start).unwrap_or(html.len());
            blocks.push(TitleBlock {
                title: cand.title.clone(),
                link: cand.link.clone(),
                block: &html[cand.end..end],
            });
        }
        blocks
    }

    /// Every accepted title in document order, duplicates included.
    pub fn candidate_titles(&self, html: &str) -> Vec<String> {
        self.candidates(html).into_iter().map(|c| c.title).collect()
    }

    fn candidates(&self, html: &str) -> Vec<Candidate> {
        ANCHOR_RE
            .captures_iter(html)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let href = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
                let title = clean_title(&caps[3]);
                if !self.is_paper_title(&title) {
                    return None;
                }
                Some(Candidate {
                    title,
                    link: decode_entities(href).trim().to_string(),
                    start: whole.start(),
                    end: whole.end(),
                })
            })
            .collect()
    }

    pub fn is_paper_title(&self, title: &str) -> bool {
        if title.is_empty() || title.chars().count() < self.min_title_len {
            return false;
        }
        match &self.skip_re {
            Some(re) => !re.is_match(&title.to_lowercase()),
            None => true,
        }
    }
}

/// Word-bounded alternation over the lowercased words. `None` for an empty
/// list, since an empty alternation matches everywhere.
fn skip_pattern<S: AsRef<str>>(skip_words: &[S]) -> Option<String> {
    let words: Vec<String> = skip_words
        .iter()
        .map(|w| w.as_ref().trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .map(|w| regex::escape(&w))
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(format!(r"\b(?:{})\b", words.join("|")))
    }
}

/// Single-line plain-text title from an anchor's inner HTML, minus any
/// `[PDF]`-style tags.
///
/// Repeated until stable, so escaped markup such as `&amp;amp;` or
/// `&lt;b&gt;` is fully reduced and cleaning a clean title is a no-op. Every
/// pass shortens the text or leaves it unchanged apart from whitespace.
pub fn clean_title(inner_html: &str) -> String {
    let mut text = inner_html.to_string();
    loop {
        let flat = flatten_text(&text);
        let next = FORMAT_TAG_RE.replace(&flat, "").trim().to_string();
        if next == text {
            return next;
        }
        text = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(html: &str) -> Vec<String> {
        Segmenter::default().segment(html).into_iter().map(|b| b.title).collect()
    }

    #[test]
    fn finds_title_links_in_order() {
        let html = r#"<a href="https://a.example/1">Graph Neural Networks at Scale</a> x
            <a href="https://a.example/2">Efficient Transformers for Long Documents</a> y"#;
        assert_eq!(
            titles(html),
            vec!["Graph Neural Networks at Scale", "Efficient Transformers for Long Documents"]
        );
    }

    #[test]
    fn short_links_are_navigation() {
        let html = r#"<a href="/x">Home</a><a href="/y">Fourteen chars</a><a href="/z">Fifteen chars!!</a>"#;
        assert_eq!(titles(html), vec!["Fifteen chars!!"]);
    }

    #[test]
    fn pdf_only_links_are_dropped_and_prefix_stripped() {
        let html = r#"<a href="https://x/pdf">[PDF]</a>
            <a href="https://x/abs"><span>[PDF]</span> Sparse Attention Revisited Again</a>"#;
        assert_eq!(titles(html), vec!["Sparse Attention Revisited Again"]);
    }

    #[test]
    fn skip_words_are_whole_word_matches() {
        let html = r#"<a href="/1">A New Approach to Video Editing</a>
            <a href="/2">Edit this alert for more results</a>
            <a href="/3">Unsubscribe from these emails</a>"#;
        assert_eq!(titles(html), vec!["A New Approach to Video Editing"]);
    }

    #[test]
    fn custom_skip_list_with_edit_keeps_editing() {
        let seg = Segmenter::new(15, &["edit"]).unwrap();
        assert!(seg.is_paper_title("A New Approach to Video Editing"));
        assert!(!seg.is_paper_title("Quickly edit your preferences"));
    }

    #[test]
    fn empty_skip_list_rejects_nothing() {
        let seg = Segmenter::new(15, &[] as &[&str]).unwrap();
        assert!(seg.is_paper_title("Unsubscribe from these emails"));
    }

    #[test]
    fn oversized_skip_list_is_an_error() {
        let words: Vec<String> = (0..200_000).map(|i| format!("{i}skip{i}word")).collect();
        assert!(Segmenter::new(15, &words).is_err());
    }

    #[test]
    fn default_matches_configured_defaults() {
        let configured = Segmenter::new(MIN_TITLE_LEN, SKIP_WORDS).unwrap();
        for title in ["A New Approach to Video Editing", "Edit this alert for more results"] {
            assert_eq!(Segmenter::default().is_paper_title(title), configured.is_paper_title(title));
        }
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let html = r#"<a href="/first">Diffusion Models for Audio</a> one
            <a href="/second">DIFFUSION MODELS FOR AUDIO</a> two"#;
        let blocks = Segmenter::default().segment(html);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].link, "/first");
        assert_eq!(blocks[0].block, " one\n            ");
    }

    #[test]
    fn candidate_titles_keep_duplicates() {
        let html = r#"<a href="/1">Diffusion Models for Audio</a><a href="/2">Diffusion Models for Audio</a>"#;
        assert_eq!(Segmenter::default().candidate_titles(html).len(), 2);
    }

    #[test]
    fn block_spans_to_next_title_and_keeps_inner_links() {
        let html = r##"<a href="/1">Paper Number One Title</a><font color="#006621">A Author - Venue, 2024</font><a href="/c">Cited by 3</a><a href="/2">Paper Number Two Title</a>tail"##;
        let blocks = Segmenter::default().segment(html);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].block.contains("#006621"));
        assert!(blocks[0].block.contains("Cited by 3"));
        assert_eq!(blocks[1].block, "tail");
    }

    #[test]
    fn href_entities_are_decoded() {
        let html = r#"<a href="https://scholar.google.com/scholar_url?url=x&amp;hl=en">Some Long Enough Paper Title</a>"#;
        let blocks = Segmenter::default().segment(html);
        assert_eq!(blocks[0].link, "https://scholar.google.com/scholar_url?url=x&hl=en");
    }

    #[test]
    fn single_quoted_href_and_multiline_inner() {
        let html = "<A class='t' HREF='/p'>Learning\n  <b>to</b> Rank Papers</A>";
        let blocks = Segmenter::default().segment(html);
        assert_eq!(blocks[0].title, "Learning to Rank Papers");
        assert_eq!(blocks[0].link, "/p");
    }

    #[test]
    fn title_cleaning_is_idempotent() {
        for raw in [
            "[PDF] [HTML] Robust Estimation Under Drift",
            "<b>[citation]</b>  Robust <i>Estimation</i> &amp; Drift",
            "Plain title with nothing to strip",
            "R&amp;amp;D Pipelines for Scholarly Search",
            "&lt;b&gt;Bold&lt;/b&gt; Claims About Sparse Models",
            "&amp;lt;i&amp;gt;Nested&amp;lt;/i&amp;gt; Escapes in Titles",
            "[PDF]&nbsp;[HTML]\n  Wrapped\tAcross   Lines Title",
            "[PDF] &#91;PDF&#93; Tag Hidden Behind Entities",
        ] {
            let once = clean_title(raw);
            assert_eq!(clean_title(&once), once, "not stable for {raw:?}");
        }
    }

    #[test]
    fn escaped_markup_is_fully_reduced() {
        assert_eq!(clean_title("R&amp;amp;D Pipelines for Scholarly Search"), "R&D Pipelines for Scholarly Search");
        assert_eq!(clean_title("&lt;b&gt;Bold&lt;/b&gt; Claims About Sparse Models"), "Bold Claims About Sparse Models");
        assert_eq!(clean_title("[PDF] &#91;PDF&#93; Tag Hidden Behind Entities"), "Tag Hidden Behind Entities");
    }

    #[test]
    fn wrapped_titles_dedup_with_unwrapped() {
        let html = "<a href=\"/a\">Learning to Rank\n   Scholarly Papers</a> one <a href=\"/b\">Learning to Rank Scholarly Papers</a> two";
        let blocks = Segmenter::default().segment(html);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].title, "Learning to Rank Scholarly Papers");
    }

    #[test]
    fn record_count_matches_distinct_candidates() {
        let html = std::fs::read_to_string("tests/fixtures/scholar_alert.html").unwrap();
        let blocks = Segmenter::default().segment(&html);
        assert_eq!(blocks.len(), 4);
    }
}
