use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static ARXIV_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{4}\.\d{4,5})").unwrap());
static DOI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(10\.\d{4,}/[^\s&?#]+)").unwrap());

pub const ARXIV_ABS_PREFIX: &str = "https://arxiv.org/abs/";

/// Destination of a `scholar.google.*/scholar_url?url=...` wrapper.
///
/// Any other link, or one that fails to parse, comes back unchanged.
pub fn unwrap_redirect(link: &str) -> String {
    let Ok(parsed) = Url::parse(link.trim()) else {
        return link.to_string();
    };
    let is_wrapper = parsed.host_str().is_some_and(|h| h.starts_with("scholar.google."))
        && parsed.path() == "/scholar_url";
    if !is_wrapper {
        return link.to_string();
    }
    parsed
        .query_pairs()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| link.to_string())
}

/// Bare arXiv id (`2501.15228`) when the link points at arXiv.
pub fn arxiv_id(link: &str) -> Option<&str> {
    if !link.to_lowercase().contains("arxiv") {
        return None;
    }
    ARXIV_ID_RE.captures(link).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Canonical `https://arxiv.org/abs/<id>` for an arXiv link, pdf or abs, wrapped or not.
pub fn arxiv_abs_url(link: &str) -> Option<String> {
    arxiv_id(link).map(|id| format!("{ARXIV_ABS_PREFIX}{id}"))
}

pub fn is_acm(link: &str) -> bool {
    link.contains("dl.acm.org")
}

/// `/doi/pdf/` becomes `/doi/abs/`; a bare `/doi/<doi>` gains `abs/`.
pub fn acm_abs_url(url: &str) -> String {
    if url.contains("/doi/pdf/") {
        url.replace("/doi/pdf/", "/doi/abs/")
    } else if url.contains("/doi/") && !url.contains("/doi/abs/") {
        url.replacen("/doi/", "/doi/abs/", 1)
    } else {
        url.to_string()
    }
}

/// Cleaned ACM abstract link, unwrapping a redirect first.
pub fn acm_link(link: &str) -> Option<String> {
    if !is_acm(link) {
        return None;
    }
    let actual = unwrap_redirect(link);
    is_acm(&actual).then(|| acm_abs_url(&actual))
}

pub fn acm_doi(url: &str) -> Option<&str> {
    DOI_RE.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str())
}
