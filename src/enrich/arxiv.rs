use std::sync::LazyLock;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::links::ARXIV_ABS_PREFIX;
use crate::config::ArxivSettings;
use crate::parser::html::flatten_text;

static SUBMITTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[Submitted on\s+(\d{1,2})\s+([A-Za-z]+)\.?\s+(\d{4})").unwrap()
});
static ABSTRACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<blockquote[^>]*class="abstract[^"]*"[^>]*>(.*?)</blockquote>"#).unwrap()
});
static DESCRIPTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<span[^>]*class="descriptor"[^>]*>.*?</span>"#).unwrap()
});

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("not an arXiv abstract URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Timeouts, connection failures, 429 and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Http(e) => e.is_timeout() || e.is_connect(),
            FetchError::InvalidUrl(_) | FetchError::Exhausted { .. } => false,
        }
    }
}

/// Minimum spacing between request starts, shared by everyone holding a reference.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        RateLimiter { interval, last: Mutex::new(None) }
    }

    /// Sleep until `interval` has passed since the previous call returned.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// What an abstract page tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsPage {
    /// `M/YYYY` of the first submission.
    pub submitted: Option<String>,
    pub abstract_text: Option<String>,
}

impl AbsPage {
    pub fn parse(html: &str) -> Self {
        AbsPage { submitted: submission_date(html), abstract_text: abstract_text(html) }
    }
}

pub struct ArxivClient {
    http: reqwest::Client,
    base_url: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ArxivClient {
    pub fn new(settings: &ArxivSettings) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(ArxivClient {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            max_attempts: settings.max_attempts.max(1),
            retry_delay: settings.retry_delay(),
        })
    }

    /// Fetch a canonical `https://arxiv.org/abs/...` page.
    ///
    /// Anything else is rejected before touching the network. Transient
    /// failures are retried with a fixed delay up to the configured attempts.
    pub async fn fetch_abs_page(&self, url: &str, limiter: &RateLimiter) -> Result<String, FetchError> {
        let id = url
            .strip_prefix(ARXIV_ABS_PREFIX)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
        let target = format!("{}/abs/{}", self.base_url, id);

        let mut attempt = 0;
        loop {
            attempt += 1;
            limiter.wait().await;
            let err = match self.fetch_once(&target).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };
            if !err.is_transient() {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                return Err(FetchError::Exhausted { attempts: attempt, last: Box::new(err) });
            }
            warn!(
                "arXiv fetch failed for {} (attempt {}/{}): {}, retrying in {:.1}s",
                id,
                attempt,
                self.max_attempts,
                err,
                self.retry_delay.as_secs_f64()
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn fetch_once(&self, target: &str) -> Result<String, FetchError> {
        let start = std::time::Instant::now();
        let resp = self.http.get(target).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { status: status.as_u16(), url: target.to_string() });
        }
        let body = resp.text().await?;
        debug!(url = target, bytes = body.len(), ms = start.elapsed().as_millis() as u64, "fetched");
        Ok(body)
    }
}

/// `[Submitted on 4 Mar 2024 ...]` → `3/2024`.
pub fn submission_date(html: &str) -> Option<String> {
    let caps = SUBMITTED_RE.captures(html)?;
    let month = &caps[2];
    let year = &caps[3];
    // Day 1 so an odd day number never hides the month.
    let date = ["%d %b %Y", "%d %B %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&format!("1 {month} {year}"), fmt).ok())?;
    Some(format!("{}/{}", date.month(), date.year()))
}

/// Abstract body with the "Abstract:" label removed and whitespace collapsed.
pub fn abstract_text(html: &str) -> Option<String> {
    let caps = ABSTRACT_RE.captures(html)?;
    let body = DESCRIPTOR_RE.replace_all(&caps[1], "");
    let text = flatten_text(&body);
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn settings(base: &str) -> ArxivSettings {
        ArxivSettings {
            base_url: base.to_string(),
            timeout_secs: 5,
            max_attempts: 3,
            retry_delay_secs: 0,
            request_delay_ms: 0,
        }
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::ZERO)
    }

    fn fixture() -> String {
        std::fs::read_to_string("tests/fixtures/arxiv_abs.html").unwrap()
    }

    #[test]
    fn parses_fixture_page() {
        let page = AbsPage::parse(&fixture());
        assert_eq!(page.submitted.as_deref(), Some("3/2024"));
        let text = page.abstract_text.unwrap();
        assert!(text.starts_with("We study how routing capacity"));
        assert!(!text.contains("Abstract:"));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn submission_dates() {
        assert_eq!(submission_date("[Submitted on 4 Mar 2024]").as_deref(), Some("3/2024"));
        assert_eq!(
            submission_date("[Submitted on 17 September 2025 (v1), last revised 2 Oct 2025]").as_deref(),
            Some("9/2025")
        );
        assert_eq!(submission_date("[Submitted on 4 Foo 2024]"), None);
        assert_eq!(submission_date("no marker"), None);
    }

    #[test]
    fn abstract_missing() {
        assert_eq!(abstract_text("<html><body>nothing</body></html>"), None);
        assert_eq!(abstract_text(r#"<blockquote class="abstract mathjax"><span class="descriptor">Abstract:</span></blockquote>"#), None);
    }

    #[test]
    fn transient_classification() {
        let status = |s| FetchError::Status { status: s, url: String::new() };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(404).is_transient());
        assert!(!FetchError::InvalidUrl("x".into()).is_transient());
    }

    #[tokio::test]
    async fn rejects_non_abs_urls_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;
        let client = ArxivClient::new(&settings(&server.uri())).unwrap();

        for url in ["https://arxiv.org/pdf/2501.15228", "http://arxiv.org/abs/2501.15228", "https://arxiv.org/abs/"] {
            let err = client.fetch_abs_page(url, &limiter()).await.unwrap_err();
            assert!(matches!(err, FetchError::InvalidUrl(_)), "{url}");
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/abs/2501.15228"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/abs/2501.15228"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture()))
            .expect(1)
            .mount(&server)
            .await;

        let client = ArxivClient::new(&settings(&server.uri())).unwrap();
        let body = client.fetch_abs_page("https://arxiv.org/abs/2501.15228", &limiter()).await.unwrap();
        assert!(body.contains("Submitted on"));
    }

    #[tokio::test]
    async fn does_not_retry_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = ArxivClient::new(&settings(&server.uri())).unwrap();
        let err = client.fetch_abs_page("https://arxiv.org/abs/2501.15228", &limiter()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = ArxivClient::new(&settings(&server.uri())).unwrap();
        let err = client.fetch_abs_page("https://arxiv.org/abs/2501.15228", &limiter()).await.unwrap_err();
        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::Status { status: 500, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(40));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.wait().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
