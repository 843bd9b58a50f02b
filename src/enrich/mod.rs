pub mod arxiv;
pub mod links;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::ArxivSettings;
use crate::parser::extract::year_from_venue;
use crate::parser::PaperRecord;
use arxiv::{AbsPage, ArxivClient, FetchError, RateLimiter};

/// What enrichment did to a record.
#[derive(Debug)]
pub enum EnrichOutcome {
    /// arXiv page fetched; abstract and venue refreshed.
    ArxivFetched,
    /// arXiv link canonicalized but the page could not be fetched.
    ArxivUnavailable(FetchError),
    /// The fetch interface refused the URL; the record is untouched.
    Rejected(FetchError),
    AcmLink,
    Unwrapped,
    Unchanged,
    /// The enrichment task died; the record is kept as parsed.
    TaskFailed,
}

impl EnrichOutcome {
    /// Enrichment was attempted and failed.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            EnrichOutcome::ArxivUnavailable(_) | EnrichOutcome::Rejected(_) | EnrichOutcome::TaskFailed
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            EnrichOutcome::ArxivFetched => "arxiv",
            EnrichOutcome::ArxivUnavailable(_) => "arxiv-unavailable",
            EnrichOutcome::Rejected(_) => "rejected",
            EnrichOutcome::AcmLink => "acm",
            EnrichOutcome::Unwrapped => "unwrapped",
            EnrichOutcome::Unchanged => "unchanged",
            EnrichOutcome::TaskFailed => "task-failed",
        }
    }
}

/// Owns the arXiv client and the rate limiter every fetch goes through.
pub struct Enricher {
    arxiv: ArxivClient,
    limiter: RateLimiter,
}

impl Enricher {
    pub fn new(settings: &ArxivSettings) -> Result<Self, FetchError> {
        Ok(Enricher {
            arxiv: ArxivClient::new(settings)?,
            limiter: RateLimiter::new(settings.request_delay()),
        })
    }

    pub fn arxiv(&self) -> &ArxivClient {
        &self.arxiv
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// arXiv first, then ACM, then a generic redirect unwrap. Never fails.
    pub async fn enrich(&self, rec: &mut PaperRecord) -> EnrichOutcome {
        if let Some(abs) = links::arxiv_abs_url(&rec.link) {
            return self.enrich_arxiv(rec, abs).await;
        }

        if let Some(acm) = links::acm_link(&rec.link) {
            rec.link = acm;
            return EnrichOutcome::AcmLink;
        }

        let unwrapped = links::unwrap_redirect(&rec.link);
        if unwrapped != rec.link {
            rec.link = unwrapped;
            EnrichOutcome::Unwrapped
        } else {
            EnrichOutcome::Unchanged
        }
    }

    async fn enrich_arxiv(&self, rec: &mut PaperRecord, abs: String) -> EnrichOutcome {
        match self.arxiv.fetch_abs_page(&abs, &self.limiter).await {
            Ok(html) => {
                let page = AbsPage::parse(&html);
                rec.link = abs;
                if let Some(text) = page.abstract_text {
                    rec.snippet = text;
                }
                set_venue(rec, update_arxiv_venue(&rec.venue, page.submitted.as_deref()));
                EnrichOutcome::ArxivFetched
            }
            Err(e @ FetchError::InvalidUrl(_)) => {
                warn!("arXiv fetch refused {}: {}", abs, e);
                EnrichOutcome::Rejected(e)
            }
            Err(e) => {
                warn!("arXiv unavailable for {:?}: {}", rec.title, e);
                rec.link = abs;
                set_venue(rec, update_arxiv_venue(&rec.venue, None));
                EnrichOutcome::ArxivUnavailable(e)
            }
        }
    }
}

fn set_venue(rec: &mut PaperRecord, venue: String) {
    rec.year = year_from_venue(&venue);
    rec.venue = venue;
}

/// `"arXiv preprint arXiv:2601.19225, 2026"` → `"arXiv, 1/2026"`.
///
/// A venue naming something other than arXiv is kept. Without a submission
/// date the month becomes `??`, taken from the year already in the venue.
pub fn update_arxiv_venue(venue: &str, submitted: Option<&str>) -> String {
    if !venue.trim().is_empty() && !venue.to_lowercase().contains("arxiv") {
        return venue.to_string();
    }
    if let Some(date) = submitted {
        return format!("arXiv, {date}");
    }
    match year_from_venue(venue) {
        Some(year) => format!("arXiv, ??/{year}"),
        None => venue.to_string(),
    }
}

/// Enrich records, `concurrency` at a time, returning them in input order.
pub async fn enrich_all(
    records: Vec<PaperRecord>,
    enricher: Arc<Enricher>,
    concurrency: usize,
) -> Vec<(PaperRecord, EnrichOutcome)> {
    if concurrency <= 1 {
        let mut out = Vec::with_capacity(records.len());
        for mut rec in records {
            let outcome = enricher.enrich(&mut rec).await;
            debug!(title = %rec.title, outcome = outcome.label(), "enriched");
            out.push((rec, outcome));
        }
        return out;
    }

    run_pool(records, concurrency, move |mut rec| {
        let enricher = Arc::clone(&enricher);
        async move {
            let outcome = enricher.enrich(&mut rec).await;
            debug!(title = %rec.title, outcome = outcome.label(), "enriched");
            (rec, outcome)
        }
    })
    .await
}

/// Spawn `task` per record behind a semaphore and await the handles in input
/// order. A task that panics yields its record unchanged with `TaskFailed`.
async fn run_pool<F, Fut>(
    records: Vec<PaperRecord>,
    concurrency: usize,
    task: F,
) -> Vec<(PaperRecord, EnrichOutcome)>
where
    F: Fn(PaperRecord) -> Fut,
    Fut: Future<Output = (PaperRecord, EnrichOutcome)> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let handles: Vec<_> = records
        .into_iter()
        .map(|rec| {
            let fallback = rec.clone();
            let sem = Arc::clone(&semaphore);
            let fut = task(rec);
            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await.ok();
                fut.await
            });
            (fallback, handle)
        })
        .collect();

    let mut out = Vec::with_capacity(handles.len());
    for (fallback, handle) in handles {
        match handle.await {
            Ok(pair) => out.push(pair),
            Err(e) => {
                warn!("enrichment task failed for {:?}: {}", fallback.title, e);
                out.push((fallback, EnrichOutcome::TaskFailed));
            }
        }
    }
    out
}
