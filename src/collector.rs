use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::{self, CollectedPaper};
use crate::enrich::{self, Enricher};
use crate::mailbox::{parse_email_date, AlertMessage, MailSource};
use crate::parser::{self, PaperRecord, Segmenter};
use crate::tags::{self, TagMode};

/// Parse one alert and, when an enricher is given, enrich each record in order.
pub async fn parse_alert_email(
    html: &str,
    segmenter: &Segmenter,
    enricher: Option<&Enricher>,
) -> Vec<PaperRecord> {
    let mut records = parser::parse_papers(html, segmenter);
    if let Some(enricher) = enricher {
        for rec in records.iter_mut() {
            let outcome = enricher.enrich(rec).await;
            debug!(title = %rec.title, outcome = outcome.label(), "enriched");
        }
    }
    records
}

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub limit: usize,
    pub concurrency: usize,
    /// Only alerts dated on or after this day. Undated alerts always pass.
    pub after: Option<NaiveDate>,
    /// Only alerts dated before this day.
    pub before: Option<NaiveDate>,
    /// Print every accepted title candidate of each alert.
    pub debug_titles: bool,
    /// Tag untagged stored papers with topics once new papers are saved.
    pub tag_topics: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        CollectOptions {
            limit: 20,
            concurrency: 1,
            after: None,
            before: None,
            debug_titles: false,
            tag_topics: true,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectStats {
    pub emails: usize,
    pub papers: usize,
    /// Titles already seen in an earlier alert of this run.
    pub duplicates: usize,
    pub saved: usize,
    /// Already in the store.
    pub skipped: usize,
    /// Enrichment attempted and failed.
    pub degraded: usize,
    /// Stored papers given topic tags after saving.
    pub tagged: usize,
}

pub struct CollectReport {
    pub stats: CollectStats,
    pub papers: Vec<CollectedPaper>,
}

/// Batch driver: list, parse in parallel, de-duplicate across alerts,
/// enrich, then save each alert's new papers as soon as they are ready.
pub async fn collect(
    source: &impl MailSource,
    segmenter: &Segmenter,
    enricher: Option<Arc<Enricher>>,
    conn: Option<&Connection>,
    opts: &CollectOptions,
) -> Result<CollectReport> {
    // With a date filter the limit counts alerts that pass it.
    let filtered = opts.after.is_some() || opts.before.is_some();
    let handles = source.list(if filtered { usize::MAX } else { opts.limit })?;
    let messages: Vec<AlertMessage> = handles
        .iter()
        .map(|h| source.load(h))
        .filter(|m| in_date_range(&m.headers.date, opts))
        .take(opts.limit)
        .collect();
    info!("{} alert(s) to process", messages.len());

    let parsed: Vec<Vec<PaperRecord>> = messages
        .par_iter()
        .map(|m| parser::parse_papers(&m.html, segmenter))
        .collect();

    let pb = ProgressBar::new(messages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut stats = CollectStats { emails: messages.len(), ..Default::default() };
    let mut seen = HashSet::new();
    let mut all = Vec::new();

    for (msg, records) in messages.iter().zip(parsed) {
        if opts.debug_titles {
            let titles = segmenter.candidate_titles(&msg.html);
            pb.println(format!("{}: {} potential paper titles", msg.handle.id, titles.len()));
            for (i, t) in titles.iter().enumerate() {
                pb.println(format!("  {}. {}", i + 1, t));
            }
        }
        let found = records.len();
        let fresh: Vec<PaperRecord> = records
            .into_iter()
            .filter(|r| seen.insert(r.title.to_lowercase()))
            .collect();
        stats.duplicates += found - fresh.len();

        let enriched: Vec<PaperRecord> = match &enricher {
            Some(e) => enrich::enrich_all(fresh, Arc::clone(e), opts.concurrency)
                .await
                .into_iter()
                .map(|(rec, outcome)| {
                    if outcome.is_degraded() {
                        stats.degraded += 1;
                    }
                    rec
                })
                .collect(),
            None => fresh,
        };

        let recomm_date = parse_email_date(&msg.headers.date);
        let papers: Vec<CollectedPaper> = enriched
            .into_iter()
            .map(|record| CollectedPaper {
                record,
                email_subject: msg.headers.subject.clone(),
                recomm_date: recomm_date.clone(),
            })
            .collect();

        if let Some(conn) = conn {
            let (saved, skipped) = db::save_papers(conn, &papers)?;
            stats.saved += saved;
            stats.skipped += skipped;
        }

        debug!(message = %msg.handle.id, papers = papers.len(), "processed alert");
        stats.papers += papers.len();
        all.extend(papers);
        pb.set_message(format!("{} papers", stats.papers));
        pb.inc(1);
    }

    pb.finish_and_clear();

    if let Some(conn) = conn {
        if opts.tag_topics && stats.saved > 0 {
            stats.tagged = tags::tag_papers(conn, TagMode::New)?.updated;
        }
    }
    info!(
        "{} alerts, {} papers ({} saved, {} already stored, {} degraded)",
        stats.emails, stats.papers, stats.saved, stats.skipped, stats.degraded
    );
    Ok(CollectReport { stats, papers: all })
}

fn in_date_range(raw_date: &str, opts: &CollectOptions) -> bool {
    let Ok(date) = NaiveDate::parse_from_str(&parse_email_date(raw_date), "%Y-%m-%d") else {
        return true;
    };
    opts.after.map_or(true, |a| date >= a) && opts.before.map_or(true, |b| date < b)
}
