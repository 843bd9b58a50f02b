mod collector;
mod config;
mod db;
mod enrich;
mod mailbox;
mod parser;
mod tags;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;

use collector::CollectOptions;
use enrich::arxiv::AbsPage;
use enrich::{links, Enricher};
use mailbox::Mailbox;
use parser::PaperRecord;

#[derive(Parser)]
#[command(name = "scholar_alerts", about = "Collect papers from Google Scholar alert emails")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse every alert in the mail directory, enrich and optionally save
    Collect {
        /// Max alerts to process
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Directory of .eml/.html alerts (default: from settings)
        #[arg(long)]
        mail_dir: Option<PathBuf>,
        /// Only alerts dated on or after this day (YYYY-MM-DD)
        #[arg(long)]
        after: Option<NaiveDate>,
        /// Only alerts dated before this day (YYYY-MM-DD)
        #[arg(long)]
        before: Option<NaiveDate>,
        /// Skip arXiv/ACM/redirect enrichment
        #[arg(long)]
        no_enrich: bool,
        /// Save papers to the SQLite store
        #[arg(long)]
        save: bool,
        /// Path to the SQLite store (default: from settings)
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Print every paper found
        #[arg(long)]
        print: bool,
        /// Print papers as JSON instead
        #[arg(long)]
        json: bool,
        /// Records enriched at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Print every detected title candidate
        #[arg(long)]
        debug_titles: bool,
        /// Do not tag newly saved papers with topics
        #[arg(long)]
        skip_tags: bool,
    },
    /// Parse a single .eml or .html alert file
    Parse {
        file: PathBuf,
        #[arg(long)]
        no_enrich: bool,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        debug_titles: bool,
    },
    /// Fetch an arXiv abstract page and show its date and abstract
    Arxiv { url: String },
    /// Show the cleaned ACM abstract link and DOI for a URL
    Acm { url: String },
    /// Most recently recommended stored papers
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Search stored papers by title, authors or abstract
    Search {
        query: String,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Tag stored papers with topics by keyword (default: only untagged papers)
    Tag {
        /// Recompute tags for every paper
        #[arg(long, conflicts_with = "topic")]
        all: bool,
        /// Re-evaluate a single topic, keeping other tags
        #[arg(long)]
        topic: Option<String>,
    },
    /// Show store statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = config::load()?;

    let result = match cli.command {
        Commands::Collect {
            limit,
            mail_dir,
            after,
            before,
            no_enrich,
            save,
            db_path,
            print,
            json,
            concurrency,
            debug_titles,
            skip_tags,
        } => {
            let mailbox = Mailbox::new(mail_dir.unwrap_or_else(|| settings.mail_dir.clone()));
            let segmenter = settings.parser.segmenter()?;
            let enricher = if no_enrich {
                None
            } else {
                Some(Arc::new(Enricher::new(&settings.arxiv)?))
            };
            let conn = if save {
                let path = db_path.unwrap_or_else(|| settings.db_path.clone());
                let conn = db::connect(&path)?;
                db::init_schema(&conn)?;
                println!("Database: {}", path.display());
                Some(conn)
            } else {
                None
            };
            let opts = CollectOptions {
                limit,
                concurrency: concurrency.unwrap_or(settings.concurrency).max(1),
                after,
                before,
                debug_titles,
                tag_topics: !skip_tags,
            };

            println!("Mail directory: {}", mailbox.dir().display());
            let report = collector::collect(&mailbox, &segmenter, enricher, conn.as_ref(), &opts).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report.papers)?);
            } else if print {
                for (i, p) in report.papers.iter().enumerate() {
                    print_paper(i + 1, &p.record);
                    println!("    Alert:   {} ({})", p.email_subject, p.recomm_date);
                }
            }

            let s = &report.stats;
            println!("\nAlerts processed:   {}", s.emails);
            println!("Papers found:       {}", s.papers);
            println!("Repeated titles:    {}", s.duplicates);
            if conn.is_some() {
                println!("Saved:              {}", s.saved);
                println!("Already stored:     {}", s.skipped);
                if !skip_tags {
                    println!("Tagged:             {}", s.tagged);
                }
            }
            if s.degraded > 0 {
                println!("Enrichment failed:  {}", s.degraded);
            }
            Ok(())
        }
        Commands::Parse { file, no_enrich, json, debug_titles } => {
            let msg = mailbox::load_file(&file);
            if msg.html.is_empty() {
                println!("No HTML body in {}", file.display());
                return Ok(());
            }
            let segmenter = settings.parser.segmenter()?;
            if debug_titles {
                let titles = segmenter.candidate_titles(&msg.html);
                println!("Found {} potential paper titles:", titles.len());
                for (i, t) in titles.iter().enumerate() {
                    println!("  {}. {}", i + 1, truncate(t, 80));
                }
                println!();
            }

            let enricher = if no_enrich { None } else { Some(Enricher::new(&settings.arxiv)?) };
            let papers = collector::parse_alert_email(&msg.html, &segmenter, enricher.as_ref()).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&papers)?);
            } else {
                if !msg.headers.subject.is_empty() {
                    println!("{} ({})\n", msg.headers.subject, mailbox::parse_email_date(&msg.headers.date));
                }
                for (i, p) in papers.iter().enumerate() {
                    print_paper(i + 1, p);
                }
                println!("\n{} papers", papers.len());
            }
            Ok(())
        }
        Commands::Arxiv { url } => {
            let abs = links::arxiv_abs_url(&url).unwrap_or(url);
            let enricher = Enricher::new(&settings.arxiv)?;
            println!("Fetching: {}", abs);
            let html = enricher
                .arxiv()
                .fetch_abs_page(&abs, enricher.limiter())
                .await
                .with_context(|| format!("fetching {abs}"))?;
            let page = AbsPage::parse(&html);
            println!("Fetched {} bytes\n", html.len());
            println!("ID:       {}", links::arxiv_id(&abs).unwrap_or("-"));
            println!("Date:     {}", page.submitted.as_deref().unwrap_or("-"));
            println!("Abstract:\n{}", page.abstract_text.as_deref().unwrap_or("-"));
            Ok(())
        }
        Commands::Acm { url } => {
            let Some(abs) = links::acm_link(&url) else {
                anyhow::bail!("not an ACM Digital Library link: {url}");
            };
            println!("Abstract: {}", abs);
            println!("DOI:      {}", links::acm_doi(&abs).unwrap_or("-"));
            Ok(())
        }
        Commands::List { limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_recent(&conn, limit)?;
            if rows.is_empty() {
                println!("No papers stored. Run 'collect --save' first.");
                return Ok(());
            }
            print_table(&rows);
            Ok(())
        }
        Commands::Search { query, limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let rows = db::search_papers(&conn, &query, limit)?;
            if rows.is_empty() {
                println!("No papers match {:?}.", query);
                return Ok(());
            }
            print_table(&rows);
            Ok(())
        }
        Commands::Tag { all, topic } => {
            let mode = match topic {
                Some(name) => match tags::find_topic(&name) {
                    Some(t) => tags::TagMode::Only(t),
                    None => {
                        let valid: Vec<_> = tags::TOPICS.iter().map(|t| t.tag).collect();
                        anyhow::bail!("unknown topic {:?}; valid topics: {}", name, valid.join(", "));
                    }
                },
                None if all => tags::TagMode::All,
                None => tags::TagMode::New,
            };
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let report = tags::tag_papers(&conn, mode)?;
            if report.scanned == 0 {
                println!("No papers to tag.");
                return Ok(());
            }
            for topic in tags::TOPICS {
                let n = report.per_topic.iter().find(|(tag, _)| *tag == topic.tag).map_or(0, |(_, n)| *n);
                if n > 0 {
                    println!("  {:<15} {:<32} {}", topic.tag, topic.name, n);
                }
            }
            println!("\nScanned {} papers, updated {}", report.scanned, report.updated);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            println!("Database: {}", settings.db_path.display());
            println!("Papers:   {}", db::count_papers(&conn)?);
            let by_year = db::count_by_year(&conn)?;
            if !by_year.is_empty() {
                println!("\n--- By year ---");
                for (year, n) in by_year {
                    println!("  {:>4}: {}", year, n);
                }
            }
            let by_tag = db::count_by_tag(&conn)?;
            if !by_tag.is_empty() {
                println!("\n--- By topic ---");
                for (tag, n) in by_tag {
                    println!("  {:<15} {}", tag, n);
                }
                println!("  {:<15} {}", "(no topic)", db::count_untagged(&conn)?);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        info!("Done in {}", format_duration(elapsed));
    }

    result
}

fn print_paper(n: usize, p: &PaperRecord) {
    println!("[{}] {}", n, p.title);
    if !p.authors.is_empty() {
        println!("    Authors: {}", p.authors);
    }
    if !p.venue.is_empty() {
        println!("    Venue:   {}", p.venue);
    }
    println!("    Link:    {}", p.link);
    if !p.snippet.is_empty() {
        println!("    Snippet: {}", truncate(&p.snippet, 200));
    }
}

fn print_table(rows: &[db::StoredPaper]) {
    println!(
        "{:>5} | {:<10} | {:<50} | {:<24} | {:<20}",
        "ID", "Date", "Title", "Authors", "Venue"
    );
    println!("{}", "-".repeat(121));
    for r in rows {
        println!(
            "{:>5} | {:<10} | {:<50} | {:<24} | {:<20}",
            r.id,
            truncate(r.recomm_date.as_deref().unwrap_or("-"), 10),
            truncate(&r.title, 47),
            truncate(r.authors.as_deref().unwrap_or(""), 21),
            truncate(r.venue.as_deref().unwrap_or(""), 17),
        );
    }
    println!("\n{} papers", rows.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
