use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::parser::PaperRecord;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS papers (
            id          INTEGER PRIMARY KEY,
            title       TEXT NOT NULL,
            authors     TEXT,
            venue       TEXT,
            year        TEXT,
            abstract    TEXT,
            link        TEXT,
            recomm_date TEXT,
            tags        TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(title, link)
        );
        CREATE INDEX IF NOT EXISTS idx_papers_recomm ON papers(recomm_date);
        ",
    )?;
    Ok(())
}

/// A record ready for the store, tagged with the alert it came from.
#[derive(Debug, Clone, Serialize)]
pub struct CollectedPaper {
    #[serde(flatten)]
    pub record: PaperRecord,
    pub email_subject: String,
    /// `YYYY-MM-DD` when the alert's date parsed, the raw header otherwise.
    pub recomm_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredPaper {
    pub id: i64,
    pub title: String,
    pub authors: Option<String>,
    pub venue: Option<String>,
    pub year: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub link: Option<String>,
    pub recomm_date: Option<String>,
    pub tags: Option<String>,
    pub created_at: String,
}

impl StoredPaper {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StoredPaper {
            id: row.get(0)?,
            title: row.get(1)?,
            authors: row.get(2)?,
            venue: row.get(3)?,
            year: row.get(4)?,
            abstract_text: row.get(5)?,
            link: row.get(6)?,
            recomm_date: row.get(7)?,
            tags: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

const PAPER_COLUMNS: &str =
    "id, title, authors, venue, year, abstract, link, recomm_date, tags, created_at";

/// Insert one paper. `None` when `(title, link)` is already stored.
pub fn add_paper(conn: &Connection, paper: &CollectedPaper) -> Result<Option<i64>> {
    let r = &paper.record;
    let id = conn
        .query_row(
            "INSERT INTO papers (title, authors, venue, year, abstract, link, recomm_date, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '')
             ON CONFLICT(title, link) DO NOTHING
             RETURNING id",
            rusqlite::params![r.title, r.authors, r.venue, r.year, r.snippet, r.link, paper.recomm_date],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Save a batch in one transaction. Returns `(saved, skipped)`.
pub fn save_papers(conn: &Connection, papers: &[CollectedPaper]) -> Result<(usize, usize)> {
    let tx = conn.unchecked_transaction()?;
    let mut saved = 0;
    let mut skipped = 0;
    for p in papers {
        match add_paper(&tx, p)? {
            Some(_) => saved += 1,
            None => skipped += 1,
        }
    }
    tx.commit()?;
    Ok((saved, skipped))
}

pub fn count_papers(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))?)
}

pub fn fetch_recent(conn: &Connection, limit: usize) -> Result<Vec<StoredPaper>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAPER_COLUMNS} FROM papers ORDER BY recomm_date DESC, id DESC LIMIT ?1"
    ))?;
    let rows = stmt
        .query_map([limit as i64], StoredPaper::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Case-insensitive substring match on title, authors or abstract.
pub fn search_papers(conn: &Connection, query: &str, limit: usize) -> Result<Vec<StoredPaper>> {
    let pattern = format!("%{}%", query.trim());
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAPER_COLUMNS} FROM papers
         WHERE title LIKE ?1 OR authors LIKE ?1 OR abstract LIKE ?1
         ORDER BY recomm_date DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![pattern, limit as i64], StoredPaper::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Stored papers per publication year, newest first.
pub fn count_by_year(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT COALESCE(NULLIF(year, ''), '?') AS y, COUNT(*) FROM papers GROUP BY y ORDER BY y DESC",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The fields topic tagging reads.
#[derive(Debug, Clone)]
pub struct PaperText {
    pub id: i64,
    pub title: String,
    pub abstract_text: Option<String>,
    pub tags: Option<String>,
}

pub fn paper_texts(conn: &Connection, only_untagged: bool) -> Result<Vec<PaperText>> {
    let filter = if only_untagged { "WHERE tags IS NULL OR tags = ''" } else { "" };
    let mut stmt = conn.prepare(&format!("SELECT id, title, abstract, tags FROM papers {filter} ORDER BY id"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PaperText {
                id: row.get(0)?,
                title: row.get(1)?,
                abstract_text: row.get(2)?,
                tags: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_tags(conn: &Connection, id: i64, tags: &str) -> Result<()> {
    conn.execute("UPDATE papers SET tags = ?1 WHERE id = ?2", rusqlite::params![tags, id])?;
    Ok(())
}

/// Papers per tag, most common first. Tags are stored comma-separated.
pub fn count_by_tag(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare("SELECT tags FROM papers WHERE tags IS NOT NULL AND tags != ''")?;
    let all = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts: HashMap<String, i64> = HashMap::new();
    for tags in &all {
        for tag in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            *counts.entry(tag.to_string()).or_default() += 1;
        }
    }
    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(counts)
}

pub fn count_untagged(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM papers WHERE tags IS NULL OR tags = ''", [], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn paper(title: &str, link: &str, date: &str, year: Option<&str>) -> CollectedPaper {
        CollectedPaper {
            record: PaperRecord {
                title: title.into(),
                authors: "A Smith, B Lee".into(),
                venue: "Venue, 2024".into(),
                year: year.map(String::from),
                snippet: "About graphs.".into(),
                link: link.into(),
            },
            email_subject: "alert".into(),
            recomm_date: date.into(),
        }
    }

    #[test]
    fn title_link_pair_is_unique() {
        let conn = memory();
        let first = add_paper(&conn, &paper("Graph Paper Title", "https://x/1", "2024-01-02", Some("2024"))).unwrap();
        assert!(first.is_some());
        let again = add_paper(&conn, &paper("Graph Paper Title", "https://x/1", "2024-02-02", None)).unwrap();
        assert_eq!(again, None);
        let other_link = add_paper(&conn, &paper("Graph Paper Title", "https://x/2", "2024-01-02", None)).unwrap();
        assert!(other_link.is_some());
        assert_eq!(count_papers(&conn).unwrap(), 2);
    }

    #[test]
    fn batch_save_counts() {
        let conn = memory();
        let papers = vec![
            paper("First Paper Title", "https://x/1", "2024-01-01", Some("2024")),
            paper("Second Paper Title", "https://x/2", "2024-01-03", None),
            paper("First Paper Title", "https://x/1", "2024-01-01", Some("2024")),
        ];
        assert_eq!(save_papers(&conn, &papers).unwrap(), (2, 1));
    }

    #[test]
    fn recent_and_search() {
        let conn = memory();
        save_papers(
            &conn,
            &[
                paper("Older Paper On Graphs", "https://x/1", "2024-01-01", Some("2024")),
                paper("Newer Paper On Audio", "https://x/2", "2025-03-01", Some("2025")),
            ],
        )
        .unwrap();

        let recent = fetch_recent(&conn, 10).unwrap();
        assert_eq!(recent[0].title, "Newer Paper On Audio");
        assert_eq!(recent[0].abstract_text.as_deref(), Some("About graphs."));
        assert_eq!(recent[0].tags.as_deref(), Some(""));
        assert_eq!(fetch_recent(&conn, 1).unwrap().len(), 1);

        let hits = search_papers(&conn, "audio", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].link.as_deref(), Some("https://x/2"));
        assert_eq!(search_papers(&conn, "smith", 10).unwrap().len(), 2);

        assert_eq!(
            count_by_year(&conn).unwrap(),
            vec![("2025".to_string(), 1), ("2024".to_string(), 1)]
        );
    }

    #[test]
    fn tag_counts_split_stored_lists() {
        let conn = memory();
        save_papers(
            &conn,
            &[
                paper("First Paper Title", "https://x/1", "2024-01-01", None),
                paper("Second Paper Title", "https://x/2", "2024-01-02", None),
                paper("Third Paper Title", "https://x/3", "2024-01-03", None),
            ],
        )
        .unwrap();
        let texts = paper_texts(&conn, true).unwrap();
        assert_eq!(texts.len(), 3);
        set_tags(&conn, texts[0].id, "RAG, QA").unwrap();
        set_tags(&conn, texts[1].id, "QA").unwrap();

        assert_eq!(count_by_tag(&conn).unwrap(), vec![("QA".to_string(), 2), ("RAG".to_string(), 1)]);
        assert_eq!(count_untagged(&conn).unwrap(), 1);
        assert_eq!(paper_texts(&conn, true).unwrap().len(), 1);
        assert_eq!(paper_texts(&conn, false).unwrap()[0].tags.as_deref(), Some("RAG, QA"));
    }

    #[test]
    fn connect_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/papers.sqlite");
        let conn = connect(&path).unwrap();
        init_schema(&conn).unwrap();
        assert!(path.exists());
    }
}
