use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db;

/// A research topic and the keywords that mark a paper as being about it.
#[derive(Debug)]
pub struct Topic {
    pub tag: &'static str,
    pub name: &'static str,
    pub keywords: &'static [&'static str],
}

pub const TOPICS: &[Topic] = &[
    Topic { tag: "Pretraining", name: "LLM pre-train", keywords: &["mid-training", "pretraining", "pre-training"] },
    Topic {
        tag: "RL",
        name: "Reinforcement learning",
        keywords: &["reinforcement learning", "RL", "RLHF", "DPO", "GRPO"],
    },
    Topic { tag: "Reasoning", name: "Reasoning", keywords: &["reasoning", "planning"] },
    Topic { tag: "Factuality", name: "Factuality, Hallucination", keywords: &["factuality", "hallucination"] },
    Topic {
        tag: "RAG",
        name: "Retrieval-Augmented Generation",
        keywords: &["RAG", "retrieval-augmented", "retrieval augmented"],
    },
    Topic { tag: "Agent", name: "Agentic AI", keywords: &["agent", "agentic", "tool use"] },
    Topic { tag: "P13N", name: "Personalization", keywords: &["personalization", "personalized"] },
    Topic { tag: "Memory", name: "Memory", keywords: &["memory"] },
    Topic { tag: "KG", name: "Knowledge Graph", keywords: &["KG", "knowledge graph"] },
    Topic { tag: "QA", name: "Question Answering", keywords: &["QA", "question answering"] },
    Topic { tag: "Recommendation", name: "Recommendation", keywords: &["recommendation", "recommender"] },
    Topic { tag: "MM", name: "Multi-Modal", keywords: &["multi-modal", "multimodal", "vision-language"] },
    Topic { tag: "Speech", name: "Speech", keywords: &["speech", "spoken"] },
    Topic { tag: "Benchmark", name: "Benchmark", keywords: &["benchmark"] },
];

/// Acronyms that would hit inside ordinary words ("RL" in "early").
const SHORT_ACRONYMS: &[&str] = &["RL", "RAG", "KG", "QA", "MM"];

enum Keyword {
    /// Case-insensitive whole-word match over title and abstract together.
    Word(Regex),
    /// Lowercase substring of the title or of the abstract.
    Substring(String),
}

impl Keyword {
    fn new(keyword: &str) -> Self {
        if keyword.chars().count() <= 3 || SHORT_ACRONYMS.contains(&keyword.to_uppercase().as_str()) {
            Keyword::Word(Regex::new(&format!(r"(?i)\b{}\b", regex::escape(keyword))).unwrap())
        } else {
            Keyword::Substring(keyword.to_lowercase())
        }
    }

    fn matches(&self, text: &MatchText) -> bool {
        match self {
            Keyword::Word(re) => re.is_match(&text.joined),
            Keyword::Substring(k) => text.title.contains(k.as_str()) || text.abstract_text.contains(k.as_str()),
        }
    }
}

struct MatchText {
    joined: String,
    title: String,
    abstract_text: String,
}

static MATCHERS: LazyLock<Vec<(&'static str, Vec<Keyword>)>> = LazyLock::new(|| {
    TOPICS
        .iter()
        .map(|t| (t.tag, t.keywords.iter().map(|k| Keyword::new(k)).collect()))
        .collect()
});

/// Topic tags for a paper, sorted.
pub fn topics_for(title: &str, abstract_text: &str) -> Vec<&'static str> {
    let text = MatchText {
        joined: format!("{title} {abstract_text}"),
        title: title.to_lowercase(),
        abstract_text: abstract_text.to_lowercase(),
    };
    let mut tags: Vec<&'static str> = MATCHERS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| k.matches(&text)))
        .map(|(tag, _)| *tag)
        .collect();
    tags.sort_unstable();
    tags
}

/// Case-insensitive lookup by tag.
pub fn find_topic(tag: &str) -> Option<&'static Topic> {
    TOPICS.iter().find(|t| t.tag.eq_ignore_ascii_case(tag.trim()))
}

pub fn join_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> String {
    tags.into_iter().collect::<Vec<_>>().join(", ")
}

pub fn split_tags(tags: &str) -> BTreeSet<String> {
    tags.split(',').map(str::trim).filter(|t| !t.is_empty()).map(String::from).collect()
}

#[derive(Debug, Clone, Copy)]
pub enum TagMode {
    /// Only papers with no tags yet.
    New,
    /// Recompute every paper's tags from scratch.
    All,
    /// Re-evaluate one topic everywhere, keeping the other tags.
    Only(&'static Topic),
}

#[derive(Debug, Default)]
pub struct TagReport {
    pub scanned: usize,
    /// Rows whose tags changed.
    pub updated: usize,
    /// Matching papers per topic among those scanned.
    pub per_topic: Vec<(&'static str, usize)>,
}

pub fn tag_papers(conn: &Connection, mode: TagMode) -> Result<TagReport> {
    let papers = db::paper_texts(conn, matches!(mode, TagMode::New))?;
    let mut report = TagReport {
        scanned: papers.len(),
        per_topic: TOPICS.iter().map(|t| (t.tag, 0)).collect(),
        ..Default::default()
    };

    let tx = conn.unchecked_transaction()?;
    for p in &papers {
        let found = topics_for(&p.title, p.abstract_text.as_deref().unwrap_or(""));
        for (tag, n) in report.per_topic.iter_mut() {
            if found.contains(&*tag) {
                *n += 1;
            }
        }

        let current = p.tags.as_deref().unwrap_or("");
        let next = match mode {
            TagMode::New | TagMode::All => join_tags(found.iter().copied()),
            TagMode::Only(topic) => {
                let mut set = split_tags(current);
                set.remove(topic.tag);
                if found.contains(&topic.tag) {
                    set.insert(topic.tag.to_string());
                }
                join_tags(set.iter().map(String::as_str))
            }
        };
        if next != current {
            debug!(id = p.id, tags = %next, "tagged");
            db::set_tags(&tx, p.id, &next)?;
            report.updated += 1;
        }
    }
    tx.commit()?;

    info!("Tagged {} of {} papers", report.updated, report.scanned);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CollectedPaper;
    use crate::parser::PaperRecord;

    #[test]
    fn acronyms_match_whole_words_only() {
        assert_eq!(topics_for("Early stopping for dense retrievers", ""), Vec::<&str>::new());
        assert_eq!(topics_for("Offline RL from human feedback", ""), vec!["RL"]);
        assert_eq!(topics_for("Leverages sparse attention", "Dragons and graphs"), Vec::<&str>::new());
        assert_eq!(topics_for("A survey", "We improve RAG pipelines."), vec!["RAG"]);
        assert_eq!(topics_for("Aligning with DPO", ""), vec!["RL"]);
    }

    #[test]
    fn longer_keywords_match_as_substrings() {
        assert_eq!(topics_for("Benchmarking Long-Context Reasoning", ""), vec!["Benchmark", "Reasoning"]);
        assert_eq!(topics_for("MULTIMODAL Speech Models", ""), vec!["MM", "Speech"]);
        assert_eq!(topics_for("Tool agents", "Multi-agent planning"), vec!["Agent", "Reasoning"]);
    }

    #[test]
    fn substrings_do_not_span_title_and_abstract() {
        assert_eq!(topics_for("Knowledge", "graph coloring"), Vec::<&str>::new());
    }

    #[test]
    fn topic_lookup() {
        assert_eq!(find_topic("kg").map(|t| t.name), Some("Knowledge Graph"));
        assert!(find_topic("Vision").is_none());
    }

    fn store(rows: &[(&str, &str)]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let papers: Vec<CollectedPaper> = rows
            .iter()
            .enumerate()
            .map(|(i, (title, snippet))| CollectedPaper {
                record: PaperRecord {
                    title: title.to_string(),
                    authors: String::new(),
                    venue: String::new(),
                    year: None,
                    snippet: snippet.to_string(),
                    link: format!("https://x/{i}"),
                },
                email_subject: "alert".into(),
                recomm_date: "2024-01-01".into(),
            })
            .collect();
        db::save_papers(&conn, &papers).unwrap();
        conn
    }

    fn tags_of(conn: &Connection, title: &str) -> String {
        conn.query_row("SELECT tags FROM papers WHERE title = ?1", [title], |r| r.get(0)).unwrap()
    }

    #[test]
    fn new_mode_only_touches_untagged_papers() {
        let conn = store(&[
            ("Question Answering over Tables", "A benchmark."),
            ("Plain Systems Paper Title", "Nothing relevant."),
        ]);
        conn.execute("UPDATE papers SET tags = 'Manual' WHERE title = 'Plain Systems Paper Title'", []).unwrap();

        let report = tag_papers(&conn, TagMode::New).unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(tags_of(&conn, "Question Answering over Tables"), "Benchmark, QA");
        assert_eq!(tags_of(&conn, "Plain Systems Paper Title"), "Manual");

        let again = tag_papers(&conn, TagMode::New).unwrap();
        assert_eq!(again.scanned, 0);
    }

    #[test]
    fn single_topic_retag_keeps_other_tags() {
        let conn = store(&[("Knowledge Graph Completion", "")]);
        conn.execute("UPDATE papers SET tags = 'Manual'", []).unwrap();

        let report = tag_papers(&conn, TagMode::Only(find_topic("KG").unwrap())).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(tags_of(&conn, "Knowledge Graph Completion"), "KG, Manual");

        tag_papers(&conn, TagMode::All).unwrap();
        assert_eq!(tags_of(&conn, "Knowledge Graph Completion"), "KG");
        assert_eq!(db::count_by_tag(&conn).unwrap(), vec![("KG".to_string(), 1)]);
    }
}
