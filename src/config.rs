use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::parser::blocks::{MIN_TITLE_LEN, SKIP_WORDS};
use crate::parser::Segmenter;

pub const CONFIG_FILE: &str = "scholar_alerts.toml";
const ENV_PREFIX: &str = "SCHOLAR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub mail_dir: PathBuf,
    /// Records enriched at once; 1 means strictly sequential.
    pub concurrency: usize,
    pub arxiv: ArxivSettings,
    pub parser: ParserSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/papers.sqlite"),
            mail_dir: PathBuf::from("data/alerts"),
            concurrency: 1,
            arxiv: ArxivSettings::default(),
            parser: ParserSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArxivSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub request_delay_ms: u64,
}

impl Default for ArxivSettings {
    fn default() -> Self {
        ArxivSettings {
            base_url: "https://arxiv.org".into(),
            timeout_secs: 30,
            max_attempts: 3,
            retry_delay_secs: 5,
            request_delay_ms: 500,
        }
    }
}

impl ArxivSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    pub min_title_len: usize,
    pub skip_words: Vec<String>,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            min_title_len: MIN_TITLE_LEN,
            skip_words: SKIP_WORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ParserSettings {
    pub fn segmenter(&self) -> Result<Segmenter> {
        Segmenter::new(self.min_title_len, &self.skip_words)
            .with_context(|| format!("compiling {} parser.skip_words", self.skip_words.len()))
    }
}

/// `scholar_alerts.toml` in the working directory (optional), then `SCHOLAR_*` env vars.
pub fn load() -> Result<Settings> {
    load_from(Path::new(CONFIG_FILE), env_source())
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("parser.skip_words")
        .try_parsing(true)
}

fn load_from(file: &Path, env: Environment) -> Result<Settings> {
    let settings = Config::builder()
        .add_source(File::from(file).required(false))
        .add_source(env)
        .build()
        .with_context(|| format!("reading configuration from {}", file.display()))?;
    settings
        .try_deserialize()
        .context("invalid configuration")
}
