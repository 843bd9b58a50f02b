use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate};
use regex::{Captures, Regex};
use tracing::{debug, warn};

static ISO_DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static US_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap());
static LOOSE_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})\s+([A-Za-z]{3})[A-Za-z]*\s+(\d{4})").unwrap());
static ENCODED_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=\?([^?]+)\?([BbQq])\?([^?]*)\?=").unwrap());
static ENCODED_GAP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\?=)\s+(=\?)").unwrap());

/// Opaque reference to one stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub id: String,
    path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
}

#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub handle: MessageHandle,
    pub headers: MessageHeaders,
    /// HTML body, empty when the message has none.
    pub html: String,
}

/// Where alert emails come from.
pub trait MailSource {
    /// Up to `limit` handles, oldest first.
    fn list(&self, limit: usize) -> Result<Vec<MessageHandle>>;

    /// Headers and HTML of one message. A malformed message yields an empty body.
    fn load(&self, handle: &MessageHandle) -> AlertMessage;
}

/// A directory of saved alerts: `.eml` messages or bare `.html` bodies.
pub struct Mailbox {
    dir: PathBuf,
}

impl Mailbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Mailbox { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MailSource for Mailbox {
    fn list(&self, limit: usize) -> Result<Vec<MessageHandle>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading mail directory {}", self.dir.display()))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && message_kind(p).is_some())
            .collect();
        paths.sort();
        paths.truncate(limit);

        Ok(paths
            .into_iter()
            .map(|path| MessageHandle {
                id: path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                path,
            })
            .collect())
    }

    fn load(&self, handle: &MessageHandle) -> AlertMessage {
        let (headers, html) = match std::fs::read(&handle.path) {
            Ok(bytes) => match message_kind(&handle.path) {
                Some(Kind::Eml) => parse_message(&String::from_utf8_lossy(&bytes)),
                _ => (MessageHeaders::default(), String::from_utf8_lossy(&bytes).into_owned()),
            },
            Err(e) => {
                warn!("Could not read {}: {}", handle.path.display(), e);
                (MessageHeaders::default(), String::new())
            }
        };
        AlertMessage { handle: handle.clone(), headers, html }
    }
}

/// Load a single message file outside any mailbox.
pub fn load_file(path: &Path) -> AlertMessage {
    let handle = MessageHandle {
        id: path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        path: path.to_path_buf(),
    };
    Mailbox::new(path.parent().unwrap_or(Path::new("."))).load(&handle)
}

enum Kind {
    Eml,
    Html,
}

fn message_kind(path: &Path) -> Option<Kind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "eml" => Some(Kind::Eml),
        "html" | "htm" => Some(Kind::Html),
        _ => None,
    }
}

// --- RFC 822 / MIME ---

struct Entity<'a> {
    headers: Vec<(String, String)>,
    body: &'a str,
}

impl<'a> Entity<'a> {
    fn parse(raw: &'a str) -> Self {
        let (head, body) = match raw.find("\n\n") {
            Some(i) => (&raw[..i], &raw[i + 2..]),
            None if raw.starts_with('\n') => ("", &raw[1..]),
            None => (raw, ""),
        };
        Entity { headers: parse_headers(head), body }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Lowercased MIME type and its parameters.
    fn content_type(&self) -> (String, Vec<(String, String)>) {
        let raw = self.header("content-type").unwrap_or("text/plain");
        let mut parts = raw.split(';');
        let mime = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let params = parts
            .filter_map(|p| {
                let (k, v) = p.split_once('=')?;
                Some((k.trim().to_ascii_lowercase(), v.trim().trim_matches('"').to_string()))
            })
            .collect();
        (mime, params)
    }

    fn decoded_body(&self, charset: Option<&str>) -> String {
        let encoding = self
            .header("content-transfer-encoding")
            .unwrap_or("7bit")
            .trim()
            .to_ascii_lowercase();
        let bytes = match encoding.as_str() {
            "base64" => {
                let compact: String = self.body.chars().filter(|c| !c.is_whitespace()).collect();
                match STANDARD.decode(compact.as_bytes()) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("bad base64 body: {}", e);
                        self.body.as_bytes().to_vec()
                    }
                }
            }
            "quoted-printable" => decode_quoted_printable(self.body),
            _ => self.body.as_bytes().to_vec(),
        };
        decode_charset(&bytes, charset)
    }
}

fn parse_headers(head: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in head.lines() {
        if line.starts_with(|c: char| c == ' ' || c == '\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    headers
}

/// Headers and first `text/html` body of a raw message.
pub fn parse_message(raw: &str) -> (MessageHeaders, String) {
    let raw = raw.replace("\r\n", "\n");
    let root = Entity::parse(&raw);
    let get = |name: &str| root.header(name).map(decode_header_value).unwrap_or_default();
    let headers = MessageHeaders {
        from: get("from"),
        to: get("to"),
        subject: get("subject"),
        date: get("date"),
    };
    let html = find_part(&root, "text/html", 0).unwrap_or_default();
    debug!(subject = %headers.subject, bytes = html.len(), "parsed message");
    (headers, html)
}

const MAX_DEPTH: usize = 8;

/// Depth-first search for the first part of type `want`.
fn find_part(entity: &Entity<'_>, want: &str, depth: usize) -> Option<String> {
    let (mime, params) = entity.content_type();
    if mime.starts_with("multipart/") {
        if depth >= MAX_DEPTH {
            return None;
        }
        let boundary = params.iter().find(|(k, _)| k == "boundary").map(|(_, v)| v.as_str())?;
        return split_multipart(entity.body, boundary)
            .into_iter()
            .find_map(|part| find_part(&Entity::parse(part), want, depth + 1));
    }
    if mime == want {
        let charset = params.iter().find(|(k, _)| k == "charset").map(|(_, v)| v.as_str());
        return Some(entity.decoded_body(charset));
    }
    None
}

fn split_multipart<'a>(body: &'a str, boundary: &str) -> Vec<&'a str> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut sections = body.split(delimiter.as_str());
    // Preamble before the first delimiter.
    sections.next();
    for section in sections {
        if section.starts_with("--") {
            break;
        }
        let section = section.strip_prefix('\n').unwrap_or(section);
        parts.push(section);
    }
    parts
}

fn decode_quoted_printable(body: &str) -> Vec<u8> {
    let bytes = body.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'=' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        // Soft line break.
        if bytes.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }
        let hex = bytes.get(i + 1..i + 3).and_then(|h| std::str::from_utf8(h).ok());
        match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
            Some(b) => {
                out.push(b);
                i += 3;
            }
            None => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    out
}

fn decode_charset(bytes: &[u8], charset: Option<&str>) -> String {
    match charset.map(|c| c.to_ascii_lowercase()) {
        Some(c) if c == "iso-8859-1" || c == "latin1" || c == "us-ascii" => {
            bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decode RFC 2047 encoded words (`=?UTF-8?B?...?=`) in a header value.
fn decode_header_value(value: &str) -> String {
    let joined = ENCODED_GAP_RE.replace_all(value, "$1$2");
    ENCODED_WORD_RE
        .replace_all(&joined, |caps: &Captures| {
            let charset = &caps[1];
            let bytes = match &caps[2] {
                "B" | "b" => STANDARD.decode(caps[3].as_bytes()).ok(),
                _ => Some(decode_quoted_printable(&caps[3].replace('_', " "))),
            };
            match bytes {
                Some(b) => decode_charset(&b, Some(charset)),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Normalize a `Date` header (or `M/D/YYYY`) to `YYYY-MM-DD`; anything
/// unparseable is returned as given.
pub fn parse_email_date(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() || ISO_DATE_RE.is_match(s) {
        return s.to_string();
    }
    if let Some(caps) = US_DATE_RE.captures(s) {
        let (m, d, y) = (&caps[1], &caps[2], &caps[3]);
        if let (Ok(m), Ok(d), Ok(y)) = (m.parse(), d.parse(), y.parse()) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                return date.format("%Y-%m-%d").to_string();
            }
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return dt.date_naive().format("%Y-%m-%d").to_string();
    }
    if let Some(caps) = LOOSE_DATE_RE.captures(s) {
        let text = format!("{} {} {}", &caps[1], &caps[2], &caps[3]);
        if let Ok(date) = NaiveDate::parse_from_str(&text, "%d %b %Y") {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    s.to_string()
}
