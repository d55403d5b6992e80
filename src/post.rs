//! Posts pulled from sources, and their flat record encoding.
//!
//! A [`Post`] is either an arXiv-style [`Paper`] or a [`Mail`] message. Both
//! serialize to a [`PostRecord`], a flat `String -> String` map tagged with a
//! `kind` key, which is what checkpoints and the datastore persist.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flat string-keyed representation of a post.
pub type PostRecord = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Paper,
    Mail,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Paper => "paper",
            PostKind::Mail => "mail",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "paper" => Some(PostKind::Paper),
            "mail" => Some(PostKind::Mail),
            _ => None,
        }
    }
}

impl fmt::Display for PostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paper {
    pub id: String,
    pub url: String,
    pub source: String,
    pub published_date: DateTime<Utc>,
    pub pulled_date: DateTime<Utc>,
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub pdf_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub id: String,
    pub url: String,
    pub source: String,
    /// Date the message was received.
    pub published_date: DateTime<Utc>,
    pub pulled_date: DateTime<Utc>,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Post {
    Paper(Paper),
    Mail(Mail),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PostDecodeError {
    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("unknown post kind `{0}`")]
    UnknownKind(String),

    #[error("field `{field}` is not a valid RFC 3339 date: {value}")]
    InvalidDate { field: String, value: String },

    #[error("field `{field}` is not a JSON string list: {value}")]
    InvalidList { field: String, value: String },
}

impl Post {
    pub fn id(&self) -> &str {
        match self {
            Post::Paper(p) => &p.id,
            Post::Mail(m) => &m.id,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Post::Paper(p) => &p.url,
            Post::Mail(m) => &m.url,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Post::Paper(p) => &p.source,
            Post::Mail(m) => &m.source,
        }
    }

    pub fn published_date(&self) -> DateTime<Utc> {
        match self {
            Post::Paper(p) => p.published_date,
            Post::Mail(m) => m.published_date,
        }
    }

    pub fn pulled_date(&self) -> DateTime<Utc> {
        match self {
            Post::Paper(p) => p.pulled_date,
            Post::Mail(m) => m.pulled_date,
        }
    }

    pub fn kind(&self) -> PostKind {
        match self {
            Post::Paper(_) => PostKind::Paper,
            Post::Mail(_) => PostKind::Mail,
        }
    }

    /// Paper title or mail subject.
    pub fn title(&self) -> &str {
        match self {
            Post::Paper(p) => &p.title,
            Post::Mail(m) => &m.subject,
        }
    }

    /// Paper abstract or mail body.
    pub fn body(&self) -> &str {
        match self {
            Post::Paper(p) => &p.abstract_text,
            Post::Mail(m) => &m.body,
        }
    }

    /// Paper authors, or the single mail sender.
    pub fn authors(&self) -> Vec<&str> {
        match self {
            Post::Paper(p) => p.authors.iter().map(String::as_str).collect(),
            Post::Mail(m) => vec![m.sender.as_str()],
        }
    }

    /// URLs of related resources (the PDF of a paper, mail attachments).
    pub fn attachments(&self) -> Vec<&str> {
        match self {
            Post::Paper(p) if p.pdf_url.is_empty() => Vec::new(),
            Post::Paper(p) => vec![p.pdf_url.as_str()],
            Post::Mail(m) => m.attachments.iter().map(String::as_str).collect(),
        }
    }

    /// Render the post as markdown suitable for an LLM prompt.
    pub fn to_prompt(&self) -> String {
        format!("# {}\n{}", self.title(), self.body())
    }

    pub fn to_record(&self) -> PostRecord {
        let mut record = PostRecord::new();
        record.insert("kind".into(), self.kind().as_str().into());
        record.insert("id".into(), self.id().into());
        record.insert("url".into(), self.url().into());
        record.insert("source".into(), self.source().into());
        record.insert("published_date".into(), encode_date(self.published_date()));
        record.insert("pulled_date".into(), encode_date(self.pulled_date()));

        match self {
            Post::Paper(p) => {
                record.insert("title".into(), p.title.clone());
                record.insert("abstract".into(), p.abstract_text.clone());
                record.insert("authors".into(), encode_list(&p.authors));
                record.insert("pdf_url".into(), p.pdf_url.clone());
            }
            Post::Mail(m) => {
                record.insert("subject".into(), m.subject.clone());
                record.insert("sender".into(), m.sender.clone());
                record.insert("body".into(), m.body.clone());
                record.insert("attachments".into(), encode_list(&m.attachments));
            }
        }
        record
    }

    pub fn from_record(record: &PostRecord) -> Result<Self, PostDecodeError> {
        let kind = field(record, "kind")?;
        let id = field(record, "id")?.to_string();
        let url = field(record, "url")?.to_string();
        let source = field(record, "source")?.to_string();
        let published_date = date_field(record, "published_date")?;
        let pulled_date = date_field(record, "pulled_date")?;

        match PostKind::parse(kind) {
            Some(PostKind::Paper) => Ok(Post::Paper(Paper {
                id,
                url,
                source,
                published_date,
                pulled_date,
                title: field(record, "title")?.to_string(),
                abstract_text: field(record, "abstract")?.to_string(),
                authors: list_field(record, "authors")?,
                pdf_url: field(record, "pdf_url")?.to_string(),
            })),
            Some(PostKind::Mail) => Ok(Post::Mail(Mail {
                id,
                url,
                source,
                published_date,
                pulled_date,
                subject: field(record, "subject")?.to_string(),
                sender: field(record, "sender")?.to_string(),
                body: field(record, "body")?.to_string(),
                attachments: list_field(record, "attachments")?,
            })),
            None => Err(PostDecodeError::UnknownKind(kind.to_string())),
        }
    }
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} from {} ({})", self.kind(), self.id(), self.source(), self.url())
    }
}

fn encode_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn encode_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn field<'a>(record: &'a PostRecord, name: &str) -> Result<&'a str, PostDecodeError> {
    record
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| PostDecodeError::MissingField(name.to_string()))
}

fn date_field(record: &PostRecord, name: &str) -> Result<DateTime<Utc>, PostDecodeError> {
    let value = field(record, name)?;
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| PostDecodeError::InvalidDate {
            field: name.to_string(),
            value: value.to_string(),
        })
}

fn list_field(record: &PostRecord, name: &str) -> Result<Vec<String>, PostDecodeError> {
    let value = field(record, name)?;
    serde_json::from_str(value).map_err(|_| PostDecodeError::InvalidList {
        field: name.to_string(),
        value: value.to_string(),
    })
}
