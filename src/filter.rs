//! Composable predicates over posts.

use std::ops::{BitAnd, BitOr, Not};

use chrono::{DateTime, Utc};

use crate::post::{Post, PostKind};

/// A predicate over [`Post`]s.
///
/// Leaf predicates match case-insensitively where text is involved.
/// `&`, `|` and `!` build `And`, `Or` and `Not` nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceFilter {
    /// Term occurs in the title or the body.
    Keyword(String),
    /// Term occurs in the title (paper title, mail subject).
    Title(String),
    /// Name occurs in one of the authors (or the mail sender).
    Author(String),
    PublishedAfter(DateTime<Utc>),
    PublishedBefore(DateTime<Utc>),
    Kind(PostKind),
    HasAttachment(bool),
    And(Box<SourceFilter>, Box<SourceFilter>),
    Or(Box<SourceFilter>, Box<SourceFilter>),
    Not(Box<SourceFilter>),
}

impl SourceFilter {
    pub fn matches(&self, post: &Post) -> bool {
        match self {
            SourceFilter::Keyword(term) => {
                contains_ci(post.title(), term) || contains_ci(post.body(), term)
            }
            SourceFilter::Title(term) => contains_ci(post.title(), term),
            SourceFilter::Author(name) => post.authors().iter().any(|a| contains_ci(a, name)),
            SourceFilter::PublishedAfter(date) => post.published_date() >= *date,
            SourceFilter::PublishedBefore(date) => post.published_date() <= *date,
            SourceFilter::Kind(kind) => post.kind() == *kind,
            SourceFilter::HasAttachment(expected) => !post.attachments().is_empty() == *expected,
            SourceFilter::And(left, right) => left.matches(post) && right.matches(post),
            SourceFilter::Or(left, right) => left.matches(post) || right.matches(post),
            SourceFilter::Not(inner) => !inner.matches(post),
        }
    }

    /// True when every filter matches; an empty slice matches everything.
    pub fn all_match(filters: &[SourceFilter], post: &Post) -> bool {
        filters.iter().all(|f| f.matches(post))
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl BitAnd for SourceFilter {
    type Output = SourceFilter;

    fn bitand(self, rhs: SourceFilter) -> SourceFilter {
        SourceFilter::And(Box::new(self), Box::new(rhs))
    }
}

impl BitOr for SourceFilter {
    type Output = SourceFilter;

    fn bitor(self, rhs: SourceFilter) -> SourceFilter {
        SourceFilter::Or(Box::new(self), Box::new(rhs))
    }
}

impl Not for SourceFilter {
    type Output = SourceFilter;

    /// Double negation collapses instead of nesting.
    fn not(self) -> SourceFilter {
        match self {
            SourceFilter::Not(inner) => *inner,
            other => SourceFilter::Not(Box::new(other)),
        }
    }
}
