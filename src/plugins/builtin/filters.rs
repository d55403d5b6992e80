//! Filter kinds for `sources.<id>.filters`.
//!
//! ```toml
//! filters = [
//!     { type = "keyword", term = "llm" },
//!     { type = "published-after", date = 2025-08-01 },
//!     { type = "not", filter = { type = "kind", kind = "mail" } },
//!     { type = "any", of = [{ type = "author", name = "turing" }, { type = "title", term = "agents" }] },
//! ]
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{AutomatonError, Result};
use crate::filter::SourceFilter;
use crate::plugins::{PluginFactory, Settings};
use crate::post::PostKind;

pub fn register_all(factory: &mut PluginFactory) {
    factory.register_filter("keyword", |settings, _| {
        Ok(SourceFilter::Keyword(string(settings, "term")?))
    });
    factory.register_filter("title", |settings, _| {
        Ok(SourceFilter::Title(string(settings, "term")?))
    });
    factory.register_filter("author", |settings, _| {
        Ok(SourceFilter::Author(string(settings, "name")?))
    });
    factory.register_filter("published-after", |settings, _| {
        Ok(SourceFilter::PublishedAfter(date(settings, "date")?))
    });
    factory.register_filter("published-before", |settings, _| {
        Ok(SourceFilter::PublishedBefore(date(settings, "date")?))
    });
    factory.register_filter("kind", |settings, _| {
        let kind = string(settings, "kind")?;
        PostKind::parse(&kind)
            .map(SourceFilter::Kind)
            .ok_or_else(|| AutomatonError::Plugin(format!("unknown post kind `{kind}`")))
    });
    factory.register_filter("has-attachment", |settings, _| {
        let expected = match settings.get("value") {
            None => true,
            Some(toml::Value::Boolean(value)) => *value,
            Some(other) => {
                return Err(AutomatonError::Plugin(format!(
                    "`has-attachment` value must be a boolean, got {other}"
                )));
            }
        };
        Ok(SourceFilter::HasAttachment(expected))
    });
    factory.register_filter("all", |settings, factory| {
        fold(settings, factory, "all", |left, right| left & right)
    });
    factory.register_filter("any", |settings, factory| {
        fold(settings, factory, "any", |left, right| left | right)
    });
    factory.register_filter("not", |settings, factory| {
        let inner = settings
            .get("filter")
            .and_then(toml::Value::as_table)
            .ok_or_else(|| AutomatonError::Plugin("`not` requires a `filter` table".into()))?;
        Ok(!factory.create_filter(inner)?)
    });
}

fn string(settings: &Settings, key: &str) -> Result<String> {
    settings
        .get(key)
        .and_then(toml::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AutomatonError::Plugin(format!("filter requires a string `{key}`")))
}

/// Accepts a TOML datetime, a TOML date, or the same as a string.
/// Local datetimes are read as UTC; dates without a time mean midnight UTC.
fn date(settings: &Settings, key: &str) -> Result<DateTime<Utc>> {
    let raw = match settings.get(key) {
        Some(toml::Value::String(s)) => s.clone(),
        Some(toml::Value::Datetime(dt)) => dt.to_string(),
        _ => {
            return Err(AutomatonError::Plugin(format!(
                "filter requires a date `{key}`"
            )));
        }
    };
    parse_date(&raw)
        .ok_or_else(|| AutomatonError::Plugin(format!("`{key}` is not a valid date: {raw}")))
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Left fold of the `of` list with `combine`.
fn fold(
    settings: &Settings,
    factory: &PluginFactory,
    kind: &str,
    combine: fn(SourceFilter, SourceFilter) -> SourceFilter,
) -> Result<SourceFilter> {
    let entries = settings
        .get("of")
        .and_then(toml::Value::as_array)
        .ok_or_else(|| AutomatonError::Plugin(format!("`{kind}` requires an `of` array")))?;

    let mut filters = entries.iter().map(|entry| {
        entry
            .as_table()
            .ok_or_else(|| AutomatonError::Plugin(format!("`{kind}` entries must be tables")))
            .and_then(|table| factory.create_filter(table))
    });

    let first = filters
        .next()
        .ok_or_else(|| AutomatonError::Plugin(format!("`{kind}` requires at least one filter")))??;
    filters.try_fold(first, |acc, next| Ok(combine(acc, next?)))
}
