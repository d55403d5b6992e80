//! Pluggable sources, processors and notifiers.
//!
//! Plugins are declared in configuration as `[sources.<id>]`,
//! `[processors.<id>]` and `[notifiers.<id>]` tables with a `type` key.
//! [`PluginFactory`] maps each `type` to a constructor and
//! [`PluginRegistry`] builds the enabled ones at `Init`.

pub mod builtin;
mod factory;
mod registry;

pub use factory::{FilterCtor, NotifierCtor, PluginContext, PluginFactory, ProcessorCtor, SourceCtor};
pub use registry::PluginRegistry;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AutomatonError, Result};
use crate::filter::SourceFilter;
use crate::post::Post;
use crate::workflow::Notification;

/// Free-form plugin settings: the plugin's table minus `type` and `enabled`.
pub type Settings = toml::Table;

/// An information source that can be pulled.
#[async_trait]
pub trait Source: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> &str;

    /// Pull posts matching every filter, or all posts when `filters` is empty.
    async fn pull(&self, filters: &[SourceFilter]) -> Result<Vec<Post>>;
}

/// What a processor contributes to a post's insight.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorOutput {
    /// Overrides the insight's relevance when set.
    pub relevance: Option<f64>,
    /// Stored under the processor id in the insight metadata.
    pub data: Value,
}

#[async_trait]
pub trait Processor: Send + Sync {
    fn id(&self) -> &str;

    async fn process(&self, post: &Post) -> Result<ProcessorOutput>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn id(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCategory {
    Source,
    Processor,
    Notifier,
}

impl PluginCategory {
    /// Configuration section holding this category.
    pub fn section(self) -> &'static str {
        match self {
            PluginCategory::Source => "sources",
            PluginCategory::Processor => "processors",
            PluginCategory::Notifier => "notifiers",
        }
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginCategory::Source => write!(f, "source"),
            PluginCategory::Processor => write!(f, "processor"),
            PluginCategory::Notifier => write!(f, "notifier"),
        }
    }
}

/// One plugin instance as declared in configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub id: String,
    pub kind: String,
    pub enabled: bool,
    pub settings: Settings,
}

impl PluginConfig {
    /// Build from the `[<section>.<id>]` table. `enabled` defaults to true.
    pub fn from_value(id: &str, value: &toml::Value) -> Result<Self> {
        let table = value.as_table().ok_or_else(|| {
            AutomatonError::Configuration(format!("plugin `{id}` must be a table"))
        })?;

        let kind = match table.get("type") {
            Some(toml::Value::String(kind)) => kind.clone(),
            Some(other) => {
                return Err(AutomatonError::Configuration(format!(
                    "plugin `{id}` has a non-string type: {other}"
                )));
            }
            None => {
                return Err(AutomatonError::Configuration(format!(
                    "plugin `{id}` is missing a type"
                )));
            }
        };

        let enabled = match table.get("enabled") {
            Some(toml::Value::Boolean(enabled)) => *enabled,
            Some(other) => {
                return Err(AutomatonError::Configuration(format!(
                    "plugin `{id}` has a non-boolean enabled flag: {other}"
                )));
            }
            None => true,
        };

        let mut settings = table.clone();
        settings.remove("type");
        settings.remove("enabled");

        Ok(Self {
            id: id.to_string(),
            kind,
            enabled,
            settings,
        })
    }

    pub fn str_setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(toml::Value::as_str)
    }

    /// A required string setting, reported as a plugin error when absent.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.str_setting(key).ok_or_else(|| {
            AutomatonError::Plugin(format!("`{}` ({}) requires a string `{key}` setting", self.id, self.kind))
        })
    }

    pub fn str_list_setting(&self, key: &str) -> Vec<String> {
        self.settings
            .get(key)
            .and_then(toml::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(toml::Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Context with default settings and no API key.
#[cfg(test)]
pub(crate) fn test_context() -> PluginContext {
    PluginContext::from_config(&crate::config::WatchcatConfig::default())
        .expect("default plugin context")
}
