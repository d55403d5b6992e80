use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::{Notifier, PluginCategory, PluginConfig, Processor, Settings, Source};
use crate::config::{RetrySettings, WatchcatConfig};
use crate::error::{AutomatonError, Result};
use crate::filter::SourceFilter;

pub type SourceCtor = Arc<dyn Fn(&PluginConfig, &PluginContext) -> Result<Box<dyn Source>> + Send + Sync>;
pub type ProcessorCtor = Arc<dyn Fn(&PluginConfig, &PluginContext) -> Result<Box<dyn Processor>> + Send + Sync>;
pub type NotifierCtor = Arc<dyn Fn(&PluginConfig, &PluginContext) -> Result<Box<dyn Notifier>> + Send + Sync>;
/// Filters may nest, so their constructors get the factory back.
pub type FilterCtor = Arc<dyn Fn(&Settings, &PluginFactory) -> Result<SourceFilter> + Send + Sync>;

/// Shared resources handed to every plugin constructor.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub retry: RetrySettings,
    /// Fallback API key for LLM-backed plugins.
    pub api_key: Option<String>,
    pub http: reqwest::Client,
}

impl PluginContext {
    pub fn from_config(config: &WatchcatConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AutomatonError::Plugin(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            retry: config.retry.clone(),
            api_key: Some(config.api_key.clone()).filter(|key| !key.is_empty()),
            http,
        })
    }
}

/// Maps plugin `type` strings to constructors.
///
/// Start from [`PluginFactory::with_builtins`] and add kinds with the
/// `register_*` methods before the automaton runs.
#[derive(Clone)]
pub struct PluginFactory {
    context: PluginContext,
    sources: HashMap<String, SourceCtor>,
    processors: HashMap<String, ProcessorCtor>,
    notifiers: HashMap<String, NotifierCtor>,
    filters: HashMap<String, FilterCtor>,
}

impl PluginFactory {
    /// A factory that knows no kinds at all.
    pub fn empty(context: PluginContext) -> Self {
        Self {
            context,
            sources: HashMap::new(),
            processors: HashMap::new(),
            notifiers: HashMap::new(),
            filters: HashMap::new(),
        }
    }

    pub fn with_builtins(context: PluginContext) -> Self {
        let mut factory = Self::empty(context);
        super::builtin::register_all(&mut factory);
        factory
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    pub fn register_source<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&PluginConfig, &PluginContext) -> Result<Box<dyn Source>> + Send + Sync + 'static,
    {
        self.sources.insert(kind.to_string(), Arc::new(ctor));
    }

    pub fn register_processor<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&PluginConfig, &PluginContext) -> Result<Box<dyn Processor>> + Send + Sync + 'static,
    {
        self.processors.insert(kind.to_string(), Arc::new(ctor));
    }

    pub fn register_notifier<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&PluginConfig, &PluginContext) -> Result<Box<dyn Notifier>> + Send + Sync + 'static,
    {
        self.notifiers.insert(kind.to_string(), Arc::new(ctor));
    }

    pub fn register_filter<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&Settings, &PluginFactory) -> Result<SourceFilter> + Send + Sync + 'static,
    {
        self.filters.insert(kind.to_string(), Arc::new(ctor));
    }

    pub fn create_source(&self, config: &PluginConfig) -> Option<Box<dyn Source>> {
        let ctor = self.sources.get(&config.kind);
        build(PluginCategory::Source, config, ctor.map(|c| c(config, &self.context)))
    }

    pub fn create_processor(&self, config: &PluginConfig) -> Option<Box<dyn Processor>> {
        let ctor = self.processors.get(&config.kind);
        build(PluginCategory::Processor, config, ctor.map(|c| c(config, &self.context)))
    }

    pub fn create_notifier(&self, config: &PluginConfig) -> Option<Box<dyn Notifier>> {
        let ctor = self.notifiers.get(&config.kind);
        build(PluginCategory::Notifier, config, ctor.map(|c| c(config, &self.context)))
    }

    /// Build a filter from its `{ type = "...", ... }` table.
    pub fn create_filter(&self, settings: &Settings) -> Result<SourceFilter> {
        let kind = settings
            .get("type")
            .and_then(toml::Value::as_str)
            .ok_or_else(|| AutomatonError::Plugin("filter is missing a string `type`".into()))?;
        let ctor = self
            .filters
            .get(kind)
            .ok_or_else(|| AutomatonError::Plugin(format!("unknown filter type `{kind}`")))?;
        ctor(settings, self)
    }
}

/// Turn a constructor lookup into an instance, warning when there is none.
fn build<T: ?Sized>(
    category: PluginCategory,
    config: &PluginConfig,
    built: Option<Result<Box<T>>>,
) -> Option<Box<T>> {
    match built {
        Some(Ok(plugin)) => Some(plugin),
        Some(Err(e)) => {
            warn!(%category, id = %config.id, kind = %config.kind, error = %e, "Failed to construct plugin");
            None
        }
        None => {
            warn!(%category, id = %config.id, kind = %config.kind, "Unknown plugin kind");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::test_context;
    use crate::post::PostKind;

    fn config(id: &str, kind: &str) -> PluginConfig {
        PluginConfig {
            id: id.to_string(),
            kind: kind.to_string(),
            enabled: true,
            settings: Settings::new(),
        }
    }

    #[test]
    fn unknown_kind_yields_none() {
        let factory = PluginFactory::empty(test_context());
        assert!(factory.create_source(&config("s", "carrier-pigeon")).is_none());
        assert!(factory.create_processor(&config("p", "carrier-pigeon")).is_none());
        assert!(factory.create_notifier(&config("n", "carrier-pigeon")).is_none());
    }

    #[test]
    fn failing_constructor_yields_none() {
        let mut factory = PluginFactory::empty(test_context());
        factory.register_notifier("flaky", |config, _| {
            Err(AutomatonError::Plugin(format!("{} cannot start", config.id)))
        });
        assert!(factory.create_notifier(&config("n", "flaky")).is_none());
    }

    #[test]
    fn builtin_kinds_are_registered() {
        let factory = PluginFactory::with_builtins(test_context());
        let log = factory.create_notifier(&config("audit", "log")).unwrap();
        assert_eq!(log.id(), "audit");

        // json-file requires a path.
        assert!(factory.create_source(&config("s", "json-file")).is_none());
    }

    #[test]
    fn filters_are_built_recursively() {
        let factory = PluginFactory::with_builtins(test_context());
        let settings: Settings = r#"
            type = "all"
            of = [
                { type = "keyword", term = "llm" },
                { type = "not", filter = { type = "kind", kind = "mail" } },
            ]
        "#
        .parse()
        .unwrap();

        let filter = factory.create_filter(&settings).unwrap();
        assert_eq!(
            filter,
            SourceFilter::Keyword("llm".into()) & !SourceFilter::Kind(PostKind::Mail)
        );
    }

    #[test]
    fn unknown_filter_type_is_an_error() {
        let factory = PluginFactory::with_builtins(test_context());
        let settings: Settings = r#"type = "vibes""#.parse().unwrap();
        assert!(matches!(
            factory.create_filter(&settings),
            Err(AutomatonError::Plugin(_))
        ));
    }
}
