use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use super::{Notifier, PluginCategory, PluginConfig, PluginFactory, Processor, Settings, Source};
use crate::config::WatchcatConfig;
use crate::error::{AutomatonError, Result};
use crate::filter::SourceFilter;

/// The active plugins of one run, built once at `Init`.
pub struct PluginRegistry {
    factory: Arc<PluginFactory>,
    sources: Vec<Box<dyn Source>>,
    processors: Vec<Box<dyn Processor>>,
    notifiers: Vec<Box<dyn Notifier>>,
    /// Raw `sources.<id>.filters` entries, resolved on demand.
    source_filters: HashMap<String, toml::Value>,
}

impl PluginRegistry {
    /// Build every enabled plugin declared in `config`.
    ///
    /// Individual plugins that cannot be built are logged and left out. Only
    /// a section that is not a table at all fails the registration.
    pub fn register_all(config: &WatchcatConfig, factory: Arc<PluginFactory>) -> Result<Self> {
        let mut registry = Self {
            factory,
            sources: Vec::new(),
            processors: Vec::new(),
            notifiers: Vec::new(),
            source_filters: HashMap::new(),
        };

        for plugin in enabled_plugins(&config.sources, PluginCategory::Source)? {
            if let Some(filters) = plugin.settings.get("filters") {
                registry.source_filters.insert(plugin.id.clone(), filters.clone());
            }
            if let Some(source) = registry.factory.create_source(&plugin) {
                info!(id = %plugin.id, kind = %plugin.kind, "Registered source");
                registry.sources.push(source);
            }
        }

        for plugin in enabled_plugins(&config.processors, PluginCategory::Processor)? {
            if let Some(processor) = registry.factory.create_processor(&plugin) {
                info!(id = %plugin.id, kind = %plugin.kind, "Registered processor");
                registry.processors.push(processor);
            }
        }

        for plugin in enabled_plugins(&config.notifiers, PluginCategory::Notifier)? {
            if let Some(notifier) = registry.factory.create_notifier(&plugin) {
                info!(id = %plugin.id, kind = %plugin.kind, "Registered notifier");
                registry.notifiers.push(notifier);
            }
        }

        info!(
            sources = registry.sources.len(),
            processors = registry.processors.len(),
            notifiers = registry.notifiers.len(),
            "Plugin registration complete"
        );
        Ok(registry)
    }

    pub fn sources(&self) -> &[Box<dyn Source>] {
        &self.sources
    }

    pub fn processors(&self) -> &[Box<dyn Processor>] {
        &self.processors
    }

    pub fn notifiers(&self) -> &[Box<dyn Notifier>] {
        &self.notifiers
    }

    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.id()).collect()
    }

    /// The filters configured for `source_id`, in declaration order.
    ///
    /// Entries that cannot be built are logged and skipped.
    pub fn filters_for(&self, source_id: &str) -> Vec<SourceFilter> {
        let Some(value) = self.source_filters.get(source_id) else {
            return Vec::new();
        };
        let Some(entries) = value.as_array() else {
            error!(source = source_id, "Filters must be an array of tables");
            return Vec::new();
        };

        entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let built = entry
                    .as_table()
                    .ok_or_else(|| AutomatonError::Plugin("filter entry is not a table".into()))
                    .and_then(|settings: &Settings| self.factory.create_filter(settings));
                match built {
                    Ok(filter) => Some(filter),
                    Err(e) => {
                        error!(source = source_id, index, error = %e, "Failed to create filter");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Parse the entries of one plugin section, keeping the enabled ones.
fn enabled_plugins(section: &toml::Value, category: PluginCategory) -> Result<Vec<PluginConfig>> {
    let table = section.as_table().ok_or_else(|| {
        AutomatonError::Plugin(format!(
            "`{}` must be a table of plugin definitions",
            category.section()
        ))
    })?;

    let mut plugins = Vec::new();
    for (id, value) in table {
        match PluginConfig::from_value(id, value) {
            Ok(plugin) if plugin.enabled => plugins.push(plugin),
            Ok(plugin) => info!(%category, id = %plugin.id, "Skipping disabled plugin"),
            Err(e) => error!(%category, id = %id, error = %e, "Skipping malformed plugin"),
        }
    }
    Ok(plugins)
}
