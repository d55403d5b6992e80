//! Plugin kinds that ship with watchcat.
//!
//! | category  | kind            |
//! |-----------|-----------------|
//! | source    | `json-file`     |
//! | processor | `keyword-score` |
//! | processor | `llm-summary`   |
//! | notifier  | `log`           |
//! | notifier  | `webhook`       |
//!
//! plus the filter kinds in [`filters`].

pub mod filters;
pub mod json_file;
pub mod keyword_score;
pub mod llm_summary;
pub mod notifiers;

use super::PluginFactory;

pub fn register_all(factory: &mut PluginFactory) {
    factory.register_source("json-file", |config, _| {
        Ok(Box::new(json_file::JsonFileSource::from_config(config)?))
    });
    factory.register_processor("keyword-score", |config, _| {
        Ok(Box::new(keyword_score::KeywordScore::from_config(config)?))
    });
    factory.register_processor("llm-summary", |config, context| {
        Ok(Box::new(llm_summary::LlmSummary::from_config(config, context)?))
    });
    factory.register_notifier("log", |config, _| {
        Ok(Box::new(notifiers::LogNotifier::new(&config.id)))
    });
    factory.register_notifier("webhook", |config, context| {
        Ok(Box::new(notifiers::WebhookNotifier::from_config(config, context)?))
    });
    filters::register_all(factory);
}
