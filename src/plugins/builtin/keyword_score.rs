use async_trait::async_trait;
use serde_json::json;

use crate::error::{AutomatonError, Result};
use crate::plugins::{PluginConfig, Processor, ProcessorOutput};
use crate::post::Post;

/// Scores a post by the share of configured keywords found in its text.
#[derive(Debug)]
pub struct KeywordScore {
    id: String,
    keywords: Vec<String>,
}

impl KeywordScore {
    pub fn new(id: impl Into<String>, keywords: Vec<String>) -> Result<Self> {
        let id = id.into();
        if keywords.is_empty() {
            return Err(AutomatonError::Plugin(format!(
                "`{id}` (keyword-score) requires a non-empty `keywords` list"
            )));
        }
        Ok(Self { id, keywords })
    }

    pub fn from_config(config: &PluginConfig) -> Result<Self> {
        Self::new(&config.id, config.str_list_setting("keywords"))
    }
}

#[async_trait]
impl Processor for KeywordScore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn process(&self, post: &Post) -> Result<ProcessorOutput> {
        let text = post.to_prompt().to_lowercase();
        let matched: Vec<&str> = self
            .keywords
            .iter()
            .filter(|k| text.contains(&k.to_lowercase()))
            .map(String::as_str)
            .collect();
        let relevance = matched.len() as f64 / self.keywords.len() as f64;

        Ok(ProcessorOutput {
            relevance: Some(relevance),
            data: json!({ "matched": matched }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::fixtures::paper;

    #[tokio::test]
    async fn relevance_is_share_of_matched_keywords() {
        let processor = KeywordScore::new(
            "kw",
            vec!["Attention".into(), "turing".into(), "LLM".into(), "quantum".into()],
        )
        .unwrap();

        // Authors are not part of the prompt text.
        let output = processor
            .process(&paper("p1", "Sparse attention for LLM inference"))
            .await
            .unwrap();
        assert_eq!(output.relevance, Some(0.5));
        assert_eq!(output.data, json!({ "matched": ["Attention", "LLM"] }));
    }

    #[test]
    fn empty_keyword_list_is_rejected() {
        assert!(matches!(
            KeywordScore::new("kw", Vec::new()),
            Err(AutomatonError::Plugin(_))
        ));
    }
}
