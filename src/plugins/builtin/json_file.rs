use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{AutomatonError, Result};
use crate::filter::SourceFilter;
use crate::plugins::{PluginConfig, Source};
use crate::post::{Post, PostRecord};

/// Reads posts from a JSON array of flat post records.
///
/// The file is re-read on every pull, so an external harvester can keep
/// rewriting it between runs.
#[derive(Debug)]
pub struct JsonFileSource {
    id: String,
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    pub fn from_config(config: &PluginConfig) -> Result<Self> {
        Ok(Self::new(&config.id, config.require_str("path")?))
    }
}

#[async_trait]
impl Source for JsonFileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        "json-file"
    }

    async fn pull(&self, filters: &[SourceFilter]) -> Result<Vec<Post>> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AutomatonError::DataProcessing(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let records: Vec<PostRecord> = serde_json::from_str(&contents).map_err(|e| {
            AutomatonError::DataProcessing(format!("failed to parse {}: {e}", self.path.display()))
        })?;

        let total = records.len();
        let posts: Vec<Post> = records
            .iter()
            .filter_map(|record| match Post::from_record(record) {
                Ok(post) => Some(post),
                Err(e) => {
                    warn!(source = %self.id, error = %e, "Skipping unreadable record");
                    None
                }
            })
            .filter(|post| SourceFilter::all_match(filters, post))
            .collect();

        debug!(source = %self.id, total, kept = posts.len(), "Pulled posts from file");
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::PostKind;
    use crate::post::fixtures::{mail, paper};

    fn write_posts(dir: &tempfile::TempDir, extra: Option<PostRecord>) -> PathBuf {
        let mut records = vec![
            paper("p1", "Sparse attention for LLM inference").to_record(),
            paper("p2", "Graph rewriting").to_record(),
            mail("m1", "LLM reading group", &[]).to_record(),
        ];
        records.extend(extra);
        let path = dir.path().join("posts.json");
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn pull_without_filters_returns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonFileSource::new("arxiv-cs", write_posts(&dir, None));
        let posts = source.pull(&[]).await.unwrap();
        let ids: Vec<_> = posts.iter().map(Post::id).collect();
        assert_eq!(ids, vec!["p1", "p2", "m1"]);
    }

    #[tokio::test]
    async fn filters_are_conjunctive() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonFileSource::new("arxiv-cs", write_posts(&dir, None));
        let filters = [
            SourceFilter::Keyword("llm".into()),
            SourceFilter::Kind(PostKind::Paper),
        ];
        let posts = source.pull(&filters).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id(), "p1");
    }

    #[tokio::test]
    async fn unreadable_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = paper("p9", "Broken").to_record();
        broken.remove("url");
        let source = JsonFileSource::new("arxiv-cs", write_posts(&dir, Some(broken)));
        assert_eq!(source.pull(&[]).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_file_is_a_data_processing_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonFileSource::new("arxiv-cs", dir.path().join("absent.json"));
        assert!(matches!(
            source.pull(&[]).await,
            Err(AutomatonError::DataProcessing(_))
        ));
    }
}
