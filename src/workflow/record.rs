use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::post::Post;

/// Relevance assigned to an insight when no processor reports a score.
pub const DEFAULT_RELEVANCE: f64 = 0.5;

/// Result of running one post through the registered processors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub post_id: String,
    pub source: String,
    pub processed_date: DateTime<Utc>,
    pub relevance_score: f64,
    /// Processor id → processor output.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Insight {
    pub fn for_post(post: &Post) -> Self {
        Self {
            post_id: post.id().to_string(),
            source: post.source().to_string(),
            processed_date: Utc::now(),
            relevance_score: DEFAULT_RELEVANCE,
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warning,
}

/// A message derived in the feedback stage and handed to notifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    /// Notifier ids the notification was addressed to.
    pub channels: Vec<String>,
    /// Notifier ids that accepted it.
    #[serde(default)]
    pub delivered_to: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn info(message: impl Into<String>, channels: Vec<String>) -> Self {
        Self {
            kind: NotificationKind::Info,
            message: message.into(),
            channels,
            delivered_to: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn warning(message: impl Into<String>, channels: Vec<String>) -> Self {
        Self {
            kind: NotificationKind::Warning,
            ..Self::info(message, channels)
        }
    }
}

/// Everything the stages accumulate during one pipeline cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowData {
    pub user_model: Map<String, Value>,
    pub pulled_posts: Vec<Post>,
    pub processed_insights: Vec<Insight>,
    pub notifications_sent: Vec<Notification>,
}

impl WorkflowData {
    /// Drop the per-cycle accumulators, keeping the user model.
    pub fn start_cycle(&mut self) {
        self.pulled_posts.clear();
        self.processed_insights.clear();
        self.notifications_sent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::fixtures::paper;

    #[test]
    fn insight_starts_with_default_relevance() {
        let insight = Insight::for_post(&paper("p1", "t"));
        assert_eq!(insight.post_id, "p1");
        assert_eq!(insight.source, "arxiv-cs");
        assert_eq!(insight.relevance_score, DEFAULT_RELEVANCE);
        assert!(insight.metadata.is_empty());
    }

    #[test]
    fn notification_serializes_kind_as_type() {
        let n = Notification::info("Processed 2 insights", vec!["log".into()]);
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "info");
        assert_eq!(json["channels"][0], "log");

        let warning = serde_json::to_value(Notification::warning("1 of 3 posts could not be processed", Vec::new())).unwrap();
        assert_eq!(warning["type"], "warning");
    }

    #[test]
    fn start_cycle_keeps_user_model() {
        let mut data = WorkflowData::default();
        data.user_model.insert("metrics".into(), serde_json::json!({"total_insights_generated": 4}));
        data.pulled_posts.push(paper("p1", "t"));
        data.processed_insights.push(Insight::for_post(&paper("p1", "t")));

        data.start_cycle();
        assert!(data.pulled_posts.is_empty());
        assert!(data.processed_insights.is_empty());
        assert_eq!(data.user_model.len(), 1);
    }
}
