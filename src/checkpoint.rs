//! Save and restore complete workflow snapshots.
//!
//! A [`Checkpoint`] is encoded as one JSON document, posts included in their
//! flat record form, and written through the [`Datastore`] in a single
//! transaction. Restoring is deliberately forgiving: undecodable posts are
//! skipped, and any other failure is reported as "no checkpoint".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::datastore::{Datastore, StoredCheckpoint};
use crate::error::{AutomatonError, Result};
use crate::post::{Post, PostRecord};
use crate::workflow::{Insight, Notification, WorkflowData, WorkflowState};

/// A complete, independently restorable snapshot of workflow progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub state: WorkflowState,
    pub retry_count: u32,
    pub user_model: Map<String, Value>,
    pub pulled_posts: Vec<Post>,
    pub processed_insights: Vec<Insight>,
    pub notifications_sent: Vec<Notification>,
    /// Set when the run was forced to `Done` by an error.
    pub last_error: Option<String>,
}

impl Checkpoint {
    pub fn capture(run_id: Uuid, state: WorkflowState, retry_count: u32, data: &WorkflowData) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            state,
            retry_count,
            user_model: data.user_model.clone(),
            pulled_posts: data.pulled_posts.clone(),
            processed_insights: data.processed_insights.clone(),
            notifications_sent: data.notifications_sent.clone(),
            last_error: None,
        }
    }

    pub fn with_error(mut self, error: &AutomatonError) -> Self {
        self.last_error = Some(error.to_string());
        self
    }

    pub fn into_data(self) -> WorkflowData {
        WorkflowData {
            user_model: self.user_model,
            pulled_posts: self.pulled_posts,
            processed_insights: self.processed_insights,
            notifications_sent: self.notifications_sent,
        }
    }
}

/// On-disk shape of a checkpoint payload.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    timestamp: DateTime<Utc>,
    state: WorkflowState,
    retry_count: u32,
    #[serde(default)]
    user_model: Map<String, Value>,
    #[serde(default)]
    pulled_posts: Vec<PostRecord>,
    #[serde(default)]
    processed_insights: Vec<Insight>,
    #[serde(default)]
    notifications_sent: Vec<Notification>,
    #[serde(default)]
    last_error: Option<String>,
}

/// Short description of the latest checkpoint, for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointSummary {
    pub run_id: Uuid,
    pub state: WorkflowState,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub posts: usize,
    pub insights: usize,
    pub notifications: usize,
    pub last_error: Option<String>,
}

impl From<&Checkpoint> for CheckpointSummary {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            run_id: checkpoint.run_id,
            state: checkpoint.state,
            timestamp: checkpoint.timestamp,
            retry_count: checkpoint.retry_count,
            posts: checkpoint.pulled_posts.len(),
            insights: checkpoint.processed_insights.len(),
            notifications: checkpoint.notifications_sent.len(),
            last_error: checkpoint.last_error.clone(),
        }
    }
}

pub struct CheckpointStore {
    datastore: Arc<dyn Datastore>,
    retain: usize,
}

impl CheckpointStore {
    pub fn new(datastore: Arc<dyn Datastore>, retain: usize) -> Self {
        Self {
            datastore,
            retain: retain.max(1),
        }
    }

    /// Persist `checkpoint` atomically. Older snapshots beyond the retention
    /// count are pruned in the same write.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let document = CheckpointDocument {
            timestamp: checkpoint.timestamp,
            state: checkpoint.state,
            retry_count: checkpoint.retry_count,
            user_model: checkpoint.user_model.clone(),
            pulled_posts: checkpoint.pulled_posts.iter().map(Post::to_record).collect(),
            processed_insights: checkpoint.processed_insights.clone(),
            notifications_sent: checkpoint.notifications_sent.clone(),
            last_error: checkpoint.last_error.clone(),
        };

        let stored = serde_json::to_string(&document)
            .map_err(|e| AutomatonError::Checkpoint(format!("failed to encode checkpoint: {e}")))
            .map(|payload| StoredCheckpoint {
                run_id: checkpoint.run_id,
                state: checkpoint.state,
                created_at: checkpoint.timestamp,
                payload,
            })?;

        if let Err(e) = self.datastore.write_checkpoint(&stored, self.retain) {
            error!(state = %checkpoint.state, error = %e, "Failed to save checkpoint");
            return Err(AutomatonError::Checkpoint(format!("failed to save checkpoint: {e}")));
        }

        info!(state = %checkpoint.state, run_id = %checkpoint.run_id, "Saved checkpoint");
        Ok(())
    }

    /// The most recent snapshot, or `None` on a fresh start.
    ///
    /// Never fails: unreadable history is logged and treated as absent so a
    /// corrupt store cannot block recovery.
    pub fn restore(&self) -> Option<Checkpoint> {
        let stored = match self.datastore.latest_checkpoint() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                info!("No checkpoint found, starting fresh");
                return None;
            }
            Err(e) => {
                error!(error = %e, "Failed to read checkpoint, starting fresh");
                return None;
            }
        };

        let document: CheckpointDocument = match serde_json::from_str(&stored.payload) {
            Ok(document) => document,
            Err(e) => {
                error!(run_id = %stored.run_id, error = %e, "Failed to decode checkpoint, starting fresh");
                return None;
            }
        };

        let pulled_posts = document
            .pulled_posts
            .iter()
            .enumerate()
            .filter_map(|(index, record)| match Post::from_record(record) {
                Ok(post) => Some(post),
                Err(e) => {
                    warn!(
                        index,
                        id = record.get("id").map(String::as_str).unwrap_or("?"),
                        error = %e,
                        "Skipping unreadable post in checkpoint"
                    );
                    None
                }
            })
            .collect();

        info!(state = %document.state, run_id = %stored.run_id, "Restored checkpoint");
        Some(Checkpoint {
            run_id: stored.run_id,
            timestamp: document.timestamp,
            state: document.state,
            retry_count: document.retry_count,
            user_model: document.user_model,
            pulled_posts,
            processed_insights: document.processed_insights,
            notifications_sent: document.notifications_sent,
            last_error: document.last_error,
        })
    }

    pub fn latest_summary(&self) -> Option<CheckpointSummary> {
        self.restore().as_ref().map(CheckpointSummary::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{DatastoreError, SqliteDatastore};
    use crate::post::fixtures::{mail, paper};
    use serde_json::json;

    fn sample() -> Checkpoint {
        let mut data = WorkflowData::default();
        data.user_model.insert(
            "metrics".into(),
            json!({"total_insights_generated": 2, "last_update": "2025-08-21T06:00:00Z"}),
        );
        data.pulled_posts = vec![paper("p1", "Sparse attention"), mail("m1", "Digest", &["https://x.org/a.pdf"])];
        let mut insight = Insight::for_post(&data.pulled_posts[0]);
        insight.relevance_score = 0.9;
        insight.metadata.insert("keywords".into(), json!({"matched": ["attention"]}));
        data.processed_insights = vec![insight];
        data.notifications_sent = vec![Notification::info("Processed 1 insights", vec!["log".into()])];
        Checkpoint::capture(Uuid::new_v4(), WorkflowState::Feedback, 1, &data)
    }

    fn store() -> (Arc<SqliteDatastore>, CheckpointStore) {
        let db = Arc::new(SqliteDatastore::in_memory().unwrap());
        let store = CheckpointStore::new(db.clone(), 5);
        (db, store)
    }

    #[test]
    fn restore_before_save_is_none() {
        let (_, store) = store();
        assert!(store.restore().is_none());
        assert!(store.latest_summary().is_none());
    }

    #[test]
    fn save_then_restore_round_trips() {
        let (_, store) = store();
        let checkpoint = sample();
        store.save(&checkpoint).unwrap();
        assert_eq!(store.restore().unwrap(), checkpoint);
    }

    #[test]
    fn error_stamp_round_trips() {
        let (_, store) = store();
        let checkpoint = sample().with_error(&AutomatonError::DataProcessing("boom".into()));
        store.save(&checkpoint).unwrap();
        let restored = store.restore().unwrap();
        assert_eq!(restored.last_error.as_deref(), Some("Data processing error: boom"));
        assert_eq!(store.latest_summary().unwrap().posts, 2);
    }

    #[test]
    fn unreadable_post_is_skipped() {
        let (db, store) = store();
        let checkpoint = sample();
        store.save(&checkpoint).unwrap();

        // Rewrite the payload with a broken date on the first post.
        let mut stored = db.latest_checkpoint().unwrap().unwrap();
        let mut payload: Value = serde_json::from_str(&stored.payload).unwrap();
        payload["pulled_posts"][0]["published_date"] = json!("not a date");
        stored.payload = payload.to_string();
        db.write_checkpoint(&stored, 5).unwrap();

        let restored = store.restore().unwrap();
        assert_eq!(restored.pulled_posts, vec![checkpoint.pulled_posts[1].clone()]);
        assert_eq!(restored.processed_insights, checkpoint.processed_insights);
    }

    #[test]
    fn corrupt_document_is_treated_as_absent() {
        let (db, store) = store();
        let mut stored = {
            store.save(&sample()).unwrap();
            db.latest_checkpoint().unwrap().unwrap()
        };
        stored.payload = "{ truncated".into();
        db.write_checkpoint(&stored, 5).unwrap();

        assert!(store.restore().is_none());
    }

    struct BrokenDatastore;

    impl Datastore for BrokenDatastore {
        fn write_checkpoint(&self, _: &StoredCheckpoint, _: usize) -> Result<(), DatastoreError> {
            Err(DatastoreError::LockPoisoned)
        }

        fn latest_checkpoint(&self) -> Result<Option<StoredCheckpoint>, DatastoreError> {
            Err(DatastoreError::LockPoisoned)
        }

        fn store_post(&self, _: &Post) -> Result<(), DatastoreError> {
            Err(DatastoreError::LockPoisoned)
        }

        fn store_insight(&self, _: &Insight) -> Result<(), DatastoreError> {
            Err(DatastoreError::LockPoisoned)
        }
    }

    #[test]
    fn save_failure_is_a_checkpoint_error_and_restore_swallows_reads() {
        let store = CheckpointStore::new(Arc::new(BrokenDatastore), 5);
        assert!(matches!(
            store.save(&sample()),
            Err(AutomatonError::Checkpoint(_))
        ));
        assert!(store.restore().is_none());
    }
}
