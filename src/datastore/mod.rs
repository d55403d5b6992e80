//! Durable storage for checkpoints, posts and insights.
//!
//! [`Datastore`] is the storage contract; [`SqliteDatastore`] is the
//! rusqlite-backed implementation used by the binary and the tests.

mod sqlite;

pub use sqlite::SqliteDatastore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::post::Post;
use crate::workflow::{Insight, WorkflowState};

#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("datastore lock poisoned")]
    LockPoisoned,
}

/// A serialized checkpoint as stored, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCheckpoint {
    pub run_id: Uuid,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub payload: String,
}

/// Storage contract for workflow persistence.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn Datastore>`.
pub trait Datastore: Send + Sync {
    /// Append a checkpoint and prune all but the newest `retain` ones.
    ///
    /// Both happen atomically: a reader sees either the previous snapshot set
    /// or the new one.
    fn write_checkpoint(&self, checkpoint: &StoredCheckpoint, retain: usize) -> Result<(), DatastoreError>;

    /// The most recently written checkpoint, if any.
    fn latest_checkpoint(&self) -> Result<Option<StoredCheckpoint>, DatastoreError>;

    /// Insert or replace a pulled post.
    fn store_post(&self, post: &Post) -> Result<(), DatastoreError>;

    /// Insert or replace the insight derived from a post.
    fn store_insight(&self, insight: &Insight) -> Result<(), DatastoreError>;
}
