//! `SQLite`-backed implementation of [`Datastore`].
//!
//! Uses a single `Mutex<Connection>`; the workflow is strictly sequential so
//! contention never happens in practice.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use super::{Datastore, DatastoreError, StoredCheckpoint};
use crate::post::Post;
use crate::workflow::{Insight, WorkflowState};

/// Idempotent DDL for the workflow tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    kind TEXT NOT NULL,
    record TEXT NOT NULL,
    pulled_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS insights (
    post_id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    relevance REAL NOT NULL,
    payload TEXT NOT NULL,
    processed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_source ON posts (source);
";

pub struct SqliteDatastore {
    conn: Mutex<Connection>,
}

impl SqliteDatastore {
    /// Open or create a database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, DatastoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        info!(path = %path.display(), "Datastore opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, DatastoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, DatastoreError> {
        self.conn.lock().map_err(|_| DatastoreError::LockPoisoned)
    }

    pub fn count_checkpoints(&self) -> Result<i64, DatastoreError> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM checkpoints", [], |row| row.get(0))?)
    }

    pub fn count_posts(&self) -> Result<i64, DatastoreError> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?)
    }

    pub fn count_insights(&self) -> Result<i64, DatastoreError> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM insights", [], |row| row.get(0))?)
    }

    /// Run raw SQL against the connection. Test support for corrupting state.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), DatastoreError> {
        self.lock_conn()?.execute_batch(sql)?;
        Ok(())
    }
}

fn timestamp(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Raw checkpoint columns before parsing.
type CheckpointRow = (String, String, String, String);

fn decode_row((run_id, state, created_at, payload): CheckpointRow) -> Result<StoredCheckpoint, DatastoreError> {
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| DatastoreError::Corrupt(format!("bad run_id {run_id}: {e}")))?;
    let state: WorkflowState = serde_json::from_value(serde_json::Value::String(state))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DatastoreError::Corrupt(format!("bad created_at {created_at}: {e}")))?;
    Ok(StoredCheckpoint {
        run_id,
        state,
        created_at,
        payload,
    })
}

impl Datastore for SqliteDatastore {
    fn write_checkpoint(&self, checkpoint: &StoredCheckpoint, retain: usize) -> Result<(), DatastoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO checkpoints (run_id, state, created_at, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                checkpoint.run_id.to_string(),
                checkpoint.state.as_str(),
                timestamp(checkpoint.created_at),
                checkpoint.payload,
            ],
        )?;
        tx.execute(
            "DELETE FROM checkpoints WHERE id NOT IN \
             (SELECT id FROM checkpoints ORDER BY id DESC LIMIT ?1)",
            params![retain as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn latest_checkpoint(&self) -> Result<Option<StoredCheckpoint>, DatastoreError> {
        let conn = self.lock_conn()?;
        let row: Option<CheckpointRow> = conn
            .query_row(
                "SELECT run_id, state, created_at, payload FROM checkpoints ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(decode_row).transpose()
    }

    fn store_post(&self, post: &Post) -> Result<(), DatastoreError> {
        let record = serde_json::to_string(&post.to_record())?;
        let conn = self.lock_conn()?;
        conn.execute(
            "REPLACE INTO posts (id, source, kind, record, pulled_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                post.id(),
                post.source(),
                post.kind().as_str(),
                record,
                timestamp(post.pulled_date()),
            ],
        )?;
        Ok(())
    }

    fn store_insight(&self, insight: &Insight) -> Result<(), DatastoreError> {
        let payload = serde_json::to_string(insight)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "REPLACE INTO insights (post_id, source, relevance, payload, processed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                insight.post_id,
                insight.source,
                insight.relevance_score,
                payload,
                timestamp(insight.processed_date),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::fixtures::{mail, paper};

    fn stored(state: WorkflowState, payload: &str) -> StoredCheckpoint {
        StoredCheckpoint {
            run_id: Uuid::new_v4(),
            state,
            created_at: Utc::now(),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn empty_store_has_no_checkpoint() {
        let db = SqliteDatastore::in_memory().unwrap();
        assert!(db.latest_checkpoint().unwrap().is_none());
    }

    #[test]
    fn latest_checkpoint_wins() {
        let db = SqliteDatastore::in_memory().unwrap();
        let first = stored(WorkflowState::Pulling, "{}");
        let second = stored(WorkflowState::Summarizing, r#"{"n":2}"#);
        db.write_checkpoint(&first, 10).unwrap();
        db.write_checkpoint(&second, 10).unwrap();

        let latest = db.latest_checkpoint().unwrap().unwrap();
        assert_eq!(latest.run_id, second.run_id);
        assert_eq!(latest.state, WorkflowState::Summarizing);
        assert_eq!(latest.payload, r#"{"n":2}"#);
        assert_eq!(latest.created_at, second.created_at);
    }

    #[test]
    fn old_checkpoints_are_pruned() {
        let db = SqliteDatastore::in_memory().unwrap();
        for _ in 0..5 {
            db.write_checkpoint(&stored(WorkflowState::Pulling, "{}"), 2).unwrap();
        }
        assert_eq!(db.count_checkpoints().unwrap(), 2);
    }

    #[test]
    fn failed_write_leaves_previous_checkpoint_visible() {
        let db = SqliteDatastore::in_memory().unwrap();
        let first = stored(WorkflowState::Pulling, "{}");
        db.write_checkpoint(&first, 10).unwrap();

        // Reject any further insert so the transaction aborts midway.
        db.execute_raw(
            "CREATE TRIGGER reject_insert BEFORE INSERT ON checkpoints \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();
        assert!(db.write_checkpoint(&stored(WorkflowState::Done, "{}"), 10).is_err());

        let latest = db.latest_checkpoint().unwrap().unwrap();
        assert_eq!(latest.run_id, first.run_id);
        assert_eq!(db.count_checkpoints().unwrap(), 1);
    }

    #[test]
    fn posts_and_insights_are_upserted() {
        let db = SqliteDatastore::in_memory().unwrap();
        let post = paper("p1", "t");
        db.store_post(&post).unwrap();
        db.store_post(&post).unwrap();
        db.store_post(&mail("m1", "s", &[])).unwrap();
        assert_eq!(db.count_posts().unwrap(), 2);

        let insight = Insight::for_post(&post);
        db.store_insight(&insight).unwrap();
        db.store_insight(&insight).unwrap();
        assert_eq!(db.count_insights().unwrap(), 1);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("watchcat.db");
        let db = SqliteDatastore::open(&path).unwrap();
        db.write_checkpoint(&stored(WorkflowState::Init, "{}"), 1).unwrap();
        drop(db);

        let reopened = SqliteDatastore::open(&path).unwrap();
        assert_eq!(reopened.latest_checkpoint().unwrap().unwrap().state, WorkflowState::Init);
    }
}
