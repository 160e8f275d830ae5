//! Durable Turn Store.
//!
//! [`SqliteTurnStore`] is the raw append-only log.  [`DurableTurnStore`]
//! wraps any [`TurnStore`] and adds the two guarantees the rest of the core
//! relies on:
//!
//! * **Bounded retry** – `append` is attempted up to
//!   [`RetryPolicy::attempts`] times with a linear backoff of
//!   `attempt × step` between attempts.  Because a turn id is written at most
//!   once, a retry after an ambiguous failure never duplicates the turn.
//! * **Isolation check** – every row returned by a read is verified to
//!   belong to the requesting user.  Foreign rows are logged at `error`
//!   level and stripped; the caller never sees them.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use recall_memory::store::Database;
//! use recall_memory::turns::{DurableTurnStore, RetryPolicy, SqliteTurnStore};
//! use recall_types::Turn;
//!
//! # async fn run() -> Result<(), recall_memory::store::StorageError> {
//! let db = Database::open_in_memory()?;
//! let turns = DurableTurnStore::new(Arc::new(SqliteTurnStore::new(db)), RetryPolicy::default());
//!
//! turns.append(&Turn::new(1, "hello", false)).await?;
//! let recent = turns.recent(1, 1).await?;
//! assert_eq!(recent[0].content, "hello");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_types::{Turn, UserId};
use rusqlite::params;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::store::{Database, StorageError, TurnStore, col_ts, col_uuid, ts};

// ─────────────────────────────────────────────────────────────────────────────
// SqliteTurnStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite implementation of [`TurnStore`].
#[derive(Clone)]
pub struct SqliteTurnStore {
    db: Database,
}

impl SqliteTurnStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<Turn> {
    Ok(Turn {
        id: col_uuid(row, 0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        is_from_assistant: row.get(3)?,
        timestamp: col_ts(row, 4)?,
    })
}

#[async_trait]
impl TurnStore for SqliteTurnStore {
    async fn append(&self, turn: &Turn) -> Result<(), StorageError> {
        let turn = turn.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO turns (id, user_id, content, is_from_assistant, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        turn.id.to_string(),
                        turn.user_id,
                        turn.content,
                        turn.is_from_assistant,
                        ts(&turn.timestamp)
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn recent(&self, user_id: UserId, limit: usize) -> Result<Vec<Turn>, StorageError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, content, is_from_assistant, timestamp
                     FROM turns WHERE user_id = ?1
                     ORDER BY timestamp DESC, rowid DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![user_id, limit as i64], row_to_turn)?;
                let mut turns = rows.collect::<Result<Vec<_>, _>>()?;
                turns.reverse();
                Ok(turns)
            })
            .await
    }

    async fn since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<Vec<Turn>, StorageError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, content, is_from_assistant, timestamp
                     FROM turns WHERE user_id = ?1 AND timestamp >= ?2
                     ORDER BY timestamp ASC, rowid ASC",
                )?;
                let rows = stmt.query_map(params![user_id, ts(&since)], row_to_turn)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RetryPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Linear-backoff retry schedule for turn writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Backoff unit; the wait after attempt `n` is `n × step`.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, step: Duration::from_millis(100) }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

/// Acknowledgement of a durable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnAck {
    pub turn_id: Uuid,
    /// Attempt (1-based) on which the write succeeded.
    pub attempts: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// DurableTurnStore
// ─────────────────────────────────────────────────────────────────────────────

/// Retrying, isolation-checking front of a [`TurnStore`].
#[derive(Clone)]
pub struct DurableTurnStore {
    inner: Arc<dyn TurnStore>,
    retry: RetryPolicy,
}

impl DurableTurnStore {
    pub fn new(inner: Arc<dyn TurnStore>, retry: RetryPolicy) -> Self {
        Self { inner, retry }
    }

    /// Durably append `turn`, retrying per the configured policy.
    ///
    /// Returns only once the write succeeded or every attempt failed; in the
    /// latter case the last [`StorageError`] is returned.
    pub async fn append(&self, turn: &Turn) -> Result<TurnAck, StorageError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.append(turn).await {
                Ok(()) => {
                    debug!(user_id = turn.user_id, turn_id = %turn.id, attempt, "turn persisted");
                    return Ok(TurnAck { turn_id: turn.id, attempts: attempt });
                }
                Err(e) if attempt < attempts => {
                    warn!(user_id = turn.user_id, attempt, error = %e, "turn write failed, retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(user_id = turn.user_id, attempts, error = %e, "turn write failed after all retries");
                    return Err(e);
                }
            }
        }
    }

    /// The newest `limit` turns of `user_id`, oldest first, with foreign
    /// rows stripped.
    pub async fn recent(&self, user_id: UserId, limit: usize) -> Result<Vec<Turn>, StorageError> {
        let rows = self.inner.recent(user_id, limit).await?;
        Ok(strip_foreign(user_id, rows))
    }

    /// Turns of `user_id` at or after `since`, oldest first, with foreign
    /// rows stripped.
    pub async fn since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<Vec<Turn>, StorageError> {
        let rows = self.inner.since(user_id, since).await?;
        Ok(strip_foreign(user_id, rows))
    }
}

/// Drop every turn not owned by `user_id`, logging the violation.
fn strip_foreign(user_id: UserId, rows: Vec<Turn>) -> Vec<Turn> {
    let total = rows.len();
    let owned: Vec<Turn> = rows.into_iter().filter(|t| t.user_id == user_id).collect();
    let foreign_rows = total - owned.len();
    if foreign_rows > 0 {
        error!(
            user_id,
            foreign_rows,
            "isolation violation: store returned turns belonging to another user; rows stripped"
        );
    }
    owned
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sqlite_store() -> SqliteTurnStore {
        SqliteTurnStore::new(Database::open_in_memory().unwrap())
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy { attempts: 3, step: Duration::from_millis(1) }
    }

    /// Fails the first `failures` appends, then delegates to SQLite.
    struct FlakyStore {
        inner: SqliteTurnStore,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TurnStore for FlakyStore {
        async fn append(&self, turn: &Turn) -> Result<(), StorageError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(StorageError::Unavailable("injected".into()));
            }
            self.inner.append(turn).await
        }
        async fn recent(&self, user_id: UserId, limit: usize) -> Result<Vec<Turn>, StorageError> {
            self.inner.recent(user_id, limit).await
        }
        async fn since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<Vec<Turn>, StorageError> {
            self.inner.since(user_id, since).await
        }
    }

    /// Returns a fixed row set regardless of the requested user.
    struct LeakyStore {
        rows: Mutex<Vec<Turn>>,
    }

    #[async_trait]
    impl TurnStore for LeakyStore {
        async fn append(&self, turn: &Turn) -> Result<(), StorageError> {
            self.rows.lock().unwrap().push(turn.clone());
            Ok(())
        }
        async fn recent(&self, _user_id: UserId, _limit: usize) -> Result<Vec<Turn>, StorageError> {
            Ok(self.rows.lock().unwrap().clone())
        }
        async fn since(&self, _user_id: UserId, _since: DateTime<Utc>) -> Result<Vec<Turn>, StorageError> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    // ── SqliteTurnStore ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn recent_returns_newest_window_oldest_first() {
        let store = sqlite_store();
        for i in 0..5 {
            let mut t = Turn::new(1, format!("msg {i}"), i % 2 == 1);
            t.timestamp = Utc::now() + chrono::Duration::seconds(i);
            store.append(&t).await.unwrap();
        }
        let recent = store.recent(1, 3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn duplicate_append_is_ignored() {
        let store = sqlite_store();
        let t = Turn::new(1, "once", false);
        store.append(&t).await.unwrap();
        store.append(&t).await.unwrap();
        assert_eq!(store.recent(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn since_filters_by_time() {
        let store = sqlite_store();
        let mut old = Turn::new(1, "old", false);
        old.timestamp = Utc::now() - chrono::Duration::hours(2);
        store.append(&old).await.unwrap();
        store.append(&Turn::new(1, "new", false)).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let turns = store.since(1, cutoff).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "new");
    }

    // ── DurableTurnStore ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn append_succeeds_on_third_attempt_without_duplicates() {
        let flaky = Arc::new(FlakyStore { inner: sqlite_store(), failures: 2, calls: AtomicU32::new(0) });
        let durable = DurableTurnStore::new(flaky.clone(), fast_retry());

        let ack = durable.append(&Turn::new(9, "hello", false)).await.unwrap();
        assert_eq!(ack.attempts, 3);
        assert_eq!(durable.recent(9, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_fails_after_exhausting_attempts() {
        let flaky = Arc::new(FlakyStore { inner: sqlite_store(), failures: 3, calls: AtomicU32::new(0) });
        let durable = DurableTurnStore::new(flaky.clone(), fast_retry());

        assert!(durable.append(&Turn::new(9, "lost", false)).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn foreign_rows_are_stripped() {
        let leaky = Arc::new(LeakyStore { rows: Mutex::new(Vec::new()) });
        leaky.append(&Turn::new(1, "mine", false)).await.unwrap();
        leaky.append(&Turn::new(2, "theirs", false)).await.unwrap();
        leaky.append(&Turn::new(1, "also mine", true)).await.unwrap();

        let durable = DurableTurnStore::new(leaky, fast_retry());
        let turns = durable.recent(1, 50).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert!(turns.iter().all(|t| t.user_id == 1));
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
    }
}
