//! Session Store.
//!
//! SQLite implementation of [`SessionStore`]: sessions, threads and
//! continuity bridges.
//!
//! The "one active session per user" invariant is backed by the partial
//! unique index `idx_sessions_one_active`; a second active insert for the
//! same user fails with [`StorageError::Conflict`] instead of silently
//! creating a duplicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_types::{
    ContinuityBridge, Session, Thread, ThreadPriority, ThreadStatus, UserId,
};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use uuid::Uuid;

use crate::store::{
    Database, SessionStore, StorageError, col_enum, col_json, col_opt_uuid, col_ts, col_uuid,
    to_json, ts,
};

const SESSION_COLUMNS: &str = "id, user_id, session_key, title, summary, key_topics, \
     emotional_tone, unresolved_threads, context_carryover, message_count, last_activity, \
     created_at, is_active";

const THREAD_COLUMNS: &str = "id, user_id, session_id, thread_key, topic, status, priority, \
     last_mentioned, context_summary, next_session_prompt, emotional_context, progress_notes, \
     created_at";

const BRIDGE_COLUMNS: &str = "id, user_id, from_session_id, to_session_id, bridge_type, \
     carryover_data, priority, addressed, created_at";

/// SQLite implementation of [`SessionStore`].
#[derive(Clone)]
pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: col_uuid(row, 0)?,
        user_id: row.get(1)?,
        session_key: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        key_topics: col_json(row, 5)?,
        emotional_tone: row.get(6)?,
        unresolved_threads: col_json(row, 7)?,
        context_carryover: col_json(row, 8)?,
        message_count: row.get(9)?,
        last_activity: col_ts(row, 10)?,
        created_at: col_ts(row, 11)?,
        is_active: row.get(12)?,
    })
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: col_uuid(row, 0)?,
        user_id: row.get(1)?,
        session_id: col_opt_uuid(row, 2)?,
        thread_key: row.get(3)?,
        topic: row.get(4)?,
        status: col_enum(row, 5, ThreadStatus::parse)?,
        priority: col_enum(row, 6, ThreadPriority::parse)?,
        last_mentioned: col_ts(row, 7)?,
        context_summary: row.get(8)?,
        next_session_prompt: row.get(9)?,
        emotional_context: col_json(row, 10)?,
        progress_notes: row.get(11)?,
        created_at: col_ts(row, 12)?,
    })
}

fn row_to_bridge(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContinuityBridge> {
    Ok(ContinuityBridge {
        id: col_uuid(row, 0)?,
        user_id: row.get(1)?,
        from_session_id: col_uuid(row, 2)?,
        to_session_id: col_uuid(row, 3)?,
        bridge_type: row.get(4)?,
        carryover_data: col_json(row, 5)?,
        priority: row.get(6)?,
        addressed: row.get(7)?,
        created_at: col_ts(row, 8)?,
    })
}

fn write_session(conn: &Connection, s: &Session) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE sessions SET title = ?1, summary = ?2, key_topics = ?3,
             emotional_tone = ?4, unresolved_threads = ?5, context_carryover = ?6,
             message_count = ?7, last_activity = ?8, is_active = ?9
         WHERE id = ?10",
        params![
            s.title,
            s.summary,
            to_json(&s.key_topics)?,
            s.emotional_tone,
            to_json(&s.unresolved_threads)?,
            to_json(&s.context_carryover)?,
            s.message_count,
            ts(&s.last_activity),
            s.is_active,
            s.id.to_string()
        ],
    )
    .map_err(|e| StorageError::classify(e, "session update"))?;
    Ok(())
}

fn write_thread(conn: &Connection, t: &Thread) -> Result<(), StorageError> {
    conn.execute(
        &format!(
            "INSERT INTO threads ({THREAD_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            t.id.to_string(),
            t.user_id,
            t.session_id.map(|id| id.to_string()),
            t.thread_key,
            t.topic,
            t.status.as_str(),
            t.priority.as_str(),
            ts(&t.last_mentioned),
            t.context_summary,
            t.next_session_prompt,
            to_json(&t.emotional_context)?,
            t.progress_notes,
            ts(&t.created_at)
        ],
    )
    .map_err(|e| StorageError::classify(e, "thread key"))?;
    Ok(())
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn active_session(&self, user_id: UserId) -> Result<Option<Session>, StorageError> {
        self.db
            .call(move |conn| {
                let session = conn
                    .query_row(
                        &format!(
                            "SELECT {SESSION_COLUMNS} FROM sessions
                             WHERE user_id = ?1 AND is_active = 1 LIMIT 1"
                        ),
                        params![user_id],
                        row_to_session,
                    )
                    .optional()?;
                Ok(session)
            })
            .await
    }

    async fn create_session(&self, session: &Session) -> Result<(), StorageError> {
        let s = session.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO sessions ({SESSION_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                    ),
                    params![
                        s.id.to_string(),
                        s.user_id,
                        s.session_key,
                        s.title,
                        s.summary,
                        to_json(&s.key_topics)?,
                        s.emotional_tone,
                        to_json(&s.unresolved_threads)?,
                        to_json(&s.context_carryover)?,
                        s.message_count,
                        ts(&s.last_activity),
                        ts(&s.created_at),
                        s.is_active
                    ],
                )
                .map_err(|e| {
                    StorageError::classify(e, &format!("active session for user {}", s.user_id))
                })?;
                Ok(())
            })
            .await
    }

    async fn touch_session(
        &self,
        id: Uuid,
        message_delta: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE sessions SET last_activity = ?1, message_count = message_count + ?2
                     WHERE id = ?3",
                    params![ts(&at), message_delta, id.to_string()],
                )?;
                Ok(())
            })
            .await
    }

    async fn update_session(&self, session: &Session) -> Result<(), StorageError> {
        let s = session.clone();
        self.db.call(move |conn| write_session(conn, &s)).await
    }

    async fn close_session(&self, session: &Session, threads: &[Thread]) -> Result<(), StorageError> {
        let s = session.clone();
        let threads = threads.to_vec();
        self.db
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                write_session(&tx, &s)?;
                for t in &threads {
                    write_thread(&tx, t)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn closed_sessions(&self, user_id: UserId, limit: usize) -> Result<Vec<Session>, StorageError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE user_id = ?1 AND is_active = 0
                     ORDER BY last_activity DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![user_id, limit as i64], row_to_session)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    async fn insert_thread(&self, thread: &Thread) -> Result<(), StorageError> {
        let t = thread.clone();
        self.db.call(move |conn| write_thread(conn, &t)).await
    }

    async fn thread_by_topic(&self, user_id: UserId, topic: &str) -> Result<Option<Thread>, StorageError> {
        let topic = topic.to_string();
        self.db
            .call(move |conn| {
                let thread = conn
                    .query_row(
                        &format!(
                            "SELECT {THREAD_COLUMNS} FROM threads
                             WHERE user_id = ?1 AND topic = ?2
                             ORDER BY last_mentioned DESC LIMIT 1"
                        ),
                        params![user_id, topic],
                        row_to_thread,
                    )
                    .optional()?;
                Ok(thread)
            })
            .await
    }

    async fn update_thread(&self, thread: &Thread) -> Result<(), StorageError> {
        let t = thread.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE threads SET session_id = ?1, status = ?2, priority = ?3,
                         last_mentioned = ?4, context_summary = ?5, next_session_prompt = ?6,
                         emotional_context = ?7, progress_notes = ?8
                     WHERE id = ?9",
                    params![
                        t.session_id.map(|id| id.to_string()),
                        t.status.as_str(),
                        t.priority.as_str(),
                        ts(&t.last_mentioned),
                        t.context_summary,
                        t.next_session_prompt,
                        to_json(&t.emotional_context)?,
                        t.progress_notes,
                        t.id.to_string()
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn threads_with_status(
        &self,
        user_id: UserId,
        status: ThreadStatus,
        limit: usize,
    ) -> Result<Vec<Thread>, StorageError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {THREAD_COLUMNS} FROM threads
                     WHERE user_id = ?1 AND status = ?2
                     ORDER BY last_mentioned DESC LIMIT ?3"
                ))?;
                let rows = stmt.query_map(params![user_id, status.as_str(), limit as i64], row_to_thread)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    async fn insert_bridge(&self, bridge: &ContinuityBridge) -> Result<(), StorageError> {
        let b = bridge.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO continuity_bridges ({BRIDGE_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                    ),
                    params![
                        b.id.to_string(),
                        b.user_id,
                        b.from_session_id.to_string(),
                        b.to_session_id.to_string(),
                        b.bridge_type,
                        to_json(&b.carryover_data)?,
                        b.priority,
                        b.addressed,
                        ts(&b.created_at)
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn unaddressed_bridges(&self, user_id: UserId) -> Result<Vec<ContinuityBridge>, StorageError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BRIDGE_COLUMNS} FROM continuity_bridges
                     WHERE user_id = ?1 AND addressed = 0
                     ORDER BY priority DESC, created_at DESC"
                ))?;
                let rows = stmt.query_map(params![user_id], row_to_bridge)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    async fn mark_bridges_addressed(&self, user_id: UserId, ids: &[Uuid]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Value> = ids.iter().map(|id| Value::Text(id.to_string())).collect();
        self.db
            .call(move |conn| {
                let list: Vec<String> = (0..ids.len()).map(|i| format!("?{}", i + 2)).collect();
                let sql = format!(
                    "UPDATE continuity_bridges SET addressed = 1
                     WHERE user_id = ?1 AND addressed = 0 AND id IN ({})",
                    list.join(", ")
                );
                let mut values = vec![Value::Integer(user_id)];
                values.extend(ids);
                Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
            })
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
