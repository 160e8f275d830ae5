//! Shared SQLite substrate and the store contracts.
//!
//! A single [`Database`] handle owns one `rusqlite` connection behind a
//! mutex; every adapter ([`SqliteTurnStore`][crate::turns::SqliteTurnStore],
//! [`SqliteSemanticStore`][crate::semantic::SqliteSemanticStore],
//! [`SqliteSessionStore`][crate::sessions::SqliteSessionStore]) clones the
//! handle and runs its statements on the blocking pool via
//! [`Database::call`], so async callers never block a runtime worker.
//!
//! # Storage layout
//!
//! | table                | key                    | notes                                           |
//! |----------------------|------------------------|-------------------------------------------------|
//! | `turns`              | `id` (UUID)            | append-only, indexed by `(user_id, timestamp)`  |
//! | `memory_units`       | `id` (UUID)            | tags / related topics stored as JSON arrays     |
//! | `memory_links`       | `id`, unique `(from_id, to_id)` | no self-loops (CHECK constraint)       |
//! | `memory_insights`    | `id` (UUID)            | supporting ids / suggestions as JSON arrays     |
//! | `sessions`           | `id`, unique `session_key` | partial unique index: one active per user   |
//! | `threads`            | `id`, unique `thread_key` | `session_id` nullable                        |
//! | `continuity_bridges` | `id` (UUID)            | only `addressed` is ever updated                |
//!
//! All timestamps are RFC-3339 UTC strings with fixed microsecond precision
//! so that lexical order equals chronological order.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use recall_types::{
    ContinuityBridge, MemoryInsight, MemoryLink, MemoryType, RecallError, SemanticMemoryUnit,
    Session, Thread, ThreadStatus, Turn, UserId,
};
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use crate::semantic::MemoryStats;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from any persistence adapter.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON column encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Database connection lock poisoned")]
    Poisoned,
    #[error("Uniqueness conflict: {0}")]
    Conflict(String),
    #[error("Blocking worker failed: {0}")]
    Worker(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Map a constraint violation onto [`StorageError::Conflict`], leaving
    /// every other error untouched.
    pub(crate) fn classify(err: rusqlite::Error, what: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Conflict(what.to_string())
            }
            _ => StorageError::Sqlite(err),
        }
    }
}

impl From<StorageError> for RecallError {
    fn from(err: StorageError) -> Self {
        RecallError::Storage(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Database
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to the SQLite database shared by every store adapter.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a persistent database at `path`.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        register_functions(&conn)?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.init_schema()?;
        Ok(db)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        register_functions(&conn)?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                id                TEXT    NOT NULL PRIMARY KEY,
                user_id           INTEGER NOT NULL,
                content           TEXT    NOT NULL,
                is_from_assistant INTEGER NOT NULL,
                timestamp         TEXT    NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_turns_user_time ON turns(user_id, timestamp);

            CREATE TABLE IF NOT EXISTS memory_units (
                id                TEXT    NOT NULL PRIMARY KEY,
                user_id           INTEGER NOT NULL,
                memory_type       TEXT    NOT NULL,
                content           TEXT    NOT NULL,
                tags              TEXT    NOT NULL DEFAULT '[]',
                emotional_context TEXT,
                temporal_context  TEXT,
                related_topics    TEXT    NOT NULL DEFAULT '[]',
                confidence        REAL    NOT NULL DEFAULT 0.8,
                access_count      INTEGER NOT NULL DEFAULT 0,
                last_accessed_at  TEXT,
                created_at        TEXT    NOT NULL,
                source_session_id TEXT,
                is_active         INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_units_user_created ON memory_units(user_id, created_at);

            CREATE TABLE IF NOT EXISTS memory_links (
                id         TEXT    NOT NULL PRIMARY KEY,
                user_id    INTEGER NOT NULL,
                from_id    TEXT    NOT NULL,
                to_id      TEXT    NOT NULL,
                link_type  TEXT    NOT NULL,
                strength   REAL    NOT NULL,
                automatic  INTEGER NOT NULL,
                created_at TEXT    NOT NULL,
                UNIQUE (from_id, to_id),
                CHECK (from_id <> to_id)
            );

            CREATE TABLE IF NOT EXISTS memory_insights (
                id                    TEXT    NOT NULL PRIMARY KEY,
                user_id               INTEGER NOT NULL,
                insight_type          TEXT    NOT NULL,
                content               TEXT    NOT NULL,
                supporting_memory_ids TEXT    NOT NULL DEFAULT '[]',
                confidence            REAL    NOT NULL,
                therapeutic_relevance TEXT    NOT NULL,
                action_suggestions    TEXT    NOT NULL DEFAULT '[]',
                created_at            TEXT    NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id                 TEXT    NOT NULL PRIMARY KEY,
                user_id            INTEGER NOT NULL,
                session_key        TEXT    NOT NULL UNIQUE,
                title              TEXT    NOT NULL,
                summary            TEXT,
                key_topics         TEXT    NOT NULL DEFAULT '[]',
                emotional_tone     TEXT    NOT NULL,
                unresolved_threads TEXT    NOT NULL DEFAULT '{}',
                context_carryover  TEXT    NOT NULL DEFAULT '{}',
                message_count      INTEGER NOT NULL DEFAULT 0,
                last_activity      TEXT    NOT NULL,
                created_at         TEXT    NOT NULL,
                is_active          INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
                ON sessions(user_id) WHERE is_active = 1;

            CREATE TABLE IF NOT EXISTS threads (
                id                  TEXT    NOT NULL PRIMARY KEY,
                user_id             INTEGER NOT NULL,
                session_id          TEXT,
                thread_key          TEXT    NOT NULL UNIQUE,
                topic               TEXT    NOT NULL,
                status              TEXT    NOT NULL,
                priority            TEXT    NOT NULL,
                last_mentioned      TEXT    NOT NULL,
                context_summary     TEXT    NOT NULL,
                next_session_prompt TEXT,
                emotional_context   TEXT    NOT NULL DEFAULT '{}',
                progress_notes      TEXT    NOT NULL DEFAULT '',
                created_at          TEXT    NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_threads_user_topic ON threads(user_id, topic);

            CREATE TABLE IF NOT EXISTS continuity_bridges (
                id              TEXT    NOT NULL PRIMARY KEY,
                user_id         INTEGER NOT NULL,
                from_session_id TEXT    NOT NULL,
                to_session_id   TEXT    NOT NULL,
                bridge_type     TEXT    NOT NULL,
                carryover_data  TEXT    NOT NULL DEFAULT '{}',
                priority        INTEGER NOT NULL DEFAULT 1,
                addressed       INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT    NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Run `f` against the connection on tokio's blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Worker(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store contracts
// ─────────────────────────────────────────────────────────────────────────────

/// Raw append-only turn log.
///
/// Implementations do not police user isolation; that is the job of
/// [`DurableTurnStore`][crate::turns::DurableTurnStore], which wraps any
/// `TurnStore`.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Persist `turn`.  Writing the same turn id twice is a no-op.
    async fn append(&self, turn: &Turn) -> Result<(), StorageError>;

    /// The newest `limit` turns of `user_id`, returned oldest first.
    async fn recent(&self, user_id: UserId, limit: usize) -> Result<Vec<Turn>, StorageError>;

    /// Every turn of `user_id` at or after `since`, oldest first.
    async fn since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<Vec<Turn>, StorageError>;
}

/// Persistence and search surface for semantic memory units, their links
/// and the insights derived from them.
///
/// Every read returns active units only unless stated otherwise.
#[async_trait]
pub trait SemanticStore: Send + Sync {
    async fn insert_unit(&self, unit: &SemanticMemoryUnit) -> Result<(), StorageError>;

    /// Newest first.
    async fn recent_units(&self, user_id: UserId, limit: usize)
    -> Result<Vec<SemanticMemoryUnit>, StorageError>;

    /// Units of any of `types`, newest first.
    async fn units_by_type(
        &self,
        user_id: UserId,
        types: &[MemoryType],
        limit: usize,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError>;

    /// Case-insensitive substring match of any keyword against content,
    /// tags or related topics.
    async fn search_units(
        &self,
        user_id: UserId,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError>;

    /// Units with a tag containing any of `topics` (case-insensitive).
    async fn units_by_topics(
        &self,
        user_id: UserId,
        topics: &[String],
        limit: usize,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError>;

    /// Units whose emotional context contains `emotion` (case-insensitive).
    async fn units_by_emotion(
        &self,
        user_id: UserId,
        emotion: &str,
        limit: usize,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError>;

    /// Highest access count first.
    async fn most_accessed(&self, user_id: UserId, limit: usize)
    -> Result<Vec<SemanticMemoryUnit>, StorageError>;

    /// Increment `access_count` and set `last_accessed_at = at` for the
    /// user's units in `ids`.  Ids owned by another user are left untouched.
    async fn record_access(&self, user_id: UserId, ids: &[Uuid], at: DateTime<Utc>)
    -> Result<(), StorageError>;

    /// Soft-delete.  Returns `false` when no active unit matched.
    async fn deactivate(&self, user_id: UserId, id: Uuid) -> Result<bool, StorageError>;

    /// Active unit whose content equals `content`, ignoring case.  With
    /// `memory_type` set, only units of that type match.
    async fn find_by_content(
        &self,
        user_id: UserId,
        content: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<Option<SemanticMemoryUnit>, StorageError>;

    /// Persist `link`.  Returns `false` if a link between the same pair
    /// already exists (nothing is written).
    async fn insert_link(&self, link: &MemoryLink) -> Result<bool, StorageError>;

    /// Links touching `unit_id` in either direction, strongest first.
    async fn links_for(&self, unit_id: Uuid) -> Result<Vec<MemoryLink>, StorageError>;

    async fn strongest_links(&self, user_id: UserId, limit: usize)
    -> Result<Vec<MemoryLink>, StorageError>;

    /// Fetch units by id (active or not), preserving no particular order.
    async fn units_by_ids(&self, user_id: UserId, ids: &[Uuid])
    -> Result<Vec<SemanticMemoryUnit>, StorageError>;

    async fn insert_insight(&self, insight: &MemoryInsight) -> Result<(), StorageError>;

    /// Newest first.
    async fn insights(&self, user_id: UserId, limit: usize) -> Result<Vec<MemoryInsight>, StorageError>;

    async fn stats(&self, user_id: UserId) -> Result<MemoryStats, StorageError>;
}

/// Persistence for sessions, threads and continuity bridges.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn active_session(&self, user_id: UserId) -> Result<Option<Session>, StorageError>;

    /// Returns [`StorageError::Conflict`] if the user already has an active
    /// session or the key is taken.
    async fn create_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Bump `last_activity` to `at` and add `message_delta` to the count.
    async fn touch_session(&self, id: Uuid, message_delta: u32, at: DateTime<Utc>)
    -> Result<(), StorageError>;

    /// Overwrite every mutable column of `session`.
    async fn update_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Write the closed `session` and its derived `threads` as one unit.
    /// On any failure nothing is written.
    async fn close_session(&self, session: &Session, threads: &[Thread]) -> Result<(), StorageError>;

    /// Closed sessions, most recent activity first.
    async fn closed_sessions(&self, user_id: UserId, limit: usize) -> Result<Vec<Session>, StorageError>;

    async fn insert_thread(&self, thread: &Thread) -> Result<(), StorageError>;

    /// Most recently mentioned thread whose topic equals `topic` exactly.
    async fn thread_by_topic(&self, user_id: UserId, topic: &str) -> Result<Option<Thread>, StorageError>;

    async fn update_thread(&self, thread: &Thread) -> Result<(), StorageError>;

    /// Threads in `status`, most recently mentioned first.
    async fn threads_with_status(
        &self,
        user_id: UserId,
        status: ThreadStatus,
        limit: usize,
    ) -> Result<Vec<Thread>, StorageError>;

    async fn insert_bridge(&self, bridge: &ContinuityBridge) -> Result<(), StorageError>;

    /// Highest priority first, then newest.
    async fn unaddressed_bridges(&self, user_id: UserId) -> Result<Vec<ContinuityBridge>, StorageError>;

    /// Flip `addressed` on the user's bridges in `ids`; returns rows changed.
    async fn mark_bridges_addressed(&self, user_id: UserId, ids: &[Uuid]) -> Result<usize, StorageError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Column helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    Ok(serde_json::to_string(value)?)
}

fn conversion_failure(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn col_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_failure(idx, e))
}

pub(crate) fn col_opt_ts(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| conversion_failure(idx, e))
    })
    .transpose()
}

pub(crate) fn col_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_failure(idx, e))
}

pub(crate) fn col_opt_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| Uuid::parse_str(&r).map_err(|e| conversion_failure(idx, e)))
        .transpose()
}

pub(crate) fn col_json<T: DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_failure(idx, e))
}

/// Parse an enum column with `parse`, reporting unknown values the way
/// rusqlite reports a type mismatch.
pub(crate) fn col_enum<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or(rusqlite::Error::InvalidColumnType(idx, raw, Type::Text))
}

/// `fold(text)`: Unicode lowercase, for case-insensitive matching that
/// SQLite's ASCII-only `lower()` cannot do.  `NULL` stays `NULL`.
fn register_functions(conn: &Connection) -> Result<(), StorageError> {
    conn.create_scalar_function(
        "fold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| s.to_lowercase())),
    )?;
    Ok(())
}

/// `LIKE` pattern matching `needle` anywhere, folded.  `%`, `_` and `\` in
/// the needle match literally; use with `ESCAPE '\'`.
pub(crate) fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
