//! Cross-session continuity: the session state machine, threads and bridges.
//!
//! ```text
//!            initialize()              close()
//!   None ────────────────▶ Active ───────────────▶ Closed
//!                           ▲  │
//!                           └──┘ initialize() touches last_activity
//! ```
//!
//! A user has at most one active session.  Check-then-create runs under a
//! per-user async lock, and the store's unique index on active sessions
//! catches writers in other processes; a conflicting insert re-reads the
//! winner's session instead of failing.
//!
//! Closing asks the completion service for a [`SessionDigest`] once.  If
//! that call fails the session stays open and the caller may retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use recall_memory::store::{SessionStore, StorageError};
use recall_types::{
    ContinuityBridge, JsonMap, OpeningContext, RecallError, Session, SessionDigest, Thread,
    ThreadPriority, ThreadStatus, Turn, UserId,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::completion::{ChatMessage, CompletionService, request_structured};

const SESSION_INSTRUCTION: &str = "\
You review a finished conversation between a user and a supportive AI companion so the next session can pick up where this one left off.
Return:
- title: a short descriptive title
- summary: what was discussed, in two or three sentences
- keyTopics: the main topics
- emotionalTone: hopeful, struggling, neutral, breakthrough or concerned
- unresolvedThreads: topic -> what still needs follow-up
- contextCarryover: importantFacts, emotionalState at the end, nextSessionSuggestions
- threads: topic, status (active, resolved, needs_follow_up), priority (high, medium, low), contextSummary, nextSessionPrompt
Focus on what the companion should remember when the user returns.";

pub const DEFAULT_BRIDGE_TYPE: &str = "topic_continuation";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ContinuityConfig {
    /// Closed sessions read when composing the opening context.
    pub history_sessions: usize,
    /// Closed sessions returned alongside the opening context.
    pub returned_sessions: usize,
    pub opening_threads: usize,
    pub opening_prompts: usize,
    pub opening_topics: usize,
    /// Active threads scanned for prompts and topics.
    pub thread_scan: usize,
    pub completion_timeout: Duration,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            history_sessions: 3,
            returned_sessions: 2,
            opening_threads: 3,
            opening_prompts: 2,
            opening_topics: 5,
            thread_scan: 50,
            completion_timeout: Duration::from_secs(20),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ContinuityManager
// ─────────────────────────────────────────────────────────────────────────────

pub struct ContinuityManager {
    store: Arc<dyn SessionStore>,
    completion: Arc<dyn CompletionService>,
    config: ContinuityConfig,
    user_locks: StdMutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl ContinuityManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        completion: Arc<dyn CompletionService>,
        config: ContinuityConfig,
    ) -> Self {
        Self { store, completion, config, user_locks: StdMutex::new(HashMap::new()) }
    }

    fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(user_id).or_default())
    }

    /// Return the user's active session, creating one on first contact.
    pub async fn initialize(&self, user_id: UserId) -> Result<Session, RecallError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        if let Some(mut session) = self.store.active_session(user_id).await? {
            let now = Utc::now();
            self.store.touch_session(session.id, 0, now).await?;
            session.last_activity = now;
            debug!(user_id, session_key = %session.session_key, "session resumed");
            return Ok(session);
        }

        let session = Session::open(user_id);
        match self.store.create_session(&session).await {
            Ok(()) => {
                info!(user_id, session_key = %session.session_key, "session created");
                Ok(session)
            }
            Err(StorageError::Conflict(reason)) => {
                warn!(user_id, %reason, "concurrent session creation, using the existing session");
                self.store
                    .active_session(user_id)
                    .await?
                    .ok_or_else(|| RecallError::Storage(format!("active session vanished: {reason}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The user's active session, if any, without touching it.
    pub async fn active(&self, user_id: UserId) -> Result<Option<Session>, RecallError> {
        Ok(self.store.active_session(user_id).await?)
    }

    /// The most recently closed session, if any.
    pub async fn last_closed(&self, user_id: UserId) -> Result<Option<Session>, RecallError> {
        Ok(self.store.closed_sessions(user_id, 1).await?.into_iter().next())
    }

    /// Count `messages` more turns against `session_id`.
    pub async fn record_messages(&self, session_id: Uuid, messages: u32) -> Result<(), RecallError> {
        self.store.touch_session(session_id, messages, Utc::now()).await?;
        Ok(())
    }

    /// Summarise and close the active session.
    ///
    /// `Ok(None)` when the user has no active session.  If the upstream call
    /// or the store write fails nothing is written and the session stays
    /// active.
    #[tracing::instrument(skip_all, fields(user_id = user_id))]
    pub async fn close(&self, user_id: UserId, turns: &[Turn]) -> Result<Option<SessionDigest>, RecallError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let Some(mut session) = self.store.active_session(user_id).await? else {
            debug!(user_id, "no active session to close");
            return Ok(None);
        };

        let foreign = turns.iter().filter(|t| t.user_id != user_id).count();
        if foreign > 0 {
            error!(user_id, foreign_rows = foreign, "foreign turns handed to session close, stripped");
        }
        let transcript = turns
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| format!("{}: {}", t.speaker(), t.content))
            .collect::<Vec<_>>()
            .join("\n");
        let own_turns = turns.len() - foreign;

        let messages = vec![ChatMessage::system(SESSION_INSTRUCTION), ChatMessage::user(transcript)];
        let digest: SessionDigest =
            request_structured(self.completion.as_ref(), &messages, self.config.completion_timeout)
                .await
                .map_err(|e| {
                    warn!(user_id, session_key = %session.session_key, error = %e, "session left open");
                    RecallError::from(e)
                })?;

        if !digest.title.trim().is_empty() {
            session.title = digest.title.trim().to_string();
        }
        session.summary = Some(digest.summary.trim().to_string()).filter(|s| !s.is_empty());
        session.key_topics = digest.key_topics.clone();
        session.emotional_tone = match digest.emotional_tone.trim() {
            "" => "neutral".to_string(),
            tone => tone.to_string(),
        };
        session.unresolved_threads = digest.unresolved_threads.clone();
        session.context_carryover = digest.context_carryover.clone();
        session.message_count = u32::try_from(own_turns).unwrap_or(u32::MAX);
        session.last_activity = Utc::now();
        session.is_active = false;

        let mut threads = Vec::with_capacity(digest.threads.len());
        for derived in &digest.threads {
            let topic = derived.topic.trim();
            if topic.is_empty() {
                continue;
            }
            let mut thread = Thread::new(user_id, topic);
            thread.session_id = Some(session.id);
            thread.status = derived.status.as_deref().and_then(ThreadStatus::parse).unwrap_or(ThreadStatus::Active);
            thread.priority =
                derived.priority.as_deref().and_then(ThreadPriority::parse).unwrap_or(ThreadPriority::Medium);
            if let Some(summary) = derived.context_summary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                thread.context_summary = summary.to_string();
            }
            thread.next_session_prompt =
                derived.next_session_prompt.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
            threads.push(thread);
        }

        if let Err(e) = self.store.close_session(&session, &threads).await {
            warn!(user_id, session_key = %session.session_key, error = %e, "session close not committed, left open");
            return Err(e.into());
        }

        info!(user_id, session_key = %session.session_key, threads = threads.len(), "session closed");
        Ok(Some(digest))
    }

    /// Compose the continuity block for a returning user.
    ///
    /// Empty for a user with no closed session.  Read failures are logged
    /// and degrade to the empty context.
    pub async fn opening_context(&self, user_id: UserId) -> OpeningContext {
        match self.compose_opening(user_id, Utc::now()).await {
            Ok(opening) => opening,
            Err(e) => {
                warn!(user_id, error = %e, "opening context unavailable");
                OpeningContext::default()
            }
        }
    }

    async fn compose_opening(&self, user_id: UserId, now: DateTime<Utc>) -> Result<OpeningContext, RecallError> {
        let recent = self.store.closed_sessions(user_id, self.config.history_sessions).await?;
        if recent.is_empty() {
            return Ok(OpeningContext::default());
        }
        let continuity_items = self.store.unaddressed_bridges(user_id).await?;
        let threads = self.store.threads_with_status(user_id, ThreadStatus::Active, self.config.thread_scan).await?;

        let mut context = String::from("CROSS-SESSION CONTINUITY CONTEXT:\n\n");
        if let Some(last) = recent.first() {
            if let Some(summary) = &last.summary {
                context.push_str(&format!("LAST SESSION ({}):\n", format_time_ago(last.last_activity, now)));
                context.push_str(&format!("- {summary}\n"));
                context.push_str(&format!("- Emotional tone: {}\n", last.emotional_tone));
                if !last.key_topics.is_empty() {
                    context.push_str(&format!("- Topics discussed: {}\n", last.key_topics.join(", ")));
                }
                context.push('\n');
            }
        }
        if !threads.is_empty() {
            context.push_str("ONGOING TOPICS TO FOLLOW UP ON:\n");
            for thread in threads.iter().take(self.config.opening_threads) {
                context.push_str(&format!("- {}: {}\n", thread.topic, thread.context_summary));
                if let Some(prompt) = &thread.next_session_prompt {
                    context.push_str(&format!("  → Suggested follow-up: {prompt}\n"));
                }
            }
            context.push('\n');
        }

        let continuity_prompts = threads
            .iter()
            .filter_map(|t| t.next_session_prompt.clone())
            .take(self.config.opening_prompts)
            .collect();
        let active_topics = threads.iter().map(|t| t.topic.clone()).take(self.config.opening_topics).collect();

        Ok(OpeningContext {
            context,
            continuity_prompts,
            active_topics,
            recent_sessions: recent.into_iter().take(self.config.returned_sessions).collect(),
            continuity_items,
        })
    }

    /// Bump the thread whose topic equals `topic`, or start a new one.
    pub async fn touch_thread(
        &self,
        user_id: UserId,
        topic: &str,
        emotional_delta: JsonMap,
    ) -> Result<Thread, RecallError> {
        if let Some(mut thread) = self.store.thread_by_topic(user_id, topic).await? {
            thread.emotional_context.extend(emotional_delta);
            thread.last_mentioned = Utc::now();
            self.store.update_thread(&thread).await?;
            debug!(user_id, topic, "thread touched");
            return Ok(thread);
        }
        let mut thread = Thread::new(user_id, topic);
        thread.emotional_context = emotional_delta;
        self.store.insert_thread(&thread).await?;
        info!(user_id, topic, "thread started");
        Ok(thread)
    }

    /// Record unresolved context carried from one session into the next.
    ///
    /// `data.type` and `data.priority` override the bridge type
    /// (default `topic_continuation`) and priority (default 1).
    pub async fn bridge(
        &self,
        user_id: UserId,
        from_session_id: Uuid,
        to_session_id: Uuid,
        data: serde_json::Value,
    ) -> Result<ContinuityBridge, RecallError> {
        let bridge_type = data
            .get("type")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_BRIDGE_TYPE)
            .to_string();
        let priority = data
            .get("priority")
            .and_then(|v| v.as_i64())
            .and_then(|p| i32::try_from(p).ok())
            .filter(|p| *p != 0)
            .unwrap_or(1);
        let bridge = ContinuityBridge {
            id: Uuid::new_v4(),
            user_id,
            from_session_id,
            to_session_id,
            bridge_type,
            carryover_data: data,
            priority,
            addressed: false,
            created_at: Utc::now(),
        };
        self.store.insert_bridge(&bridge).await?;
        info!(user_id, from = %from_session_id, to = %to_session_id, "continuity bridge recorded");
        Ok(bridge)
    }

    /// Flag bridges as surfaced to the user.  Ids of other users are ignored.
    pub async fn mark_addressed(&self, user_id: UserId, ids: &[Uuid]) -> Result<usize, RecallError> {
        let changed = self.store.mark_bridges_addressed(user_id, ids).await?;
        debug!(user_id, changed, "continuity items addressed");
        Ok(changed)
    }
}

/// Coarse "time ago" label: minutes, hours, yesterday, days, then weeks.
pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - then).max(chrono::Duration::zero());
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();
    if minutes < 60 {
        format!("{minutes} minutes ago")
    } else if hours < 24 {
        format!("{hours} hours ago")
    } else if days == 1 {
        "yesterday".to_string()
    } else if days < 7 {
        format!("{days} days ago")
    } else {
        format!("{} weeks ago", days / 7)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionError;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use recall_memory::sessions::SqliteSessionStore;
    use recall_memory::store::Database;
    use serde_json::json;

    struct Digest(Option<String>);

    #[async_trait]
    impl CompletionService for Digest {
        async fn complete(&self, _: &[ChatMessage]) -> Result<String, CompletionError> {
            Ok(String::new())
        }
        async fn complete_json(&self, _: &[ChatMessage], _: serde_json::Value) -> Result<String, CompletionError> {
            self.0.clone().ok_or_else(|| CompletionError::BadResponse("503".into()))
        }
    }

    fn digest_json() -> String {
        json!({
            "title": "Work pressure",
            "summary": "Talked about deadlines and stress at work.",
            "keyTopics": ["work", "stress"],
            "emotionalTone": "struggling",
            "unresolvedThreads": {"deadlines": "check how the launch went"},
            "contextCarryover": {"importantFacts": ["launch on Friday"]},
            "conversationThreads": [
                {"topic": "deadlines", "status": "active", "priority": "high",
                 "contextSummary": "Launch on Friday", "nextSessionPrompt": "How did the launch go?"},
                {"topic": "sleep", "status": "needs_follow_up", "nextSessionPrompt": "Sleeping better?"},
                {"topic": "manager", "contextSummary": "Tension with manager",
                 "nextSessionPrompt": "Any news from your manager?"}
            ]
        })
        .to_string()
    }

    fn manager(reply: Option<String>) -> (Arc<SqliteSessionStore>, ContinuityManager) {
        let store = Arc::new(SqliteSessionStore::new(Database::open_in_memory().unwrap()));
        let m = ContinuityManager::new(store.clone(), Arc::new(Digest(reply)), ContinuityConfig::default());
        (store, m)
    }

    fn turns(user: UserId) -> Vec<Turn> {
        vec![Turn::new(user, "Deadlines are killing me", false), Turn::new(user, "Tell me more.", true)]
    }

    // ── initialize ──

    #[tokio::test]
    async fn sequential_initialize_returns_same_session() {
        let (_, m) = manager(None);
        let a = m.initialize(1).await.unwrap();
        let b = m.initialize(1).await.unwrap();
        assert_eq!(a.session_key, b.session_key);
        assert_eq!(a.title, "New Conversation");
        assert_eq!(a.emotional_tone, "neutral");
        assert!(b.last_activity >= a.last_activity);
    }

    #[tokio::test]
    async fn concurrent_initialize_creates_one_session() {
        let (_, m) = manager(None);
        let (a, b) = tokio::join!(m.initialize(7), m.initialize(7));
        assert_eq!(a.unwrap().id, b.unwrap().id);
    }

    #[tokio::test]
    async fn record_messages_counts_turns() {
        let (store, m) = manager(None);
        let s = m.initialize(1).await.unwrap();
        m.record_messages(s.id, 2).await.unwrap();
        assert_eq!(store.active_session(1).await.unwrap().unwrap().message_count, 2);
    }

    // ── close ──

    #[tokio::test]
    async fn close_persists_digest_and_threads() {
        let (store, m) = manager(Some(digest_json()));
        let first = m.initialize(1).await.unwrap();

        let digest = m.close(1, &turns(1)).await.unwrap().unwrap();
        assert_eq!(digest.threads.len(), 3);

        assert!(store.active_session(1).await.unwrap().is_none());
        let closed = store.closed_sessions(1, 5).await.unwrap();
        assert_eq!(closed[0].summary.as_deref(), Some("Talked about deadlines and stress at work."));
        assert_eq!(closed[0].title, "Work pressure");
        assert_eq!(closed[0].message_count, 2);

        let active = store.threads_with_status(1, ThreadStatus::Active, 10).await.unwrap();
        let follow_up = store.threads_with_status(1, ThreadStatus::FollowUpNeeded, 10).await.unwrap();
        assert_eq!(active.len() + follow_up.len(), 3);
        assert!(active.iter().all(|t| t.session_id == Some(first.id)));

        let next = m.initialize(1).await.unwrap();
        assert_ne!(next.session_key, first.session_key);
    }

    #[tokio::test]
    async fn failed_close_leaves_session_open() {
        let (store, m) = manager(None);
        let s = m.initialize(1).await.unwrap();
        assert!(matches!(m.close(1, &turns(1)).await, Err(RecallError::UpstreamAnalysis(_))));
        assert_eq!(store.active_session(1).await.unwrap().unwrap().id, s.id);
    }

    /// Delegates to SQLite but fails `close_session` while `broken` is set.
    struct FlakyClose {
        inner: SqliteSessionStore,
        broken: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SessionStore for FlakyClose {
        async fn active_session(&self, user_id: UserId) -> Result<Option<Session>, StorageError> {
            self.inner.active_session(user_id).await
        }
        async fn create_session(&self, session: &Session) -> Result<(), StorageError> {
            self.inner.create_session(session).await
        }
        async fn touch_session(&self, id: Uuid, delta: u32, at: DateTime<Utc>) -> Result<(), StorageError> {
            self.inner.touch_session(id, delta, at).await
        }
        async fn update_session(&self, session: &Session) -> Result<(), StorageError> {
            self.inner.update_session(session).await
        }
        async fn close_session(&self, session: &Session, threads: &[Thread]) -> Result<(), StorageError> {
            if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StorageError::Worker("disk full".into()));
            }
            self.inner.close_session(session, threads).await
        }
        async fn closed_sessions(&self, user_id: UserId, limit: usize) -> Result<Vec<Session>, StorageError> {
            self.inner.closed_sessions(user_id, limit).await
        }
        async fn insert_thread(&self, thread: &Thread) -> Result<(), StorageError> {
            self.inner.insert_thread(thread).await
        }
        async fn thread_by_topic(&self, user_id: UserId, topic: &str) -> Result<Option<Thread>, StorageError> {
            self.inner.thread_by_topic(user_id, topic).await
        }
        async fn update_thread(&self, thread: &Thread) -> Result<(), StorageError> {
            self.inner.update_thread(thread).await
        }
        async fn threads_with_status(
            &self,
            user_id: UserId,
            status: ThreadStatus,
            limit: usize,
        ) -> Result<Vec<Thread>, StorageError> {
            self.inner.threads_with_status(user_id, status, limit).await
        }
        async fn insert_bridge(&self, bridge: &ContinuityBridge) -> Result<(), StorageError> {
            self.inner.insert_bridge(bridge).await
        }
        async fn unaddressed_bridges(&self, user_id: UserId) -> Result<Vec<ContinuityBridge>, StorageError> {
            self.inner.unaddressed_bridges(user_id).await
        }
        async fn mark_bridges_addressed(&self, user_id: UserId, ids: &[Uuid]) -> Result<usize, StorageError> {
            self.inner.mark_bridges_addressed(user_id, ids).await
        }
    }

    #[tokio::test]
    async fn failed_store_write_leaves_session_open_for_retry() {
        let store = Arc::new(FlakyClose {
            inner: SqliteSessionStore::new(Database::open_in_memory().unwrap()),
            broken: std::sync::atomic::AtomicBool::new(true),
        });
        let m = ContinuityManager::new(store.clone(), Arc::new(Digest(Some(digest_json()))), ContinuityConfig::default());
        let s = m.initialize(7).await.unwrap();

        assert!(matches!(m.close(7, &turns(7)).await, Err(RecallError::Storage(_))));
        assert_eq!(store.active_session(7).await.unwrap().unwrap().id, s.id);
        assert!(store.closed_sessions(7, 5).await.unwrap().is_empty());

        store.broken.store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(m.close(7, &turns(7)).await.unwrap().is_some());
        assert!(store.active_session(7).await.unwrap().is_none());
        let active = store.threads_with_status(7, ThreadStatus::Active, 10).await.unwrap();
        let follow_up = store.threads_with_status(7, ThreadStatus::FollowUpNeeded, 10).await.unwrap();
        assert_eq!(active.len() + follow_up.len(), 3);
    }

    /// Records `name user_id=<id>` for every span opened.
    #[derive(Clone, Default)]
    struct SpanLog(Arc<StdMutex<Vec<String>>>);

    struct UserIdField(String);

    impl tracing::field::Visit for UserIdField {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "user_id" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanLog {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _: &tracing::span::Id,
            _: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut user = UserIdField(String::new());
            attrs.record(&mut user);
            self.0.lock().unwrap().push(format!("{} user_id={}", attrs.metadata().name(), user.0));
        }
    }

    #[tokio::test]
    async fn close_runs_inside_a_user_span() {
        use tracing_subscriber::layer::SubscriberExt;

        let log = SpanLog::default();
        let _default = tracing::subscriber::set_default(tracing_subscriber::registry().with(log.clone()));

        let (_, m) = manager(Some(digest_json()));
        m.initialize(3).await.unwrap();
        m.close(3, &turns(3)).await.unwrap();

        let spans = log.0.lock().unwrap().clone();
        assert!(spans.contains(&"close user_id=3".to_string()), "{spans:?}");
    }

    #[tokio::test]
    async fn close_without_session_is_a_no_op() {
        let (_, m) = manager(Some(digest_json()));
        assert!(m.close(1, &turns(1)).await.unwrap().is_none());
    }

    // ── opening context ──

    #[tokio::test]
    async fn first_time_user_gets_empty_opening() {
        let (_, m) = manager(None);
        m.initialize(1).await.unwrap();
        let opening = m.opening_context(1).await;
        assert_eq!(opening, OpeningContext::default());
    }

    #[tokio::test]
    async fn opening_context_after_close() {
        let (_, m) = manager(Some(digest_json()));
        let closed = m.initialize(1).await.unwrap();
        m.close(1, &turns(1)).await.unwrap();
        let current = m.initialize(1).await.unwrap();
        m.bridge(1, closed.id, current.id, json!({"topic": "deadlines"})).await.unwrap();

        let opening = m.opening_context(1).await;
        assert!(opening.context.starts_with("CROSS-SESSION CONTINUITY CONTEXT:\n\n"));
        assert!(opening.context.contains("LAST SESSION (0 minutes ago):"));
        assert!(opening.context.contains("- Emotional tone: struggling"));
        assert!(opening.context.contains("- Topics discussed: work, stress"));
        assert!(opening.context.contains("ONGOING TOPICS TO FOLLOW UP ON:"));
        assert!(opening.context.contains("→ Suggested follow-up: How did the launch go?"));
        assert!(!opening.context.contains("sleep"));
        assert_eq!(opening.continuity_prompts.len(), 2);
        assert_eq!(opening.active_topics.len(), 2);
        assert_eq!(opening.recent_sessions.len(), 1);
        assert_eq!(opening.continuity_items.len(), 1);
    }

    // ── threads & bridges ──

    #[tokio::test]
    async fn touch_thread_merges_or_creates() {
        let (_, m) = manager(None);
        let created = m.touch_thread(1, "sleep", JsonMap::from([("mood".into(), json!("tired"))])).await.unwrap();
        assert_eq!(created.context_summary, "Discussing sleep");
        assert_eq!(created.status, ThreadStatus::Active);
        assert_eq!(created.priority, ThreadPriority::Medium);

        let touched = m.touch_thread(1, "sleep", JsonMap::from([("energy".into(), json!("low"))])).await.unwrap();
        assert_eq!(touched.id, created.id);
        assert_eq!(touched.emotional_context.len(), 2);
        assert!(touched.last_mentioned >= created.last_mentioned);

        let other = m.touch_thread(1, "Sleep", JsonMap::new()).await.unwrap();
        assert_ne!(other.id, created.id);
    }

    #[tokio::test]
    async fn bridge_defaults_and_addressing() {
        let (store, m) = manager(None);
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        let plain = m.bridge(1, from, to, json!({})).await.unwrap();
        assert_eq!(plain.bridge_type, DEFAULT_BRIDGE_TYPE);
        assert_eq!(plain.priority, 1);
        let urgent = m.bridge(1, from, to, json!({"type": "check_in", "priority": 3})).await.unwrap();
        assert_eq!(urgent.bridge_type, "check_in");

        assert_eq!(m.mark_addressed(2, &[plain.id]).await.unwrap(), 0);
        assert_eq!(m.mark_addressed(1, &[plain.id]).await.unwrap(), 1);
        let left = store.unaddressed_bridges(1).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, urgent.id);
    }

    #[test]
    fn time_ago_labels() {
        let now = Utc::now();
        assert_eq!(format_time_ago(now - ChronoDuration::minutes(5), now), "5 minutes ago");
        assert_eq!(format_time_ago(now - ChronoDuration::hours(3), now), "3 hours ago");
        assert_eq!(format_time_ago(now - ChronoDuration::hours(30), now), "yesterday");
        assert_eq!(format_time_ago(now - ChronoDuration::days(4), now), "4 days ago");
        assert_eq!(format_time_ago(now - ChronoDuration::days(15), now), "2 weeks ago");
        assert_eq!(format_time_ago(now + ChronoDuration::minutes(5), now), "0 minutes ago");
    }
}
