//! Context Assembly Service – the layer that never loses a turn.
//!
//! Every inbound turn goes through [`ContextAssemblyService::capture`]:
//!
//! 1. **Persist** the turn through the retrying [`DurableTurnStore`].  If
//!    every attempt fails the caller still gets a fallback
//!    [`ConversationMemory`] (inside a [`PartialFailure`]) and can carry on.
//! 2. **Build** the full memory.  The three reads below run concurrently
//!    and each degrades on its own when it fails:
//!
//!    | read                    | feeds                                            |
//!    |-------------------------|--------------------------------------------------|
//!    | last 50 turns           | current context, emotional state, topics, journey|
//!    | active session          | session id, unresolved threads, session topics   |
//!    | 20 most recent units    | profile, progress, important memories, patterns  |
//!
//! 3. **Cache** the result per user.
//! 4. For an assistant turn, **dispatch** distillation of the exchange to the
//!    [`BackgroundPool`].  The response path never waits for it.
//!
//! The build is bounded by `AssemblyConfig::build_timeout`; when it elapses
//! the turn is already safe and the caller gets the fallback memory.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use recall_memory::store::{SemanticStore, SessionStore, TurnStore};
use recall_memory::turns::{DurableTurnStore, RetryPolicy};
use recall_types::{
    ConversationMemory, ImportantMemory, LongTermMemory, MemoryStrength, PartialFailure, RecallError,
    Session, SessionDigest, SessionMemory, ShortTermMemory, Turn, UserId,
};
use tracing::{debug, error, info, warn};

use crate::cache::{ContextCache, InMemoryContextCache};
use crate::completion::{ChatMessage, CompletionService};
use crate::continuity::{ContinuityConfig, ContinuityManager};
use crate::distill::{DistillConfig, Distiller};
use crate::heuristics::{KeywordTables, NEUTRAL};
use crate::retrieval::MemoryRetrievalEngine;
use crate::worker::{BackgroundPool, PoolConfig, ShutdownReport};

/// Context string handed out when no memory could be assembled at all.
pub const CONTEXT_UNAVAILABLE: &str = "I'm here to support you. Let's continue our conversation.";

const UNIT_IMPORTANCE: f32 = 0.5;

const PROFILE_SUMMARY: &str = "Based on our conversations, you seem to value personal growth and self-reflection. \
You communicate thoughtfully and seek meaningful connections.";

const PROGRESS_SUMMARY: &str = "We've been working together on understanding patterns and building coping strategies. \
Your willingness to engage shows commitment to growth.";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    /// Turns read to build short-term memory.
    pub recent_turns: usize,
    /// Semantic units read to build long-term memory.
    pub long_term_units: usize,
    /// Turns returned as chat history by [`ContextAssemblyService::get_context`].
    pub history_window: usize,
    /// Turns quoted in the current-context line.
    pub context_turns: usize,
    pub context_chars: usize,
    /// Characters quoted from each side of the last exchange.
    pub excerpt_chars: usize,
    pub build_timeout: Duration,
    pub retry: RetryPolicy,
    pub distill: DistillConfig,
    pub continuity: ContinuityConfig,
    pub pool: PoolConfig,
    pub tables: KeywordTables,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            recent_turns: 50,
            long_term_units: 20,
            history_window: 30,
            context_turns: 5,
            context_chars: 200,
            excerpt_chars: 100,
            build_timeout: Duration::from_secs(20),
            retry: RetryPolicy::default(),
            distill: DistillConfig::default(),
            continuity: ContinuityConfig::default(),
            pool: PoolConfig::default(),
            tables: KeywordTables::default(),
        }
    }
}

/// The three persistence adapters the service is wired to.
#[derive(Clone)]
pub struct AssemblyStores {
    pub turns: Arc<dyn TurnStore>,
    pub semantic: Arc<dyn SemanticStore>,
    pub sessions: Arc<dyn SessionStore>,
}

/// What the chat layer feeds to generation.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub context_string: String,
    /// Oldest first.
    pub turn_history: Vec<ChatMessage>,
    pub strength: MemoryStrength,
}

impl AssembledContext {
    fn unavailable() -> Self {
        Self {
            context_string: CONTEXT_UNAVAILABLE.to_string(),
            turn_history: Vec::new(),
            strength: MemoryStrength::Weak,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ContextAssemblyService
// ─────────────────────────────────────────────────────────────────────────────

pub struct ContextAssemblyService {
    turns: DurableTurnStore,
    semantic: Arc<dyn SemanticStore>,
    tables: Arc<KeywordTables>,
    retrieval: MemoryRetrievalEngine,
    continuity: ContinuityManager,
    distiller: Arc<Distiller>,
    cache: Arc<dyn ContextCache>,
    pool: BackgroundPool,
    config: AssemblyConfig,
}

impl ContextAssemblyService {
    pub fn new(stores: AssemblyStores, completion: Arc<dyn CompletionService>, config: AssemblyConfig) -> Self {
        let tables = Arc::new(config.tables.clone());
        let distiller = Distiller::new(
            Arc::clone(&stores.semantic),
            Arc::clone(&completion),
            Arc::clone(&tables),
            config.distill.clone(),
        );
        let continuity = ContinuityManager::new(stores.sessions, completion, config.continuity.clone());
        Self {
            turns: DurableTurnStore::new(stores.turns, config.retry),
            retrieval: MemoryRetrievalEngine::new(Arc::clone(&stores.semantic), Arc::clone(&tables)),
            semantic: stores.semantic,
            tables,
            continuity,
            distiller: Arc::new(distiller),
            cache: Arc::new(InMemoryContextCache::new()),
            pool: BackgroundPool::new(config.pool.clone()),
            config,
        }
    }

    /// Replace the default in-process cache.
    pub fn with_cache(mut self, cache: Arc<dyn ContextCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn turns(&self) -> &DurableTurnStore {
        &self.turns
    }

    pub fn retrieval(&self) -> &MemoryRetrievalEngine {
        &self.retrieval
    }

    pub fn continuity(&self) -> &ContinuityManager {
        &self.continuity
    }

    pub fn distiller(&self) -> &Distiller {
        &self.distiller
    }

    pub fn tables(&self) -> &KeywordTables {
        &self.tables
    }

    // ── capture ──────────────────────────────────────────────────────────────

    /// Persist one turn and return the user's freshly assembled memory.
    #[tracing::instrument(skip_all, fields(user_id = user_id, is_from_assistant = is_from_assistant))]
    pub async fn capture(
        &self,
        user_id: UserId,
        content: &str,
        is_from_assistant: bool,
    ) -> Result<ConversationMemory, PartialFailure> {
        let turn = Turn::new(user_id, content, is_from_assistant);

        if let Err(e) = self.turns.append(&turn).await {
            warn!(user_id, error = %e, "turn not persisted, continuing on fallback context");
            self.cache.invalidate(user_id);
            return Err(PartialFailure {
                user_id,
                cause: e.into(),
                turn_persisted: false,
                fallback: Box::new(fallback_memory(&turn)),
            });
        }

        let memory = match tokio::time::timeout(self.config.build_timeout, self.build(user_id, content, 1)).await {
            Ok(memory) => memory,
            Err(_) => {
                let millis = self.config.build_timeout.as_millis() as u64;
                warn!(user_id, millis, "context build timed out, continuing on fallback context");
                self.cache.invalidate(user_id);
                return Err(PartialFailure {
                    user_id,
                    cause: RecallError::Timeout { millis },
                    turn_persisted: true,
                    fallback: Box::new(fallback_memory(&turn)),
                });
            }
        };

        self.cache.put(user_id, memory.clone());
        if turn.is_from_assistant {
            self.dispatch_distillation(&turn, &memory);
        }
        debug!(
            user_id,
            turns = memory.short_term.recent_turns.len(),
            units = memory.long_term.important_memories.len(),
            "memory assembled"
        );
        Ok(memory)
    }

    fn dispatch_distillation(&self, assistant_turn: &Turn, memory: &ConversationMemory) {
        let Some(user_turn) = memory
            .short_term
            .recent_turns
            .iter()
            .rev()
            .find(|t| !t.is_from_assistant && t.id != assistant_turn.id)
            .cloned()
        else {
            debug!(user_id = assistant_turn.user_id, "no user turn to pair with, distillation skipped");
            return;
        };
        let distiller = Arc::clone(&self.distiller);
        let assistant_turn = assistant_turn.clone();
        let session_id = memory.session.session_id.clone();
        self.pool.submit("distill_exchange", async move {
            distiller.process_exchange(&user_turn, &assistant_turn, Some(&session_id)).await;
            Ok(())
        });
    }

    // ── get_context ──────────────────────────────────────────────────────────

    /// Context string, chat history and strength for the next reply.
    ///
    /// Served from the cache when possible, otherwise rebuilt with an empty
    /// current message.
    pub async fn get_context(&self, user_id: UserId) -> AssembledContext {
        let memory = match self.cache.get(user_id) {
            Some(memory) => memory,
            None => {
                debug!(user_id, "context cache miss, rebuilding");
                match tokio::time::timeout(self.config.build_timeout, self.build(user_id, "", 0)).await {
                    Ok(memory) => {
                        self.cache.put(user_id, memory.clone());
                        memory
                    }
                    Err(_) => {
                        warn!(user_id, "context rebuild timed out");
                        return AssembledContext::unavailable();
                    }
                }
            }
        };

        let turns = &memory.short_term.recent_turns;
        let start = turns.len().saturating_sub(self.config.history_window);
        let turn_history = turns[start..]
            .iter()
            .map(|t| {
                if t.is_from_assistant {
                    ChatMessage::assistant(t.content.clone())
                } else {
                    ChatMessage::user(t.content.clone())
                }
            })
            .collect();

        AssembledContext {
            context_string: render_context_string(&memory),
            turn_history,
            strength: memory.strength(),
        }
    }

    /// Drop the cached memory of `user_id`.
    pub fn invalidate(&self, user_id: UserId) -> bool {
        let removed = self.cache.invalidate(user_id);
        debug!(user_id, removed, "context cache invalidated");
        removed
    }

    /// Number of users with cached memory.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Summarise and close the user's active session over the turns it saw.
    ///
    /// A session is opened only after its first turn is persisted, so the
    /// session's turns are those since the previous session closed.
    pub async fn close_session(&self, user_id: UserId) -> Result<Option<SessionDigest>, RecallError> {
        if self.continuity.active(user_id).await?.is_none() {
            return Ok(None);
        }
        let since = match self.continuity.last_closed(user_id).await? {
            Some(previous) => previous.last_activity,
            None => DateTime::UNIX_EPOCH,
        };
        let turns = self.turns.since(user_id, since).await?;
        let digest = self.continuity.close(user_id, &turns).await?;
        if digest.is_some() {
            self.cache.invalidate(user_id);
        }
        Ok(digest)
    }

    // ── background work ──────────────────────────────────────────────────────

    /// Background jobs accepted and not yet finished.
    pub fn pending_background(&self) -> usize {
        self.pool.pending()
    }

    /// Wait for every background job submitted so far.
    pub async fn drain_background(&self) -> usize {
        self.pool.drain().await
    }

    /// Stop accepting background work and wait up to `timeout` for it.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let report = self.pool.shutdown(timeout).await;
        info!(completed = report.completed, aborted = report.aborted, "context assembly shut down");
        report
    }

    // ── building ─────────────────────────────────────────────────────────────

    async fn build(&self, user_id: UserId, current_message: &str, new_turns: u32) -> ConversationMemory {
        let (turns, session, long_term) = tokio::join!(
            self.load_turns(user_id),
            self.load_session(user_id, new_turns),
            self.load_long_term(user_id),
        );

        let mut key_topics = self
            .tables
            .detect_topics(turns.iter().map(|t| t.content.as_str()).chain(std::iter::once(current_message)));
        if let Some(session) = &session {
            for topic in &session.key_topics {
                if key_topics.len() >= self.tables.max_topics {
                    break;
                }
                if !key_topics.iter().any(|t| t.eq_ignore_ascii_case(topic)) {
                    key_topics.push(topic.clone());
                }
            }
        }

        let session_memory = SessionMemory {
            session_id: match &session {
                Some(s) => s.session_key.clone(),
                None => format!("fallback-{}-{user_id}", Utc::now().timestamp_millis()),
            },
            continuation_context: self.continuation_context(&turns),
            unresolved_threads: session
                .as_ref()
                .map(|s| s.unresolved_threads.keys().cloned().collect())
                .unwrap_or_default(),
            emotional_journey: format!("Emotional journey: {}", self.tables.emotional_journey(&turns)),
        };

        let short_term = ShortTermMemory {
            current_context: self.current_context(&turns, current_message),
            emotional_state: self.tables.emotional_state(&turns),
            key_topics,
            recent_turns: turns,
        };

        ConversationMemory { short_term, long_term, session: session_memory }
    }

    async fn load_turns(&self, user_id: UserId) -> Vec<Turn> {
        match self.turns.recent(user_id, self.config.recent_turns).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(user_id, error = %e, "recent turns unavailable");
                Vec::new()
            }
        }
    }

    async fn load_session(&self, user_id: UserId, new_turns: u32) -> Option<Session> {
        let session = match self.continuity.initialize(user_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(user_id, error = %e, "session unavailable, using a fallback session id");
                return None;
            }
        };
        if new_turns > 0 {
            if let Err(e) = self.continuity.record_messages(session.id, new_turns).await {
                warn!(user_id, error = %e, "session message count not updated");
            }
        }
        Some(session)
    }

    async fn load_long_term(&self, user_id: UserId) -> LongTermMemory {
        let units = match self.semantic.recent_units(user_id, self.config.long_term_units).await {
            Ok(units) => units,
            Err(e) => {
                warn!(user_id, error = %e, "semantic memory unavailable");
                return LongTermMemory::unavailable();
            }
        };
        let total = units.len();
        let units: Vec<_> = units.into_iter().filter(|u| u.user_id == user_id).collect();
        if units.len() < total {
            error!(
                user_id,
                foreign_rows = total - units.len(),
                "isolation violation: semantic store returned units of another user; rows stripped"
            );
        }
        if units.is_empty() {
            return LongTermMemory::empty();
        }

        LongTermMemory {
            personality_profile: PROFILE_SUMMARY.to_string(),
            therapeutic_progress: PROGRESS_SUMMARY.to_string(),
            patterns: self.tables.patterns_for(units.iter().map(|u| u.content.as_str())),
            important_memories: units
                .into_iter()
                .map(|u| ImportantMemory { content: u.content, importance: UNIT_IMPORTANCE, timestamp: u.created_at })
                .collect(),
        }
    }

    fn current_context(&self, turns: &[Turn], current_message: &str) -> String {
        let start = turns.len().saturating_sub(self.config.context_turns);
        let recent = turns[start..].iter().map(|t| t.content.as_str()).collect::<Vec<_>>().join(" ");
        clip(&format!("Recent context: {recent}. Current: {current_message}"), self.config.context_chars)
    }

    fn continuation_context(&self, turns: &[Turn]) -> String {
        match turns {
            [.., said, answered] => format!(
                "Last exchange: User said \"{}...\" AI responded \"{}...\"",
                clip(&said.content, self.config.excerpt_chars),
                clip(&answered.content, self.config.excerpt_chars),
            ),
            _ => "Starting new conversation.".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering and fallbacks
// ─────────────────────────────────────────────────────────────────────────────

/// The fixed-format block downstream generation consumes.  Labels and their
/// order are relied upon by prompt authors; change with care.
pub fn render_context_string(memory: &ConversationMemory) -> String {
    let or = |items: &[String], empty: &str| {
        if items.is_empty() { empty.to_string() } else { items.join(", ") }
    };
    format!(
        "
BULLETPROOF CONVERSATION CONTEXT:

RECENT CONVERSATION FLOW:
{current}

EMOTIONAL STATE: {emotion}
KEY TOPICS: {topics}

SESSION CONTINUITY:
{continuation}
Emotional Journey: {journey}
Active Threads: {threads}

THERAPEUTIC CONTEXT:
{progress}
Key Patterns: {patterns}

IMPORTANT: Remember our previous discussions and maintain conversation continuity. Reference specific details from our conversation history when relevant.
",
        current = memory.short_term.current_context,
        emotion = memory.short_term.emotional_state,
        topics = or(&memory.short_term.key_topics, "General wellness"),
        continuation = memory.session.continuation_context,
        journey = memory.session.emotional_journey,
        threads = or(&memory.session.unresolved_threads, "None"),
        progress = memory.long_term.therapeutic_progress,
        patterns = or(&memory.long_term.patterns, "Discovering patterns"),
    )
}

/// Memory holding only `turn`, for when storage or assembly failed.
pub fn fallback_memory(turn: &Turn) -> ConversationMemory {
    ConversationMemory {
        short_term: ShortTermMemory {
            recent_turns: vec![turn.clone()],
            current_context: format!("Current message: {}", turn.content),
            emotional_state: NEUTRAL.to_string(),
            key_topics: Vec::new(),
        },
        long_term: LongTermMemory {
            personality_profile: "Building your profile...".to_string(),
            therapeutic_progress: "Starting our journey together...".to_string(),
            important_memories: Vec::new(),
            patterns: Vec::new(),
        },
        session: SessionMemory {
            session_id: format!("fallback-{}", Utc::now().timestamp_millis()),
            continuation_context: "Starting fresh conversation.".to_string(),
            unresolved_threads: Vec::new(),
            emotional_journey: NEUTRAL.to_string(),
        },
    }
}

fn clip(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DisabledCache;
    use crate::completion::CompletionError;
    use async_trait::async_trait;
    use recall_memory::semantic::SqliteSemanticStore;
    use recall_memory::sessions::SqliteSessionStore;
    use recall_memory::store::{Database, SessionStore};
    use recall_memory::turns::SqliteTurnStore;
    use recall_types::{MemoryType, SemanticMemoryUnit};

    struct Silent;

    #[async_trait]
    impl CompletionService for Silent {
        async fn complete(&self, _: &[ChatMessage]) -> Result<String, CompletionError> {
            Ok(String::new())
        }
        async fn complete_json(&self, _: &[ChatMessage], _: serde_json::Value) -> Result<String, CompletionError> {
            Ok("{}".into())
        }
    }

    fn wired() -> (Arc<SqliteSemanticStore>, Arc<SqliteSessionStore>, ContextAssemblyService) {
        let db = Database::open_in_memory().unwrap();
        let semantic = Arc::new(SqliteSemanticStore::new(db.clone()));
        let sessions = Arc::new(SqliteSessionStore::new(db.clone()));
        let stores = AssemblyStores {
            turns: Arc::new(SqliteTurnStore::new(db)),
            semantic: semantic.clone(),
            sessions: sessions.clone(),
        };
        (semantic, sessions, ContextAssemblyService::new(stores, Arc::new(Silent), AssemblyConfig::default()))
    }

    fn service() -> (Arc<SqliteSemanticStore>, ContextAssemblyService) {
        let (semantic, _, svc) = wired();
        (semantic, svc)
    }

    fn memory_with(topics: &[&str], threads: &[&str], patterns: &[&str]) -> ConversationMemory {
        let mut m = fallback_memory(&Turn::new(1, "hi", false));
        m.short_term.current_context = "Recent context: hi. Current: hi".into();
        m.short_term.key_topics = topics.iter().map(|s| s.to_string()).collect();
        m.session.unresolved_threads = threads.iter().map(|s| s.to_string()).collect();
        m.long_term.patterns = patterns.iter().map(|s| s.to_string()).collect();
        m
    }

    // ── rendering ──

    #[test]
    fn context_string_layout_is_fixed() {
        let rendered = render_context_string(&memory_with(&["work", "stress"], &["deadlines"], &["stress_management"]));
        let expected = "
BULLETPROOF CONVERSATION CONTEXT:

RECENT CONVERSATION FLOW:
Recent context: hi. Current: hi

EMOTIONAL STATE: neutral
KEY TOPICS: work, stress

SESSION CONTINUITY:
Starting fresh conversation.
Emotional Journey: neutral
Active Threads: deadlines

THERAPEUTIC CONTEXT:
Starting our journey together...
Key Patterns: stress_management

IMPORTANT: Remember our previous discussions and maintain conversation continuity. Reference specific details from our conversation history when relevant.
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn context_string_placeholders_for_empty_lists() {
        let rendered = render_context_string(&memory_with(&[], &[], &[]));
        assert!(rendered.contains("KEY TOPICS: General wellness\n"));
        assert!(rendered.contains("Active Threads: None\n"));
        assert!(rendered.contains("Key Patterns: Discovering patterns\n"));
    }

    #[test]
    fn fallback_memory_holds_only_the_turn() {
        let turn = Turn::new(3, "are you there?", false);
        let m = fallback_memory(&turn);
        assert_eq!(m.short_term.recent_turns, vec![turn]);
        assert_eq!(m.short_term.current_context, "Current message: are you there?");
        assert_eq!(m.short_term.emotional_state, "neutral");
        assert!(m.session.session_id.starts_with("fallback-"));
        assert_eq!(m.strength(), MemoryStrength::Weak);
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("abc", 10), "abc");
    }

    // ── building ──

    #[tokio::test]
    async fn first_turn_builds_fresh_memory() {
        let (_, svc) = service();
        let m = svc.capture(1, "hello there", false).await.unwrap();
        assert_eq!(m.short_term.recent_turns.len(), 1);
        assert_eq!(m.session.continuation_context, "Starting new conversation.");
        assert_eq!(m.long_term, LongTermMemory::empty());
        assert_eq!(m.session.emotional_journey, "Emotional journey: neutral");
        assert_eq!(svc.cache_len(), 1);
    }

    #[tokio::test]
    async fn continuation_quotes_last_exchange() {
        let (_, svc) = service();
        svc.capture(1, "I feel stressed about work", false).await.unwrap();
        let m = svc.capture(1, "Let's unpack that.", true).await.unwrap();
        assert_eq!(
            m.session.continuation_context,
            "Last exchange: User said \"I feel stressed about work...\" AI responded \"Let's unpack that....\""
        );
        assert_eq!(m.short_term.emotional_state, "anxious");
        assert_eq!(m.short_term.key_topics, vec!["stress", "work"]);
        assert!(m.short_term.current_context.starts_with("Recent context: I feel stressed about work Let's unpack that."));
        assert!(m.short_term.current_context.chars().count() <= 200);
        svc.drain_background().await;
    }

    #[tokio::test]
    async fn long_term_memory_from_units() {
        let (semantic, svc) = service();
        let unit = SemanticMemoryUnit::new(1, MemoryType::Insight, "Handles work stress better with walks");
        semantic.insert_unit(&unit).await.unwrap();

        let m = svc.capture(1, "hi", false).await.unwrap();
        assert_eq!(m.long_term.important_memories.len(), 1);
        assert_eq!(m.long_term.important_memories[0].importance, 0.5);
        assert_eq!(m.long_term.patterns, vec!["stress_management", "work_life_balance"]);
        assert!(m.long_term.therapeutic_progress.starts_with("We've been working together"));
    }

    #[tokio::test]
    async fn get_context_serves_cache_then_rebuilds() {
        let (_, svc) = service();
        svc.capture(1, "hello", false).await.unwrap();
        let cached = svc.get_context(1).await;
        assert!(cached.context_string.contains("Current: hello"));
        assert_eq!(cached.turn_history, vec![ChatMessage::user("hello")]);

        assert!(svc.invalidate(1));
        let rebuilt = svc.get_context(1).await;
        assert!(rebuilt.context_string.contains("Current: \n"));
        assert_eq!(rebuilt.turn_history.len(), 1);
        assert_eq!(rebuilt.strength, MemoryStrength::Weak);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let (_, svc) = service();
        for i in 0..35 {
            svc.capture(1, &format!("message {i}"), false).await.unwrap();
        }
        let ctx = svc.get_context(1).await;
        assert_eq!(ctx.turn_history.len(), 30);
        assert_eq!(ctx.turn_history[29].content, "message 34");
    }

    #[tokio::test]
    async fn disabled_cache_always_rebuilds() {
        let (_, svc) = service();
        let svc = svc.with_cache(Arc::new(DisabledCache));
        svc.capture(1, "hello", false).await.unwrap();
        assert_eq!(svc.cache_len(), 0);
        assert_eq!(svc.get_context(1).await.turn_history.len(), 1);
    }

    #[tokio::test]
    async fn session_topics_and_threads_are_merged() {
        let (_, sessions, svc) = wired();
        svc.capture(1, "hello", false).await.unwrap();
        let mut session = svc.continuity().active(1).await.unwrap().unwrap();
        session.key_topics = vec!["grief".into()];
        session.unresolved_threads.insert("funeral".into(), serde_json::json!("next week"));
        sessions.update_session(&session).await.unwrap();

        let m = svc.capture(1, "my job is hard", false).await.unwrap();
        assert_eq!(m.short_term.key_topics, vec!["work", "grief"]);
        assert_eq!(m.session.unresolved_threads, vec!["funeral"]);
        assert_eq!(m.session.session_id, session.session_key);
    }
}
