//! `recall-types` – the shared vocabulary of the memory core.
//!
//! Every persisted record (turns, semantic memory units, links, insights,
//! sessions, threads, continuity bridges), the per-request
//! [`ConversationMemory`] aggregate, the JSON payloads exchanged with the
//! external completion service, and the cross-crate [`RecallError`]
//! taxonomy live here so that the store, runtime and CLI crates agree on a
//! single definition.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of the human the assistant is talking to.
pub type UserId = i64;

/// Free-form JSON object used for carry-over maps and thread context.
pub type JsonMap = BTreeMap<String, serde_json::Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Turns
// ─────────────────────────────────────────────────────────────────────────────

/// One message in a conversation, from either the user or the assistant.
///
/// Immutable once written; the turn log is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub user_id: UserId,
    pub content: String,
    pub is_from_assistant: bool,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Construct a new turn stamped with a fresh UUID and the current time.
    pub fn new(user_id: UserId, content: impl Into<String>, is_from_assistant: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            content: content.into(),
            is_from_assistant,
            timestamp: Utc::now(),
        }
    }

    /// Transcript label used when a turn is rendered for the completion
    /// service.
    pub fn speaker(&self) -> &'static str {
        if self.is_from_assistant { "AI" } else { "User" }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Semantic memory
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a distilled [`SemanticMemoryUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Conversation,
    Insight,
    Pattern,
    Milestone,
    Fact,
    Goal,
    Breakthrough,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Conversation => "conversation",
            MemoryType::Insight => "insight",
            MemoryType::Pattern => "pattern",
            MemoryType::Milestone => "milestone",
            MemoryType::Fact => "fact",
            MemoryType::Goal => "goal",
            MemoryType::Breakthrough => "breakthrough",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "conversation" => Some(MemoryType::Conversation),
            "insight" => Some(MemoryType::Insight),
            "pattern" => Some(MemoryType::Pattern),
            "milestone" => Some(MemoryType::Milestone),
            "fact" => Some(MemoryType::Fact),
            "goal" => Some(MemoryType::Goal),
            "breakthrough" => Some(MemoryType::Breakthrough),
            _ => None,
        }
    }
}

/// A distilled, taggable observation extracted from conversation and stored
/// independently of the raw turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMemoryUnit {
    pub id: Uuid,
    pub user_id: UserId,
    pub memory_type: MemoryType,
    pub content: String,
    pub tags: Vec<String>,
    pub emotional_context: Option<String>,
    pub temporal_context: Option<String>,
    pub related_topics: Vec<String>,
    /// Extraction confidence in `[0.0, 1.0]`.
    pub confidence: f32,
    /// Number of times this unit was returned by a ranked retrieval.
    pub access_count: u32,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub source_session_id: Option<String>,
    /// `false` soft-deletes the unit without destroying history.
    pub is_active: bool,
}

impl SemanticMemoryUnit {
    /// Construct an active unit with no tags and a default confidence of 0.8.
    pub fn new(user_id: UserId, memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            memory_type,
            content: content.into(),
            tags: Vec::new(),
            emotional_context: None,
            temporal_context: None,
            related_topics: Vec::new(),
            confidence: 0.8,
            access_count: 0,
            last_accessed_at: None,
            created_at: Utc::now(),
            source_session_id: None,
            is_active: true,
        }
    }

    /// Fractional days elapsed between creation and `now` (never negative).
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.created_at).num_seconds().max(0) as f64;
        secs / 86_400.0
    }
}

/// Relationship kind carried by a [`MemoryLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    RelatesTo,
    FollowsUp,
    Contradicts,
    Reinforces,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::RelatesTo => "relates_to",
            LinkType::FollowsUp => "follows_up",
            LinkType::Contradicts => "contradicts",
            LinkType::Reinforces => "reinforces",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "relates_to" => Some(LinkType::RelatesTo),
            "follows_up" => Some(LinkType::FollowsUp),
            "contradicts" => Some(LinkType::Contradicts),
            "reinforces" => Some(LinkType::Reinforces),
            _ => None,
        }
    }
}

/// A weighted edge between two semantic memory units of the same user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryLink {
    pub id: Uuid,
    pub user_id: UserId,
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub link_type: LinkType,
    /// Link strength in `[0.0, 1.0]`.
    pub strength: f32,
    pub automatic: bool,
    pub created_at: DateTime<Utc>,
}

impl MemoryLink {
    /// Build an automatically detected `relates_to` link.
    ///
    /// Returns `None` for a self-loop (`from_id == to_id`).
    pub fn automatic(user_id: UserId, from_id: Uuid, to_id: Uuid, strength: f32) -> Option<Self> {
        if from_id == to_id {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            user_id,
            from_id,
            to_id,
            link_type: LinkType::RelatesTo,
            strength: strength.clamp(0.0, 1.0),
            automatic: true,
            created_at: Utc::now(),
        })
    }
}

/// Category of a derived [`MemoryInsight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Pattern,
    Growth,
    Concern,
    Progress,
}

impl InsightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::Pattern => "pattern",
            InsightType::Growth => "growth",
            InsightType::Concern => "concern",
            InsightType::Progress => "progress",
        }
    }

    /// Lenient parse used for completion-service output; `breakthrough`
    /// folds into [`InsightType::Growth`].
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pattern" | "recurring_theme" => Some(InsightType::Pattern),
            "growth" | "breakthrough" => Some(InsightType::Growth),
            "concern" => Some(InsightType::Concern),
            "progress" => Some(InsightType::Progress),
            _ => None,
        }
    }
}

/// Coarse relevance tier attached to insights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TherapeuticRelevance {
    Low,
    Medium,
    High,
}

impl TherapeuticRelevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            TherapeuticRelevance::Low => "low",
            TherapeuticRelevance::Medium => "medium",
            TherapeuticRelevance::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TherapeuticRelevance::Low),
            "medium" => Some(TherapeuticRelevance::Medium),
            "high" => Some(TherapeuticRelevance::High),
            _ => None,
        }
    }
}

/// A derived, read-mostly observation about a user's memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInsight {
    pub id: Uuid,
    pub user_id: UserId,
    pub insight_type: InsightType,
    pub content: String,
    pub supporting_memory_ids: Vec<Uuid>,
    pub confidence: f32,
    pub therapeutic_relevance: TherapeuticRelevance,
    pub action_suggestions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions, threads, bridges
// ─────────────────────────────────────────────────────────────────────────────

/// A bounded conversational period with one summary.
///
/// At most one session per user has `is_active == true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: UserId,
    pub session_key: String,
    pub title: String,
    pub summary: Option<String>,
    pub key_topics: Vec<String>,
    pub emotional_tone: String,
    pub unresolved_threads: JsonMap,
    pub context_carryover: JsonMap,
    pub message_count: u32,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    /// A fresh active session with a unique key, titled "New Conversation".
    pub fn open(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_key: Uuid::new_v4().to_string(),
            title: "New Conversation".to_string(),
            summary: None,
            key_topics: Vec::new(),
            emotional_tone: "neutral".to_string(),
            unresolved_threads: JsonMap::new(),
            context_carryover: JsonMap::new(),
            message_count: 0,
            last_activity: now,
            created_at: now,
            is_active: true,
        }
    }
}

/// Lifecycle state of a [`Thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Resolved,
    Dormant,
    FollowUpNeeded,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Active => "active",
            ThreadStatus::Resolved => "resolved",
            ThreadStatus::Dormant => "dormant",
            ThreadStatus::FollowUpNeeded => "follow_up_needed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(ThreadStatus::Active),
            "resolved" => Some(ThreadStatus::Resolved),
            "dormant" => Some(ThreadStatus::Dormant),
            "follow_up_needed" | "needs_follow_up" => Some(ThreadStatus::FollowUpNeeded),
            _ => None,
        }
    }
}

/// Follow-up priority of a [`Thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriority {
    High,
    Medium,
    Low,
}

impl ThreadPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadPriority::High => "high",
            ThreadPriority::Medium => "medium",
            ThreadPriority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(ThreadPriority::High),
            "medium" => Some(ThreadPriority::Medium),
            "low" => Some(ThreadPriority::Low),
            _ => None,
        }
    }
}

/// A named sub-topic that can persist across sessions.
///
/// Matched by `topic` equality, not by id, when touched mid-conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub user_id: UserId,
    /// `None` until the owning session is closed.
    pub session_id: Option<Uuid>,
    pub thread_key: String,
    pub topic: String,
    pub status: ThreadStatus,
    pub priority: ThreadPriority,
    pub last_mentioned: DateTime<Utc>,
    pub context_summary: String,
    pub next_session_prompt: Option<String>,
    pub emotional_context: JsonMap,
    pub progress_notes: String,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    /// An `active`/`medium` thread about `topic` not yet tied to a session.
    pub fn new(user_id: UserId, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_id: None,
            thread_key: Uuid::new_v4().to_string(),
            context_summary: format!("Discussing {topic}"),
            topic,
            status: ThreadStatus::Active,
            priority: ThreadPriority::Medium,
            last_mentioned: now,
            next_session_prompt: None,
            emotional_context: JsonMap::new(),
            progress_notes: String::new(),
            created_at: now,
        }
    }
}

/// Cross-session item still owed to the user.
///
/// `addressed` is the only field that changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityBridge {
    pub id: Uuid,
    pub user_id: UserId,
    pub from_session_id: Uuid,
    pub to_session_id: Uuid,
    pub bridge_type: String,
    pub carryover_data: serde_json::Value,
    pub priority: i32,
    pub addressed: bool,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ConversationMemory (derived, never persisted)
// ─────────────────────────────────────────────────────────────────────────────

/// Short-term view: what was just said.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermMemory {
    /// Oldest first.
    pub recent_turns: Vec<Turn>,
    pub current_context: String,
    pub emotional_state: String,
    pub key_topics: Vec<String>,
}

/// A long-term memory surfaced into the assembled context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportantMemory {
    pub content: String,
    pub importance: f32,
    pub timestamp: DateTime<Utc>,
}

/// Long-term view distilled from semantic memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermMemory {
    pub personality_profile: String,
    pub therapeutic_progress: String,
    pub important_memories: Vec<ImportantMemory>,
    pub patterns: Vec<String>,
}

impl LongTermMemory {
    /// Long-term view of a user with no semantic memory yet.
    pub fn empty() -> Self {
        Self {
            personality_profile: "Building personality profile from our conversations...".to_string(),
            therapeutic_progress: "Starting therapeutic journey...".to_string(),
            important_memories: Vec::new(),
            patterns: Vec::new(),
        }
    }

    /// Long-term view used when semantic memory could not be read.
    pub fn unavailable() -> Self {
        Self {
            personality_profile: "Building personality profile...".to_string(),
            therapeutic_progress: "Tracking therapeutic progress...".to_string(),
            important_memories: Vec::new(),
            patterns: Vec::new(),
        }
    }
}

/// Session view: where this conversation sits relative to earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMemory {
    pub session_id: String,
    pub continuation_context: String,
    pub unresolved_threads: Vec<String>,
    pub emotional_journey: String,
}

/// Per-request aggregate handed to the context renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub short_term: ShortTermMemory,
    pub long_term: LongTermMemory,
    pub session: SessionMemory,
}

impl ConversationMemory {
    pub fn strength(&self) -> MemoryStrength {
        MemoryStrength::classify(
            self.short_term.recent_turns.len(),
            self.long_term.important_memories.len(),
        )
    }
}

/// How much history backs the current context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStrength {
    Weak,
    Medium,
    Strong,
}

impl MemoryStrength {
    /// `strong` needs ≥20 turns and ≥5 long-term units, `medium` needs ≥5
    /// turns and ≥1 unit; anything less is `weak`.
    pub fn classify(turns: usize, long_term_units: usize) -> Self {
        if turns >= 20 && long_term_units >= 5 {
            MemoryStrength::Strong
        } else if turns >= 5 && long_term_units >= 1 {
            MemoryStrength::Medium
        } else {
            MemoryStrength::Weak
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStrength::Weak => "weak",
            MemoryStrength::Medium => "medium",
            MemoryStrength::Strong => "strong",
        }
    }
}

/// Context composed for a returning user at the start of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpeningContext {
    pub context: String,
    pub continuity_prompts: Vec<String>,
    pub active_topics: Vec<String>,
    pub recent_sessions: Vec<Session>,
    pub continuity_items: Vec<ContinuityBridge>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion-service payloads
// ─────────────────────────────────────────────────────────────────────────────
//
// Every payload is deserialised leniently: missing fields fall back to their
// defaults so a partially filled answer still parses.

/// Semantic distillation of one (user, assistant) exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DistilledExchange {
    pub key_topics: Vec<String>,
    pub emotional_context: String,
    pub temporal_context: String,
    pub memory_type: Option<String>,
    #[serde(alias = "semanticTags")]
    pub tags: Vec<String>,
    pub related_topics: Vec<String>,
    pub summary: String,
}

/// A fact the user explicitly stated about themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedFact {
    pub fact: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedFacts {
    pub facts: Vec<ExtractedFact>,
}

/// A follow-up thread proposed by the session summariser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DerivedThread {
    pub topic: String,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub context_summary: Option<String>,
    pub next_session_prompt: Option<String>,
}

/// End-of-session summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionDigest {
    pub title: String,
    pub summary: String,
    pub key_topics: Vec<String>,
    pub emotional_tone: String,
    pub unresolved_threads: JsonMap,
    pub context_carryover: JsonMap,
    #[serde(alias = "conversationThreads")]
    pub threads: Vec<DerivedThread>,
}

/// One insight proposed by the insight generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DerivedInsight {
    #[serde(rename = "type")]
    pub insight_type: String,
    pub insight: String,
    pub supporting_memory_ids: Vec<String>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct InsightBatch {
    pub insights: Vec<DerivedInsight>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Cross-crate error taxonomy of the memory core.
///
/// None of these is ever surfaced to the end user as a hard failure; callers
/// degrade to weaker context instead.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecallError {
    /// Transient persistence failure (after retries where applicable).
    #[error("Storage failure: {0}")]
    Storage(String),

    /// The completion service errored, timed out or returned unparsable JSON.
    #[error("Upstream analysis failed: {0}")]
    UpstreamAnalysis(String),

    /// A read returned rows that belong to another user.
    #[error("Isolation violation: {foreign_rows} row(s) returned for user {user_id} belong to another user")]
    IsolationViolation { user_id: UserId, foreign_rows: usize },

    /// A caller-imposed deadline elapsed.
    #[error("Timed out after {millis} ms")]
    Timeout { millis: u64 },
}

/// Returned by capture when the turn could not be fully processed.
///
/// Carries a usable fallback [`ConversationMemory`] so the conversation can
/// continue on degraded context.
#[derive(Error, Debug, Clone)]
#[error("degraded context for user {user_id}: {cause}")]
pub struct PartialFailure {
    pub user_id: UserId,
    pub cause: RecallError,
    /// `true` when the turn reached durable storage before the failure.
    pub turn_persisted: bool,
    pub fallback: Box<ConversationMemory>,
}
