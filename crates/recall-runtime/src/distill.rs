//! Semantic distillation.
//!
//! Turns a completed (user turn, assistant turn) exchange into long-term
//! memory:
//!
//! 1. **Distillation** – the completion service extracts topics, emotional
//!    and temporal context, tags, related topics and a one-line summary; one
//!    [`SemanticMemoryUnit`] is stored.  The new unit is then compared with
//!    the user's most recent units and an automatic `relates_to`
//!    [`MemoryLink`] is stored for every pair whose
//!    [`link_strength`] exceeds the threshold.
//! 2. **Fact extraction** – an independent, stricter pass stores every
//!    explicitly stated fact as a `fact` unit, skipping facts already known
//!    (case-insensitive exact match).
//!
//! Both passes run concurrently in [`Distiller::process_exchange`].  A failed
//! completion call stores nothing and is only logged.
//!
//! Re-running distillation on an exchange whose summary is already stored
//! reuses that unit, and links are unique per unit pair, so repeated runs do
//! not grow the link graph.  Lookup-then-insert runs under a per-user lock so
//! concurrent background jobs cannot both insert the same content.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use recall_memory::store::SemanticStore;
use recall_types::{
    DistilledExchange, ExtractedFacts, InsightBatch, InsightType, MemoryInsight, MemoryLink,
    MemoryType, RecallError, SemanticMemoryUnit, TherapeuticRelevance, Turn, UserId,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::completion::{ChatMessage, CompletionService, request_structured};
use crate::heuristics::KeywordTables;

const DISTILL_INSTRUCTION: &str = "\
You distill one exchange between a user and a supportive AI companion into long-term memory.
Return:
- keyTopics: short lowercase topics discussed
- emotionalContext: the user's emotional state in a word or short phrase
- temporalContext: when the events mentioned happen, if stated
- memoryType: one of conversation, insight, pattern, milestone, fact, goal, breakthrough
- tags: lowercase search keywords
- relatedTopics: broader themes this connects to
- summary: one sentence, written in the third person, about the user";

const FACT_INSTRUCTION: &str = "\
Extract discrete facts the user explicitly stated about themselves in this exchange.
Only facts explicitly stated. Never infer, never guess, never include anything the AI said.
Use one category per fact: personal_life, career, health, relationships, interests, preferences, challenges, goals.
Return an empty facts array when nothing qualifies.";

const INSIGHT_INSTRUCTION: &str = "\
You review a user's long-term memories and point out meaningful observations.
Return insights, each with:
- type: one of pattern, growth, concern, progress
- insight: one or two sentences addressed to a counsellor
- supportingMemoryIds: ids (from the list) that support it
- confidence: 0.0 to 1.0";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DistillConfig {
    /// How many recent units a new unit is compared with for linking.
    pub link_window: usize,
    /// Links at or below this strength are not stored.
    pub link_threshold: f32,
    pub strength_cap: f32,
    pub tag_weight: f32,
    pub topic_weight: f32,
    pub unit_confidence: f32,
    pub fact_confidence: f32,
    /// Units sent to the insight generator.
    pub insight_window: usize,
    pub completion_timeout: Duration,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            link_window: 10,
            link_threshold: 0.2,
            strength_cap: 0.95,
            tag_weight: 0.3,
            topic_weight: 0.2,
            unit_confidence: 0.85,
            fact_confidence: 0.9,
            insight_window: 20,
            completion_timeout: Duration::from_secs(15),
        }
    }
}

/// `min(cap, (shared_tags × tag_weight + shared_topics × topic_weight) / 2)`,
/// comparing case-insensitively.
pub fn link_strength(a: &SemanticMemoryUnit, b: &SemanticMemoryUnit, config: &DistillConfig) -> f32 {
    let shared = |x: &[String], y: &[String]| {
        let ys: HashSet<String> = y.iter().map(|s| s.to_lowercase()).collect();
        x.iter()
            .map(|s| s.to_lowercase())
            .collect::<HashSet<_>>()
            .intersection(&ys)
            .count() as f32
    };
    let tags = shared(&a.tags, &b.tags);
    let topics = shared(&a.related_topics, &b.related_topics);
    ((tags * config.tag_weight + topics * config.topic_weight) / 2.0).min(config.strength_cap)
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one distillation pass.
#[derive(Debug, Clone)]
pub struct DistillOutcome {
    pub unit: SemanticMemoryUnit,
    /// `false` when an identical unit already existed and was reused.
    pub created: bool,
    pub links_created: usize,
}

/// Result of [`Distiller::process_exchange`].  Failed passes are `None`.
#[derive(Debug, Clone, Default)]
pub struct ExchangeReport {
    pub distilled: Option<DistillOutcome>,
    pub facts_stored: Option<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Distiller
// ─────────────────────────────────────────────────────────────────────────────

pub struct Distiller {
    store: Arc<dyn SemanticStore>,
    completion: Arc<dyn CompletionService>,
    tables: Arc<KeywordTables>,
    config: DistillConfig,
    user_locks: StdMutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl Distiller {
    pub fn new(
        store: Arc<dyn SemanticStore>,
        completion: Arc<dyn CompletionService>,
        tables: Arc<KeywordTables>,
        config: DistillConfig,
    ) -> Self {
        Self { store, completion, tables, config, user_locks: StdMutex::new(HashMap::new()) }
    }

    fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(user_id).or_default())
    }

    /// Run distillation and fact extraction concurrently.  Never fails;
    /// each pass logs its own error.
    pub async fn process_exchange(
        &self,
        user_turn: &Turn,
        assistant_turn: &Turn,
        session_id: Option<&str>,
    ) -> ExchangeReport {
        let (distilled, facts) = tokio::join!(
            self.distill(user_turn, assistant_turn, session_id),
            self.extract_facts(user_turn, assistant_turn, session_id),
        );
        let user_id = user_turn.user_id;
        ExchangeReport {
            distilled: distilled
                .map_err(|e| warn!(user_id, error = %e, "distillation skipped"))
                .ok(),
            facts_stored: facts
                .map(|f| f.len())
                .map_err(|e| warn!(user_id, error = %e, "fact extraction skipped"))
                .ok(),
        }
    }

    /// Distill one exchange into a semantic unit and link it to recent units.
    #[tracing::instrument(skip_all, fields(user_id = user_turn.user_id))]
    pub async fn distill(
        &self,
        user_turn: &Turn,
        assistant_turn: &Turn,
        session_id: Option<&str>,
    ) -> Result<DistillOutcome, RecallError> {
        let user_id = check_same_user(user_turn, assistant_turn)?;
        let messages = vec![ChatMessage::system(DISTILL_INSTRUCTION), exchange_message(user_turn, assistant_turn)];
        let distilled: DistilledExchange =
            request_structured(self.completion.as_ref(), &messages, self.config.completion_timeout).await?;

        let content = if distilled.summary.trim().is_empty() {
            format!("{} -> {}", user_turn.content.trim(), assistant_turn.content.trim())
        } else {
            distilled.summary.trim().to_string()
        };

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let (unit, created) = match self.store.find_by_content(user_id, &content, None).await? {
            Some(existing) => {
                debug!(user_id, unit_id = %existing.id, "exchange already distilled, reusing unit");
                (existing, false)
            }
            None => {
                let unit = self.build_unit(user_id, content, distilled, session_id);
                self.store.insert_unit(&unit).await?;
                (unit, true)
            }
        };

        let links_created = self.link_to_recent(&unit).await?;
        info!(user_id, unit_id = %unit.id, created, links_created, "exchange distilled");
        Ok(DistillOutcome { unit, created, links_created })
    }

    fn build_unit(
        &self,
        user_id: UserId,
        content: String,
        distilled: DistilledExchange,
        session_id: Option<&str>,
    ) -> SemanticMemoryUnit {
        let memory_type = distilled
            .memory_type
            .as_deref()
            .and_then(MemoryType::parse)
            .unwrap_or(MemoryType::Conversation);
        let tags = if distilled.tags.is_empty() { distilled.key_topics } else { distilled.tags };

        let mut unit = SemanticMemoryUnit::new(user_id, memory_type, content);
        unit.tags = normalise(tags);
        unit.related_topics = normalise(distilled.related_topics);
        unit.emotional_context = non_empty(distilled.emotional_context);
        unit.temporal_context = non_empty(distilled.temporal_context);
        unit.confidence = self.config.unit_confidence;
        unit.source_session_id = session_id.map(str::to_string);
        unit
    }

    /// Store an automatic link from older to newer unit for every recent
    /// unit whose strength exceeds the threshold.  Returns links written.
    async fn link_to_recent(&self, unit: &SemanticMemoryUnit) -> Result<usize, RecallError> {
        let recent = self.store.recent_units(unit.user_id, self.config.link_window + 1).await?;
        let mut created = 0;
        for other in recent.iter().filter(|u| u.id != unit.id).take(self.config.link_window) {
            let strength = link_strength(unit, other, &self.config);
            if strength <= self.config.link_threshold {
                continue;
            }
            let (from, to) = if other.created_at <= unit.created_at { (other.id, unit.id) } else { (unit.id, other.id) };
            if let Some(link) = MemoryLink::automatic(unit.user_id, from, to, strength) {
                if self.store.insert_link(&link).await? {
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    /// Store facts the user explicitly stated, skipping known ones.
    pub async fn extract_facts(
        &self,
        user_turn: &Turn,
        assistant_turn: &Turn,
        session_id: Option<&str>,
    ) -> Result<Vec<SemanticMemoryUnit>, RecallError> {
        let user_id = check_same_user(user_turn, assistant_turn)?;
        let messages = vec![ChatMessage::system(FACT_INSTRUCTION), exchange_message(user_turn, assistant_turn)];
        let extracted: ExtractedFacts =
            request_structured(self.completion.as_ref(), &messages, self.config.completion_timeout).await?;

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let mut seen = HashSet::new();
        let mut stored = Vec::new();
        for fact in extracted.facts {
            let text = fact.fact.trim().to_string();
            if text.is_empty() || !seen.insert(text.to_lowercase()) {
                continue;
            }
            if self.store.find_by_content(user_id, &text, Some(MemoryType::Fact)).await?.is_some() {
                debug!(user_id, "fact already known, skipped");
                continue;
            }
            let category = fact
                .category
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "general".to_string());
            let mut unit = SemanticMemoryUnit::new(user_id, MemoryType::Fact, text);
            unit.tags = vec![category];
            unit.confidence = self.config.fact_confidence;
            unit.source_session_id = session_id.map(str::to_string);
            self.store.insert_unit(&unit).await?;
            stored.push(unit);
        }
        info!(user_id, facts = stored.len(), "facts extracted");
        Ok(stored)
    }

    /// Ask the completion service for insights over the most recent units
    /// and persist them.
    pub async fn generate_insights(&self, user_id: UserId) -> Result<Vec<MemoryInsight>, RecallError> {
        let units = self.store.recent_units(user_id, self.config.insight_window).await?;
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let listing = units
            .iter()
            .map(|u| format!("[{}] ({}) {} | tags: {}", u.id, u.memory_type.as_str(), u.content, u.tags.join(", ")))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![ChatMessage::system(INSIGHT_INSTRUCTION), ChatMessage::user(listing)];
        let batch: InsightBatch =
            request_structured(self.completion.as_ref(), &messages, self.config.completion_timeout).await?;

        let by_id: BTreeMap<Uuid, &SemanticMemoryUnit> = units.iter().map(|u| (u.id, u)).collect();
        let mut stored = Vec::new();
        for derived in batch.insights {
            if derived.insight.trim().is_empty() {
                continue;
            }
            let supporting: Vec<Uuid> = derived
                .supporting_memory_ids
                .iter()
                .filter_map(|raw| Uuid::parse_str(raw.trim()).ok())
                .filter(|id| by_id.contains_key(id))
                .collect();
            let insight_type = InsightType::parse(&derived.insight_type).unwrap_or(InsightType::Pattern);

            let mut tag_counts: BTreeMap<String, usize> = BTreeMap::new();
            for id in &supporting {
                for tag in &by_id[id].tags {
                    *tag_counts.entry(tag.to_lowercase()).or_default() += 1;
                }
            }
            let relevance = tag_counts
                .keys()
                .map(|t| self.tables.relevance(t))
                .chain(std::iter::once(self.tables.relevance(&derived.insight_type)))
                .max()
                .unwrap_or(TherapeuticRelevance::Low);
            let lead_tag = tag_counts
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(t, _)| t.clone())
                .unwrap_or_else(|| insight_type.as_str().to_string());

            let insight = MemoryInsight {
                id: Uuid::new_v4(),
                user_id,
                insight_type,
                content: derived.insight.trim().to_string(),
                supporting_memory_ids: supporting,
                confidence: derived.confidence.unwrap_or(0.7).clamp(0.0, 1.0),
                therapeutic_relevance: relevance,
                action_suggestions: self.tables.action_suggestions(&lead_tag),
                created_at: Utc::now(),
            };
            self.store.insert_insight(&insight).await?;
            stored.push(insight);
        }
        info!(user_id, insights = stored.len(), "insights generated");
        Ok(stored)
    }
}

fn check_same_user(user_turn: &Turn, assistant_turn: &Turn) -> Result<UserId, RecallError> {
    if user_turn.user_id != assistant_turn.user_id {
        return Err(RecallError::IsolationViolation { user_id: user_turn.user_id, foreign_rows: 1 });
    }
    Ok(user_turn.user_id)
}

fn exchange_message(user_turn: &Turn, assistant_turn: &Turn) -> ChatMessage {
    ChatMessage::user(format!("User: {}\nAI: {}", user_turn.content, assistant_turn.content))
}

fn normalise(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionError;
    use async_trait::async_trait;
    use recall_memory::semantic::SqliteSemanticStore;
    use recall_memory::store::Database;

    /// Answers by instruction: distillation, facts or insights.
    struct Scripted {
        distill: String,
        facts: String,
        insights: String,
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, _: &[ChatMessage]) -> Result<String, CompletionError> {
            Ok(String::new())
        }
        async fn complete_json(&self, m: &[ChatMessage], _: serde_json::Value) -> Result<String, CompletionError> {
            let system = &m[0].content;
            if system.starts_with("You distill") {
                Ok(self.distill.clone())
            } else if system.starts_with("Extract discrete facts") {
                Ok(self.facts.clone())
            } else {
                Ok(self.insights.clone())
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl CompletionService for Failing {
        async fn complete(&self, _: &[ChatMessage]) -> Result<String, CompletionError> {
            Err(CompletionError::BadResponse("down".into()))
        }
        async fn complete_json(&self, _: &[ChatMessage], _: serde_json::Value) -> Result<String, CompletionError> {
            Ok("not json at all".into())
        }
    }

    fn distiller(svc: impl CompletionService + 'static) -> (Arc<SqliteSemanticStore>, Distiller) {
        let store = Arc::new(SqliteSemanticStore::new(Database::open_in_memory().unwrap()));
        let d = Distiller::new(
            store.clone(),
            Arc::new(svc),
            Arc::new(KeywordTables::default()),
            DistillConfig::default(),
        );
        (store, d)
    }

    fn scripted(summary: &str, tags: &[&str], topics: &[&str]) -> Scripted {
        Scripted {
            distill: serde_json::json!({
                "keyTopics": ["work"],
                "emotionalContext": "anxious",
                "memoryType": "conversation",
                "tags": tags,
                "relatedTopics": topics,
                "summary": summary,
            })
            .to_string(),
            facts: r#"{"facts":[{"fact":"Works as a nurse","category":"career"},{"fact":"works as a NURSE"}]}"#.into(),
            insights: "{}".into(),
        }
    }

    fn exchange(user: &str, bot: &str) -> (Turn, Turn) {
        (Turn::new(1, user, false), Turn::new(1, bot, true))
    }

    #[test]
    fn strength_formula_and_cap() {
        let config = DistillConfig::default();
        let mut a = SemanticMemoryUnit::new(1, MemoryType::Conversation, "a");
        let mut b = SemanticMemoryUnit::new(1, MemoryType::Conversation, "b");
        a.tags = vec!["work".into(), "Stress".into()];
        b.tags = vec!["stress".into(), "work".into()];
        a.related_topics = vec!["career".into()];
        b.related_topics = vec!["career".into()];
        // (2 × 0.3 + 1 × 0.2) / 2 = 0.4
        assert!((link_strength(&a, &b, &config) - 0.4).abs() < 1e-6);

        a.tags = (0..20).map(|i| format!("t{i}")).collect();
        b.tags = a.tags.clone();
        assert_eq!(link_strength(&a, &b, &config), 0.95);
    }

    #[tokio::test]
    async fn distill_stores_unit_and_links_overlapping_units() {
        let (store, d) = distiller(scripted("User is stressed about deadlines", &["work", "deadline"], &["career"]));
        let mut older = SemanticMemoryUnit::new(1, MemoryType::Conversation, "Earlier work chat");
        older.tags = vec!["work".into(), "deadline".into()];
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        store.insert_unit(&older).await.unwrap();
        let mut unrelated = SemanticMemoryUnit::new(1, MemoryType::Conversation, "Gardening");
        unrelated.tags = vec!["plants".into()];
        store.insert_unit(&unrelated).await.unwrap();

        let (u, a) = exchange("Deadlines are crushing me", "That sounds heavy.");
        let outcome = d.distill(&u, &a, Some("s-1")).await.unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.links_created, 1);
        assert_eq!(outcome.unit.emotional_context.as_deref(), Some("anxious"));
        assert_eq!(outcome.unit.source_session_id.as_deref(), Some("s-1"));

        let links = store.links_for(outcome.unit.id).await.unwrap();
        assert_eq!(links[0].from_id, older.id);
        assert_eq!(links[0].to_id, outcome.unit.id);
    }

    #[tokio::test]
    async fn rerunning_distillation_does_not_duplicate() {
        let (store, d) = distiller(scripted("User is stressed about deadlines", &["work", "deadline"], &[]));
        let mut older = SemanticMemoryUnit::new(1, MemoryType::Conversation, "Earlier work chat");
        older.tags = vec!["work".into(), "deadline".into()];
        store.insert_unit(&older).await.unwrap();

        let (u, a) = exchange("Deadlines again", "Let's look at them.");
        let first = d.distill(&u, &a, None).await.unwrap();
        let second = d.distill(&u, &a, None).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.unit.id, first.unit.id);
        assert_eq!(second.links_created, 0);
        assert_eq!(store.stats(1).await.unwrap().link_count, 1);
        assert_eq!(store.recent_units(1, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_summary_falls_back_to_exchange_text() {
        let (_, d) = distiller(scripted("", &[], &[]));
        let (u, a) = exchange("hi", "hello");
        let outcome = d.distill(&u, &a, None).await.unwrap();
        assert_eq!(outcome.unit.content, "hi -> hello");
        assert_eq!(outcome.unit.tags, vec!["work"]);
    }

    #[tokio::test]
    async fn malformed_reply_stores_nothing() {
        let (store, d) = distiller(Failing);
        let (u, a) = exchange("hi", "hello");
        let err = d.distill(&u, &a, None).await.unwrap_err();
        assert!(matches!(err, RecallError::UpstreamAnalysis(_)));
        assert!(store.recent_units(1, 10).await.unwrap().is_empty());

        let report = d.process_exchange(&u, &a, None).await;
        assert!(report.distilled.is_none());
        assert!(report.facts_stored.is_none());
    }

    #[tokio::test]
    async fn facts_are_deduplicated_case_insensitively() {
        let (store, d) = distiller(scripted("Nurse chat", &[], &[]));
        let (u, a) = exchange("I work as a nurse", "Nice!");

        let first = d.extract_facts(&u, &a, None).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].tags, vec!["career"]);

        let second = d.extract_facts(&u, &a, None).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(store.units_by_type(1, &[MemoryType::Fact], 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fact_matching_an_insight_is_still_stored() {
        let (store, d) = distiller(scripted("Nurse chat", &[], &[]));
        store.insert_unit(&SemanticMemoryUnit::new(1, MemoryType::Insight, "Works as a nurse")).await.unwrap();
        let (u, a) = exchange("I work as a nurse", "Nice!");

        let stored = d.extract_facts(&u, &a, None).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].memory_type, MemoryType::Fact);
        assert_eq!(store.units_by_type(1, &[MemoryType::Insight], 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn process_exchange_runs_both_passes() {
        let (_, d) = distiller(scripted("Nurse chat", &["work"], &[]));
        let (u, a) = exchange("I work as a nurse", "Nice!");
        let report = d.process_exchange(&u, &a, None).await;
        assert!(report.distilled.is_some());
        assert_eq!(report.facts_stored, Some(1));
    }

    #[tokio::test]
    async fn mismatched_users_are_rejected() {
        let (_, d) = distiller(scripted("x", &[], &[]));
        let u = Turn::new(1, "hi", false);
        let a = Turn::new(2, "hello", true);
        assert!(matches!(
            d.distill(&u, &a, None).await,
            Err(RecallError::IsolationViolation { .. })
        ));
    }

    #[tokio::test]
    async fn insights_keep_only_known_supporting_ids() {
        let store = Arc::new(SqliteSemanticStore::new(Database::open_in_memory().unwrap()));
        let mut unit = SemanticMemoryUnit::new(1, MemoryType::Pattern, "Stress at work again");
        unit.tags = vec!["stress".into()];
        store.insert_unit(&unit).await.unwrap();

        let svc = Scripted {
            distill: "{}".into(),
            facts: "{}".into(),
            insights: serde_json::json!({"insights": [{
                "type": "concern",
                "insight": "Work stress keeps returning",
                "supportingMemoryIds": [unit.id.to_string(), Uuid::new_v4().to_string(), "junk"],
                "confidence": 0.8
            }]})
            .to_string(),
        };
        let d = Distiller::new(store.clone(), Arc::new(svc), Arc::new(KeywordTables::default()), DistillConfig::default());

        let insights = d.generate_insights(1).await.unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].insight_type, InsightType::Concern);
        assert_eq!(insights[0].supporting_memory_ids, vec![unit.id]);
        assert_eq!(insights[0].therapeutic_relevance, TherapeuticRelevance::High);
        assert_eq!(store.insights(1, 10).await.unwrap().len(), 1);
    }
}
