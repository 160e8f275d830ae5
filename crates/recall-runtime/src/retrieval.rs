//! Memory Retrieval Engine.
//!
//! Ranks and returns semantic memory units for a user.  Three composable
//! modes:
//!
//! | mode                       | candidates                                         | ranking |
//! |----------------------------|----------------------------------------------------|---------|
//! | [`contextual`]             | ~40 % topic-tag matches, ~30 % emotion matches, ~30 % most accessed | `access_count + recency`, ties → access count |
//! | [`relevant_to_text`]       | substring match of extracted keywords              | keyword score (below) |
//! | [`emotionally_relevant`]   | direct emotion match, then ≤3 per related emotion  | direct matches first |
//!
//! Free-text score of a unit:
//!
//! ```text
//! score = Σ_kw (content_hit if kw ∈ content) + (tag_hit if kw ∈ any tag)
//!       + min(access_count × access_weight, access_cap)
//!       + max(0, recency_max − age_days × recency_decay)
//! ```
//!
//! Ties are broken by creation time, newest first.
//!
//! Ranked modes record an access on exactly the units they return, after
//! ranking: the current call is ranked on the counts as they were, and the
//! increment only influences later calls.
//!
//! Read failures never propagate: they are logged and yield an empty list.
//!
//! [`contextual`]: MemoryRetrievalEngine::contextual
//! [`relevant_to_text`]: MemoryRetrievalEngine::relevant_to_text
//! [`emotionally_relevant`]: MemoryRetrievalEngine::emotionally_relevant

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_memory::store::{SemanticStore, StorageError};
use recall_types::{InsightType, MemoryInsight, MemoryType, SemanticMemoryUnit, UserId};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::heuristics::{KeywordTables, pattern_confidence};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunable ranking coefficients.
///
/// Defaults keep the relative order tag hits > content hits > recency >
/// popularity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub content_hit: f64,
    pub tag_hit: f64,
    pub access_weight: f64,
    pub access_cap: f64,
    pub recency_max: f64,
    pub recency_decay_per_day: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            content_hit: 2.0,
            tag_hit: 3.0,
            access_weight: 0.1,
            access_cap: 2.0,
            recency_max: 2.0,
            recency_decay_per_day: 0.1,
        }
    }
}

impl ScoringWeights {
    pub fn recency_bonus(&self, unit: &SemanticMemoryUnit, now: DateTime<Utc>) -> f64 {
        (self.recency_max - unit.age_days(now) * self.recency_decay_per_day).max(0.0)
    }

    pub fn popularity(&self, unit: &SemanticMemoryUnit) -> f64 {
        (unit.access_count as f64 * self.access_weight).min(self.access_cap)
    }

    /// Free-text score of `unit` for already-lowercased `keywords`.
    pub fn text_score(&self, unit: &SemanticMemoryUnit, keywords: &[String], now: DateTime<Utc>) -> f64 {
        let content = unit.content.to_lowercase();
        let tags: Vec<String> = unit.tags.iter().map(|t| t.to_lowercase()).collect();
        let mut score = 0.0;
        for kw in keywords {
            if content.contains(kw.as_str()) {
                score += self.content_hit;
            }
            if tags.iter().any(|t| t.contains(kw.as_str())) {
                score += self.tag_hit;
            }
        }
        score + self.popularity(unit) + self.recency_bonus(unit, now)
    }
}

/// Topic and emotion hints for [`MemoryRetrievalEngine::contextual`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalQuery {
    pub topics: Vec<String>,
    pub emotional_state: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryRetrievalEngine
// ─────────────────────────────────────────────────────────────────────────────

pub struct MemoryRetrievalEngine {
    store: Arc<dyn SemanticStore>,
    tables: Arc<KeywordTables>,
    weights: ScoringWeights,
}

impl MemoryRetrievalEngine {
    pub fn new(store: Arc<dyn SemanticStore>, tables: Arc<KeywordTables>) -> Self {
        Self { store, tables, weights: ScoringWeights::default() }
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Most recent active units, unranked and without access bookkeeping.
    pub async fn recent(&self, user_id: UserId, limit: usize) -> Vec<SemanticMemoryUnit> {
        or_empty(self.store.recent_units(user_id, limit).await, "recent_units", user_id)
    }

    /// Blend of topic, emotion and popularity candidates, deduplicated and
    /// ranked by `access_count + recency`.
    pub async fn contextual(
        &self,
        user_id: UserId,
        query: &RetrievalQuery,
        limit: usize,
    ) -> Vec<SemanticMemoryUnit> {
        if limit == 0 {
            return Vec::new();
        }
        let topic_n = share(limit, 0.4);
        let emotion_n = share(limit, 0.3);
        let popular_n = share(limit, 0.3);

        let mut candidates = Vec::new();
        if !query.topics.is_empty() {
            candidates.extend(or_empty(
                self.store.units_by_topics(user_id, &query.topics, topic_n).await,
                "units_by_topics",
                user_id,
            ));
        }
        if let Some(emotion) = query.emotional_state.as_deref().filter(|e| !e.is_empty()) {
            candidates.extend(or_empty(
                self.store.units_by_emotion(user_id, emotion, emotion_n).await,
                "units_by_emotion",
                user_id,
            ));
        }
        candidates.extend(or_empty(
            self.store.most_accessed(user_id, popular_n).await,
            "most_accessed",
            user_id,
        ));

        let now = Utc::now();
        let mut ranked = dedupe(candidates);
        ranked.sort_by(|a, b| {
            let sa = a.access_count as f64 + self.weights.recency_bonus(a, now);
            let sb = b.access_count as f64 + self.weights.recency_bonus(b, now);
            sb.partial_cmp(&sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.access_count.cmp(&a.access_count))
        });
        ranked.truncate(limit);
        self.touch(user_id, &ranked).await;
        ranked
    }

    /// Units matching the keywords of `text`, ranked by keyword score.
    ///
    /// With no usable keywords the most recent units are returned instead.
    pub async fn relevant_to_text(&self, user_id: UserId, text: &str, limit: usize) -> Vec<SemanticMemoryUnit> {
        if limit == 0 {
            return Vec::new();
        }
        let keywords = self.tables.extract_keywords(text);
        if keywords.is_empty() {
            debug!(user_id, "no keywords survived extraction, falling back to recent units");
            let recent = self.recent(user_id, limit).await;
            self.touch(user_id, &recent).await;
            return recent;
        }

        let candidates = or_empty(
            self.store.search_units(user_id, &keywords, limit.saturating_mul(3).max(10)).await,
            "search_units",
            user_id,
        );

        let now = Utc::now();
        let mut scored: Vec<(f64, SemanticMemoryUnit)> = candidates
            .into_iter()
            .map(|u| (self.weights.text_score(&u, &keywords, now), u))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        let ranked: Vec<SemanticMemoryUnit> = scored.into_iter().take(limit).map(|(_, u)| u).collect();
        debug!(user_id, keywords = ?keywords, hits = ranked.len(), "free-text retrieval");
        self.touch(user_id, &ranked).await;
        ranked
    }

    /// Units whose emotional context matches `emotion` directly, followed by
    /// up to three per related emotion.
    pub async fn emotionally_relevant(
        &self,
        user_id: UserId,
        emotion: &str,
        limit: usize,
    ) -> Vec<SemanticMemoryUnit> {
        if limit == 0 || emotion.trim().is_empty() {
            return Vec::new();
        }
        let mut units = or_empty(
            self.store.units_by_emotion(user_id, emotion, share(limit, 0.7)).await,
            "units_by_emotion",
            user_id,
        );
        for related in self.tables.related_emotions(emotion) {
            units.extend(or_empty(
                self.store.units_by_emotion(user_id, &related, 3).await,
                "units_by_emotion",
                user_id,
            ));
        }
        let mut units = dedupe(units);
        units.truncate(limit);
        units
    }

    /// One `pattern` insight per tag occurring on at least three
    /// `pattern`-type units, most frequent first.
    pub async fn recurring_patterns(&self, user_id: UserId) -> Vec<MemoryInsight> {
        let units = or_empty(
            self.store.units_by_type(user_id, &[MemoryType::Pattern], 200).await,
            "units_by_type",
            user_id,
        );

        let mut by_tag: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
        for unit in &units {
            let mut seen = HashSet::new();
            for tag in &unit.tags {
                let tag = tag.to_lowercase();
                if seen.insert(tag.clone()) {
                    by_tag.entry(tag).or_default().push(unit.id);
                }
            }
        }

        let mut recurring: Vec<(String, Vec<Uuid>)> =
            by_tag.into_iter().filter(|(_, ids)| ids.len() >= 3).collect();
        recurring.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

        let now = Utc::now();
        recurring
            .into_iter()
            .map(|(tag, ids)| MemoryInsight {
                id: Uuid::new_v4(),
                user_id,
                insight_type: InsightType::Pattern,
                content: format!("Recurring theme: {tag} (appears in {} memories)", ids.len()),
                confidence: pattern_confidence(ids.len()),
                therapeutic_relevance: self.tables.relevance(&tag),
                action_suggestions: self.tables.action_suggestions(&tag),
                supporting_memory_ids: ids,
                created_at: now,
            })
            .collect()
    }

    /// `insight`/`breakthrough` units that use progress vocabulary, newest
    /// first.
    pub async fn progress_markers(&self, user_id: UserId, limit: usize) -> Vec<SemanticMemoryUnit> {
        let units = or_empty(
            self.store
                .units_by_type(user_id, &[MemoryType::Insight, MemoryType::Breakthrough], 100)
                .await,
            "units_by_type",
            user_id,
        );
        units
            .into_iter()
            .filter(|u| self.tables.is_progress_marker(&u.content))
            .take(limit)
            .collect()
    }

    /// Active neighbours of `unit_id` in the link graph, strongest link first.
    pub async fn linked_units(&self, user_id: UserId, unit_id: Uuid, limit: usize) -> Vec<SemanticMemoryUnit> {
        let links = or_empty(self.store.links_for(unit_id).await, "links_for", user_id);
        let order: Vec<Uuid> = links
            .iter()
            .filter(|l| l.user_id == user_id)
            .map(|l| if l.from_id == unit_id { l.to_id } else { l.from_id })
            .collect();
        let units = or_empty(self.store.units_by_ids(user_id, &order).await, "units_by_ids", user_id);
        order
            .iter()
            .filter_map(|id| units.iter().find(|u| u.id == *id && u.is_active).cloned())
            .take(limit)
            .collect()
    }

    async fn touch(&self, user_id: UserId, units: &[SemanticMemoryUnit]) {
        if units.is_empty() {
            return;
        }
        let ids: Vec<Uuid> = units.iter().map(|u| u.id).collect();
        if let Err(e) = self.store.record_access(user_id, &ids, Utc::now()).await {
            warn!(user_id, error = %e, "failed to record memory access");
        }
    }
}

/// `ceil(limit × fraction)`, at least one.
fn share(limit: usize, fraction: f64) -> usize {
    ((limit as f64 * fraction).ceil() as usize).max(1)
}

fn dedupe(units: Vec<SemanticMemoryUnit>) -> Vec<SemanticMemoryUnit> {
    let mut seen = HashSet::new();
    units.into_iter().filter(|u| seen.insert(u.id)).collect()
}

fn or_empty<T>(result: Result<Vec<T>, StorageError>, op: &str, user_id: UserId) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!(user_id, op, error = %e, "semantic store read failed, returning no units");
        Vec::new()
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use recall_memory::semantic::SqliteSemanticStore;
    use recall_memory::store::Database;
    use recall_types::MemoryLink;

    fn setup() -> (Arc<SqliteSemanticStore>, MemoryRetrievalEngine) {
        let store = Arc::new(SqliteSemanticStore::new(Database::open_in_memory().unwrap()));
        let engine = MemoryRetrievalEngine::new(store.clone(), Arc::new(KeywordTables::default()));
        (store, engine)
    }

    fn unit(kind: MemoryType, content: &str, tags: &[&str], days_old: i64) -> SemanticMemoryUnit {
        let mut u = SemanticMemoryUnit::new(1, kind, content);
        u.tags = tags.iter().map(|t| t.to_string()).collect();
        u.created_at = Utc::now() - Duration::days(days_old);
        u
    }

    // ── free text ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn more_recent_unit_ranks_first_on_equal_overlap() {
        let (store, engine) = setup();
        let old = unit(MemoryType::Conversation, "Deadline pressure", &["deadline"], 6);
        let new = unit(MemoryType::Conversation, "Deadline pressure", &["deadline"], 1);
        store.insert_unit(&old).await.unwrap();
        store.insert_unit(&new).await.unwrap();

        let ranked = engine.relevant_to_text(1, "deadline worries", 5).await;
        assert_eq!(ranked.iter().map(|u| u.id).collect::<Vec<_>>(), vec![new.id, old.id]);
    }

    #[tokio::test]
    async fn tag_hits_outrank_content_hits() {
        let (store, engine) = setup();
        let content_only = unit(MemoryType::Conversation, "Talked about my manager", &[], 0);
        let tagged = unit(MemoryType::Conversation, "Rough week", &["manager"], 0);
        store.insert_unit(&content_only).await.unwrap();
        store.insert_unit(&tagged).await.unwrap();

        let ranked = engine.relevant_to_text(1, "manager", 5).await;
        assert_eq!(ranked[0].id, tagged.id);
    }

    #[tokio::test]
    async fn returned_units_get_access_recorded() {
        let (store, engine) = setup();
        let hit = unit(MemoryType::Fact, "Plays violin", &["music"], 0);
        let miss = unit(MemoryType::Fact, "Has a brother", &["family"], 0);
        store.insert_unit(&hit).await.unwrap();
        store.insert_unit(&miss).await.unwrap();

        engine.relevant_to_text(1, "violin lessons", 5).await;
        let ids = store.units_by_ids(1, &[hit.id, miss.id]).await.unwrap();
        let count = |id| ids.iter().find(|u| u.id == id).unwrap().access_count;
        assert_eq!(count(hit.id), 1);
        assert_eq!(count(miss.id), 0);
    }

    #[tokio::test]
    async fn stop_word_only_text_falls_back_to_recent() {
        let (store, engine) = setup();
        store.insert_unit(&unit(MemoryType::Fact, "Lives near the sea", &[], 0)).await.unwrap();
        let units = engine.relevant_to_text(1, "I think that I want this", 5).await;
        assert_eq!(units.len(), 1);
    }

    // ── emotional ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn synonym_expansion_finds_anxious_for_worried() {
        let (store, engine) = setup();
        let mut u = unit(MemoryType::Conversation, "Exam nerves", &[], 0);
        u.emotional_context = Some("anxious".into());
        store.insert_unit(&u).await.unwrap();

        let units = engine.emotionally_relevant(1, "worried", 5).await;
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id, u.id);
    }

    // ── contextual ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn contextual_dedupes_and_prefers_popular() {
        let (store, engine) = setup();
        let mut a = unit(MemoryType::Conversation, "Work stress", &["work"], 0);
        a.emotional_context = Some("anxious".into());
        a.access_count = 5;
        let b = unit(MemoryType::Conversation, "Weekend plans", &["leisure"], 0);
        store.insert_unit(&a).await.unwrap();
        store.insert_unit(&b).await.unwrap();

        let query = RetrievalQuery { topics: vec!["work".into()], emotional_state: Some("anxious".into()) };
        let units = engine.contextual(1, &query, 10).await;
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].id, a.id);
    }

    // ── patterns & progress ──────────────────────────────────────────────────

    #[tokio::test]
    async fn recurring_tags_become_insights() {
        let (store, engine) = setup();
        for i in 0..3 {
            store
                .insert_unit(&unit(MemoryType::Pattern, &format!("stress {i}"), &["stress", "work"], 0))
                .await
                .unwrap();
        }
        store.insert_unit(&unit(MemoryType::Pattern, "one-off", &["travel"], 0)).await.unwrap();

        let insights = engine.recurring_patterns(1).await;
        assert_eq!(insights.len(), 2);
        let stress = insights.iter().find(|i| i.content.contains("stress")).unwrap();
        assert_eq!(stress.confidence, 0.75);
        assert_eq!(stress.supporting_memory_ids.len(), 3);
        assert_eq!(stress.action_suggestions.len(), 3);
    }

    #[tokio::test]
    async fn progress_markers_filter_vocabulary_and_type() {
        let (store, engine) = setup();
        store.insert_unit(&unit(MemoryType::Insight, "I realize I need rest", &[], 0)).await.unwrap();
        store.insert_unit(&unit(MemoryType::Insight, "Mentioned the weather", &[], 0)).await.unwrap();
        store.insert_unit(&unit(MemoryType::Conversation, "Big progress today", &[], 0)).await.unwrap();

        let markers = engine.progress_markers(1, 10).await;
        assert_eq!(markers.len(), 1);
        assert!(markers[0].content.contains("realize"));
    }

    #[tokio::test]
    async fn linked_units_follow_links() {
        let (store, engine) = setup();
        let a = unit(MemoryType::Conversation, "a", &["x"], 0);
        let b = unit(MemoryType::Conversation, "b", &["x"], 0);
        store.insert_unit(&a).await.unwrap();
        store.insert_unit(&b).await.unwrap();
        store.insert_link(&MemoryLink::automatic(1, a.id, b.id, 0.5).unwrap()).await.unwrap();

        let from_b = engine.linked_units(1, b.id, 5).await;
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_b[0].id, a.id);
    }

    #[test]
    fn share_rounds_up() {
        assert_eq!(share(10, 0.4), 4);
        assert_eq!(share(5, 0.3), 2);
        assert_eq!(share(1, 0.3), 1);
    }
}
