//! Semantic Memory Store.
//!
//! SQLite implementation of [`SemanticStore`]: distilled memory units, the
//! weighted links between them and the insights derived from them.
//!
//! Tags and related topics are stored as JSON arrays in TEXT columns; tag,
//! topic and keyword searches are case-insensitive substring matches
//! (`fold(col) LIKE '%needle%' ESCAPE '\'`) over those arrays and the unit
//! content.  `fold` is the Unicode lowercase registered on every connection.
//! Soft-deleted units (`is_active = 0`) are invisible to every search.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_types::{
    InsightType, LinkType, MemoryInsight, MemoryLink, MemoryType, SemanticMemoryUnit,
    TherapeuticRelevance, UserId,
};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{
    Database, SemanticStore, StorageError, col_enum, col_json, col_opt_ts, col_ts, col_uuid,
    contains_pattern, to_json, ts,
};

const UNIT_COLUMNS: &str = "id, user_id, memory_type, content, tags, emotional_context, \
     temporal_context, related_topics, confidence, access_count, last_accessed_at, created_at, \
     source_session_id, is_active";

const LINK_COLUMNS: &str = "id, user_id, from_id, to_id, link_type, strength, automatic, created_at";

const INSIGHT_COLUMNS: &str = "id, user_id, insight_type, content, supporting_memory_ids, \
     confidence, therapeutic_relevance, action_suggestions, created_at";

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStats
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregate view of one user's semantic memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_units: usize,
    pub by_type: BTreeMap<String, usize>,
    /// Most frequent tags, highest count first (at most ten).
    pub top_tags: Vec<(String, usize)>,
    pub link_count: usize,
    pub insight_count: usize,
    pub average_confidence: f32,
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteSemanticStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite implementation of [`SemanticStore`].
#[derive(Clone)]
pub struct SqliteSemanticStore {
    db: Database,
}

impl SqliteSemanticStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Run a unit query whose first two parameters are `user_id` and `limit`
    /// followed by `extra` bound positionally from `?3`.
    async fn query_units(
        &self,
        where_clause: String,
        order_by: &'static str,
        user_id: UserId,
        limit: usize,
        extra: Vec<Value>,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError> {
        self.db
            .call(move |conn| {
                let sql = format!(
                    "SELECT {UNIT_COLUMNS} FROM memory_units
                     WHERE user_id = ?1 AND is_active = 1 AND ({where_clause})
                     ORDER BY {order_by} LIMIT ?2"
                );
                let mut values = vec![Value::Integer(user_id), Value::Integer(limit as i64)];
                values.extend(extra);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(values.iter()), row_to_unit)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }
}

fn row_to_unit(row: &rusqlite::Row<'_>) -> rusqlite::Result<SemanticMemoryUnit> {
    Ok(SemanticMemoryUnit {
        id: col_uuid(row, 0)?,
        user_id: row.get(1)?,
        memory_type: col_enum(row, 2, MemoryType::parse)?,
        content: row.get(3)?,
        tags: col_json(row, 4)?,
        emotional_context: row.get(5)?,
        temporal_context: row.get(6)?,
        related_topics: col_json(row, 7)?,
        confidence: row.get::<_, f64>(8)? as f32,
        access_count: row.get(9)?,
        last_accessed_at: col_opt_ts(row, 10)?,
        created_at: col_ts(row, 11)?,
        source_session_id: row.get(12)?,
        is_active: row.get(13)?,
    })
}

fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryLink> {
    Ok(MemoryLink {
        id: col_uuid(row, 0)?,
        user_id: row.get(1)?,
        from_id: col_uuid(row, 2)?,
        to_id: col_uuid(row, 3)?,
        link_type: col_enum(row, 4, LinkType::parse)?,
        strength: row.get::<_, f64>(5)? as f32,
        automatic: row.get(6)?,
        created_at: col_ts(row, 7)?,
    })
}

fn row_to_insight(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryInsight> {
    Ok(MemoryInsight {
        id: col_uuid(row, 0)?,
        user_id: row.get(1)?,
        insight_type: col_enum(row, 2, InsightType::parse)?,
        content: row.get(3)?,
        supporting_memory_ids: col_json(row, 4)?,
        confidence: row.get::<_, f64>(5)? as f32,
        therapeutic_relevance: col_enum(row, 6, TherapeuticRelevance::parse)?,
        action_suggestions: col_json(row, 7)?,
        created_at: col_ts(row, 8)?,
    })
}

/// `(?n, ?n+1, …)` placeholder list for `count` values starting at `first`.
fn placeholders(first: usize, count: usize) -> String {
    let list: Vec<String> = (first..first + count).map(|i| format!("?{i}")).collect();
    format!("({})", list.join(", "))
}

/// `fold(c1) LIKE ?n ESCAPE '\' OR …` for each needle, joined with `OR`,
/// numbering needles from `?3`.  Bind needles built by [`contains_pattern`].
fn any_like(columns: &[&str], needles: usize) -> String {
    (0..needles)
        .map(|i| {
            let p = i + 3;
            let per_col: Vec<String> =
                columns.iter().map(|c| format!("fold({c}) LIKE ?{p} ESCAPE '\\'")).collect();
            format!("({})", per_col.join(" OR "))
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[async_trait]
impl SemanticStore for SqliteSemanticStore {
    async fn insert_unit(&self, unit: &SemanticMemoryUnit) -> Result<(), StorageError> {
        let unit = unit.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO memory_units ({UNIT_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                    ),
                    params![
                        unit.id.to_string(),
                        unit.user_id,
                        unit.memory_type.as_str(),
                        unit.content,
                        to_json(&unit.tags)?,
                        unit.emotional_context,
                        unit.temporal_context,
                        to_json(&unit.related_topics)?,
                        unit.confidence as f64,
                        unit.access_count,
                        unit.last_accessed_at.as_ref().map(ts),
                        ts(&unit.created_at),
                        unit.source_session_id,
                        unit.is_active
                    ],
                )
                .map_err(|e| StorageError::classify(e, "memory unit id"))?;
                Ok(())
            })
            .await
    }

    async fn recent_units(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError> {
        self.query_units("1 = 1".into(), "created_at DESC", user_id, limit, Vec::new())
            .await
    }

    async fn units_by_type(
        &self,
        user_id: UserId,
        types: &[MemoryType],
        limit: usize,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let clause = format!("memory_type IN {}", placeholders(3, types.len()));
        let extra = types.iter().map(|t| Value::Text(t.as_str().to_string())).collect();
        self.query_units(clause, "created_at DESC", user_id, limit, extra).await
    }

    async fn search_units(
        &self,
        user_id: UserId,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let clause = any_like(&["content", "tags", "related_topics"], keywords.len());
        let extra = keywords.iter().map(|k| Value::Text(contains_pattern(k))).collect();
        self.query_units(clause, "created_at DESC", user_id, limit, extra).await
    }

    async fn units_by_topics(
        &self,
        user_id: UserId,
        topics: &[String],
        limit: usize,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError> {
        if topics.is_empty() {
            return Ok(Vec::new());
        }
        let clause = any_like(&["tags"], topics.len());
        let extra = topics.iter().map(|t| Value::Text(contains_pattern(t))).collect();
        self.query_units(clause, "created_at DESC", user_id, limit, extra).await
    }

    async fn units_by_emotion(
        &self,
        user_id: UserId,
        emotion: &str,
        limit: usize,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError> {
        let clause = "fold(coalesce(emotional_context, '')) LIKE ?3 ESCAPE '\\'".to_string();
        let extra = vec![Value::Text(contains_pattern(emotion))];
        self.query_units(clause, "created_at DESC", user_id, limit, extra).await
    }

    async fn most_accessed(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError> {
        self.query_units(
            "1 = 1".into(),
            "access_count DESC, created_at DESC",
            user_id,
            limit,
            Vec::new(),
        )
        .await
    }

    async fn record_access(
        &self,
        user_id: UserId,
        ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.db
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "UPDATE memory_units
                         SET access_count = access_count + 1, last_accessed_at = ?1
                         WHERE id = ?2 AND user_id = ?3",
                    )?;
                    let at = ts(&at);
                    for id in &ids {
                        stmt.execute(params![at, id, user_id])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn deactivate(&self, user_id: UserId, id: Uuid) -> Result<bool, StorageError> {
        self.db
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE memory_units SET is_active = 0
                     WHERE id = ?1 AND user_id = ?2 AND is_active = 1",
                    params![id.to_string(), user_id],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    async fn find_by_content(
        &self,
        user_id: UserId,
        content: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<Option<SemanticMemoryUnit>, StorageError> {
        let content = content.trim().to_lowercase();
        let memory_type = memory_type.map(|t| t.as_str().to_string());
        self.db
            .call(move |conn| {
                let unit = conn
                    .query_row(
                        &format!(
                            "SELECT {UNIT_COLUMNS} FROM memory_units
                             WHERE user_id = ?1 AND is_active = 1 AND fold(trim(content)) = ?2
                               AND (?3 IS NULL OR memory_type = ?3)
                             ORDER BY created_at DESC LIMIT 1"
                        ),
                        params![user_id, content, memory_type],
                        row_to_unit,
                    )
                    .optional()?;
                Ok(unit)
            })
            .await
    }

    async fn insert_link(&self, link: &MemoryLink) -> Result<bool, StorageError> {
        let link = link.clone();
        self.db
            .call(move |conn| {
                let inserted = conn.execute(
                    &format!(
                        "INSERT OR IGNORE INTO memory_links ({LINK_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    params![
                        link.id.to_string(),
                        link.user_id,
                        link.from_id.to_string(),
                        link.to_id.to_string(),
                        link.link_type.as_str(),
                        link.strength as f64,
                        link.automatic,
                        ts(&link.created_at)
                    ],
                )?;
                Ok(inserted > 0)
            })
            .await
    }

    async fn links_for(&self, unit_id: Uuid) -> Result<Vec<MemoryLink>, StorageError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {LINK_COLUMNS} FROM memory_links
                     WHERE from_id = ?1 OR to_id = ?1 ORDER BY strength DESC"
                ))?;
                let rows = stmt.query_map(params![unit_id.to_string()], row_to_link)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    async fn strongest_links(&self, user_id: UserId, limit: usize) -> Result<Vec<MemoryLink>, StorageError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {LINK_COLUMNS} FROM memory_links
                     WHERE user_id = ?1 ORDER BY strength DESC, created_at DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![user_id, limit as i64], row_to_link)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    async fn units_by_ids(
        &self,
        user_id: UserId,
        ids: &[Uuid],
    ) -> Result<Vec<SemanticMemoryUnit>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Value> = ids.iter().map(|id| Value::Text(id.to_string())).collect();
        self.db
            .call(move |conn| {
                let sql = format!(
                    "SELECT {UNIT_COLUMNS} FROM memory_units WHERE user_id = ?1 AND id IN {}",
                    placeholders(2, ids.len())
                );
                let mut values = vec![Value::Integer(user_id)];
                values.extend(ids);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(values.iter()), row_to_unit)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    async fn insert_insight(&self, insight: &MemoryInsight) -> Result<(), StorageError> {
        let insight = insight.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO memory_insights ({INSIGHT_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                    ),
                    params![
                        insight.id.to_string(),
                        insight.user_id,
                        insight.insight_type.as_str(),
                        insight.content,
                        to_json(&insight.supporting_memory_ids)?,
                        insight.confidence as f64,
                        insight.therapeutic_relevance.as_str(),
                        to_json(&insight.action_suggestions)?,
                        ts(&insight.created_at)
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn insights(&self, user_id: UserId, limit: usize) -> Result<Vec<MemoryInsight>, StorageError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {INSIGHT_COLUMNS} FROM memory_insights
                     WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![user_id, limit as i64], row_to_insight)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    async fn stats(&self, user_id: UserId) -> Result<MemoryStats, StorageError> {
        self.db
            .call(move |conn| {
                let mut stats = MemoryStats::default();

                let mut stmt = conn.prepare(
                    "SELECT memory_type, COUNT(*), AVG(confidence) FROM memory_units
                     WHERE user_id = ?1 AND is_active = 1 GROUP BY memory_type",
                )?;
                let mut weighted = 0.0_f64;
                let rows = stmt.query_map(params![user_id], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, f64>(2)?))
                })?;
                for row in rows {
                    let (kind, count, avg) = row?;
                    stats.total_units += count as usize;
                    weighted += avg * count as f64;
                    stats.by_type.insert(kind, count as usize);
                }
                if stats.total_units > 0 {
                    stats.average_confidence = (weighted / stats.total_units as f64) as f32;
                }

                let mut tag_counts: HashMap<String, usize> = HashMap::new();
                let mut stmt = conn.prepare(
                    "SELECT tags FROM memory_units WHERE user_id = ?1 AND is_active = 1",
                )?;
                let rows = stmt.query_map(params![user_id], |r| col_json::<Vec<String>>(r, 0))?;
                for tags in rows {
                    for tag in tags? {
                        *tag_counts.entry(tag.to_lowercase()).or_default() += 1;
                    }
                }
                let mut top: Vec<(String, usize)> = tag_counts.into_iter().collect();
                top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                top.truncate(10);
                stats.top_tags = top;

                stats.link_count = conn.query_row(
                    "SELECT COUNT(*) FROM memory_links WHERE user_id = ?1",
                    params![user_id],
                    |r| r.get::<_, i64>(0),
                )? as usize;
                stats.insight_count = conn.query_row(
                    "SELECT COUNT(*) FROM memory_insights WHERE user_id = ?1",
                    params![user_id],
                    |r| r.get::<_, i64>(0),
                )? as usize;

                Ok(stats)
            })
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> SqliteSemanticStore {
        SqliteSemanticStore::new(Database::open_in_memory().unwrap())
    }

    fn unit(user: UserId, kind: MemoryType, content: &str, tags: &[&str]) -> SemanticMemoryUnit {
        let mut u = SemanticMemoryUnit::new(user, kind, content);
        u.tags = tags.iter().map(|t| t.to_string()).collect();
        u
    }

    // ── units ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_read_back_unit() {
        let store = make_store();
        let mut u = unit(1, MemoryType::Conversation, "Talked about work deadlines", &["work"]);
        u.emotional_context = Some("anxious".into());
        u.related_topics = vec!["career".into()];
        store.insert_unit(&u).await.unwrap();

        let got = store.recent_units(1, 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, u.id);
        assert_eq!(got[0].tags, vec!["work"]);
        assert_eq!(got[0].related_topics, vec!["career"]);
        assert_eq!(got[0].emotional_context.as_deref(), Some("anxious"));
    }

    #[tokio::test]
    async fn searches_are_scoped_to_user() {
        let store = make_store();
        store.insert_unit(&unit(1, MemoryType::Fact, "Works as a nurse", &["career"])).await.unwrap();
        store.insert_unit(&unit(2, MemoryType::Fact, "Works as a pilot", &["career"])).await.unwrap();

        let hits = store.search_units(1, &["works".into()], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].user_id, 1);
        assert_eq!(store.units_by_topics(2, &["career".into()], 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_matches_tags_and_topics_case_insensitively() {
        let store = make_store();
        let mut u = unit(1, MemoryType::Conversation, "Long day", &["Stress"]);
        u.related_topics = vec!["Overtime".into()];
        store.insert_unit(&u).await.unwrap();

        assert_eq!(store.search_units(1, &["stress".into()], 10).await.unwrap().len(), 1);
        assert_eq!(store.search_units(1, &["overtime".into()], 10).await.unwrap().len(), 1);
        assert!(store.search_units(1, &["holiday".into()], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn units_by_type_filters_kinds() {
        let store = make_store();
        store.insert_unit(&unit(1, MemoryType::Insight, "I realize I avoid conflict", &[])).await.unwrap();
        store.insert_unit(&unit(1, MemoryType::Fact, "Has a sister", &[])).await.unwrap();
        store.insert_unit(&unit(1, MemoryType::Breakthrough, "Spoke up at work", &[])).await.unwrap();

        let hits = store
            .units_by_type(1, &[MemoryType::Insight, MemoryType::Breakthrough], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|u| u.memory_type != MemoryType::Fact));
    }

    #[tokio::test]
    async fn emotion_lookup_uses_substring() {
        let store = make_store();
        let mut u = unit(1, MemoryType::Conversation, "Exam week", &[]);
        u.emotional_context = Some("Anxious but hopeful".into());
        store.insert_unit(&u).await.unwrap();

        assert_eq!(store.units_by_emotion(1, "anxious", 5).await.unwrap().len(), 1);
        assert!(store.units_by_emotion(1, "angry", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_access_bumps_count_and_timestamp() {
        let store = make_store();
        let u = unit(1, MemoryType::Fact, "Likes hiking", &[]);
        store.insert_unit(&u).await.unwrap();

        let now = Utc::now();
        store.record_access(1, &[u.id], now).await.unwrap();
        store.record_access(1, &[u.id], now).await.unwrap();

        let got = store.most_accessed(1, 1).await.unwrap();
        assert_eq!(got[0].access_count, 2);
        assert!(got[0].last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn record_access_ignores_other_users_units() {
        let store = make_store();
        let u = unit(1, MemoryType::Fact, "Likes hiking", &[]);
        store.insert_unit(&u).await.unwrap();

        store.record_access(2, &[u.id], Utc::now()).await.unwrap();

        let got = store.most_accessed(1, 1).await.unwrap();
        assert_eq!(got[0].access_count, 0);
        assert!(got[0].last_accessed_at.is_none());
    }

    #[tokio::test]
    async fn deactivated_units_disappear_from_reads() {
        let store = make_store();
        let u = unit(1, MemoryType::Fact, "Lives in Lisbon", &["home"]);
        store.insert_unit(&u).await.unwrap();

        assert!(store.deactivate(1, u.id).await.unwrap());
        assert!(!store.deactivate(1, u.id).await.unwrap());
        assert!(store.recent_units(1, 10).await.unwrap().is_empty());
        assert!(store.find_by_content(1, "Lives in Lisbon", None).await.unwrap().is_none());
        // History is kept.
        assert_eq!(store.units_by_ids(1, &[u.id]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_by_content_ignores_case() {
        let store = make_store();
        store.insert_unit(&unit(1, MemoryType::Fact, "Has two cats", &[])).await.unwrap();
        assert!(store.find_by_content(1, "has TWO cats", None).await.unwrap().is_some());
        assert!(store.find_by_content(2, "has two cats", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_content_folds_non_ascii() {
        let store = make_store();
        store.insert_unit(&unit(1, MemoryType::Fact, "Vive en ÁVILA con Óscar", &[])).await.unwrap();
        assert!(store.find_by_content(1, "vive en ávila con óscar", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn find_by_content_can_require_a_type() {
        let store = make_store();
        store.insert_unit(&unit(1, MemoryType::Insight, "Sleeps badly before exams", &[])).await.unwrap();
        assert!(store.find_by_content(1, "sleeps badly before exams", None).await.unwrap().is_some());
        assert!(
            store
                .find_by_content(1, "sleeps badly before exams", Some(MemoryType::Fact))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn search_folds_non_ascii_case() {
        let store = make_store();
        store.insert_unit(&unit(1, MemoryType::Conversation, "Miedo a ÉXITO", &["Ansiedad"])).await.unwrap();
        let hits = store.search_units(1, &["éxito".to_string()], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        let hits = store.units_by_topics(1, &["ANSIEDAD".to_string()], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn like_wildcards_in_keywords_match_literally() {
        let store = make_store();
        store.insert_unit(&unit(1, MemoryType::Conversation, "Saving 10% of salary", &[])).await.unwrap();
        store.insert_unit(&unit(1, MemoryType::Conversation, "snake_case naming", &[])).await.unwrap();
        store.insert_unit(&unit(1, MemoryType::Conversation, "space cadet", &[])).await.unwrap();

        let hits = store.search_units(1, &["%".to_string()], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Saving 10% of salary");

        let hits = store.search_units(1, &["e_c".to_string()], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "snake_case naming");
    }

    // ── links ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn duplicate_links_are_not_inserted() {
        let store = make_store();
        let a = unit(1, MemoryType::Conversation, "a", &["work"]);
        let b = unit(1, MemoryType::Conversation, "b", &["work"]);
        store.insert_unit(&a).await.unwrap();
        store.insert_unit(&b).await.unwrap();

        let link = MemoryLink::automatic(1, a.id, b.id, 0.4).unwrap();
        assert!(store.insert_link(&link).await.unwrap());
        let again = MemoryLink::automatic(1, a.id, b.id, 0.4).unwrap();
        assert!(!store.insert_link(&again).await.unwrap());

        assert_eq!(store.links_for(b.id).await.unwrap().len(), 1);
        assert_eq!(store.strongest_links(1, 10).await.unwrap().len(), 1);
    }

    // ── insights & stats ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn insights_round_trip() {
        let store = make_store();
        let support = Uuid::new_v4();
        let insight = MemoryInsight {
            id: Uuid::new_v4(),
            user_id: 1,
            insight_type: InsightType::Pattern,
            content: "Recurring theme: stress".into(),
            supporting_memory_ids: vec![support],
            confidence: 0.75,
            therapeutic_relevance: TherapeuticRelevance::High,
            action_suggestions: vec!["Try relaxation techniques".into()],
            created_at: Utc::now(),
        };
        store.insert_insight(&insight).await.unwrap();

        let got = store.insights(1, 5).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].supporting_memory_ids, vec![support]);
        assert_eq!(got[0].therapeutic_relevance, TherapeuticRelevance::High);
    }

    #[tokio::test]
    async fn stats_count_types_and_tags() {
        let store = make_store();
        store.insert_unit(&unit(1, MemoryType::Fact, "f1", &["work", "family"])).await.unwrap();
        store.insert_unit(&unit(1, MemoryType::Fact, "f2", &["work"])).await.unwrap();
        store.insert_unit(&unit(1, MemoryType::Pattern, "p1", &["Work"])).await.unwrap();

        let stats = store.stats(1).await.unwrap();
        assert_eq!(stats.total_units, 3);
        assert_eq!(stats.by_type.get("fact"), Some(&2));
        assert_eq!(stats.top_tags[0], ("work".to_string(), 3));
        assert!((stats.average_confidence - 0.8).abs() < 1e-4);
    }
}
