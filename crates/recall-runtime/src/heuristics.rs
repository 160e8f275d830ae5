//! Keyword heuristics as data.
//!
//! Emotional-state buckets, topic rules, stop words, emotion synonyms,
//! relevance tiers, action suggestions and the progress vocabulary all live
//! in one [`KeywordTables`] value.  It deserialises from TOML/JSON (every
//! field optional, falling back to the built-in table) so deployments can
//! extend the lists without touching code.
//!
//! Every match is a case-insensitive substring test against lowercased
//! text; ordered rule lists are evaluated top to bottom.
//!
//! # Example
//!
//! ```rust
//! use recall_runtime::heuristics::KeywordTables;
//!
//! let tables = KeywordTables::default();
//! assert_eq!(tables.classify_emotion("I'm so worried about Monday"), "anxious");
//! assert!(tables.related_emotions("worried").contains(&"anxious".to_string()));
//! ```

use std::collections::{BTreeMap, HashSet};

use recall_types::{TherapeuticRelevance, Turn};
use serde::{Deserialize, Serialize};

/// Label returned when no emotion bucket matches.
pub const NEUTRAL: &str = "neutral";

/// A label that applies when any of its keywords occurs in the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub label: String,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(label: &str, keywords: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// `lowered` must already be lowercase.
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

/// Data-driven heuristic tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordTables {
    /// Ordered; the first matching bucket wins.
    pub emotion_buckets: Vec<KeywordRule>,
    pub topic_rules: Vec<KeywordRule>,
    pub max_topics: usize,
    /// Long-term pattern labels triggered by semantic unit content.
    pub pattern_triggers: Vec<KeywordRule>,
    pub stop_words: Vec<String>,
    pub min_keyword_len: usize,
    pub max_keywords: usize,
    /// Emotion → related emotions.  Looked up in both directions.
    pub emotion_synonyms: BTreeMap<String, Vec<String>>,
    pub high_relevance: Vec<String>,
    pub medium_relevance: Vec<String>,
    /// Tag → suggestions for recurring-pattern insights.
    pub action_suggestions: BTreeMap<String, Vec<String>>,
    pub progress_vocabulary: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordTables {
    fn default() -> Self {
        let mut emotion_synonyms = BTreeMap::new();
        for (emotion, related) in [
            ("happy", ["joy", "excited", "content", "pleased"]),
            ("sad", ["depressed", "melancholy", "down", "blue"]),
            ("angry", ["frustrated", "irritated", "mad", "furious"]),
            ("anxious", ["worried", "nervous", "stressed", "tense"]),
            ("calm", ["peaceful", "relaxed", "serene", "tranquil"]),
            ("excited", ["enthusiastic", "eager", "thrilled", "energetic"]),
        ] {
            emotion_synonyms.insert(emotion.to_string(), strings(&related));
        }

        let mut action_suggestions = BTreeMap::new();
        action_suggestions.insert(
            "anxiety".to_string(),
            strings(&[
                "Consider practicing breathing exercises when feeling anxious",
                "Explore mindfulness techniques to manage anxiety",
                "Track anxiety triggers in your daily life",
            ]),
        );
        action_suggestions.insert(
            "stress".to_string(),
            strings(&[
                "Identify stress management techniques that work for you",
                "Consider time management strategies",
                "Explore relaxation techniques",
            ]),
        );
        action_suggestions.insert(
            "growth".to_string(),
            strings(&[
                "Reflect on your growth journey regularly",
                "Set new goals building on your progress",
                "Celebrate your achievements",
            ]),
        );

        Self {
            emotion_buckets: vec![
                KeywordRule::new("sad", &["sad", "depressed", "down"]),
                KeywordRule::new("anxious", &["anxious", "worried", "stress"]),
                KeywordRule::new("positive", &["happy", "good", "excited"]),
                KeywordRule::new("angry", &["angry", "frustrated", "mad"]),
            ],
            topic_rules: vec![
                KeywordRule::new("anxiety", &["anxiety", "anxious"]),
                KeywordRule::new("depression", &["depression", "depressed"]),
                KeywordRule::new("stress", &["stress", "stressed"]),
                KeywordRule::new("relationships", &["relationship", "partner"]),
                KeywordRule::new("work", &["work", "job"]),
                KeywordRule::new("family", &["family"]),
                KeywordRule::new("sleep", &["sleep", "tired"]),
            ],
            max_topics: 5,
            pattern_triggers: vec![
                KeywordRule::new("stress_management", &["stress"]),
                KeywordRule::new("relationship_focus", &["relationship"]),
                KeywordRule::new("work_life_balance", &["work"]),
            ],
            stop_words: strings(&[
                "that", "with", "have", "this", "will", "your", "from", "they", "know", "want",
                "been", "good", "much", "some", "time", "very", "when", "come", "here", "just",
                "like", "over", "also", "back", "after", "first", "well", "work", "feel", "think",
                "said", "more", "need", "going", "right",
            ]),
            min_keyword_len: 4,
            max_keywords: 10,
            emotion_synonyms,
            high_relevance: strings(&["anxiety", "depression", "stress", "growth", "breakthrough", "insight"]),
            medium_relevance: strings(&["work", "relationship", "family", "goals"]),
            action_suggestions,
            progress_vocabulary: strings(&[
                "breakthrough", "realize", "understand", "growth", "improvement", "progress",
                "achievement", "success", "overcome", "better",
            ]),
        }
    }
}

impl KeywordTables {
    /// Emotion bucket of `text`, or [`NEUTRAL`].
    pub fn classify_emotion(&self, text: &str) -> &str {
        let lowered = text.to_lowercase();
        self.emotion_buckets
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.label.as_str())
            .unwrap_or(NEUTRAL)
    }

    /// Emotion bucket of the last three turns taken together.
    pub fn emotional_state(&self, turns: &[Turn]) -> String {
        let start = turns.len().saturating_sub(3);
        let text = join_contents(&turns[start..]);
        self.classify_emotion(&text).to_string()
    }

    /// Emotion of each turn's three-turn window, last five joined by `→`.
    pub fn emotional_journey(&self, turns: &[Turn]) -> String {
        let emotions: Vec<String> = (0..turns.len())
            .map(|i| {
                let window = &turns[i.saturating_sub(2)..=i];
                self.classify_emotion(&join_contents(window)).to_string()
            })
            .collect();
        let start = emotions.len().saturating_sub(5);
        emotions[start..].join(" → ")
    }

    /// Topic labels found anywhere in `texts`, in rule order, capped at
    /// `max_topics`.
    pub fn detect_topics<'a>(&self, texts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let lowered = texts.into_iter().collect::<Vec<_>>().join(" ").to_lowercase();
        self.topic_rules
            .iter()
            .filter(|rule| rule.matches(&lowered))
            .map(|rule| rule.label.clone())
            .take(self.max_topics)
            .collect()
    }

    /// Long-term pattern labels triggered by any of `contents`.
    pub fn patterns_for<'a>(&self, contents: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let lowered: Vec<String> = contents.into_iter().map(str::to_lowercase).collect();
        self.pattern_triggers
            .iter()
            .filter(|rule| lowered.iter().any(|c| rule.matches(c)))
            .map(|rule| rule.label.clone())
            .collect()
    }

    /// Search keywords of free text: non-word characters stripped,
    /// lowercased, shorter than `min_keyword_len` or stop words dropped,
    /// deduplicated in first-seen order, capped at `max_keywords`.
    pub fn extract_keywords(&self, text: &str) -> Vec<String> {
        let cleaned: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' || c.is_whitespace() { c } else { ' ' })
            .collect();
        let stop: HashSet<&str> = self.stop_words.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        cleaned
            .split_whitespace()
            .filter(|w| w.chars().count() >= self.min_keyword_len && !stop.contains(w))
            .filter(|w| seen.insert(w.to_string()))
            .take(self.max_keywords)
            .map(str::to_string)
            .collect()
    }

    /// Emotions related to `emotion`, looked up in both directions so that
    /// `"worried"` yields `"anxious"` as well as `"anxious"` yielding
    /// `"worried"`.  Never contains `emotion` itself.
    pub fn related_emotions(&self, emotion: &str) -> Vec<String> {
        let emotion = emotion.trim().to_lowercase();
        let mut out: Vec<String> = Vec::new();
        let mut push = |e: &str| {
            if e != emotion && !out.iter().any(|o| o == e) {
                out.push(e.to_string());
            }
        };
        if let Some(related) = self.emotion_synonyms.get(&emotion) {
            related.iter().for_each(|r| push(r.as_str()));
        }
        for (key, related) in &self.emotion_synonyms {
            if related.iter().any(|r| *r == emotion) {
                push(key.as_str());
                related.iter().for_each(|r| push(r.as_str()));
            }
        }
        out
    }

    /// Relevance tier of a tag.
    pub fn relevance(&self, tag: &str) -> TherapeuticRelevance {
        let tag = tag.to_lowercase();
        if self.high_relevance.iter().any(|t| *t == tag) {
            TherapeuticRelevance::High
        } else if self.medium_relevance.iter().any(|t| *t == tag) {
            TherapeuticRelevance::Medium
        } else {
            TherapeuticRelevance::Low
        }
    }

    /// Suggestions attached to a recurring-tag insight.
    pub fn action_suggestions(&self, tag: &str) -> Vec<String> {
        match self.action_suggestions.get(&tag.to_lowercase()) {
            Some(list) => list.clone(),
            None => vec![
                format!("Explore this recurring theme: {tag}"),
                "Discuss this pattern with your therapist".to_string(),
            ],
        }
    }

    pub fn is_progress_marker(&self, content: &str) -> bool {
        let lowered = content.to_lowercase();
        self.progress_vocabulary.iter().any(|w| lowered.contains(w.as_str()))
    }
}

/// Confidence of a recurring-pattern insight observed `count` times.
pub fn pattern_confidence(count: usize) -> f32 {
    match count {
        c if c >= 10 => 0.95,
        c if c >= 5 => 0.85,
        c if c >= 3 => 0.75,
        _ => 0.65,
    }
}

fn join_contents(turns: &[Turn]) -> String {
    turns.iter().map(|t| t.content.as_str()).collect::<Vec<_>>().join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(texts: &[&str]) -> Vec<Turn> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Turn::new(1, *t, i % 2 == 1))
            .collect()
    }

    // ── emotion ──────────────────────────────────────────────────────────────

    #[test]
    fn first_matching_bucket_wins() {
        let t = KeywordTables::default();
        // Both "sad" and "anxious" keywords present: sad is listed first.
        assert_eq!(t.classify_emotion("Feeling sad and worried"), "sad");
        assert_eq!(t.classify_emotion("So FRUSTRATED today"), "angry");
        assert_eq!(t.classify_emotion("Nothing much"), NEUTRAL);
    }

    #[test]
    fn emotional_state_only_reads_last_three_turns() {
        let t = KeywordTables::default();
        let history = turns(&["I am so sad", "ok", "fine", "noted"]);
        assert_eq!(t.emotional_state(&history), NEUTRAL);
        assert_eq!(t.emotional_state(&history[..3]), "sad");
    }

    #[test]
    fn emotional_journey_uses_sliding_window() {
        let t = KeywordTables::default();
        let history = turns(&["I'm worried", "tell me more", "ok", "now I'm happy"]);
        assert_eq!(
            t.emotional_journey(&history),
            "anxious → anxious → anxious → positive"
        );
        assert_eq!(t.emotional_journey(&[]), "");
    }

    // ── topics & patterns ────────────────────────────────────────────────────

    #[test]
    fn topics_follow_rule_order_and_cap() {
        let t = KeywordTables::default();
        let topics = t.detect_topics([
            "My job is stressful",
            "my partner and family",
            "anxious and depressed",
            "so tired",
        ]);
        assert_eq!(topics, vec!["anxiety", "depression", "stress", "relationships", "work"]);
    }

    #[test]
    fn pattern_triggers_scan_contents() {
        let t = KeywordTables::default();
        let patterns = t.patterns_for(["Work stress is high", "Nothing else"]);
        assert_eq!(patterns, vec!["stress_management", "work_life_balance"]);
    }

    // ── keywords ─────────────────────────────────────────────────────────────

    #[test]
    fn keywords_strip_punctuation_stop_words_and_duplicates() {
        let t = KeywordTables::default();
        let kws = t.extract_keywords("Deadline! Deadline, boss... and I feel that the team's morale is low");
        assert_eq!(kws, vec!["deadline", "boss", "team", "morale"]);
    }

    #[test]
    fn keywords_capped() {
        let t = KeywordTables::default();
        let text = (0..30).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(t.extract_keywords(&text).len(), 10);
    }

    // ── synonyms ─────────────────────────────────────────────────────────────

    #[test]
    fn related_emotions_work_both_ways() {
        let t = KeywordTables::default();
        let from_key = t.related_emotions("anxious");
        assert!(from_key.contains(&"worried".to_string()));

        let from_synonym = t.related_emotions("worried");
        assert!(from_synonym.contains(&"anxious".to_string()));
        assert!(!from_synonym.contains(&"worried".to_string()));
    }

    // ── insights ─────────────────────────────────────────────────────────────

    #[test]
    fn relevance_tiers() {
        let t = KeywordTables::default();
        assert_eq!(t.relevance("Anxiety"), TherapeuticRelevance::High);
        assert_eq!(t.relevance("family"), TherapeuticRelevance::Medium);
        assert_eq!(t.relevance("cooking"), TherapeuticRelevance::Low);
    }

    #[test]
    fn suggestions_fall_back_to_generic() {
        let t = KeywordTables::default();
        assert_eq!(t.action_suggestions("stress").len(), 3);
        let generic = t.action_suggestions("cooking");
        assert_eq!(generic[0], "Explore this recurring theme: cooking");
    }

    #[test]
    fn confidence_steps() {
        assert_eq!(pattern_confidence(12), 0.95);
        assert_eq!(pattern_confidence(5), 0.85);
        assert_eq!(pattern_confidence(3), 0.75);
        assert_eq!(pattern_confidence(2), 0.65);
    }

    #[test]
    fn partial_override_keeps_defaults() {
        let t: KeywordTables = serde_json::from_str(r#"{"max_topics": 2}"#).unwrap();
        assert_eq!(t.max_topics, 2);
        assert_eq!(t.stop_words, KeywordTables::default().stop_words);
    }
}
