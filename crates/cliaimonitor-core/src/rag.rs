use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Knowledge {
    pub id: String,
    pub agent_type: String,
    pub category: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub use_count: i64,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A `Knowledge` hit annotated with its TF-IDF score (spec §4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredKnowledge {
    pub knowledge: Knowledge,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeEventType {
    Action,
    Error,
    Decision,
    Outcome,
}

impl EpisodeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeEventType::Action => "action",
            EpisodeEventType::Error => "error",
            EpisodeEventType::Decision => "decision",
            EpisodeEventType::Outcome => "outcome",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "action" => EpisodeEventType::Action,
            "error" => EpisodeEventType::Error,
            "decision" => EpisodeEventType::Decision,
            "outcome" => EpisodeEventType::Outcome,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub session_id: String,
    pub agent_id: String,
    pub agent_type: String,
    pub event_type: EpisodeEventType,
    pub title: String,
    pub content: String,
    pub project: Option<String>,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagStats {
    pub total_knowledge: i64,
    pub total_episodes: i64,
    pub knowledge_by_category: Vec<(String, i64)>,
    pub total_terms: i64,
    pub top_used: Vec<(String, i64)>,
}
