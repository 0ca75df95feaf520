use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store kernel health probe (spec §4.B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub connected: bool,
    pub schema_version: i64,
    pub agent_count: i64,
    pub task_count: i64,
    pub learning_count: i64,
    pub context_count: i64,
    pub last_context_save: Option<DateTime<Utc>>,
    pub db_size_bytes: i64,
}
