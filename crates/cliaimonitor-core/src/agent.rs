use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states of a supervised agent (spec §3).
///
/// Once an agent reaches `Stopped` no further transition is legal except
/// to `Dead`; the agent-lifecycle store enforces this, it is not encoded
/// here since the type itself has no access to history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Idle,
    Working,
    Paused,
    Stopped,
    Dead,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Starting => "starting",
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Paused => "paused",
            AgentStatus::Stopped => "stopped",
            AgentStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "starting" => AgentStatus::Starting,
            "idle" => AgentStatus::Idle,
            "working" => AgentStatus::Working,
            "paused" => AgentStatus::Paused,
            "stopped" => AgentStatus::Stopped,
            "dead" => AgentStatus::Dead,
            _ => return None,
        })
    }

    /// Agents in these states are no longer eligible for stale detection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Stopped | AgentStatus::Dead)
    }
}

/// A supervised agent process (spec §3, owner: agent-lifecycle store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub config_name: String,
    pub role: String,
    pub project: Option<String>,
    pub status: AgentStatus,
    pub pid: Option<i64>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub current_task: Option<String>,
    pub pane_binding: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
    pub shutdown_requested: bool,
    pub shutdown_reason: Option<String>,
    pub spawned_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
}

/// Fields accepted by the upsert-by-agent-id register call (spec §4.C).
#[derive(Debug, Clone, Default)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub config_name: String,
    pub role: String,
    pub project: Option<String>,
    pub pid: Option<i64>,
    pub status: Option<AgentStatus>,
    pub current_task: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
    pub pane_binding: Option<String>,
}

/// One append-only entry in an agent's pane-history stream (spec §3).
///
/// Ordered by `(timestamp, id)`; never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneHistoryEntry {
    pub id: i64,
    pub agent_id: String,
    pub action: String,
    pub status_before: Option<AgentStatus>,
    pub status_after: Option<AgentStatus>,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            AgentStatus::Starting,
            AgentStatus::Idle,
            AgentStatus::Working,
            AgentStatus::Paused,
            AgentStatus::Stopped,
            AgentStatus::Dead,
        ] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn only_stopped_and_dead_are_terminal() {
        assert!(AgentStatus::Stopped.is_terminal());
        assert!(AgentStatus::Dead.is_terminal());
        assert!(!AgentStatus::Working.is_terminal());
        assert!(!AgentStatus::Starting.is_terminal());
    }
}
