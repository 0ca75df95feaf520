use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "low" => TaskPriority::Low,
            "medium" => TaskPriority::Medium,
            "high" => TaskPriority::High,
            "critical" => TaskPriority::Critical,
            _ => return None,
        })
    }
}

/// Task status is free-form (spec §4.D) but these values carry side
/// effects in the store (assigning sets `assigned_agent`, completing
/// sets `completed_at`).
pub mod task_status {
    pub const PENDING: &str = "pending";
    pub const ASSIGNED: &str = "assigned";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";
    pub const BLOCKED: &str = "blocked";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub repo_id: String,
    pub source_file: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: String,
    pub assigned_agent: Option<String>,
    pub parent_task: Option<String>,
    pub effort: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Upsert payload for batched task creation (spec §4.D).
#[derive(Debug, Clone)]
pub struct TaskUpsert {
    pub id: String,
    pub repo_id: String,
    pub source_file: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub parent_task: Option<String>,
    pub effort: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    InProgress,
    Rework,
    Completed,
    Failed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Rework => "rework",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => AssignmentStatus::Pending,
            "in_progress" => AssignmentStatus::InProgress,
            "rework" => AssignmentStatus::Rework,
            "completed" => AssignmentStatus::Completed,
            "failed" => AssignmentStatus::Failed,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i64,
    pub task_id: String,
    pub assigned_to: String,
    pub assigned_by: String,
    pub assignment_type: String,
    pub status: AssignmentStatus,
    pub branch_name: Option<String>,
    pub review_feedback: Option<String>,
    pub review_attempt: i64,
    pub worker_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Pending => "pending",
            WorkerStatus::InProgress => "in_progress",
            WorkerStatus::Completed => "completed",
            WorkerStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => WorkerStatus::Pending,
            "in_progress" => WorkerStatus::InProgress,
            "completed" => WorkerStatus::Completed,
            "failed" => WorkerStatus::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Completed | WorkerStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentWorker {
    pub id: i64,
    pub assignment_id: i64,
    pub agent_id: String,
    pub status: WorkerStatus,
    pub result: Option<String>,
    pub tokens_used: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
