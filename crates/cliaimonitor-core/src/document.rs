use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Plan,
    Report,
    Review,
    TestReport,
    AgentWork,
    Config,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Plan => "plan",
            DocumentType::Report => "report",
            DocumentType::Review => "review",
            DocumentType::TestReport => "test_report",
            DocumentType::AgentWork => "agent_work",
            DocumentType::Config => "config",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "plan" => DocumentType::Plan,
            "report" => DocumentType::Report,
            "review" => DocumentType::Review,
            "test_report" => DocumentType::TestReport,
            "agent_work" => DocumentType::AgentWork,
            "config" => DocumentType::Config,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Active,
    Archived,
    Superseded,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Active => "active",
            DocumentStatus::Archived => "archived",
            DocumentStatus::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => DocumentStatus::Draft,
            "active" => DocumentStatus::Active,
            "archived" => DocumentStatus::Archived,
            "superseded" => DocumentStatus::Superseded,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub doc_type: DocumentType,
    pub title: String,
    pub content: String,
    pub format: String,
    pub author: String,
    pub project: Option<String>,
    pub task_id: Option<String>,
    pub assignment_id: Option<i64>,
    pub tags: Vec<String>,
    pub status: DocumentStatus,
    pub version: i64,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a new document (spec §3). `version`
/// always starts at 1 and is not settable here.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub doc_type: DocumentType,
    pub title: String,
    pub content: String,
    pub format: String,
    pub author: String,
    pub project: Option<String>,
    pub task_id: Option<String>,
    pub assignment_id: Option<i64>,
    pub tags: Vec<String>,
    pub parent_id: Option<i64>,
}

/// Fields accepted by `UpdateDocument` (spec §3). Any subset may be
/// set; `version` is not one of them — it always increments by one per
/// call regardless of which fields actually changed (spec §8:
/// "Documents.version strictly increases on each UpdateDocument call").
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub status: Option<DocumentStatus>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl FindingSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingSeverity::Critical => "critical",
            FindingSeverity::High => "high",
            FindingSeverity::Medium => "medium",
            FindingSeverity::Low => "low",
            FindingSeverity::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "critical" => FindingSeverity::Critical,
            "high" => FindingSeverity::High,
            "medium" => FindingSeverity::Medium,
            "low" => FindingSeverity::Low,
            "info" => FindingSeverity::Info,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Open,
    Resolved,
    Ignored,
    FalsePositive,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Open => "open",
            FindingStatus::Resolved => "resolved",
            FindingStatus::Ignored => "ignored",
            FindingStatus::FalsePositive => "false_positive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "open" => FindingStatus::Open,
            "resolved" => FindingStatus::Resolved,
            "ignored" => FindingStatus::Ignored,
            "false_positive" => FindingStatus::FalsePositive,
            _ => return None,
        })
    }

    /// Unicode status glyph used by the warm-layer markdown renderer
    /// (spec §4.H).
    pub fn icon(&self) -> &'static str {
        match self {
            FindingStatus::Open => "\u{1F534}",           // red circle
            FindingStatus::Resolved => "\u{2705}",        // check mark
            FindingStatus::Ignored => "\u{26AA}",         // white circle
            FindingStatus::FalsePositive => "\u{26AB}",   // black circle
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: i64,
    pub environment_id: i64,
    pub scan_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub environment_id: i64,
    pub scan_id: Option<i64>,
    pub category: String,
    pub severity: FindingSeverity,
    pub status: FindingStatus,
    pub title: String,
    pub description: Option<String>,
    pub recommendation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingHistoryEntry {
    pub id: i64,
    pub finding_id: i64,
    pub action: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}
