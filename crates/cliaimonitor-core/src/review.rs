use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectSeverity {
    // Ordered least to most severe so sort_by gives an ascending tally;
    // the review engine reverses this wherever "critical-first" grouping
    // is required (spec §4.E final-report ordering).
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl DefectSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectSeverity::Critical => "critical",
            DefectSeverity::High => "high",
            DefectSeverity::Medium => "medium",
            DefectSeverity::Low => "low",
            DefectSeverity::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "critical" => DefectSeverity::Critical,
            "high" => DefectSeverity::High,
            "medium" => DefectSeverity::Medium,
            "low" => DefectSeverity::Low,
            "info" => DefectSeverity::Info,
            _ => return None,
        })
    }

    /// Fixed severity ordering used to group defects in final reports
    /// and the recon warm layer (spec §4.E, §4.H).
    pub const REPORT_ORDER: [DefectSeverity; 5] = [
        DefectSeverity::Critical,
        DefectSeverity::High,
        DefectSeverity::Medium,
        DefectSeverity::Low,
        DefectSeverity::Info,
    ];
}

/// Open-ended defect categories (spec §3: "from DefectCategory set").
/// Kept as a string newtype rather than a closed enum since the board
/// accepts any reviewer-supplied category and the spec does not enumerate
/// a fixed set.
pub type DefectCategory = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defect {
    pub id: i64,
    pub board_id: i64,
    pub reviewer_id: String,
    pub category: DefectCategory,
    pub severity: DefectSeverity,
    pub file: Option<String>,
    pub lines: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub suggested_fix: Option<String>,
    pub status: String,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerVote {
    pub board_id: i64,
    pub reviewer_id: String,
    pub approved: bool,
    pub confidence: i64,
    pub defects_found: i64,
    pub review_time_seconds: i64,
    pub tokens_used: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewBoardStatus {
    Pending,
    InProgress,
    Completed,
    Escalated,
}

impl ReviewBoardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewBoardStatus::Pending => "pending",
            ReviewBoardStatus::InProgress => "in_progress",
            ReviewBoardStatus::Completed => "completed",
            ReviewBoardStatus::Escalated => "escalated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => ReviewBoardStatus::Pending,
            "in_progress" => ReviewBoardStatus::InProgress,
            "completed" => ReviewBoardStatus::Completed,
            "escalated" => ReviewBoardStatus::Escalated,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewBoard {
    pub id: i64,
    pub assignment_id: i64,
    pub reviewer_count: i64,
    pub status: ReviewBoardStatus,
    pub complexity_score: Option<f64>,
    pub risk_level: Option<String>,
    pub final_verdict: Option<String>,
    pub aggregated_feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Final verdict of the consensus algorithm (spec §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusDecision {
    Approved,
    RejectedCritical,
    RejectedMajority,
}

impl ConsensusDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusDecision::Approved => "approved",
            ConsensusDecision::RejectedCritical => "rejected_critical",
            ConsensusDecision::RejectedMajority => "rejected_majority",
        }
    }
}

/// Result of running the deterministic consensus algorithm over one
/// board's votes and defects (spec §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub board_id: i64,
    pub votes_for: i64,
    pub votes_against: i64,
    pub critical_count: i64,
    pub high_count: i64,
    pub other_count: i64,
    pub majority_approved: bool,
    pub has_critical: bool,
    pub approved: bool,
    pub decision: ConsensusDecision,
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityRole {
    Author,
    Reviewer,
}

impl QualityRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityRole::Author => "author",
            QualityRole::Reviewer => "reviewer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "author" => QualityRole::Author,
            "reviewer" => QualityRole::Reviewer,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentQualityScore {
    pub agent_id: String,
    pub role: Option<QualityRole>,
    pub total_submissions: i64,
    pub total_approvals: i64,
    pub approved_first_try: i64,
    pub total_review_cycles: i64,
    pub defects_received: i64,
    pub critical_defects_received: i64,
    pub total_reviews: i64,
    pub defects_found: i64,
    pub critical_defects_found: i64,
    pub true_positive_defects: i64,
    pub false_positive_defects: i64,
    pub tokens_used: i64,
    pub value_delivered: f64,
    pub total_cost: f64,
    pub approval_rate: f64,
    pub first_pass_rate: f64,
    pub defect_density: f64,
    pub avg_review_cycles: f64,
    pub defect_find_rate: f64,
    pub detection_accuracy: f64,
    pub cost_efficiency: f64,
    pub quality_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_order_is_critical_first() {
        assert_eq!(DefectSeverity::REPORT_ORDER[0], DefectSeverity::Critical);
        assert_eq!(DefectSeverity::REPORT_ORDER[4], DefectSeverity::Info);
    }
}
