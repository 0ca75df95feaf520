//! Domain types and error kinds shared across the CLIAIMONITOR control
//! plane. Nothing in this crate touches storage or networking directly;
//! `cliaimonitor-store` owns persistence, `cliaimonitor-comms` owns the
//! realtime agent channel, and `cliaimonitor-server` owns the HTTP/WS
//! boundary (spec §9: "narrow capability interfaces per owner component").

pub mod agent;
pub mod captain;
pub mod document;
pub mod error;
pub mod health;
pub mod rag;
pub mod review;
pub mod task;

pub use agent::{Agent, AgentRegistration, AgentStatus, PaneHistoryEntry};
pub use captain::{CaptainContextEntry, SessionLogEntry};
pub use document::{
    Document, DocumentStatus, DocumentType, DocumentUpdate, Environment, Finding,
    FindingHistoryEntry, FindingSeverity, FindingStatus, NewDocument, Scan,
};
pub use error::{CoreError, CoreResult};
pub use health::Health;
pub use rag::{Episode, EpisodeEventType, Knowledge, RagStats, ScoredKnowledge};
pub use review::{
    AgentQualityScore, ConsensusDecision, ConsensusResult, Defect, DefectCategory,
    DefectSeverity, QualityRole, ReviewBoard, ReviewBoardStatus, ReviewerVote,
};
pub use task::{
    Assignment, AssignmentStatus, AssignmentWorker, Task, TaskPriority, TaskUpsert, WorkerStatus,
};
