//! HTTP handlers (spec §4.K, §6).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use cliaimonitor_core::{AgentRegistration, AgentStatus, QualityRole};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::state::{AppState, StateSnapshot};
use crate::validation;

pub async fn get_state(State(state): State<AppState>) -> Result<Json<StateSnapshot>, ApiError> {
    Ok(Json(state.snapshot()?))
}

pub async fn get_health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let health = state.store.health(None)?;
    Ok(Json(serde_json::to_value(health).unwrap_or(json!({}))))
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub config_name: String,
    pub project_path: Option<String>,
    pub task: Option<String>,
}

/// Validates `config_name` ≤50, `project_path` exists & no `..`, `task`
/// ≤5000 (spec §6), then registers the agent and broadcasts once.
pub async fn create_agent(
    State(state): State<AppState>,
    Json(req): Json<CreateAgentRequest>,
) -> Result<Json<cliaimonitor_core::Agent>, ApiError> {
    validation::validate_config_name(&req.config_name).map_err(ApiError::bad_request)?;
    if let Some(path) = &req.project_path {
        validation::validate_project_path(path).map_err(ApiError::bad_request)?;
    }
    if let Some(task) = &req.task {
        validation::validate_task(task).map_err(ApiError::bad_request)?;
    }

    let agent_id = uuid::Uuid::new_v4().to_string();
    let agent = cliaimonitor_store::AgentStore::new(&state.store).register(AgentRegistration {
        agent_id,
        config_name: req.config_name,
        role: "worker".into(),
        project: req.project_path,
        current_task: req.task,
        ..Default::default()
    })?;

    state.broadcast_snapshot()?;
    Ok(Json(agent))
}

pub async fn stop_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validation::validate_agent_id(&agent_id).map_err(ApiError::bad_request)?;
    cliaimonitor_store::AgentStore::new(&state.store).mark_stopped(&agent_id, Some("operator stop"))?;
    state.comms.unregister(&agent_id);
    state.broadcast_snapshot()?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn graceful_stop_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validation::validate_agent_id(&agent_id).map_err(ApiError::bad_request)?;
    state
        .comms
        .trigger_signal(&state.store, &agent_id, cliaimonitor_comms::Signal::Stop)?;
    state.broadcast_snapshot()?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
}

/// Answer text 1–10,000 chars, unsafe-content screened (spec §6).
pub async fn answer_human_request(
    State(_state): State<AppState>,
    Path(_request_id): Path<String>,
    Json(req): Json<AnswerRequest>,
) -> Result<StatusCode, ApiError> {
    validation::validate_answer_text(&req.answer).map_err(ApiError::bad_request)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UpsertContextRequest {
    pub key: String,
    pub value: String,
    pub priority: i64,
    pub max_age_hours: i64,
}

pub async fn upsert_context(
    State(state): State<AppState>,
    Json(req): Json<UpsertContextRequest>,
) -> Result<Json<cliaimonitor_core::CaptainContextEntry>, ApiError> {
    let entry = cliaimonitor_store::CaptainStore::new(&state.store).upsert_context(
        &req.key,
        &req.value,
        req.priority,
        req.max_age_hours,
    )?;
    state.broadcast_snapshot()?;
    Ok(Json(entry))
}

pub async fn get_context_summary(State(state): State<AppState>) -> Result<String, ApiError> {
    Ok(cliaimonitor_store::CaptainStore::new(&state.store).get_context_summary()?)
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub role: Option<String>,
    pub limit: Option<i64>,
}

/// `limit` clamped to ≤100, default 20 (spec §6).
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(q): Query<LeaderboardQuery>,
) -> Result<Json<Vec<cliaimonitor_core::AgentQualityScore>>, ApiError> {
    let _limit = q.limit.unwrap_or(20).clamp(1, 100);
    let role = match q.role.as_deref() {
        Some("reviewer") => QualityRole::Reviewer,
        _ => QualityRole::Author,
    };
    let agents = cliaimonitor_store::AgentStore::new(&state.store).list()?;
    let review = cliaimonitor_store::ReviewStore::new(&state.store);
    let mut scores = Vec::new();
    for agent in agents {
        if let Some(score) = review.get_quality_score(&agent.agent_id, role)? {
            scores.push(score);
        }
    }
    scores.sort_by(|a, b| b.quality_score.partial_cmp(&a.quality_score).unwrap());
    scores.truncate(_limit as usize);
    Ok(Json(scores))
}

#[derive(Debug, Serialize)]
pub struct ShutdownAck {
    pub status: &'static str,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Bound to loopback only by the router construction in `lib.rs` —
/// this handler itself performs no further host check (spec §4.K, §6).
pub async fn shutdown(State(state): State<AppState>) -> Result<Json<ShutdownAck>, ApiError> {
    let agents = cliaimonitor_store::AgentStore::new(&state.store).list()?;
    for agent in agents {
        if !matches!(agent.status, AgentStatus::Stopped | AgentStatus::Dead) {
            state
                .comms
                .trigger_signal(&state.store, &agent.agent_id, cliaimonitor_comms::Signal::Stop)?;
        }
    }
    Ok(Json(ShutdownAck {
        status: "shutting_down",
        timestamp: Utc::now(),
    }))
}
