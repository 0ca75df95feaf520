//! HTTP/WebSocket control-plane façade (spec §4.K, §6).

pub mod errors;
pub mod handlers;
pub mod state;
pub mod validation;
pub mod ws;

pub use state::{AppState, StateSnapshot};

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Builds the full router. `/api/shutdown` is included here but the bin
/// crate is responsible for only binding it on a loopback listener
/// (spec §6 — shutdown is an operator-local affordance, not public API).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/state", get(handlers::get_state))
        .route("/api/health", get(handlers::get_health))
        .route("/api/agents", post(handlers::create_agent))
        .route("/api/agents/:agent_id/stop", post(handlers::stop_agent))
        .route(
            "/api/agents/:agent_id/graceful-stop",
            post(handlers::graceful_stop_agent),
        )
        .route(
            "/api/human-requests/:request_id/answer",
            post(handlers::answer_human_request),
        )
        .route("/api/captain/context", post(handlers::upsert_context))
        .route(
            "/api/captain/context/summary",
            get(handlers::get_context_summary),
        )
        .route("/api/leaderboard", get(handlers::leaderboard))
        .route("/api/shutdown", post(handlers::shutdown))
        .route("/ws", get(ws::ws_handler))
        .layer(RequestBodyLimitLayer::new(validation::MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
