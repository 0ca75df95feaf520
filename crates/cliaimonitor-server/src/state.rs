//! Shared façade state and the dashboard snapshot broadcast (spec §5,
//! §6). One `tokio::sync::broadcast` channel fans the current snapshot
//! out to every `/ws` subscriber; every successful mutation triggers
//! exactly one send.

use std::sync::Arc;

use cliaimonitor_core::{Agent, CoreResult, Task};
use cliaimonitor_store::Store;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub comms: Arc<cliaimonitor_comms::AgentCommsHub>,
    pub broadcast_tx: broadcast::Sender<StateSnapshot>,
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        comms: Arc<cliaimonitor_comms::AgentCommsHub>,
        allowed_origins: Vec<String>,
    ) -> Self {
        let (broadcast_tx, _rx) = broadcast::channel(256);
        Self {
            store,
            comms,
            broadcast_tx,
            allowed_origins: Arc::new(allowed_origins),
        }
    }

    pub fn snapshot(&self) -> CoreResult<StateSnapshot> {
        let agents = cliaimonitor_store::AgentStore::new(&self.store).list()?;
        let tasks_store = cliaimonitor_store::TaskStore::new(&self.store);
        let mut tasks = Vec::new();
        for agent in &agents {
            if let Some(repo) = agent.project.as_deref() {
                tasks.extend(tasks_store.list_by_repo(repo)?);
            }
        }
        Ok(StateSnapshot {
            agents,
            tasks,
            timestamp: chrono::Utc::now(),
        })
    }

    /// Broadcasts the current snapshot once. A send with no subscribers
    /// is not an error — it just means no client is currently on `/ws`.
    pub fn broadcast_snapshot(&self) -> CoreResult<()> {
        let snapshot = self.snapshot()?;
        let _ = self.broadcast_tx.send(snapshot);
        Ok(())
    }
}
