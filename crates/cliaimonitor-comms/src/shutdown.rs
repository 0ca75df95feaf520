//! Graceful shutdown protocol (spec §5).
//!
//! Requesting shutdown arms a configurable timer; if the agent has not
//! reached `stopped` by expiry, the caller is expected to instruct the
//! (external, out-of-scope) spawner to kill the process. This module
//! only owns the timer and the bookkeeping around it — process
//! termination itself is injected as a closure so this crate never
//! shells out directly.

use std::sync::Arc;
use std::time::Duration;

use cliaimonitor_core::{AgentStatus, CoreResult};
use cliaimonitor_store::Store;
use tracing::{info, warn};

use crate::hub::AgentCommsHub;

pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 60;

/// Arms a force-kill timer for `agent_id`. If the agent has not reached
/// `stopped` within `grace_period`, `kill` is invoked (best-effort —
/// failures are logged, not propagated, per spec §7), the agent record
/// is removed, and the hub's channel is torn down. Broadcasts exactly
/// once via `on_shutdown_complete` regardless of which path completed
/// the shutdown (spec §5, §4.J).
pub async fn watch_for_graceful_shutdown<K, B>(
    store: Arc<Store>,
    hub: Arc<AgentCommsHub>,
    agent_id: String,
    grace_period: Duration,
    kill: K,
    on_shutdown_complete: B,
) -> CoreResult<()>
where
    K: FnOnce(&str) -> CoreResult<()>,
    B: FnOnce(&str),
{
    tokio::time::sleep(grace_period).await;

    let agents = cliaimonitor_store::AgentStore::new(&store);
    let still_running = match agents.get(&agent_id) {
        Ok(agent) => !matches!(agent.status, AgentStatus::Stopped | AgentStatus::Dead),
        Err(_) => false,
    };

    if still_running {
        warn!(agent_id = %agent_id, "grace period expired, force-killing agent");
        if let Err(err) = kill(&agent_id) {
            warn!(agent_id = %agent_id, error = %err, "force-kill failed, continuing cleanup anyway");
        }
        let _ = agents.remove(&agent_id);
        hub.unregister(&agent_id);
    } else {
        info!(agent_id = %agent_id, "agent reached stopped before grace period expired");
    }

    on_shutdown_complete(&agent_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cliaimonitor_core::AgentRegistration;
    use cliaimonitor_store::PoolConfig;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn force_kills_an_agent_still_running_past_the_grace_period() {
        let store = Arc::new(Store::open_in_memory(PoolConfig::default()).unwrap());
        let hub = Arc::new(AgentCommsHub::new());
        let agents = cliaimonitor_store::AgentStore::new(&store);
        agents
            .register(AgentRegistration {
                agent_id: "a1".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                status: Some(AgentStatus::Working),
                ..Default::default()
            })
            .unwrap();
        hub.register("a1");

        let killed = Arc::new(AtomicBool::new(false));
        let killed_clone = killed.clone();
        let broadcasted = Arc::new(AtomicBool::new(false));
        let broadcasted_clone = broadcasted.clone();

        watch_for_graceful_shutdown(
            store.clone(),
            hub.clone(),
            "a1".into(),
            Duration::from_millis(1),
            move |_| {
                killed_clone.store(true, Ordering::SeqCst);
                Ok(())
            },
            move |_| broadcasted_clone.store(true, Ordering::SeqCst),
        )
        .await
        .unwrap();

        assert!(killed.load(Ordering::SeqCst));
        assert!(broadcasted.load(Ordering::SeqCst));
        assert!(agents.get("a1").is_err());
        assert!(!hub.is_registered("a1"));
    }

    #[tokio::test]
    async fn skips_kill_when_agent_already_stopped() {
        let store = Arc::new(Store::open_in_memory(PoolConfig::default()).unwrap());
        let hub = Arc::new(AgentCommsHub::new());
        let agents = cliaimonitor_store::AgentStore::new(&store);
        agents
            .register(AgentRegistration {
                agent_id: "a1".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                ..Default::default()
            })
            .unwrap();
        agents.mark_stopped("a1", Some("clean exit")).unwrap();

        let killed = Arc::new(AtomicBool::new(false));
        let killed_clone = killed.clone();

        watch_for_graceful_shutdown(
            store.clone(),
            hub.clone(),
            "a1".into(),
            Duration::from_millis(1),
            move |_| {
                killed_clone.store(true, Ordering::SeqCst);
                Ok(())
            },
            |_| {},
        )
        .await
        .unwrap();

        assert!(!killed.load(Ordering::SeqCst));
        assert!(agents.get("a1").is_ok());
    }
}
