//! Agent-comms hub (spec §4.J).
//!
//! Holds a map of agent-id to shutdown channel under a read/write
//! mutex, mirroring the teacher's `AgentRegistry` (`RwLock<HashMap<..>>`
//! indices in `agents/src/registry.rs`) rather than reaching for a
//! lock-free map the teacher never uses.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use cliaimonitor_core::{AgentStatus, CoreResult};
use cliaimonitor_store::Store;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

/// One agent's shutdown channel plus the idempotent-close flag (spec
/// §4.J: "Trigger closes idempotently, second close suppressed").
struct AgentChannel {
    tx: watch::Sender<bool>,
    closed: AtomicBool,
    messages: parking_lot::Mutex<VecDeque<String>>,
}

/// Outcome of `process_heartbeat` (spec §6 envelope).
#[derive(Debug, Clone)]
pub struct HeartbeatResult {
    pub ok: bool,
    pub timestamp: chrono::DateTime<Utc>,
    pub should_stop: bool,
    pub stop_reason: Option<String>,
    pub has_messages: bool,
    pub message_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Stop,
    Pause,
    Resume,
}

pub struct AgentCommsHub {
    channels: RwLock<HashMap<String, AgentChannel>>,
}

impl Default for AgentCommsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentCommsHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `agent_id` and returns a receive-only handle to its
    /// shutdown channel (spec §4.J).
    pub fn register(&self, agent_id: &str) -> watch::Receiver<bool> {
        let mut channels = self.channels.write();
        let (tx, rx) = watch::channel(false);
        channels.insert(
            agent_id.to_string(),
            AgentChannel {
                tx,
                closed: AtomicBool::new(false),
                messages: parking_lot::Mutex::new(VecDeque::new()),
            },
        );
        debug!(agent_id, "registered agent-comms channel");
        rx
    }

    /// Closes and removes the channel (spec §4.J).
    pub fn unregister(&self, agent_id: &str) {
        let mut channels = self.channels.write();
        if let Some(channel) = channels.remove(agent_id) {
            channel.closed.store(true, Ordering::SeqCst);
            let _ = channel.tx.send(true);
        }
    }

    /// Triggers the agent's shutdown channel. A second call is a no-op
    /// (spec §4.J: idempotent double-close).
    pub fn trigger(&self, agent_id: &str) -> bool {
        let channels = self.channels.read();
        match channels.get(agent_id) {
            Some(channel) => {
                if channel
                    .closed
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    let _ = channel.tx.send(true);
                    info!(agent_id, "triggered shutdown channel");
                } else {
                    debug!(agent_id, "shutdown channel already closed, suppressing");
                }
                true
            }
            None => false,
        }
    }

    pub fn send_message(&self, agent_id: &str, message: &str) -> bool {
        let channels = self.channels.read();
        match channels.get(agent_id) {
            Some(channel) => {
                channel.messages.lock().push_back(message.to_string());
                true
            }
            None => false,
        }
    }

    fn drain_message_count(&self, agent_id: &str) -> usize {
        let channels = self.channels.read();
        channels
            .get(agent_id)
            .map(|c| c.messages.lock().len())
            .unwrap_or(0)
    }

    /// Updates the agent's status in the lifecycle store and returns
    /// the heartbeat envelope the façade serializes (spec §4.J, §6).
    /// This is the hot path: one store update plus one map lookup,
    /// nothing that blocks beyond that (spec §5).
    pub fn process_heartbeat(&self, store: &Store, agent_id: &str) -> CoreResult<HeartbeatResult> {
        let agents = cliaimonitor_store::AgentStore::new(store);
        agents.heartbeat(agent_id)?;

        let agent = agents.get(agent_id)?;
        let message_count = self.drain_message_count(agent_id);

        Ok(HeartbeatResult {
            ok: true,
            timestamp: Utc::now(),
            should_stop: agent.shutdown_requested,
            stop_reason: agent.shutdown_reason,
            has_messages: message_count > 0,
            message_count,
        })
    }

    /// Handles an operator-issued signal (spec §4.J): "stop" triggers
    /// the shutdown channel; "pause"/"resume" only update status.
    pub fn trigger_signal(&self, store: &Store, agent_id: &str, signal: Signal) -> CoreResult<()> {
        let agents = cliaimonitor_store::AgentStore::new(store);
        match signal {
            Signal::Stop => {
                agents.set_shutdown_flag(agent_id, Some("operator requested stop"))?;
                self.trigger(agent_id);
            }
            Signal::Pause => {
                agents.update_status(agent_id, AgentStatus::Paused, None)?;
            }
            Signal::Resume => {
                agents.update_status(agent_id, AgentStatus::Working, None)?;
            }
        }
        Ok(())
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.channels.read().contains_key(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cliaimonitor_core::AgentRegistration;
    use cliaimonitor_store::PoolConfig;

    fn store() -> Store {
        Store::open_in_memory(PoolConfig::default()).unwrap()
    }

    #[test]
    fn register_then_trigger_flips_the_channel_once() {
        let hub = AgentCommsHub::new();
        let mut rx = hub.register("a1");
        assert!(!*rx.borrow());
        assert!(hub.trigger("a1"));
        rx.has_changed().unwrap();
        assert!(*rx.borrow());
    }

    #[test]
    fn second_trigger_is_suppressed() {
        let hub = AgentCommsHub::new();
        hub.register("a1");
        assert!(hub.trigger("a1"));
        assert!(hub.trigger("a1"));
    }

    #[test]
    fn trigger_on_unknown_agent_returns_false() {
        let hub = AgentCommsHub::new();
        assert!(!hub.trigger("ghost"));
    }

    #[test]
    fn heartbeat_reports_shutdown_request_and_pending_messages() {
        let store = store();
        let agents = cliaimonitor_store::AgentStore::new(&store);
        agents
            .register(AgentRegistration {
                agent_id: "a1".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                ..Default::default()
            })
            .unwrap();

        let hub = AgentCommsHub::new();
        hub.register("a1");
        hub.send_message("a1", "rework requested");

        let result = hub.process_heartbeat(&store, "a1").unwrap();
        assert!(result.ok);
        assert!(!result.should_stop);
        assert!(result.has_messages);
        assert_eq!(result.message_count, 1);
    }

    #[test]
    fn stop_signal_sets_shutdown_flag_and_triggers_channel() {
        let store = store();
        let agents = cliaimonitor_store::AgentStore::new(&store);
        agents
            .register(AgentRegistration {
                agent_id: "a1".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                ..Default::default()
            })
            .unwrap();

        let hub = AgentCommsHub::new();
        let mut rx = hub.register("a1");
        hub.trigger_signal(&store, "a1", Signal::Stop).unwrap();

        let heartbeat = hub.process_heartbeat(&store, "a1").unwrap();
        assert!(heartbeat.should_stop);
        rx.has_changed().unwrap();
        assert!(*rx.borrow());
    }
}
