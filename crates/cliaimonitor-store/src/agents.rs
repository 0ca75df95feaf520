//! Agent-lifecycle store (spec §4.C).

use chrono::{DateTime, Duration, Utc};
use cliaimonitor_core::{Agent, AgentRegistration, AgentStatus, CoreError, CoreResult, PaneHistoryEntry};
use rusqlite::{params, OptionalExtension, Row};

use crate::kernel::Store;

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    let status: String = row.get("status")?;
    let status = AgentStatus::parse(&status).unwrap_or(AgentStatus::Dead);
    Ok(Agent {
        agent_id: row.get("agent_id")?,
        config_name: row.get("config_name")?,
        role: row.get("role")?,
        project: row.get("project")?,
        status,
        pid: row.get("pid")?,
        last_heartbeat: row.get("last_heartbeat")?,
        current_task: row.get("current_task")?,
        pane_binding: row.get("pane_binding")?,
        model: row.get("model")?,
        color: row.get("color")?,
        shutdown_requested: row.get::<_, i64>("shutdown_requested")? != 0,
        shutdown_reason: row.get("shutdown_reason")?,
        spawned_at: row.get("spawned_at")?,
        stopped_at: row.get("stopped_at")?,
        stop_reason: row.get("stop_reason")?,
    })
}

fn row_to_pane_entry(row: &Row) -> rusqlite::Result<PaneHistoryEntry> {
    let before: Option<String> = row.get("status_before")?;
    let after: Option<String> = row.get("status_after")?;
    Ok(PaneHistoryEntry {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        action: row.get("action")?,
        status_before: before.and_then(|s| AgentStatus::parse(&s)),
        status_after: after.and_then(|s| AgentStatus::parse(&s)),
        details: row.get("details")?,
        timestamp: row.get("timestamp")?,
    })
}

pub struct AgentStore<'a> {
    store: &'a Store,
}

impl<'a> AgentStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    fn record_transition(
        tx: &rusqlite::Transaction<'_>,
        agent_id: &str,
        action: &str,
        before: Option<AgentStatus>,
        after: Option<AgentStatus>,
        details: Option<&str>,
    ) -> CoreResult<()> {
        tx.execute(
            "INSERT INTO pane_history (agent_id, action, status_before, status_after, details, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                agent_id,
                action,
                before.map(|s| s.as_str()),
                after.map(|s| s.as_str()),
                details,
                Utc::now(),
            ],
        )
        .map_err(|e| CoreError::storage("record pane history", e))?;
        Ok(())
    }

    /// Upsert-by-agent-id; on conflict overwrites mutable metadata
    /// (spec §4.C).
    pub fn register(&self, reg: AgentRegistration) -> CoreResult<Agent> {
        let status = reg.status.unwrap_or(AgentStatus::Starting);
        self.store.transaction(|tx| {
            let previous: Option<String> = tx
                .query_row(
                    "SELECT status FROM agents WHERE agent_id = ?1",
                    params![reg.agent_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| CoreError::storage("look up agent", e))?;

            tx.execute(
                "INSERT INTO agents (agent_id, config_name, role, project, status, pid, \
                     current_task, model, color, pane_binding, spawned_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                 ON CONFLICT(agent_id) DO UPDATE SET \
                     config_name = excluded.config_name, \
                     role = excluded.role, \
                     project = excluded.project, \
                     status = excluded.status, \
                     pid = excluded.pid, \
                     current_task = excluded.current_task, \
                     model = excluded.model, \
                     color = excluded.color, \
                     pane_binding = excluded.pane_binding",
                params![
                    reg.agent_id,
                    reg.config_name,
                    reg.role,
                    reg.project,
                    status.as_str(),
                    reg.pid,
                    reg.current_task,
                    reg.model,
                    reg.color,
                    reg.pane_binding,
                    Utc::now(),
                ],
            )
            .map_err(|e| CoreError::storage("upsert agent", e))?;

            Self::record_transition(
                tx,
                &reg.agent_id,
                "register",
                previous.as_deref().and_then(AgentStatus::parse),
                Some(status),
                None,
            )?;

            tx.query_row(
                "SELECT * FROM agents WHERE agent_id = ?1",
                params![reg.agent_id],
                row_to_agent,
            )
            .map_err(|e| CoreError::storage("reload agent after register", e))
        })
    }

    pub fn get(&self, agent_id: &str) -> CoreResult<Agent> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM agents WHERE agent_id = ?1",
                params![agent_id],
                row_to_agent,
            )
            .optional()
            .map_err(|e| CoreError::storage("get agent", e))?
            .ok_or_else(|| CoreError::not_found(format!("agent '{agent_id}' not found")))
        })
    }

    pub fn list(&self) -> CoreResult<Vec<Agent>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM agents ORDER BY spawned_at")
                .map_err(|e| CoreError::storage("prepare list agents", e))?;
            let rows = stmt
                .query_map([], row_to_agent)
                .map_err(|e| CoreError::storage("list agents", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect agents", e))
        })
    }

    /// Sets `last_heartbeat` to now; fails if no row matches
    /// (spec §4.C).
    pub fn heartbeat(&self, agent_id: &str) -> CoreResult<()> {
        self.store.with_conn(|conn| {
            let affected = conn
                .execute(
                    "UPDATE agents SET last_heartbeat = ?1 WHERE agent_id = ?2",
                    params![Utc::now(), agent_id],
                )
                .map_err(|e| CoreError::storage("heartbeat", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!(
                    "agent '{agent_id}' not found"
                )));
            }
            Ok(())
        })
    }

    /// Sets status, current-task, and heartbeat-at atomically
    /// (spec §4.C).
    pub fn update_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        current_task: Option<&str>,
    ) -> CoreResult<()> {
        self.store.transaction(|tx| {
            let previous: Option<String> = tx
                .query_row(
                    "SELECT status FROM agents WHERE agent_id = ?1",
                    params![agent_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| CoreError::storage("look up agent status", e))?;
            let previous = previous
                .ok_or_else(|| CoreError::not_found(format!("agent '{agent_id}' not found")))?;

            let affected = tx
                .execute(
                    "UPDATE agents SET status = ?1, current_task = ?2, last_heartbeat = ?3 \
                     WHERE agent_id = ?4",
                    params![status.as_str(), current_task, Utc::now(), agent_id],
                )
                .map_err(|e| CoreError::storage("update agent status", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!(
                    "agent '{agent_id}' not found"
                )));
            }

            Self::record_transition(
                tx,
                agent_id,
                "status_change",
                AgentStatus::parse(&previous),
                Some(status),
                current_task,
            )
        })
    }

    pub fn set_shutdown_flag(&self, agent_id: &str, reason: Option<&str>) -> CoreResult<()> {
        self.store.with_conn(|conn| {
            let affected = conn
                .execute(
                    "UPDATE agents SET shutdown_requested = 1, shutdown_reason = ?1 \
                     WHERE agent_id = ?2",
                    params![reason, agent_id],
                )
                .map_err(|e| CoreError::storage("set shutdown flag", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!(
                    "agent '{agent_id}' not found"
                )));
            }
            Ok(())
        })
    }

    pub fn mark_stopped(&self, agent_id: &str, reason: Option<&str>) -> CoreResult<()> {
        self.store.transaction(|tx| {
            let previous: Option<String> = tx
                .query_row(
                    "SELECT status FROM agents WHERE agent_id = ?1",
                    params![agent_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| CoreError::storage("look up agent before stop", e))?;
            let previous = previous
                .ok_or_else(|| CoreError::not_found(format!("agent '{agent_id}' not found")))?;

            let affected = tx
                .execute(
                    "UPDATE agents SET status = 'stopped', stopped_at = ?1, stop_reason = ?2 \
                     WHERE agent_id = ?3",
                    params![Utc::now(), reason, agent_id],
                )
                .map_err(|e| CoreError::storage("mark agent stopped", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!(
                    "agent '{agent_id}' not found"
                )));
            }

            Self::record_transition(
                tx,
                agent_id,
                "stopped",
                AgentStatus::parse(&previous),
                Some(AgentStatus::Stopped),
                reason,
            )
        })
    }

    pub fn remove(&self, agent_id: &str) -> CoreResult<()> {
        self.store.with_conn(|conn| {
            let affected = conn
                .execute("DELETE FROM agents WHERE agent_id = ?1", params![agent_id])
                .map_err(|e| CoreError::storage("remove agent", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!(
                    "agent '{agent_id}' not found"
                )));
            }
            Ok(())
        })
    }

    pub fn attach_pane(&self, agent_id: &str, pane_id: &str) -> CoreResult<()> {
        self.store.with_conn(|conn| {
            let affected = conn
                .execute(
                    "UPDATE agents SET pane_binding = ?1 WHERE agent_id = ?2",
                    params![pane_id, agent_id],
                )
                .map_err(|e| CoreError::storage("attach pane", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!(
                    "agent '{agent_id}' not found"
                )));
            }
            Ok(())
        })
    }

    pub fn find_by_pane(&self, pane_id: &str) -> CoreResult<Option<Agent>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM agents WHERE pane_binding = ?1",
                params![pane_id],
                row_to_agent,
            )
            .optional()
            .map_err(|e| CoreError::storage("find agent by pane", e))
        })
    }

    pub fn pane_history(&self, agent_id: &str) -> CoreResult<Vec<PaneHistoryEntry>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM pane_history WHERE agent_id = ?1 ORDER BY timestamp, id",
                )
                .map_err(|e| CoreError::storage("prepare pane history", e))?;
            let rows = stmt
                .query_map(params![agent_id], row_to_pane_entry)
                .map_err(|e| CoreError::storage("query pane history", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect pane history", e))
        })
    }

    /// Returns agents whose heartbeat (or, absent a heartbeat, spawn
    /// time while still `starting`) is older than `threshold`, ordered
    /// oldest-effective-timestamp-first (spec §4.C, scenario 1).
    pub fn stale_agents(&self, threshold: Duration, now: DateTime<Utc>) -> CoreResult<Vec<Agent>> {
        let cutoff = now - threshold;
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM agents \
                     WHERE status NOT IN ('stopped', 'dead') \
                       AND ( \
                           (last_heartbeat IS NOT NULL AND last_heartbeat < ?1) \
                        OR (last_heartbeat IS NULL AND status = 'starting' AND spawned_at < ?1) \
                       ) \
                     ORDER BY COALESCE(last_heartbeat, spawned_at) ASC",
                )
                .map_err(|e| CoreError::storage("prepare stale agents", e))?;
            let rows = stmt
                .query_map(params![cutoff], row_to_agent)
                .map_err(|e| CoreError::storage("query stale agents", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect stale agents", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::PoolConfig;
    use chrono::TimeZone;

    fn store() -> Store {
        Store::open_in_memory(PoolConfig::default()).unwrap()
    }

    fn register(store: &Store, id: &str, status: AgentStatus) -> Agent {
        AgentStore::new(store)
            .register(AgentRegistration {
                agent_id: id.into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                status: Some(status),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn register_is_idempotent_modulo_timestamps() {
        let store = store();
        let a1 = register(&store, "a1", AgentStatus::Idle);
        let a2 = register(&store, "a1", AgentStatus::Idle);
        assert_eq!(a1.agent_id, a2.agent_id);
        assert_eq!(a1.config_name, a2.config_name);
        assert_eq!(a1.status, a2.status);
    }

    #[test]
    fn heartbeat_fails_for_unknown_agent() {
        let store = store();
        let err = AgentStore::new(&store).heartbeat("ghost").unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn pane_history_is_append_only_and_ordered() {
        let store = store();
        let agents = AgentStore::new(&store);
        register(&store, "a1", AgentStatus::Starting);
        agents
            .update_status("a1", AgentStatus::Working, Some("t1"))
            .unwrap();
        agents
            .update_status("a1", AgentStatus::Idle, None)
            .unwrap();

        let history = agents.pane_history("a1").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].action, "register");
        assert_eq!(history[1].status_after, Some(AgentStatus::Working));
        assert_eq!(history[2].status_after, Some(AgentStatus::Idle));
    }

    #[test]
    fn stale_detection_flags_stuck_starters_but_not_fresh_ones() {
        // Scenario 1 from spec §8.
        let store = store();
        let agents = AgentStore::new(&store);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

        agents
            .register(AgentRegistration {
                agent_id: "A".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                status: Some(AgentStatus::Working),
                ..Default::default()
            })
            .unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE agents SET last_heartbeat = ?1, spawned_at = ?1 WHERE agent_id = 'A'",
                    params![now],
                )
                .map_err(|e| CoreError::storage("seed", e))
            })
            .unwrap();

        agents
            .register(AgentRegistration {
                agent_id: "B".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                status: Some(AgentStatus::Working),
                ..Default::default()
            })
            .unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE agents SET last_heartbeat = ?1, spawned_at = ?1 WHERE agent_id = 'B'",
                    params![now - Duration::minutes(5)],
                )
                .map_err(|e| CoreError::storage("seed", e))
            })
            .unwrap();

        agents
            .register(AgentRegistration {
                agent_id: "C".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                status: Some(AgentStatus::Starting),
                ..Default::default()
            })
            .unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE agents SET last_heartbeat = NULL, spawned_at = ?1 WHERE agent_id = 'C'",
                    params![now - Duration::minutes(5)],
                )
                .map_err(|e| CoreError::storage("seed", e))
            })
            .unwrap();

        agents
            .register(AgentRegistration {
                agent_id: "D".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                status: Some(AgentStatus::Starting),
                ..Default::default()
            })
            .unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE agents SET last_heartbeat = NULL, spawned_at = ?1 WHERE agent_id = 'D'",
                    params![now],
                )
                .map_err(|e| CoreError::storage("seed", e))
            })
            .unwrap();

        agents
            .register(AgentRegistration {
                agent_id: "E".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                status: Some(AgentStatus::Stopped),
                ..Default::default()
            })
            .unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE agents SET last_heartbeat = ?1, spawned_at = ?1 WHERE agent_id = 'E'",
                    params![now - Duration::minutes(10)],
                )
                .map_err(|e| CoreError::storage("seed", e))
            })
            .unwrap();

        let stale = agents.stale_agents(Duration::minutes(2), now).unwrap();
        let ids: Vec<&str> = stale.iter().map(|a| a.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);
    }
}
