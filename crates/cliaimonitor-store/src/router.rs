//! Skill router (spec §4.I).
//!
//! A thin dispatcher in front of the other stores — it classifies a
//! free-text query and routes it to whichever store owns that kind of
//! answer. It holds no state of its own.

use std::collections::HashSet;

use cliaimonitor_core::{Agent, CoreResult, Knowledge, ScoredKnowledge, Task};

use crate::agents::AgentStore;
use crate::kernel::Store;
use crate::rag::RagStore;
use crate::tasks::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    Knowledge,
    Episode,
    Operational,
    Recon,
    Unknown,
}

/// Phrase lists inspected in priority order; first match wins (spec
/// §4.I). Knowledge is checked first because "how do I" phrasing
/// overlaps with operational questions more often than the reverse.
const KNOWLEDGE_PHRASES: &[&str] = &["how do i", "how to", "best practice", "pattern for", "what is"];
const EPISODE_PHRASES: &[&str] = &["what happened", "last time", "previously", "before when"];
const OPERATIONAL_PHRASES: &[&str] = &["agent status", "task status", "who is working", "assign", "spawn"];
const RECON_PHRASES: &[&str] = &["vulnerability", "finding", "scan result", "security issue"];

/// Secondary keyword set inspected only once a query has already
/// classified as `Operational`, to decide whether it belongs to store
/// C (agents) or store D (tasks) — spec §4.I: "operational → C (agents)
/// and D (tasks) based on further keyword inspection."
const TASK_KEYWORDS: &[&str] = &["task", "assign"];

/// How many tagged-learning rows the recon fallback reads per query.
const RECON_TAG_LIMIT: usize = 20;
/// The tag the recon fallback reads in the absence of a direct
/// recon-query path (spec §4.I).
const RECON_TAG: &str = "recon";

pub fn classify_query(query: &str) -> QueryClass {
    let q = query.to_lowercase();
    if KNOWLEDGE_PHRASES.iter().any(|p| q.contains(p)) {
        QueryClass::Knowledge
    } else if EPISODE_PHRASES.iter().any(|p| q.contains(p)) {
        QueryClass::Episode
    } else if OPERATIONAL_PHRASES.iter().any(|p| q.contains(p)) {
        QueryClass::Operational
    } else if RECON_PHRASES.iter().any(|p| q.contains(p)) {
        QueryClass::Recon
    } else {
        QueryClass::Unknown
    }
}

#[derive(Debug, Clone)]
pub enum RouteResult {
    Knowledge(Vec<ScoredKnowledge>),
    Agents(Vec<Agent>),
    Tasks(Vec<Task>),
    Recon(Vec<Knowledge>),
}

pub struct SkillRouter<'a> {
    store: &'a Store,
}

impl<'a> SkillRouter<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Dispatches per spec §4.I: knowledge/unknown/episode → RAG search
    /// (store F); operational → further keyword inspection decides
    /// between the agent store (C) and the task store (D); recon →
    /// reads tagged learnings from the RAG store, since there is no
    /// direct recon-query path. Every knowledge hit triggers
    /// `IncrementUseCount`.
    pub fn route_query(&self, query: &str, agent_type: Option<&str>) -> CoreResult<RouteResult> {
        let rag = RagStore::new(self.store);
        match classify_query(query) {
            QueryClass::Operational => self.route_operational(query),
            QueryClass::Recon => {
                let hits = rag.list_by_tag(RECON_TAG, RECON_TAG_LIMIT)?;
                Ok(RouteResult::Recon(hits))
            }
            QueryClass::Knowledge | QueryClass::Episode | QueryClass::Unknown => {
                let hits = rag.search(query, agent_type, None, 10)?;
                for hit in &hits {
                    rag.increment_use_count(&hit.knowledge.id)?;
                }
                Ok(RouteResult::Knowledge(hits))
            }
        }
    }

    /// Keyword-inspects an already-classified-`Operational` query to
    /// decide whether it is asking about agents (C) or tasks (D), then
    /// queries that store directly. Task-store dispatch has no repo in
    /// scope here, so it fans the lookup out across every project any
    /// known agent is attached to.
    fn route_operational(&self, query: &str) -> CoreResult<RouteResult> {
        let q = query.to_lowercase();
        if TASK_KEYWORDS.iter().any(|k| q.contains(k)) {
            let agents = AgentStore::new(self.store).list()?;
            let tasks_store = TaskStore::new(self.store);
            let repos: HashSet<String> = agents.into_iter().filter_map(|a| a.project).collect();
            let mut tasks = Vec::new();
            for repo in repos {
                tasks.extend(tasks_store.list_by_repo(&repo)?);
            }
            Ok(RouteResult::Tasks(tasks))
        } else {
            let agents = AgentStore::new(self.store).list()?;
            Ok(RouteResult::Agents(agents))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentStore;
    use crate::kernel::PoolConfig;
    use crate::tasks::TaskStore;
    use cliaimonitor_core::{AgentRegistration, TaskPriority, TaskUpsert};

    fn store() -> Store {
        Store::open_in_memory(PoolConfig::default()).unwrap()
    }

    #[test]
    fn classify_prefers_knowledge_over_operational_on_first_match() {
        assert_eq!(classify_query("how do I assign a task?"), QueryClass::Knowledge);
    }

    #[test]
    fn classify_recognizes_operational_phrasing() {
        assert_eq!(classify_query("who is working on task-42"), QueryClass::Operational);
    }

    #[test]
    fn classify_defaults_to_unknown() {
        assert_eq!(classify_query("good morning"), QueryClass::Unknown);
    }

    #[test]
    fn operational_agent_query_dispatches_to_agent_store() {
        let store = store();
        AgentStore::new(&store)
            .register(AgentRegistration {
                agent_id: "a1".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                ..Default::default()
            })
            .unwrap();

        let router = SkillRouter::new(&store);
        match router.route_query("who is working right now", None).unwrap() {
            RouteResult::Agents(agents) => {
                assert_eq!(agents.len(), 1);
                assert_eq!(agents[0].agent_id, "a1");
            }
            other => panic!("expected Agents, got {other:?}"),
        }
    }

    #[test]
    fn operational_task_query_dispatches_to_task_store() {
        let store = store();
        AgentStore::new(&store)
            .register(AgentRegistration {
                agent_id: "a1".into(),
                config_name: "cfg".into(),
                role: "worker".into(),
                project: Some("repo-x".into()),
                ..Default::default()
            })
            .unwrap();
        TaskStore::new(&store)
            .upsert_batch(vec![TaskUpsert {
                id: "t1".into(),
                repo_id: "repo-x".into(),
                source_file: None,
                title: "fix bug".into(),
                description: None,
                priority: TaskPriority::Medium,
                parent_task: None,
                effort: None,
                tags: vec![],
            }])
            .unwrap();

        let router = SkillRouter::new(&store);
        match router.route_query("check task status now", None).unwrap() {
            RouteResult::Tasks(tasks) => {
                assert_eq!(tasks.len(), 1);
                assert_eq!(tasks[0].id, "t1");
            }
            other => panic!("expected Tasks, got {other:?}"),
        }
    }

    #[test]
    fn recon_query_reads_tagged_learnings() {
        let store = store();
        let rag = RagStore::new(&store);
        rag.store_knowledge(cliaimonitor_core::Knowledge {
            id: "k1".into(),
            agent_type: "any".into(),
            category: "recon".into(),
            title: "sql injection".into(),
            content: "unsanitized input in login handler".into(),
            tags: vec!["recon".into()],
            source: None,
            use_count: 0,
            last_used: None,
            created_at: chrono::Utc::now(),
        })
        .unwrap();

        let router = SkillRouter::new(&store);
        match router.route_query("any open vulnerability?", None).unwrap() {
            RouteResult::Recon(hits) => {
                assert_eq!(hits.len(), 1);
                assert_eq!(hits[0].id, "k1");
            }
            other => panic!("expected Recon, got {other:?}"),
        }
    }
}
