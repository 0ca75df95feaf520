//! Task & assignment store (spec §4.D).

use chrono::Utc;
use cliaimonitor_core::{
    Assignment, AssignmentStatus, AssignmentWorker, CoreError, CoreResult, Task, TaskPriority,
    TaskUpsert, WorkerStatus,
};
use rusqlite::{params, OptionalExtension, Row};

use crate::kernel::Store;

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let priority: String = row.get("priority")?;
    let tags: String = row.get("tags")?;
    Ok(Task {
        id: row.get("id")?,
        repo_id: row.get("repo_id")?,
        source_file: row.get("source_file")?,
        title: row.get("title")?,
        description: row.get("description")?,
        priority: TaskPriority::parse(&priority).unwrap_or(TaskPriority::Medium),
        status: row.get("status")?,
        assigned_agent: row.get("assigned_agent")?,
        parent_task: row.get("parent_task")?,
        effort: row.get("effort")?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn row_to_assignment(row: &Row) -> rusqlite::Result<Assignment> {
    let status: String = row.get("status")?;
    Ok(Assignment {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        assigned_to: row.get("assigned_to")?,
        assigned_by: row.get("assigned_by")?,
        assignment_type: row.get("assignment_type")?,
        status: AssignmentStatus::parse(&status).unwrap_or(AssignmentStatus::Pending),
        branch_name: row.get("branch_name")?,
        review_feedback: row.get("review_feedback")?,
        review_attempt: row.get("review_attempt")?,
        worker_count: row.get("worker_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn row_to_worker(row: &Row) -> rusqlite::Result<AssignmentWorker> {
    let status: String = row.get("status")?;
    Ok(AssignmentWorker {
        id: row.get("id")?,
        assignment_id: row.get("assignment_id")?,
        agent_id: row.get("agent_id")?,
        status: WorkerStatus::parse(&status).unwrap_or(WorkerStatus::Pending),
        result: row.get("result")?,
        tokens_used: row.get("tokens_used")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

pub struct TaskStore<'a> {
    store: &'a Store,
}

impl<'a> TaskStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Batch upsert-on-id: one transaction, update title/description/
    /// priority only on conflict, timestamps auto (spec §4.D).
    pub fn upsert_batch(&self, tasks: Vec<TaskUpsert>) -> CoreResult<Vec<Task>> {
        self.store.transaction(|tx| {
            let mut result = Vec::with_capacity(tasks.len());
            for t in tasks {
                let tags = serde_json::to_string(&t.tags)
                    .map_err(|e| CoreError::Validation(format!("serialize tags: {e}")))?;
                let now = Utc::now();
                tx.execute(
                    "INSERT INTO tasks (id, repo_id, source_file, title, description, priority, \
                         status, parent_task, effort, tags, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9, ?10, ?10) \
                     ON CONFLICT(id) DO UPDATE SET \
                         title = excluded.title, \
                         description = excluded.description, \
                         priority = excluded.priority, \
                         updated_at = excluded.updated_at",
                    params![
                        t.id,
                        t.repo_id,
                        t.source_file,
                        t.title,
                        t.description,
                        t.priority.as_str(),
                        t.parent_task,
                        t.effort,
                        tags,
                        now,
                    ],
                )
                .map_err(|e| CoreError::storage("upsert task", e))?;

                let task = tx
                    .query_row("SELECT * FROM tasks WHERE id = ?1", params![t.id], row_to_task)
                    .map_err(|e| CoreError::storage("reload task", e))?;
                result.push(task);
            }
            Ok(result)
        })
    }

    pub fn get(&self, task_id: &str) -> CoreResult<Task> {
        self.store.with_conn(|conn| {
            conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![task_id], row_to_task)
                .optional()
                .map_err(|e| CoreError::storage("get task", e))?
                .ok_or_else(|| CoreError::not_found(format!("task '{task_id}' not found")))
        })
    }

    pub fn list_by_repo(&self, repo_id: &str) -> CoreResult<Vec<Task>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM tasks WHERE repo_id = ?1 ORDER BY created_at")
                .map_err(|e| CoreError::storage("prepare list tasks", e))?;
            let rows = stmt
                .query_map(params![repo_id], row_to_task)
                .map_err(|e| CoreError::storage("list tasks", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect tasks", e))
        })
    }

    /// Assigning an agent passes the agent-id here; transitioning to
    /// "completed" sets `completed_at` automatically (spec §4.D).
    pub fn update_task_status(
        &self,
        task_id: &str,
        status: &str,
        assigned_agent: Option<&str>,
    ) -> CoreResult<Task> {
        self.store.transaction(|tx| {
            let now = Utc::now();
            let completed_at = if status == cliaimonitor_core::task::task_status::COMPLETED {
                Some(now)
            } else {
                None
            };
            let affected = tx
                .execute(
                    "UPDATE tasks SET status = ?1, assigned_agent = COALESCE(?2, assigned_agent), \
                         updated_at = ?3, completed_at = ?4 WHERE id = ?5",
                    params![status, assigned_agent, now, completed_at, task_id],
                )
                .map_err(|e| CoreError::storage("update task status", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!("task '{task_id}' not found")));
            }
            tx.query_row("SELECT * FROM tasks WHERE id = ?1", params![task_id], row_to_task)
                .map_err(|e| CoreError::storage("reload task after status update", e))
        })
    }

    pub fn create_assignment(
        &self,
        task_id: &str,
        assigned_to: &str,
        assigned_by: &str,
        assignment_type: &str,
    ) -> CoreResult<Assignment> {
        self.store.transaction(|tx| {
            let now = Utc::now();
            tx.execute(
                "INSERT INTO assignments (task_id, assigned_to, assigned_by, assignment_type, \
                     status, review_attempt, worker_count, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, 0, ?5, ?5)",
                params![task_id, assigned_to, assigned_by, assignment_type, now],
            )
            .map_err(|e| CoreError::storage("create assignment", e))?;
            let id = tx.last_insert_rowid();
            tx.query_row("SELECT * FROM assignments WHERE id = ?1", params![id], row_to_assignment)
                .map_err(|e| CoreError::storage("reload assignment", e))
        })
    }

    pub fn get_assignment(&self, id: i64) -> CoreResult<Assignment> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM assignments WHERE id = ?1",
                params![id],
                row_to_assignment,
            )
            .optional()
            .map_err(|e| CoreError::storage("get assignment", e))?
            .ok_or_else(|| CoreError::not_found(format!("assignment {id} not found")))
        })
    }

    /// Most recent `in_progress` row for `agent_id`; a query invariant,
    /// not a lock (spec §4.D).
    pub fn get_active_assignment(&self, agent_id: &str) -> CoreResult<Option<Assignment>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM assignments WHERE assigned_to = ?1 AND status = 'in_progress' \
                 ORDER BY updated_at DESC, id DESC LIMIT 1",
                params![agent_id],
                row_to_assignment,
            )
            .optional()
            .map_err(|e| CoreError::storage("get active assignment", e))
        })
    }

    /// Inserts the worker row and increments `worker_count` in the same
    /// call, not transactionally — worker additions are single-writer
    /// per assignment in practice (spec §4.D, §9).
    pub fn add_worker(&self, assignment_id: i64, agent_id: &str) -> CoreResult<AssignmentWorker> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO assignment_workers (assignment_id, agent_id, status) \
                 VALUES (?1, ?2, 'pending')",
                params![assignment_id, agent_id],
            )
            .map_err(|e| CoreError::storage("insert worker", e))?;
            let id = conn.last_insert_rowid();

            conn.execute(
                "UPDATE assignments SET worker_count = worker_count + 1 WHERE id = ?1",
                params![assignment_id],
            )
            .map_err(|e| CoreError::storage("increment worker_count", e))?;

            conn.query_row(
                "SELECT * FROM assignment_workers WHERE id = ?1",
                params![id],
                row_to_worker,
            )
            .map_err(|e| CoreError::storage("reload worker", e))
        })
    }

    pub fn list_workers(&self, assignment_id: i64) -> CoreResult<Vec<AssignmentWorker>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM assignment_workers WHERE assignment_id = ?1 ORDER BY id")
                .map_err(|e| CoreError::storage("prepare list workers", e))?;
            let rows = stmt
                .query_map(params![assignment_id], row_to_worker)
                .map_err(|e| CoreError::storage("list workers", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect workers", e))
        })
    }

    /// "in_progress" sets `started_at`; terminal states set `result`,
    /// `tokens_used`, `completed_at` (spec §4.D).
    pub fn update_worker_status(
        &self,
        worker_id: i64,
        status: WorkerStatus,
        result: Option<&str>,
        tokens_used: Option<i64>,
    ) -> CoreResult<AssignmentWorker> {
        self.store.with_conn(|conn| {
            let now = Utc::now();
            let affected = match status {
                WorkerStatus::InProgress => conn
                    .execute(
                        "UPDATE assignment_workers SET status = ?1, started_at = ?2 WHERE id = ?3",
                        params![status.as_str(), now, worker_id],
                    )
                    .map_err(|e| CoreError::storage("update worker to in_progress", e))?,
                WorkerStatus::Completed | WorkerStatus::Failed => conn
                    .execute(
                        "UPDATE assignment_workers SET status = ?1, result = ?2, \
                             tokens_used = ?3, completed_at = ?4 WHERE id = ?5",
                        params![status.as_str(), result, tokens_used, now, worker_id],
                    )
                    .map_err(|e| CoreError::storage("update worker to terminal", e))?,
                WorkerStatus::Pending => conn
                    .execute(
                        "UPDATE assignment_workers SET status = ?1 WHERE id = ?2",
                        params![status.as_str(), worker_id],
                    )
                    .map_err(|e| CoreError::storage("update worker status", e))?,
            };
            if affected == 0 {
                return Err(CoreError::not_found(format!("worker {worker_id} not found")));
            }
            conn.query_row(
                "SELECT * FROM assignment_workers WHERE id = ?1",
                params![worker_id],
                row_to_worker,
            )
            .map_err(|e| CoreError::storage("reload worker", e))
        })
    }

    /// Sets status=rework, increments review-attempt, writes feedback,
    /// clears completed_at (spec §4.D).
    pub fn request_rework(&self, assignment_id: i64, feedback: &str) -> CoreResult<Assignment> {
        self.store.transaction(|tx| {
            let affected = tx
                .execute(
                    "UPDATE assignments SET status = 'rework', review_attempt = review_attempt + 1, \
                         review_feedback = ?1, completed_at = NULL, updated_at = ?2 WHERE id = ?3",
                    params![feedback, Utc::now(), assignment_id],
                )
                .map_err(|e| CoreError::storage("request rework", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!(
                    "assignment {assignment_id} not found"
                )));
            }
            tx.query_row(
                "SELECT * FROM assignments WHERE id = ?1",
                params![assignment_id],
                row_to_assignment,
            )
            .map_err(|e| CoreError::storage("reload assignment after rework", e))
        })
    }

    /// Terminal, with feedback (spec §4.D).
    pub fn complete_assignment(&self, assignment_id: i64, feedback: &str) -> CoreResult<Assignment> {
        self.store.transaction(|tx| {
            let now = Utc::now();
            let affected = tx
                .execute(
                    "UPDATE assignments SET status = 'completed', review_feedback = ?1, \
                         completed_at = ?2, updated_at = ?2 WHERE id = ?3",
                    params![feedback, now, assignment_id],
                )
                .map_err(|e| CoreError::storage("complete assignment", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!(
                    "assignment {assignment_id} not found"
                )));
            }
            tx.query_row(
                "SELECT * FROM assignments WHERE id = ?1",
                params![assignment_id],
                row_to_assignment,
            )
            .map_err(|e| CoreError::storage("reload assignment after completion", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::PoolConfig;

    fn store() -> Store {
        Store::open_in_memory(PoolConfig::default()).unwrap()
    }

    fn upsert(store: &Store, id: &str, title: &str) -> Task {
        TaskStore::new(store)
            .upsert_batch(vec![TaskUpsert {
                id: id.into(),
                repo_id: "repo1".into(),
                source_file: None,
                title: title.into(),
                description: None,
                priority: TaskPriority::Medium,
                parent_task: None,
                effort: None,
                tags: vec!["rust".into()],
            }])
            .unwrap()
            .remove(0)
    }

    #[test]
    fn upsert_on_conflict_only_updates_mutable_fields() {
        let store = store();
        let t1 = upsert(&store, "t1", "first");
        assert_eq!(t1.status, "pending");
        let t2 = upsert(&store, "t1", "second");
        assert_eq!(t2.id, t1.id);
        assert_eq!(t2.title, "second");
        assert_eq!(t2.created_at, t1.created_at);
    }

    #[test]
    fn completing_a_task_sets_completed_at() {
        let store = store();
        upsert(&store, "t1", "task");
        let tasks = TaskStore::new(&store);
        let updated = tasks.update_task_status("t1", "completed", None).unwrap();
        assert!(updated.completed_at.is_some());
    }

    #[test]
    fn add_worker_increments_assignment_worker_count() {
        let store = store();
        upsert(&store, "t1", "task");
        let tasks = TaskStore::new(&store);
        let assignment = tasks
            .create_assignment("t1", "agent-a", "captain", "review")
            .unwrap();
        tasks.add_worker(assignment.id, "agent-a").unwrap();
        tasks.add_worker(assignment.id, "agent-b").unwrap();
        let reloaded = tasks.get_assignment(assignment.id).unwrap();
        assert_eq!(reloaded.worker_count, 2);
    }

    #[test]
    fn request_rework_increments_review_attempt_and_clears_completed_at() {
        let store = store();
        upsert(&store, "t1", "task");
        let tasks = TaskStore::new(&store);
        let assignment = tasks
            .create_assignment("t1", "agent-a", "captain", "review")
            .unwrap();
        tasks.complete_assignment(assignment.id, "looks good").unwrap();
        let reworked = tasks.request_rework(assignment.id, "needs changes").unwrap();
        assert_eq!(reworked.review_attempt, 1);
        assert!(reworked.completed_at.is_none());
        assert_eq!(reworked.status, AssignmentStatus::Rework);
    }

    #[test]
    fn get_active_assignment_returns_most_recent_in_progress() {
        let store = store();
        upsert(&store, "t1", "task");
        let tasks = TaskStore::new(&store);
        let a1 = tasks.create_assignment("t1", "agent-a", "captain", "review").unwrap();
        tasks
            .update_worker_status(
                tasks.add_worker(a1.id, "agent-a").unwrap().id,
                WorkerStatus::InProgress,
                None,
                None,
            )
            .unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE assignments SET status = 'in_progress' WHERE id = ?1",
                    params![a1.id],
                )
                .map_err(|e| CoreError::storage("seed", e))
            })
            .unwrap();

        let active = tasks.get_active_assignment("agent-a").unwrap();
        assert_eq!(active.unwrap().id, a1.id);
    }
}
