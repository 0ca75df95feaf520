//! Versioned relational schema (spec §4.A).
//!
//! The baseline schema and every migration are compiled into the binary
//! as string constants (spec §9: "file-embedded schema"). `open()` always
//! executes the baseline with `CREATE TABLE IF NOT EXISTS`, then applies
//! any migration whose version exceeds the highest recorded in
//! `schema_version`, each inside its own transaction.
//!
//! Two schema lineages exist in the wild (one ending at v5, one at v14);
//! this store adopts the v14 lineage as canonical, per spec §9's open
//! question, because it is the richer superset (see DESIGN.md).

use rusqlite::{Connection, Error as SqliteError};

pub const CURRENT_VERSION: i64 = 14;

pub const BASELINE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS agents (
    agent_id            TEXT PRIMARY KEY,
    config_name         TEXT NOT NULL,
    role                TEXT NOT NULL,
    project             TEXT,
    status              TEXT NOT NULL,
    pid                 INTEGER,
    last_heartbeat      TEXT,
    current_task        TEXT,
    pane_binding        TEXT,
    model               TEXT,
    color               TEXT,
    shutdown_requested  INTEGER NOT NULL DEFAULT 0,
    shutdown_reason     TEXT,
    spawned_at          TEXT NOT NULL,
    stopped_at          TEXT,
    stop_reason         TEXT
);

CREATE TABLE IF NOT EXISTS pane_history (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id        TEXT NOT NULL,
    action          TEXT NOT NULL,
    status_before   TEXT,
    status_after    TEXT,
    details         TEXT,
    timestamp       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pane_history_agent ON pane_history(agent_id, timestamp, id);

CREATE TABLE IF NOT EXISTS tasks (
    id              TEXT PRIMARY KEY,
    repo_id         TEXT NOT NULL,
    source_file     TEXT,
    title           TEXT NOT NULL,
    description     TEXT,
    priority        TEXT NOT NULL,
    status          TEXT NOT NULL,
    assigned_agent  TEXT,
    parent_task     TEXT,
    effort          TEXT,
    tags            TEXT NOT NULL DEFAULT '[]',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    completed_at    TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_repo ON tasks(repo_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
"#;

pub const MIGRATIONS: &[(i64, &str)] = &[
    (
        2,
        r#"
        CREATE TABLE IF NOT EXISTS assignments (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id         TEXT NOT NULL,
            assigned_to     TEXT NOT NULL,
            assigned_by     TEXT NOT NULL,
            assignment_type TEXT NOT NULL,
            status          TEXT NOT NULL,
            branch_name     TEXT,
            review_feedback TEXT,
            review_attempt  INTEGER NOT NULL DEFAULT 0,
            worker_count    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            completed_at    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_assignments_agent ON assignments(assigned_to, status);
        CREATE INDEX IF NOT EXISTS idx_assignments_task ON assignments(task_id);
        INSERT INTO schema_version (version) VALUES (2);
        "#,
    ),
    (
        3,
        r#"
        CREATE TABLE IF NOT EXISTS assignment_workers (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            assignment_id   INTEGER NOT NULL,
            agent_id        TEXT NOT NULL,
            status          TEXT NOT NULL,
            result          TEXT,
            tokens_used     INTEGER,
            started_at      TEXT,
            completed_at    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_workers_assignment ON assignment_workers(assignment_id);
        INSERT INTO schema_version (version) VALUES (3);
        "#,
    ),
    (
        4,
        r#"
        CREATE TABLE IF NOT EXISTS review_boards (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            assignment_id       INTEGER NOT NULL,
            reviewer_count      INTEGER NOT NULL,
            status              TEXT NOT NULL,
            complexity_score    REAL,
            risk_level          TEXT,
            final_verdict       TEXT,
            aggregated_feedback TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_boards_assignment ON review_boards(assignment_id, id);
        INSERT INTO schema_version (version) VALUES (4);
        "#,
    ),
    (
        5,
        r#"
        CREATE TABLE IF NOT EXISTS defects (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            board_id        INTEGER NOT NULL,
            reviewer_id     TEXT NOT NULL,
            category        TEXT NOT NULL,
            severity        TEXT NOT NULL,
            file            TEXT,
            lines           TEXT,
            title           TEXT NOT NULL,
            description     TEXT,
            suggested_fix   TEXT,
            status          TEXT NOT NULL DEFAULT 'open',
            resolution      TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_defects_board ON defects(board_id, severity);
        INSERT INTO schema_version (version) VALUES (5);
        "#,
    ),
    (
        6,
        r#"
        CREATE TABLE IF NOT EXISTS reviewer_votes (
            board_id            INTEGER NOT NULL,
            reviewer_id         TEXT NOT NULL,
            approved            INTEGER NOT NULL,
            confidence          INTEGER NOT NULL,
            defects_found       INTEGER NOT NULL,
            review_time_seconds INTEGER NOT NULL,
            tokens_used         INTEGER NOT NULL,
            PRIMARY KEY (board_id, reviewer_id)
        );
        INSERT INTO schema_version (version) VALUES (6);
        "#,
    ),
    (
        7,
        r#"
        CREATE TABLE IF NOT EXISTS agent_quality_scores (
            agent_id                    TEXT NOT NULL,
            role                        TEXT NOT NULL,
            total_submissions           INTEGER NOT NULL DEFAULT 0,
            total_approvals             INTEGER NOT NULL DEFAULT 0,
            approved_first_try          INTEGER NOT NULL DEFAULT 0,
            total_review_cycles         INTEGER NOT NULL DEFAULT 0,
            defects_received            INTEGER NOT NULL DEFAULT 0,
            critical_defects_received   INTEGER NOT NULL DEFAULT 0,
            total_reviews               INTEGER NOT NULL DEFAULT 0,
            defects_found               INTEGER NOT NULL DEFAULT 0,
            critical_defects_found      INTEGER NOT NULL DEFAULT 0,
            true_positive_defects       INTEGER NOT NULL DEFAULT 0,
            false_positive_defects      INTEGER NOT NULL DEFAULT 0,
            tokens_used                 INTEGER NOT NULL DEFAULT 0,
            value_delivered             REAL NOT NULL DEFAULT 0,
            total_cost                  REAL NOT NULL DEFAULT 0,
            approval_rate               REAL NOT NULL DEFAULT 0,
            first_pass_rate             REAL NOT NULL DEFAULT 0,
            defect_density              REAL NOT NULL DEFAULT 0,
            avg_review_cycles           REAL NOT NULL DEFAULT 0,
            defect_find_rate            REAL NOT NULL DEFAULT 0,
            detection_accuracy          REAL NOT NULL DEFAULT 0,
            cost_efficiency             REAL NOT NULL DEFAULT 0,
            quality_score               REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (agent_id, role)
        );
        INSERT INTO schema_version (version) VALUES (7);
        "#,
    ),
    (
        8,
        r#"
        CREATE TABLE IF NOT EXISTS knowledge (
            id              TEXT PRIMARY KEY,
            agent_type      TEXT NOT NULL,
            category        TEXT NOT NULL,
            title           TEXT NOT NULL,
            content         TEXT NOT NULL,
            tags            TEXT NOT NULL DEFAULT '[]',
            source          TEXT,
            use_count       INTEGER NOT NULL DEFAULT 0,
            last_used       TEXT,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_knowledge_category ON knowledge(category);
        CREATE INDEX IF NOT EXISTS idx_knowledge_agent_type ON knowledge(agent_type);
        INSERT INTO schema_version (version) VALUES (8);
        "#,
    ),
    (
        9,
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_terms (
            doc_id  TEXT NOT NULL,
            term    TEXT NOT NULL,
            tf      REAL NOT NULL,
            PRIMARY KEY (doc_id, term)
        );
        CREATE INDEX IF NOT EXISTS idx_knowledge_terms_term ON knowledge_terms(term);

        CREATE TABLE IF NOT EXISTS term_stats (
            term        TEXT NOT NULL,
            agent_type  TEXT NOT NULL,
            doc_count   INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (term, agent_type)
        );
        INSERT INTO schema_version (version) VALUES (9);
        "#,
    ),
    (
        10,
        r#"
        CREATE TABLE IF NOT EXISTS episodes (
            id              TEXT PRIMARY KEY,
            session_id      TEXT NOT NULL,
            agent_id        TEXT NOT NULL,
            agent_type      TEXT NOT NULL,
            event_type      TEXT NOT NULL,
            title           TEXT NOT NULL,
            content         TEXT NOT NULL,
            project         TEXT,
            importance      REAL NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_episodes_session ON episodes(session_id, created_at);
        INSERT INTO schema_version (version) VALUES (10);
        "#,
    ),
    (
        11,
        r#"
        CREATE TABLE IF NOT EXISTS captain_context (
            key             TEXT PRIMARY KEY,
            value           TEXT NOT NULL,
            priority        INTEGER NOT NULL,
            max_age_hours   INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id  TEXT NOT NULL,
            entry       TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_session_log_session ON session_log(session_id, id);
        INSERT INTO schema_version (version) VALUES (11);
        "#,
    ),
    (
        12,
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_type        TEXT NOT NULL,
            title           TEXT NOT NULL,
            content         TEXT NOT NULL,
            format          TEXT NOT NULL DEFAULT 'markdown',
            author          TEXT NOT NULL,
            project         TEXT,
            task_id         TEXT,
            assignment_id   INTEGER,
            tags            TEXT NOT NULL DEFAULT '[]',
            status          TEXT NOT NULL DEFAULT 'draft',
            version         INTEGER NOT NULL DEFAULT 1,
            parent_id       INTEGER,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(doc_type);
        CREATE INDEX IF NOT EXISTS idx_documents_assignment ON documents(assignment_id);
        INSERT INTO schema_version (version) VALUES (12);
        "#,
    ),
    (
        13,
        r#"
        CREATE TABLE IF NOT EXISTS environments (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL UNIQUE,
            description     TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scans (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            environment_id  INTEGER NOT NULL REFERENCES environments(id) ON DELETE CASCADE,
            scan_type       TEXT NOT NULL,
            started_at      TEXT NOT NULL,
            completed_at    TEXT
        );

        CREATE TABLE IF NOT EXISTS findings (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            environment_id  INTEGER NOT NULL REFERENCES environments(id) ON DELETE CASCADE,
            scan_id         INTEGER,
            category        TEXT NOT NULL,
            severity        TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'open',
            title           TEXT NOT NULL,
            description     TEXT,
            recommendation  TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_findings_env ON findings(environment_id, severity, status);

        CREATE TABLE IF NOT EXISTS finding_history (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            finding_id      INTEGER NOT NULL REFERENCES findings(id) ON DELETE CASCADE,
            action          TEXT NOT NULL,
            details         TEXT,
            created_at      TEXT NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (13);
        "#,
    ),
    (
        14,
        r#"
        CREATE TABLE IF NOT EXISTS prompt_templates (
            name            TEXT PRIMARY KEY,
            content         TEXT NOT NULL,
            content_hash    TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (14);
        "#,
    ),
];

/// Highest version recorded in `schema_version`, or 0 if the table is
/// empty (a brand-new store before the baseline's own row exists).
pub fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Run a single migration's SQL, tolerating "duplicate column name"
/// errors from `ALTER TABLE ... ADD COLUMN` statements that a prior,
/// partially-applied run of this same migration already completed
/// (spec §4.A).
fn execute_migration(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    match conn.execute_batch(sql) {
        Ok(()) => Ok(()),
        Err(SqliteError::SqliteFailure(_, Some(msg))) if msg.contains("duplicate column name") => {
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Execute the baseline schema, then apply every migration newer than
/// the store's current version, each inside its own transaction. A
/// migration failure aborts the open call (spec §7).
pub fn open_and_migrate(conn: &mut Connection) -> rusqlite::Result<i64> {
    conn.execute_batch(BASELINE_SQL)?;
    // The baseline's own bootstrap row: a fresh store has no
    // schema_version rows at all until one migration lands, so treat an
    // empty table as version 1 (the baseline).
    let existing = current_version(conn)?;
    if existing == 0 {
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    }

    for (version, sql) in MIGRATIONS {
        let applied = current_version(conn)?;
        if *version <= applied {
            continue;
        }
        let tx = conn.transaction()?;
        execute_migration(&tx, sql)?;
        tx.commit()?;
    }

    current_version(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_fresh_store_to_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        let version = open_and_migrate(&mut conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn migration_is_idempotent_across_reopen() {
        let mut conn = Connection::open_in_memory().unwrap();
        open_and_migrate(&mut conn).unwrap();
        let version = open_and_migrate(&mut conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }
}
