//! Store kernel (spec §4.B).
//!
//! `rusqlite::Connection` is not `Sync`, so a true multi-connection pool
//! would require a connection-per-thread abstraction (e.g. `r2d2`) that
//! buys nothing here: spec §4.B itself requires every write to serialize
//! at the pool level, which one mutex-guarded connection satisfies
//! directly. `PoolConfig` below still reports the advertised open/idle
//! capacity from spec §4.B so the health probe and config surface match
//! the spec's shape even though the implementation is a single
//! connection (documented as an open-question resolution in DESIGN.md).

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use cliaimonitor_core::{CoreError, CoreResult, Health};
use parking_lot::Mutex;
use rusqlite::Connection;

use crate::schema;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_open: u32,
    pub max_idle: u32,
    pub busy_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 25,
            max_idle: 5,
            busy_timeout_secs: 5,
        }
    }
}

pub struct Store {
    conn: Mutex<Connection>,
    pool_config: PoolConfig,
    last_context_save: AtomicI64,
}

impl Store {
    pub fn open(path: impl AsRef<Path>, pool_config: PoolConfig) -> CoreResult<Self> {
        let mut conn = Connection::open(path).map_err(|e| CoreError::storage("open store", e))?;
        Self::configure_connection(&conn, &pool_config)?;
        schema::open_and_migrate(&mut conn).map_err(|e| CoreError::storage("run migrations", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            pool_config,
            last_context_save: AtomicI64::new(0),
        })
    }

    pub fn open_in_memory(pool_config: PoolConfig) -> CoreResult<Self> {
        let mut conn =
            Connection::open_in_memory().map_err(|e| CoreError::storage("open store", e))?;
        Self::configure_connection(&conn, &pool_config)?;
        schema::open_and_migrate(&mut conn).map_err(|e| CoreError::storage("run migrations", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            pool_config,
            last_context_save: AtomicI64::new(0),
        })
    }

    fn configure_connection(conn: &Connection, cfg: &PoolConfig) -> CoreResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| CoreError::storage("set journal_mode", e))?;
        conn.busy_timeout(std::time::Duration::from_secs(cfg.busy_timeout_secs))
            .map_err(|e| CoreError::storage("set busy_timeout", e))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| CoreError::storage("enable foreign_keys", e))?;
        Ok(())
    }

    /// Begin an immediate transaction, run `f`, commit on `Ok`, roll back
    /// on `Err` (spec §4.B). All store mutations that touch more than one
    /// table go through this helper.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut guard = self.conn.lock();
        let tx = guard
            .transaction()
            .map_err(|e| CoreError::storage("begin transaction", e))?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| CoreError::storage("commit transaction", e))?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback();
                Err(err)
            }
        }
    }

    /// Run `f` against the connection without an explicit transaction
    /// wrapper (used for single-statement reads and writes where SQLite's
    /// implicit per-statement transaction already suffices).
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> CoreResult<T>) -> CoreResult<T> {
        let guard = self.conn.lock();
        f(&guard)
    }

    pub fn pool_config(&self) -> PoolConfig {
        self.pool_config
    }

    pub fn note_context_save(&self) {
        self.last_context_save
            .store(Utc::now().timestamp(), Ordering::SeqCst);
    }

    pub fn health(&self, db_path: Option<&Path>) -> CoreResult<Health> {
        self.with_conn(|conn| {
            let schema_version = schema::current_version(conn)
                .map_err(|e| CoreError::storage("read schema_version", e))?;
            let agent_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM agents", [], |r| r.get(0))
                .map_err(|e| CoreError::storage("count agents", e))?;
            let task_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
                .map_err(|e| CoreError::storage("count tasks", e))?;
            let learning_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM knowledge", [], |r| r.get(0))
                .map_err(|e| CoreError::storage("count knowledge", e))?;
            let context_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM captain_context", [], |r| r.get(0))
                .map_err(|e| CoreError::storage("count captain_context", e))?;

            let last_save = self.last_context_save.load(Ordering::SeqCst);
            let last_context_save = if last_save == 0 {
                None
            } else {
                chrono::DateTime::from_timestamp(last_save, 0)
            };

            let db_size_bytes = db_path
                .and_then(|p| std::fs::metadata(p).ok())
                .map(|m| m.len() as i64)
                .unwrap_or(0);

            Ok(Health {
                connected: true,
                schema_version,
                agent_count,
                task_count,
                learning_count,
                context_count,
                last_context_save,
                db_size_bytes,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_reports_health() {
        let store = Store::open_in_memory(PoolConfig::default()).unwrap();
        let health = store.health(None).unwrap();
        assert!(health.connected);
        assert_eq!(health.schema_version, schema::CURRENT_VERSION);
        assert_eq!(health.agent_count, 0);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = Store::open_in_memory(PoolConfig::default()).unwrap();
        let result: CoreResult<()> = store.transaction(|tx| {
            tx.execute(
                "INSERT INTO agents (agent_id, config_name, role, status, spawned_at) \
                 VALUES ('a1', 'cfg', 'worker', 'starting', '2024-01-01T00:00:00Z')",
                [],
            )
            .map_err(|e| CoreError::storage("insert", e))?;
            Err(CoreError::Validation("force rollback".into()))
        });
        assert!(result.is_err());
        let health = store.health(None).unwrap();
        assert_eq!(health.agent_count, 0);
    }
}
