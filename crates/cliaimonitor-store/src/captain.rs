//! Captain context store (spec §4.G).

use chrono::Utc;
use cliaimonitor_core::{CaptainContextEntry, CoreError, CoreResult, SessionLogEntry};
use rusqlite::{params, Row};

use crate::kernel::Store;

fn row_to_entry(row: &Row) -> rusqlite::Result<CaptainContextEntry> {
    Ok(CaptainContextEntry {
        key: row.get("key")?,
        value: row.get("value")?,
        priority: row.get("priority")?,
        max_age_hours: row.get("max_age_hours")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_log_entry(row: &Row) -> rusqlite::Result<SessionLogEntry> {
    Ok(SessionLogEntry {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        entry: row.get("entry")?,
        created_at: row.get("created_at")?,
    })
}

pub struct CaptainStore<'a> {
    store: &'a Store,
}

impl<'a> CaptainStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Upsert by key; on conflict updates value/priority/max-age and
    /// bumps `updated_at` (spec §4.G).
    pub fn upsert_context(
        &self,
        key: &str,
        value: &str,
        priority: i64,
        max_age_hours: i64,
    ) -> CoreResult<CaptainContextEntry> {
        self.store.with_conn(|conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO captain_context (key, value, priority, max_age_hours, \
                     created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
                 ON CONFLICT(key) DO UPDATE SET \
                     value = excluded.value, \
                     priority = excluded.priority, \
                     max_age_hours = excluded.max_age_hours, \
                     updated_at = excluded.updated_at",
                params![key, value, priority, max_age_hours, now],
            )
            .map_err(|e| CoreError::storage("upsert captain context", e))?;
            conn.query_row(
                "SELECT * FROM captain_context WHERE key = ?1",
                params![key],
                row_to_entry,
            )
            .map_err(|e| CoreError::storage("reload captain context", e))
        })
    }

    /// Ordered by priority desc then updated_at desc (spec §4.G).
    pub fn get_all_context(&self) -> CoreResult<Vec<CaptainContextEntry>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM captain_context ORDER BY priority DESC, updated_at DESC",
                )
                .map_err(|e| CoreError::storage("prepare get_all_context", e))?;
            let rows = stmt
                .query_map([], row_to_entry)
                .map_err(|e| CoreError::storage("query captain context", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect captain context", e))
        })
    }

    /// Deletes rows where `max_age_hours > 0` and `now > updated_at +
    /// max_age_hours`; returns the number removed (spec §4.G).
    pub fn clean_expired_context(&self) -> CoreResult<u64> {
        self.store.with_conn(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM captain_context \
                     WHERE max_age_hours > 0 \
                       AND datetime(updated_at, '+' || max_age_hours || ' hours') < datetime(?1)",
                    params![Utc::now()],
                )
                .map_err(|e| CoreError::storage("clean expired context", e))?;
            Ok(affected as u64)
        })
    }

    /// Concatenates `"[key] (priority: P) (expires in D)\nvalue\n\n"`
    /// blocks in priority order; the expiry suffix is omitted when the
    /// entry never expires or has already expired (spec §4.G).
    pub fn get_context_summary(&self) -> CoreResult<String> {
        let entries = self.get_all_context()?;
        let now = Utc::now();
        let mut out = String::new();
        for entry in entries {
            let suffix = match entry.expires_at() {
                Some(expiry) if expiry > now => {
                    let remaining = expiry - now;
                    format!(" (expires in {}h)", remaining.num_hours().max(0))
                }
                _ => String::new(),
            };
            out.push_str(&format!(
                "[{}] (priority: {}){}\n{}\n\n",
                entry.key, entry.priority, suffix, entry.value
            ));
        }
        Ok(out)
    }

    pub fn append_session_log(&self, session_id: &str, entry: &str) -> CoreResult<SessionLogEntry> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session_log (session_id, entry, created_at) VALUES (?1, ?2, ?3)",
                params![session_id, entry, Utc::now()],
            )
            .map_err(|e| CoreError::storage("append session log", e))?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                "SELECT * FROM session_log WHERE id = ?1",
                params![id],
                row_to_log_entry,
            )
            .map_err(|e| CoreError::storage("reload session log entry", e))
        })
    }

    pub fn session_log(&self, session_id: &str) -> CoreResult<Vec<SessionLogEntry>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM session_log WHERE session_id = ?1 ORDER BY id")
                .map_err(|e| CoreError::storage("prepare session log", e))?;
            let rows = stmt
                .query_map(params![session_id], row_to_log_entry)
                .map_err(|e| CoreError::storage("query session log", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect session log", e))
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

    #[test]
    fn upsert_bumps_updated_at_and_overwrites_value() {
        let store = store();
        let captain = CaptainStore::new(&store);
        captain.upsert_context("goal", "ship v1", 5, 0).unwrap();
        let updated = captain.upsert_context("goal", "ship v2", 9, 0).unwrap();
        assert_eq!(updated.value, "ship v2");
        assert_eq!(updated.priority, 9);
    }

    #[test]
    fn get_all_context_orders_by_priority_then_recency() {
        let store = store();
        let captain = CaptainStore::new(&store);
        captain.upsert_context("low", "l", 1, 0).unwrap();
        captain.upsert_context("high", "h", 9, 0).unwrap();
        let all = captain.get_all_context().unwrap();
        assert_eq!(all[0].key, "high");
        assert_eq!(all[1].key, "low");
    }

    #[test]
    fn clean_expired_context_only_removes_aged_rows_with_nonzero_max_age() {
        let store = store();
        let captain = CaptainStore::new(&store);
        captain.upsert_context("never", "v", 1, 0).unwrap();
        captain.upsert_context("stale", "v", 1, 1).unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE captain_context SET updated_at = datetime('now', '-2 hours') \
                     WHERE key = 'stale'",
                    [],
                )
                .map_err(|e| CoreError::storage("seed", e))
            })
            .unwrap();

        let removed = captain.clean_expired_context().unwrap();
        assert_eq!(removed, 1);
        let remaining = captain.get_all_context().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, "never");
    }

    #[test]
    fn summary_omits_expiry_suffix_when_never_expiring() {
        let store = store();
        let captain = CaptainStore::new(&store);
        captain.upsert_context("goal", "ship it", 5, 0).unwrap();
        let summary = captain.get_context_summary().unwrap();
        assert!(summary.contains("[goal] (priority: 5)\nship it"));
        assert!(!summary.contains("expires in"));
    }

    #[test]
    fn session_log_is_append_only_and_ordered() {
        let store = store();
        let captain = CaptainStore::new(&store);
        captain.append_session_log("s1", "started").unwrap();
        captain.append_session_log("s1", "finished").unwrap();
        let log = captain.session_log("s1").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].entry, "started");
        assert_eq!(log[1].entry, "finished");
    }
}
