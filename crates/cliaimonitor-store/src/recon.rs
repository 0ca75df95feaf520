//! Recon findings store — layered persistence (spec §4.H).
//!
//! Cold: the relational tables below, authoritative. Warm: markdown
//! files regenerated from cold. Hot: a section spliced into `CLAUDE.md`.
//! Only cold is ever read back; warm/hot are write-only projections.

use std::path::Path;

use chrono::Utc;
use cliaimonitor_core::{
    CoreError, CoreResult, Environment, Finding, FindingHistoryEntry, FindingSeverity,
    FindingStatus, Scan,
};
use rusqlite::{params, OptionalExtension, Row};
use tracing::warn;

use crate::kernel::Store;

const HOT_SECTION_HEADING: &str = "## Recon Intelligence";

/// Fixed severity grouping order for warm-layer markdown (spec §4.H).
const SEVERITY_ORDER: [FindingSeverity; 5] = [
    FindingSeverity::Critical,
    FindingSeverity::High,
    FindingSeverity::Medium,
    FindingSeverity::Low,
    FindingSeverity::Info,
];

fn row_to_environment(row: &Row) -> rusqlite::Result<Environment> {
    Ok(Environment {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_scan(row: &Row) -> rusqlite::Result<Scan> {
    Ok(Scan {
        id: row.get("id")?,
        environment_id: row.get("environment_id")?,
        scan_type: row.get("scan_type")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn row_to_finding(row: &Row) -> rusqlite::Result<Finding> {
    let severity: String = row.get("severity")?;
    let status: String = row.get("status")?;
    Ok(Finding {
        id: row.get("id")?,
        environment_id: row.get("environment_id")?,
        scan_id: row.get("scan_id")?,
        category: row.get("category")?,
        severity: FindingSeverity::parse(&severity).unwrap_or(FindingSeverity::Info),
        status: FindingStatus::parse(&status).unwrap_or(FindingStatus::Open),
        title: row.get("title")?,
        description: row.get("description")?,
        recommendation: row.get("recommendation")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_history(row: &Row) -> rusqlite::Result<FindingHistoryEntry> {
    Ok(FindingHistoryEntry {
        id: row.get("id")?,
        finding_id: row.get("finding_id")?,
        action: row.get("action")?,
        details: row.get("details")?,
        created_at: row.get("created_at")?,
    })
}

pub struct ReconStore<'a> {
    store: &'a Store,
}

impl<'a> ReconStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn create_environment(&self, name: &str, description: Option<&str>) -> CoreResult<Environment> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO environments (name, description, created_at) VALUES (?1, ?2, ?3)",
                params![name, description, Utc::now()],
            )
            .map_err(|e| CoreError::storage("create environment", e))?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                "SELECT * FROM environments WHERE id = ?1",
                params![id],
                row_to_environment,
            )
            .map_err(|e| CoreError::storage("reload environment", e))
        })
    }

    pub fn start_scan(&self, environment_id: i64, scan_type: &str) -> CoreResult<Scan> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scans (environment_id, scan_type, started_at) VALUES (?1, ?2, ?3)",
                params![environment_id, scan_type, Utc::now()],
            )
            .map_err(|e| CoreError::storage("start scan", e))?;
            let id = conn.last_insert_rowid();
            conn.query_row("SELECT * FROM scans WHERE id = ?1", params![id], row_to_scan)
                .map_err(|e| CoreError::storage("reload scan", e))
        })
    }

    pub fn complete_scan(&self, scan_id: i64) -> CoreResult<Scan> {
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE scans SET completed_at = ?1 WHERE id = ?2",
                params![Utc::now(), scan_id],
            )
            .map_err(|e| CoreError::storage("complete scan", e))?;
            conn.query_row("SELECT * FROM scans WHERE id = ?1", params![scan_id], row_to_scan)
                .map_err(|e| CoreError::storage("reload scan", e))
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_finding(
        &self,
        environment_id: i64,
        scan_id: Option<i64>,
        category: &str,
        severity: FindingSeverity,
        title: &str,
        description: Option<&str>,
        recommendation: Option<&str>,
    ) -> CoreResult<Finding> {
        self.store.transaction(|tx| {
            let now = Utc::now();
            tx.execute(
                "INSERT INTO findings (environment_id, scan_id, category, severity, status, \
                     title, description, recommendation, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 'open', ?5, ?6, ?7, ?8, ?8)",
                params![
                    environment_id,
                    scan_id,
                    category,
                    severity.as_str(),
                    title,
                    description,
                    recommendation,
                    now,
                ],
            )
            .map_err(|e| CoreError::storage("record finding", e))?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO finding_history (finding_id, action, details, created_at) \
                 VALUES (?1, 'created', NULL, ?2)",
                params![id, now],
            )
            .map_err(|e| CoreError::storage("record finding history", e))?;

            tx.query_row("SELECT * FROM findings WHERE id = ?1", params![id], row_to_finding)
                .map_err(|e| CoreError::storage("reload finding", e))
        })
    }

    pub fn update_finding_status(
        &self,
        finding_id: i64,
        status: FindingStatus,
        details: Option<&str>,
    ) -> CoreResult<Finding> {
        self.store.transaction(|tx| {
            let now = Utc::now();
            let affected = tx
                .execute(
                    "UPDATE findings SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now, finding_id],
                )
                .map_err(|e| CoreError::storage("update finding status", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!("finding {finding_id} not found")));
            }
            tx.execute(
                "INSERT INTO finding_history (finding_id, action, details, created_at) \
                 VALUES (?1, 'status_change', ?2, ?3)",
                params![finding_id, details, now],
            )
            .map_err(|e| CoreError::storage("record finding history", e))?;
            tx.query_row(
                "SELECT * FROM findings WHERE id = ?1",
                params![finding_id],
                row_to_finding,
            )
            .map_err(|e| CoreError::storage("reload finding", e))
        })
    }

    pub fn finding_history(&self, finding_id: i64) -> CoreResult<Vec<FindingHistoryEntry>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM finding_history WHERE finding_id = ?1 ORDER BY id")
                .map_err(|e| CoreError::storage("prepare finding history", e))?;
            let rows = stmt
                .query_map(params![finding_id], row_to_history)
                .map_err(|e| CoreError::storage("query finding history", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect finding history", e))
        })
    }

    pub fn findings_by_environment(&self, environment_id: i64) -> CoreResult<Vec<Finding>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM findings WHERE environment_id = ?1 ORDER BY severity, id",
                )
                .map_err(|e| CoreError::storage("prepare findings by environment", e))?;
            let rows = stmt
                .query_map(params![environment_id], row_to_finding)
                .map_err(|e| CoreError::storage("query findings", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect findings", e))
        })
    }

    /// Regenerates `docs/recon/{architecture, vulnerabilities,
    /// dependencies, infrastructure}.md`, grouped by severity in the
    /// fixed critical→info order, with status icons (spec §4.H).
    /// Categories that don't map to one of the four warm files are
    /// skipped — there is no catch-all warm document.
    pub fn sync_to_warm_layer(&self, docs_dir: &Path) -> CoreResult<()> {
        let categories = ["architecture", "vulnerabilities", "dependencies", "infrastructure"];
        let recon_dir = docs_dir.join("recon");
        std::fs::create_dir_all(&recon_dir)
            .map_err(|e| CoreError::Unavailable(format!("create docs/recon: {e}")))?;

        for category in categories {
            let findings = self.store.with_conn(|conn| {
                let mut stmt = conn
                    .prepare("SELECT * FROM findings WHERE category = ?1 ORDER BY severity, id")
                    .map_err(|e| CoreError::storage("prepare warm layer findings", e))?;
                let rows = stmt
                    .query_map(params![category], row_to_finding)
                    .map_err(|e| CoreError::storage("query warm layer findings", e))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| CoreError::storage("collect warm layer findings", e))
            })?;

            let mut doc = format!("# {}\n\n", titlecase(category));
            for severity in SEVERITY_ORDER {
                let bucket: Vec<&Finding> =
                    findings.iter().filter(|f| f.severity == severity).collect();
                if bucket.is_empty() {
                    continue;
                }
                doc.push_str(&format!("## {}\n\n", severity.as_str()));
                for finding in bucket {
                    doc.push_str(&format!(
                        "- {} **{}** — {}\n",
                        finding.status.icon(),
                        finding.title,
                        finding.description.as_deref().unwrap_or("")
                    ));
                }
                doc.push('\n');
            }

            let path = recon_dir.join(format!("{category}.md"));
            std::fs::write(&path, doc)
                .map_err(|e| CoreError::Unavailable(format!("write {}: {e}", path.display())))?;
        }
        Ok(())
    }

    /// Replaces the `## Recon Intelligence` section of `CLAUDE.md` in
    /// place (located by heading) or appends it if absent; surrounding
    /// content is preserved (spec §4.H).
    pub fn sync_to_hot_layer(&self, claude_md: &Path) -> CoreResult<()> {
        let open_critical = self.top_open(FindingSeverity::Critical, 10)?;
        let open_high = self.top_open(FindingSeverity::High, 10)?;

        let mut section = String::new();
        section.push_str(HOT_SECTION_HEADING);
        section.push_str("\n\n");
        section.push_str("### Critical\n\n");
        for f in &open_critical {
            section.push_str(&format!("- {} (see `docs/recon/{}.md`)\n", f.title, f.category));
        }
        section.push_str("\n### High\n\n");
        for f in &open_high {
            section.push_str(&format!("- {} (see `docs/recon/{}.md`)\n", f.title, f.category));
        }
        section.push('\n');

        let existing = std::fs::read_to_string(claude_md).unwrap_or_default();
        let updated = splice_section(&existing, &section);
        std::fs::write(claude_md, updated)
            .map_err(|e| CoreError::Unavailable(format!("write {}: {e}", claude_md.display())))?;
        Ok(())
    }

    fn top_open(&self, severity: FindingSeverity, limit: usize) -> CoreResult<Vec<Finding>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM findings WHERE severity = ?1 AND status = 'open' \
                     ORDER BY created_at DESC LIMIT ?2",
                )
                .map_err(|e| CoreError::storage("prepare top open findings", e))?;
            let rows = stmt
                .query_map(params![severity.as_str(), limit as i64], row_to_finding)
                .map_err(|e| CoreError::storage("query top open findings", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect top open findings", e))
        })
    }

    /// Best-effort reverse path: logs and returns without reconstructing
    /// state (spec §4.H: "does not currently reconstruct").
    pub fn load_from_layers(&self, docs_dir: &Path) {
        warn!(
            path = %docs_dir.display(),
            "load_from_layers is best-effort only and does not reconstruct cold state"
        );
    }
}

fn titlecase(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn splice_section(existing: &str, new_section: &str) -> String {
    match existing.find(HOT_SECTION_HEADING) {
        Some(start) => {
            let rest = &existing[start + HOT_SECTION_HEADING.len()..];
            let end = rest
                .find("\n## ")
                .map(|offset| start + HOT_SECTION_HEADING.len() + offset)
                .unwrap_or(existing.len());
            format!("{}{}{}", &existing[..start], new_section, &existing[end..])
        }
        None => {
            if existing.is_empty() {
                new_section.to_string()
            } else {
                format!("{}\n\n{}", existing.trim_end(), new_section)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::PoolConfig;
    use tempfile::tempdir;

    fn store() -> Store {
        Store::open_in_memory(PoolConfig::default()).unwrap()
    }

    #[test]
    fn warm_layer_groups_by_severity_with_status_icons() {
        let store = store();
        let recon = ReconStore::new(&store);
        let env = recon.create_environment("prod", None).unwrap();
        recon
            .record_finding(
                env.id,
                None,
                "vulnerabilities",
                FindingSeverity::Critical,
                "Unpatched CVE",
                Some("details"),
                None,
            )
            .unwrap();

        let dir = tempdir().unwrap();
        recon.sync_to_warm_layer(dir.path()).unwrap();
        let content = std::fs::read_to_string(dir.path().join("recon/vulnerabilities.md")).unwrap();
        assert!(content.contains("Unpatched CVE"));
        assert!(content.contains("\u{1F534}"));
    }

    #[test]
    fn hot_layer_replaces_existing_section_in_place() {
        let store = store();
        let recon = ReconStore::new(&store);
        let env = recon.create_environment("prod", None).unwrap();
        recon
            .record_finding(
                env.id,
                None,
                "architecture",
                FindingSeverity::Critical,
                "Single point of failure",
                None,
                None,
            )
            .unwrap();

        let dir = tempdir().unwrap();
        let claude_md = dir.path().join("CLAUDE.md");
        std::fs::write(&claude_md, "# Project\n\nSome intro.\n\n## Other Section\n\nstuff\n").unwrap();

        recon.sync_to_hot_layer(&claude_md).unwrap();
        let first = std::fs::read_to_string(&claude_md).unwrap();
        assert!(first.contains("## Recon Intelligence"));
        assert!(first.contains("Single point of failure"));
        assert!(first.contains("## Other Section"));

        recon.sync_to_hot_layer(&claude_md).unwrap();
        let second = std::fs::read_to_string(&claude_md).unwrap();
        assert_eq!(second.matches("## Recon Intelligence").count(), 1);
        assert!(second.contains("## Other Section"));
    }
}
