//! RAG store (spec §4.F).

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use cliaimonitor_core::{CoreError, CoreResult, Episode, EpisodeEventType, Knowledge, RagStats, ScoredKnowledge};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, OptionalExtension, Row};

use crate::kernel::Store;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9_]+").unwrap());

/// ~40-word English stopword set (spec §4.F).
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
        "he", "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was",
        "were", "will", "with", "you", "your", "i", "we", "they", "them", "their", "not", "no",
        "can", "do", "does",
    ]
    .into_iter()
    .collect()
});

/// Deterministic, pure tokenizer: lowercase, extract `[a-z0-9_]+` runs,
/// drop tokens shorter than 2 and stopwords (spec §4.F).
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() >= 2 && !STOPWORDS.contains(t.as_str()))
        .collect()
}

fn row_to_knowledge(row: &Row) -> rusqlite::Result<Knowledge> {
    let tags: String = row.get("tags")?;
    Ok(Knowledge {
        id: row.get("id")?,
        agent_type: row.get("agent_type")?,
        category: row.get("category")?,
        title: row.get("title")?,
        content: row.get("content")?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        source: row.get("source")?,
        use_count: row.get("use_count")?,
        last_used: row.get("last_used")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_episode(row: &Row) -> rusqlite::Result<Episode> {
    let event_type: String = row.get("event_type")?;
    Ok(Episode {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        agent_id: row.get("agent_id")?,
        agent_type: row.get("agent_type")?,
        event_type: EpisodeEventType::parse(&event_type).unwrap_or(EpisodeEventType::Action),
        title: row.get("title")?,
        content: row.get("content")?,
        project: row.get("project")?,
        importance: row.get("importance")?,
        created_at: row.get("created_at")?,
    })
}

pub struct RagStore<'a> {
    store: &'a Store,
}

impl<'a> RagStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Tokenizes title+content, computes augmented term frequency, and
    /// writes the knowledge row plus its term index in one transaction
    /// (spec §4.F). `term_stats.doc_count` is a per-term *distinct
    /// document* counter, so re-storing the same id must not re-count
    /// terms it already contributed — only the symmetric difference
    /// between the old and new term sets moves the counter.
    pub fn store_knowledge(&self, knowledge: Knowledge) -> CoreResult<Knowledge> {
        self.store.transaction(|tx| {
            let previous_agent_type: Option<String> = tx
                .query_row(
                    "SELECT agent_type FROM knowledge WHERE id = ?1",
                    params![knowledge.id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| CoreError::storage("look up previous knowledge row", e))?;

            let mut old_terms_stmt = tx
                .prepare("SELECT term FROM knowledge_terms WHERE doc_id = ?1")
                .map_err(|e| CoreError::storage("prepare old term lookup", e))?;
            let old_terms: HashSet<String> = old_terms_stmt
                .query_map(params![knowledge.id], |r| r.get::<_, String>(0))
                .map_err(|e| CoreError::storage("query old term rows", e))?
                .collect::<rusqlite::Result<HashSet<_>>>()
                .map_err(|e| CoreError::storage("collect old term rows", e))?;
            drop(old_terms_stmt);

            let tags = serde_json::to_string(&knowledge.tags)
                .map_err(|e| CoreError::Validation(format!("serialize tags: {e}")))?;
            tx.execute(
                "INSERT INTO knowledge (id, agent_type, category, title, content, tags, source, \
                     use_count, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8) \
                 ON CONFLICT(id) DO UPDATE SET \
                     agent_type = excluded.agent_type, \
                     category = excluded.category, \
                     title = excluded.title, \
                     content = excluded.content, \
                     tags = excluded.tags, \
                     source = excluded.source",
                params![
                    knowledge.id,
                    knowledge.agent_type,
                    knowledge.category,
                    knowledge.title,
                    knowledge.content,
                    tags,
                    knowledge.source,
                    Utc::now(),
                ],
            )
            .map_err(|e| CoreError::storage("upsert knowledge", e))?;

            tx.execute(
                "DELETE FROM knowledge_terms WHERE doc_id = ?1",
                params![knowledge.id],
            )
            .map_err(|e| CoreError::storage("clear stale term rows", e))?;

            let combined = format!("{} {}", knowledge.title, knowledge.content);
            let tokens = tokenize(&combined);
            let mut counts: HashMap<&str, i64> = HashMap::new();
            for t in &tokens {
                *counts.entry(t.as_str()).or_insert(0) += 1;
            }
            let max_count = counts.values().copied().max().unwrap_or(1) as f64;

            // Terms this doc contributed before but no longer does: give
            // back the distinct-document count, scoped to whichever
            // agent_type the doc carried when it first set that count.
            let stale_agent_type = previous_agent_type.as_deref().unwrap_or(&knowledge.agent_type);
            for term in old_terms.iter().filter(|t| !counts.contains_key(t.as_str())) {
                tx.execute(
                    "UPDATE term_stats SET doc_count = MAX(doc_count - 1, 0) \
                     WHERE term = ?1 AND agent_type = ?2",
                    params![term, stale_agent_type],
                )
                .map_err(|e| CoreError::storage("decrement stale term doc count", e))?;
            }

            for (term, count) in &counts {
                let tf = 0.5 + 0.5 * (*count as f64 / max_count);
                tx.execute(
                    "INSERT INTO knowledge_terms (doc_id, term, tf) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(doc_id, term) DO UPDATE SET tf = excluded.tf",
                    params![knowledge.id, term, tf],
                )
                .map_err(|e| CoreError::storage("insert term row", e))?;

                // Only a term this doc did not already contribute bumps
                // the distinct-document counter.
                if !old_terms.contains(*term) {
                    tx.execute(
                        "INSERT INTO term_stats (term, agent_type, doc_count) VALUES (?1, ?2, 1) \
                         ON CONFLICT(term, agent_type) DO UPDATE SET doc_count = doc_count + 1",
                        params![term, knowledge.agent_type],
                    )
                    .map_err(|e| CoreError::storage("increment term doc count", e))?;
                }
            }

            tx.query_row(
                "SELECT * FROM knowledge WHERE id = ?1",
                params![knowledge.id],
                row_to_knowledge,
            )
            .map_err(|e| CoreError::storage("reload knowledge", e))
        })
    }

    pub fn get_knowledge(&self, id: &str) -> CoreResult<Knowledge> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM knowledge WHERE id = ?1",
                params![id],
                row_to_knowledge,
            )
            .optional()
            .map_err(|e| CoreError::storage("get knowledge", e))?
            .ok_or_else(|| CoreError::not_found(format!("knowledge '{id}' not found")))
        })
    }

    /// TF-IDF search, optionally scoped to `agent_type` and filtered by
    /// `category` (spec §4.F).
    pub fn search(
        &self,
        query: &str,
        agent_type: Option<&str>,
        category: Option<&str>,
        top_k: usize,
    ) -> CoreResult<Vec<ScoredKnowledge>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        self.store.with_conn(|conn| {
            let total_docs: i64 = conn
                .query_row("SELECT COUNT(*) FROM knowledge", [], |r| r.get(0))
                .map_err(|e| CoreError::storage("count knowledge docs", e))?;

            let mut idf: HashMap<&str, f64> = HashMap::new();
            for term in &terms {
                let df: i64 = match agent_type {
                    Some(at) => conn
                        .query_row(
                            "SELECT COALESCE(SUM(doc_count), 0) FROM term_stats \
                             WHERE term = ?1 AND agent_type = ?2",
                            params![term, at],
                            |r| r.get(0),
                        )
                        .map_err(|e| CoreError::storage("look up scoped df", e))?,
                    None => conn
                        .query_row(
                            "SELECT COALESCE(SUM(doc_count), 0) FROM term_stats WHERE term = ?1",
                            params![term],
                            |r| r.get(0),
                        )
                        .map_err(|e| CoreError::storage("look up global df", e))?,
                };
                let mut value = ((total_docs + 1) as f64 / (df + 1) as f64).ln();
                if agent_type.is_some() {
                    value = value.max(0.1);
                }
                idf.insert(term.as_str(), value);
            }

            let mut candidate_ids: HashSet<String> = HashSet::new();
            for term in &terms {
                let mut stmt = conn
                    .prepare("SELECT doc_id FROM knowledge_terms WHERE term = ?1")
                    .map_err(|e| CoreError::storage("prepare candidate lookup", e))?;
                let ids = stmt
                    .query_map(params![term], |r| r.get::<_, String>(0))
                    .map_err(|e| CoreError::storage("query candidates", e))?;
                for id in ids {
                    candidate_ids.insert(id.map_err(|e| CoreError::storage("read candidate id", e))?);
                }
            }

            let mut scored: Vec<ScoredKnowledge> = Vec::new();
            for doc_id in candidate_ids {
                let mut stmt = conn
                    .prepare("SELECT term, tf FROM knowledge_terms WHERE doc_id = ?1")
                    .map_err(|e| CoreError::storage("prepare doc term rows", e))?;
                let rows = stmt
                    .query_map(params![doc_id], |r| {
                        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
                    })
                    .map_err(|e| CoreError::storage("query doc term rows", e))?;
                let tf_by_term: HashMap<String, f64> = rows
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| CoreError::storage("collect doc term rows", e))?
                    .into_iter()
                    .collect();

                let mut score = 0.0;
                for term in &terms {
                    if let Some(tf) = tf_by_term.get(term.as_str()) {
                        score += tf * idf.get(term.as_str()).copied().unwrap_or(0.0);
                    }
                }
                if score > 0.0 {
                    let knowledge = conn
                        .query_row(
                            "SELECT * FROM knowledge WHERE id = ?1",
                            params![doc_id],
                            row_to_knowledge,
                        )
                        .map_err(|e| CoreError::storage("hydrate scored knowledge", e))?;
                    scored.push(ScoredKnowledge { knowledge, score });
                }
            }

            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(top_k);

            if let Some(cat) = category {
                scored.retain(|s| s.knowledge.category == cat);
            }

            Ok(scored)
        })
    }

    /// Reads knowledge entries carrying `tag` in their JSON-encoded
    /// `tags` column, newest first. Used by the skill router's recon
    /// dispatch to read tagged learnings directly, without going through
    /// TF-IDF scoring (spec §4.I).
    pub fn list_by_tag(&self, tag: &str, limit: usize) -> CoreResult<Vec<Knowledge>> {
        let needle = format!("%\"{tag}\"%");
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM knowledge WHERE tags LIKE ?1 \
                     ORDER BY created_at DESC LIMIT ?2",
                )
                .map_err(|e| CoreError::storage("prepare tag lookup", e))?;
            let rows = stmt
                .query_map(params![needle, limit as i64], row_to_knowledge)
                .map_err(|e| CoreError::storage("query tagged knowledge", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect tagged knowledge", e))
        })
    }

    pub fn increment_use_count(&self, id: &str) -> CoreResult<()> {
        self.store.with_conn(|conn| {
            let affected = conn
                .execute(
                    "UPDATE knowledge SET use_count = use_count + 1, last_used = ?1 WHERE id = ?2",
                    params![Utc::now(), id],
                )
                .map_err(|e| CoreError::storage("increment use_count", e))?;
            if affected == 0 {
                return Err(CoreError::not_found(format!("knowledge '{id}' not found")));
            }
            Ok(())
        })
    }

    pub fn store_episode(&self, episode: Episode) -> CoreResult<Episode> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO episodes (id, session_id, agent_id, agent_type, event_type, title, \
                     content, project, importance, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    episode.id,
                    episode.session_id,
                    episode.agent_id,
                    episode.agent_type,
                    episode.event_type.as_str(),
                    episode.title,
                    episode.content,
                    episode.project,
                    episode.importance,
                    episode.created_at,
                ],
            )
            .map_err(|e| CoreError::storage("store episode", e))?;
            Ok(episode)
        })
    }

    /// Substring match on title/content (OR across query tokens),
    /// optionally filtered by project, newest first (spec §4.F).
    pub fn search_episodes(
        &self,
        query: &str,
        project: Option<&str>,
        limit: usize,
    ) -> CoreResult<Vec<Episode>> {
        let terms = tokenize(query);
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM episodes ORDER BY created_at DESC")
                .map_err(|e| CoreError::storage("prepare episode search", e))?;
            let rows = stmt
                .query_map([], row_to_episode)
                .map_err(|e| CoreError::storage("query episodes", e))?;
            let mut out = Vec::new();
            for row in rows {
                let episode = row.map_err(|e| CoreError::storage("read episode row", e))?;
                if let Some(p) = project {
                    if episode.project.as_deref() != Some(p) {
                        continue;
                    }
                }
                let haystack = format!("{} {}", episode.title, episode.content).to_lowercase();
                let matches = terms.is_empty() || terms.iter().any(|t| haystack.contains(t.as_str()));
                if matches {
                    out.push(episode);
                    if out.len() >= limit {
                        break;
                    }
                }
            }
            Ok(out)
        })
    }

    pub fn recent_episodes(&self, session_id: Option<&str>, limit: usize) -> CoreResult<Vec<Episode>> {
        self.store.with_conn(|conn| {
            let mut out = Vec::new();
            match session_id {
                Some(sid) => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT * FROM episodes WHERE session_id = ?1 \
                             ORDER BY created_at DESC LIMIT ?2",
                        )
                        .map_err(|e| CoreError::storage("prepare recent episodes", e))?;
                    let rows = stmt
                        .query_map(params![sid, limit as i64], row_to_episode)
                        .map_err(|e| CoreError::storage("query recent episodes", e))?;
                    for row in rows {
                        out.push(row.map_err(|e| CoreError::storage("read episode", e))?);
                    }
                }
                None => {
                    let mut stmt = conn
                        .prepare("SELECT * FROM episodes ORDER BY created_at DESC LIMIT ?1")
                        .map_err(|e| CoreError::storage("prepare recent episodes", e))?;
                    let rows = stmt
                        .query_map(params![limit as i64], row_to_episode)
                        .map_err(|e| CoreError::storage("query recent episodes", e))?;
                    for row in rows {
                        out.push(row.map_err(|e| CoreError::storage("read episode", e))?);
                    }
                }
            }
            Ok(out)
        })
    }

    pub fn stats(&self) -> CoreResult<RagStats> {
        self.store.with_conn(|conn| {
            let total_knowledge: i64 = conn
                .query_row("SELECT COUNT(*) FROM knowledge", [], |r| r.get(0))
                .map_err(|e| CoreError::storage("count knowledge", e))?;
            let total_episodes: i64 = conn
                .query_row("SELECT COUNT(*) FROM episodes", [], |r| r.get(0))
                .map_err(|e| CoreError::storage("count episodes", e))?;
            let total_terms: i64 = conn
                .query_row("SELECT COUNT(DISTINCT term) FROM knowledge_terms", [], |r| r.get(0))
                .map_err(|e| CoreError::storage("count distinct terms", e))?;

            let mut stmt = conn
                .prepare("SELECT category, COUNT(*) FROM knowledge GROUP BY category")
                .map_err(|e| CoreError::storage("prepare category counts", e))?;
            let knowledge_by_category = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
                .map_err(|e| CoreError::storage("query category counts", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect category counts", e))?;

            let mut stmt = conn
                .prepare(
                    "SELECT id, use_count FROM knowledge ORDER BY use_count DESC, id LIMIT 5",
                )
                .map_err(|e| CoreError::storage("prepare top used", e))?;
            let top_used = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
                .map_err(|e| CoreError::storage("query top used", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect top used", e))?;

            Ok(RagStats {
                total_knowledge,
                total_episodes,
                knowledge_by_category,
                total_terms,
                top_used,
            })
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

    fn knowledge(id: &str, agent_type: &str, category: &str, title: &str, content: &str) -> Knowledge {
        Knowledge {
            id: id.into(),
            agent_type: agent_type.into(),
            category: category.into(),
            title: title.into(),
            content: content.into(),
            tags: vec![],
            source: None,
            use_count: 0,
            last_used: None,
            created_at: Utc::now(),
        }
    }

    fn tagged_knowledge(id: &str, tags: &[&str]) -> Knowledge {
        Knowledge {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..knowledge(id, "any", "recon", "finding", "tagged learning")
        }
    }

    #[test]
    fn tokenizer_drops_stopwords_and_short_tokens() {
        let tokens = tokenize("The quick brown fox is a go-getter at 5am");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"is".to_string()));
        assert!(!tokens.contains(&"a".to_string()));
        assert!(tokens.contains(&"quick".to_string()));
        assert!(tokens.contains(&"brown".to_string()));
        assert!(tokens.contains(&"getter".to_string()));
    }

    #[test]
    fn search_ranks_more_relevant_document_first() {
        let store = store();
        let rag = RagStore::new(&store);
        rag.store_knowledge(knowledge(
            "k1",
            "rust-engineer",
            "patterns",
            "Rust error handling",
            "thiserror anyhow error handling patterns in rust",
        ))
        .unwrap();
        rag.store_knowledge(knowledge(
            "k2",
            "rust-engineer",
            "patterns",
            "Deploying services",
            "kubernetes deployment patterns for services",
        ))
        .unwrap();

        let results = rag.search("rust error handling", None, None, 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].knowledge.id, "k1");
    }

    #[test]
    fn empty_query_returns_no_results() {
        let store = store();
        let rag = RagStore::new(&store);
        let results = rag.search("   ", None, None, 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn category_filter_applies_after_top_k() {
        let store = store();
        let rag = RagStore::new(&store);
        rag.store_knowledge(knowledge("k1", "any", "security", "auth bug", "auth bug fix security"))
            .unwrap();
        rag.store_knowledge(knowledge("k2", "any", "perf", "auth speed", "auth speed fix perf"))
            .unwrap();

        let results = rag.search("auth fix", None, Some("security"), 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].knowledge.id, "k1");
    }

    #[test]
    fn restoring_the_same_document_does_not_inflate_doc_count() {
        let store = store();
        let rag = RagStore::new(&store);
        rag.store_knowledge(knowledge("k1", "any", "patterns", "auth flow", "auth token refresh"))
            .unwrap();

        let df_before: i64 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT doc_count FROM term_stats WHERE term = 'auth' AND agent_type = 'any'",
                    [],
                    |r| r.get(0),
                )
                .map_err(|e| CoreError::storage("read doc_count", e))
            })
            .unwrap();
        assert_eq!(df_before, 1);

        // Re-store the exact same id/content several times.
        for _ in 0..3 {
            rag.store_knowledge(knowledge("k1", "any", "patterns", "auth flow", "auth token refresh"))
                .unwrap();
        }

        let df_after: i64 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT doc_count FROM term_stats WHERE term = 'auth' AND agent_type = 'any'",
                    [],
                    |r| r.get(0),
                )
                .map_err(|e| CoreError::storage("read doc_count", e))
            })
            .unwrap();
        assert_eq!(df_after, 1);
    }

    #[test]
    fn updating_a_document_moves_doc_count_for_changed_terms_only() {
        let store = store();
        let rag = RagStore::new(&store);
        rag.store_knowledge(knowledge("k1", "any", "patterns", "auth flow", "auth token refresh"))
            .unwrap();
        // Drop "refresh", keep "auth"/"token", add "rotate".
        rag.store_knowledge(knowledge("k1", "any", "patterns", "auth flow", "auth token rotate"))
            .unwrap();

        let count_for = |term: &str| -> i64 {
            store
                .with_conn(|conn| {
                    conn.query_row(
                        "SELECT COALESCE((SELECT doc_count FROM term_stats \
                             WHERE term = ?1 AND agent_type = 'any'), 0)",
                        params![term],
                        |r| r.get(0),
                    )
                    .map_err(|e| CoreError::storage("read doc_count", e))
                })
                .unwrap()
        };

        assert_eq!(count_for("auth"), 1);
        assert_eq!(count_for("token"), 1);
        assert_eq!(count_for("refresh"), 0);
        assert_eq!(count_for("rotate"), 1);
    }

    #[test]
    fn list_by_tag_returns_only_matching_entries() {
        let store = store();
        let rag = RagStore::new(&store);
        rag.store_knowledge(tagged_knowledge("k1", &["recon", "auth"])).unwrap();
        rag.store_knowledge(tagged_knowledge("k2", &["deploy"])).unwrap();

        let results = rag.list_by_tag("recon", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "k1");
    }
}
