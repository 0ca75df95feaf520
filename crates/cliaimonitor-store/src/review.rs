//! Review-board engine (spec §4.E) — the hardest subsystem.

use chrono::Utc;
use cliaimonitor_core::{
    AgentQualityScore, ConsensusDecision, ConsensusResult, CoreError, CoreResult, Defect,
    DefectSeverity, Document, DocumentStatus, DocumentType, DocumentUpdate, NewDocument,
    QualityRole, ReviewBoard, ReviewBoardStatus, ReviewerVote,
};
use rusqlite::{params, OptionalExtension, Row};

use crate::kernel::Store;

fn row_to_board(row: &Row) -> rusqlite::Result<ReviewBoard> {
    let status: String = row.get("status")?;
    Ok(ReviewBoard {
        id: row.get("id")?,
        assignment_id: row.get("assignment_id")?,
        reviewer_count: row.get("reviewer_count")?,
        status: ReviewBoardStatus::parse(&status).unwrap_or(ReviewBoardStatus::Pending),
        complexity_score: row.get("complexity_score")?,
        risk_level: row.get("risk_level")?,
        final_verdict: row.get("final_verdict")?,
        aggregated_feedback: row.get("aggregated_feedback")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_defect(row: &Row) -> rusqlite::Result<Defect> {
    let severity: String = row.get("severity")?;
    Ok(Defect {
        id: row.get("id")?,
        board_id: row.get("board_id")?,
        reviewer_id: row.get("reviewer_id")?,
        category: row.get("category")?,
        severity: DefectSeverity::parse(&severity).unwrap_or(DefectSeverity::Info),
        file: row.get("file")?,
        lines: row.get("lines")?,
        title: row.get("title")?,
        description: row.get("description")?,
        suggested_fix: row.get("suggested_fix")?,
        status: row.get("status")?,
        resolution: row.get("resolution")?,
    })
}

fn row_to_vote(row: &Row) -> rusqlite::Result<ReviewerVote> {
    Ok(ReviewerVote {
        board_id: row.get("board_id")?,
        reviewer_id: row.get("reviewer_id")?,
        approved: row.get::<_, i64>("approved")? != 0,
        confidence: row.get("confidence")?,
        defects_found: row.get("defects_found")?,
        review_time_seconds: row.get("review_time_seconds")?,
        tokens_used: row.get("tokens_used")?,
    })
}

fn row_to_document(row: &Row) -> rusqlite::Result<Document> {
    let doc_type: String = row.get("doc_type")?;
    let status: String = row.get("status")?;
    let tags: String = row.get("tags")?;
    Ok(Document {
        id: row.get("id")?,
        doc_type: DocumentType::parse(&doc_type).unwrap_or(DocumentType::Report),
        title: row.get("title")?,
        content: row.get("content")?,
        format: row.get("format")?,
        author: row.get("author")?,
        project: row.get("project")?,
        task_id: row.get("task_id")?,
        assignment_id: row.get("assignment_id")?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::Draft),
        version: row.get("version")?,
        parent_id: row.get("parent_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_quality_score(row: &Row) -> rusqlite::Result<AgentQualityScore> {
    let role: String = row.get("role")?;
    Ok(AgentQualityScore {
        agent_id: row.get("agent_id")?,
        role: QualityRole::parse(&role),
        total_submissions: row.get("total_submissions")?,
        total_approvals: row.get("total_approvals")?,
        approved_first_try: row.get("approved_first_try")?,
        total_review_cycles: row.get("total_review_cycles")?,
        defects_received: row.get("defects_received")?,
        critical_defects_received: row.get("critical_defects_received")?,
        total_reviews: row.get("total_reviews")?,
        defects_found: row.get("defects_found")?,
        critical_defects_found: row.get("critical_defects_found")?,
        true_positive_defects: row.get("true_positive_defects")?,
        false_positive_defects: row.get("false_positive_defects")?,
        tokens_used: row.get("tokens_used")?,
        value_delivered: row.get("value_delivered")?,
        total_cost: row.get("total_cost")?,
        approval_rate: row.get("approval_rate")?,
        first_pass_rate: row.get("first_pass_rate")?,
        defect_density: row.get("defect_density")?,
        avg_review_cycles: row.get("avg_review_cycles")?,
        defect_find_rate: row.get("defect_find_rate")?,
        detection_accuracy: row.get("detection_accuracy")?,
        cost_efficiency: row.get("cost_efficiency")?,
        quality_score: row.get("quality_score")?,
    })
}

fn clamp(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

/// Document store (spec §3: "owner E and others"). Lives alongside the
/// review engine since the review board is the first and most frequent
/// document author (`ReviewStore::finalize_board`'s final report), but
/// documents of every `DocumentType` flow through here.
pub struct DocumentStore<'a> {
    store: &'a Store,
}

impl<'a> DocumentStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Inserts a new document at `version = 1` (spec §3).
    pub fn create(&self, doc: NewDocument) -> CoreResult<Document> {
        self.store.transaction(|tx| {
            let now = Utc::now();
            let tags = serde_json::to_string(&doc.tags)
                .map_err(|e| CoreError::Validation(format!("serialize tags: {e}")))?;
            tx.execute(
                "INSERT INTO documents (doc_type, title, content, format, author, project, \
                     task_id, assignment_id, tags, status, version, parent_id, created_at, \
                     updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'draft', 1, ?10, ?11, ?11)",
                params![
                    doc.doc_type.as_str(),
                    doc.title,
                    doc.content,
                    doc.format,
                    doc.author,
                    doc.project,
                    doc.task_id,
                    doc.assignment_id,
                    tags,
                    doc.parent_id,
                    now,
                ],
            )
            .map_err(|e| CoreError::storage("insert document", e))?;
            let id = tx.last_insert_rowid();
            tx.query_row("SELECT * FROM documents WHERE id = ?1", params![id], row_to_document)
                .map_err(|e| CoreError::storage("reload document", e))
        })
    }

    pub fn get(&self, id: i64) -> CoreResult<Document> {
        self.store.with_conn(|conn| {
            conn.query_row("SELECT * FROM documents WHERE id = ?1", params![id], row_to_document)
                .optional()
                .map_err(|e| CoreError::storage("get document", e))?
                .ok_or_else(|| CoreError::not_found(format!("document '{id}' not found")))
        })
    }

    /// Applies `update` and bumps `version` by exactly one, regardless
    /// of which fields actually changed (spec §3, §8: "Documents.version
    /// strictly increases on each UpdateDocument call").
    pub fn update_document(&self, id: i64, update: DocumentUpdate) -> CoreResult<Document> {
        self.store.transaction(|tx| {
            let current = tx
                .query_row("SELECT * FROM documents WHERE id = ?1", params![id], row_to_document)
                .optional()
                .map_err(|e| CoreError::storage("look up document", e))?
                .ok_or_else(|| CoreError::not_found(format!("document '{id}' not found")))?;

            let title = update.title.unwrap_or(current.title);
            let content = update.content.unwrap_or(current.content);
            let status = update.status.unwrap_or(current.status);
            let tags = update.tags.unwrap_or(current.tags);
            let tags_json = serde_json::to_string(&tags)
                .map_err(|e| CoreError::Validation(format!("serialize tags: {e}")))?;

            tx.execute(
                "UPDATE documents SET title = ?1, content = ?2, status = ?3, tags = ?4, \
                     version = version + 1, updated_at = ?5 WHERE id = ?6",
                params![title, content, status.as_str(), tags_json, Utc::now(), id],
            )
            .map_err(|e| CoreError::storage("update document", e))?;

            tx.query_row("SELECT * FROM documents WHERE id = ?1", params![id], row_to_document)
                .map_err(|e| CoreError::storage("reload updated document", e))
        })
    }
}

pub struct ReviewStore<'a> {
    store: &'a Store,
}

impl<'a> ReviewStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Places the board in `pending` with the configured reviewer count
    /// (spec §4.E).
    pub fn create_board(&self, assignment_id: i64, reviewer_count: i64) -> CoreResult<ReviewBoard> {
        self.store.transaction(|tx| {
            let now = Utc::now();
            tx.execute(
                "INSERT INTO review_boards (assignment_id, reviewer_count, status, \
                     created_at, updated_at) VALUES (?1, ?2, 'pending', ?3, ?3)",
                params![assignment_id, reviewer_count, now],
            )
            .map_err(|e| CoreError::storage("create review board", e))?;
            let id = tx.last_insert_rowid();
            tx.query_row("SELECT * FROM review_boards WHERE id = ?1", params![id], row_to_board)
                .map_err(|e| CoreError::storage("reload review board", e))
        })
    }

    pub fn get_board(&self, board_id: i64) -> CoreResult<ReviewBoard> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM review_boards WHERE id = ?1",
                params![board_id],
                row_to_board,
            )
            .optional()
            .map_err(|e| CoreError::storage("get review board", e))?
            .ok_or_else(|| CoreError::not_found(format!("review board {board_id} not found")))
        })
    }

    pub fn record_defect(
        &self,
        board_id: i64,
        reviewer_id: &str,
        category: &str,
        severity: DefectSeverity,
        file: Option<&str>,
        lines: Option<&str>,
        title: &str,
        description: Option<&str>,
        suggested_fix: Option<&str>,
    ) -> CoreResult<Defect> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO defects (board_id, reviewer_id, category, severity, file, lines, \
                     title, description, suggested_fix, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'open')",
                params![
                    board_id,
                    reviewer_id,
                    category,
                    severity.as_str(),
                    file,
                    lines,
                    title,
                    description,
                    suggested_fix,
                ],
            )
            .map_err(|e| CoreError::storage("record defect", e))?;
            let id = conn.last_insert_rowid();
            conn.query_row("SELECT * FROM defects WHERE id = ?1", params![id], row_to_defect)
                .map_err(|e| CoreError::storage("reload defect", e))
        })
    }

    /// Records a vote; first vote for a board moves it from `pending`
    /// to `in_progress` (spec §4.E).
    pub fn record_vote(&self, vote: ReviewerVote) -> CoreResult<ReviewerVote> {
        self.store.transaction(|tx| {
            tx.execute(
                "INSERT INTO reviewer_votes (board_id, reviewer_id, approved, confidence, \
                     defects_found, review_time_seconds, tokens_used) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(board_id, reviewer_id) DO UPDATE SET \
                     approved = excluded.approved, \
                     confidence = excluded.confidence, \
                     defects_found = excluded.defects_found, \
                     review_time_seconds = excluded.review_time_seconds, \
                     tokens_used = excluded.tokens_used",
                params![
                    vote.board_id,
                    vote.reviewer_id,
                    vote.approved as i64,
                    vote.confidence,
                    vote.defects_found,
                    vote.review_time_seconds,
                    vote.tokens_used,
                ],
            )
            .map_err(|e| CoreError::storage("record vote", e))?;

            tx.execute(
                "UPDATE review_boards SET status = 'in_progress', updated_at = ?1 \
                 WHERE id = ?2 AND status = 'pending'",
                params![Utc::now(), vote.board_id],
            )
            .map_err(|e| CoreError::storage("advance board to in_progress", e))?;

            Ok(vote)
        })
    }

    pub fn list_defects(&self, board_id: i64) -> CoreResult<Vec<Defect>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM defects WHERE board_id = ?1 ORDER BY id")
                .map_err(|e| CoreError::storage("prepare list defects", e))?;
            let rows = stmt
                .query_map(params![board_id], row_to_defect)
                .map_err(|e| CoreError::storage("list defects", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect defects", e))
        })
    }

    pub fn list_votes(&self, board_id: i64) -> CoreResult<Vec<ReviewerVote>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM reviewer_votes WHERE board_id = ?1 ORDER BY reviewer_id")
                .map_err(|e| CoreError::storage("prepare list votes", e))?;
            let rows = stmt
                .query_map(params![board_id], row_to_vote)
                .map_err(|e| CoreError::storage("list votes", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CoreError::storage("collect votes", e))
        })
    }

    /// Deterministic single-pass consensus over votes and defects
    /// (spec §4.E steps 1-8). Fails if no votes have been cast yet.
    fn compute_consensus(&self, board_id: i64) -> CoreResult<ConsensusResult> {
        let votes = self.list_votes(board_id)?;
        if votes.is_empty() {
            return Err(CoreError::Validation(format!(
                "review board {board_id} has no votes"
            )));
        }
        let defects = self.list_defects(board_id)?;

        let votes_for = votes.iter().filter(|v| v.approved).count() as i64;
        let votes_against = votes.len() as i64 - votes_for;

        let critical_count = defects
            .iter()
            .filter(|d| d.severity == DefectSeverity::Critical)
            .count() as i64;
        let high_count = defects
            .iter()
            .filter(|d| d.severity == DefectSeverity::High)
            .count() as i64;
        let other_count = defects.len() as i64 - critical_count - high_count;

        let majority_approved = votes_for > votes_against;
        let has_critical = critical_count > 0;
        let approved = majority_approved && !has_critical;
        let decision = if has_critical {
            ConsensusDecision::RejectedCritical
        } else if majority_approved {
            ConsensusDecision::Approved
        } else {
            ConsensusDecision::RejectedMajority
        };

        let feedback = format!(
            "votes: {votes_for} for / {votes_against} against; defects: {critical_count} critical, \
             {high_count} high, {other_count} other; decision: {}",
            decision.as_str()
        );

        Ok(ConsensusResult {
            board_id,
            votes_for,
            votes_against,
            critical_count,
            high_count,
            other_count,
            majority_approved,
            has_critical,
            approved,
            decision,
            feedback,
        })
    }

    /// Runs consensus, persists the board's verdict, recomputes author
    /// and reviewer quality scores in one transaction, and generates the
    /// final markdown report (spec §4.E).
    pub fn finalize_board(&self, board_id: i64) -> CoreResult<ConsensusResult> {
        let consensus = self.compute_consensus(board_id)?;

        self.store.transaction(|tx| {
            let now = Utc::now();
            tx.execute(
                "UPDATE review_boards SET status = 'completed', final_verdict = ?1, \
                     aggregated_feedback = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    consensus.decision.as_str(),
                    consensus.feedback,
                    now,
                    board_id,
                ],
            )
            .map_err(|e| CoreError::storage("persist board verdict", e))?;

            let assignment_id: i64 = tx
                .query_row(
                    "SELECT assignment_id FROM review_boards WHERE id = ?1",
                    params![board_id],
                    |r| r.get(0),
                )
                .map_err(|e| CoreError::storage("look up board's assignment", e))?;
            let (author_id, review_attempt): (String, i64) = tx
                .query_row(
                    "SELECT assigned_to, review_attempt FROM assignments WHERE id = ?1",
                    params![assignment_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .map_err(|e| CoreError::storage("look up assignment author", e))?;

            Self::recompute_author_score(
                tx,
                &author_id,
                consensus.approved,
                review_attempt + 1,
                consensus.critical_count + consensus.high_count + consensus.other_count,
                consensus.critical_count,
            )?;

            for vote in self.list_votes(board_id)? {
                let critical_found = tx
                    .query_row(
                        "SELECT COUNT(*) FROM defects WHERE board_id = ?1 AND reviewer_id = ?2 \
                             AND severity = 'critical'",
                        params![board_id, vote.reviewer_id],
                        |r| r.get::<_, i64>(0),
                    )
                    .map_err(|e| CoreError::storage("count reviewer critical finds", e))?;
                Self::recompute_reviewer_score(
                    tx,
                    &vote.reviewer_id,
                    vote.defects_found,
                    critical_found,
                    vote.tokens_used,
                )?;
            }

            let report = Self::render_final_report(&consensus, &votes_grouped(tx, board_id)?);
            tx.execute(
                "INSERT INTO documents (doc_type, title, content, format, author, \
                     assignment_id, tags, status, version, created_at, updated_at) \
                 VALUES ('review', ?1, ?2, 'markdown', 'system', ?3, '[]', 'active', 1, ?4, ?4)",
                params![
                    format!("Review report for assignment {assignment_id}"),
                    report,
                    assignment_id,
                    now,
                ],
            )
            .map_err(|e| CoreError::storage("persist final report", e))?;

            Ok(consensus.clone())
        })
    }

    fn recompute_author_score(
        tx: &rusqlite::Transaction<'_>,
        agent_id: &str,
        approved: bool,
        review_cycles_this_round: i64,
        defects_received: i64,
        critical_defects_received: i64,
    ) -> CoreResult<()> {
        tx.execute(
            "INSERT INTO agent_quality_scores (agent_id, role) VALUES (?1, 'author') \
             ON CONFLICT(agent_id, role) DO NOTHING",
            params![agent_id],
        )
        .map_err(|e| CoreError::storage("seed author quality row", e))?;

        tx.execute(
            "UPDATE agent_quality_scores SET \
                 total_submissions = total_submissions + 1, \
                 total_review_cycles = total_review_cycles + ?1, \
                 defects_received = defects_received + ?2, \
                 critical_defects_received = critical_defects_received + ?3, \
                 total_approvals = total_approvals + ?4, \
                 approved_first_try = approved_first_try + ?5 \
             WHERE agent_id = ?6 AND role = 'author'",
            params![
                review_cycles_this_round,
                defects_received,
                critical_defects_received,
                approved as i64,
                (approved && review_cycles_this_round == 1) as i64,
                agent_id,
            ],
        )
        .map_err(|e| CoreError::storage("accumulate author counters", e))?;

        let (submissions, approvals, approved_first_try, cycles, received): (
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = tx
            .query_row(
                "SELECT total_submissions, total_approvals, approved_first_try, \
                     total_review_cycles, defects_received \
                 FROM agent_quality_scores WHERE agent_id = ?1 AND role = 'author'",
                params![agent_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .map_err(|e| CoreError::storage("reload author counters", e))?;

        let approval_rate = if submissions > 0 {
            approvals as f64 / submissions as f64
        } else {
            0.0
        };
        let first_pass_rate = if submissions > 0 {
            approved_first_try as f64 / submissions as f64
        } else {
            0.0
        };
        let defect_density = if submissions > 0 {
            received as f64 / submissions as f64
        } else {
            0.0
        };
        let avg_review_cycles = if approvals > 0 {
            cycles as f64 / approvals as f64
        } else {
            0.0
        };
        let quality_score = clamp(
            first_pass_rate * 40.0 + approval_rate * 30.0 + (1.0 - defect_density / 10.0) * 30.0,
        );

        tx.execute(
            "UPDATE agent_quality_scores SET approval_rate = ?1, first_pass_rate = ?2, \
                 defect_density = ?3, avg_review_cycles = ?4, quality_score = ?5 \
             WHERE agent_id = ?6 AND role = 'author'",
            params![
                approval_rate,
                first_pass_rate,
                defect_density,
                avg_review_cycles,
                quality_score,
                agent_id,
            ],
        )
        .map_err(|e| CoreError::storage("persist author derived rates", e))?;
        Ok(())
    }

    fn recompute_reviewer_score(
        tx: &rusqlite::Transaction<'_>,
        agent_id: &str,
        defects_found: i64,
        critical_defects_found: i64,
        tokens_used: i64,
    ) -> CoreResult<()> {
        tx.execute(
            "INSERT INTO agent_quality_scores (agent_id, role) VALUES (?1, 'reviewer') \
             ON CONFLICT(agent_id, role) DO NOTHING",
            params![agent_id],
        )
        .map_err(|e| CoreError::storage("seed reviewer quality row", e))?;

        tx.execute(
            "UPDATE agent_quality_scores SET \
                 total_reviews = total_reviews + 1, \
                 defects_found = defects_found + ?1, \
                 critical_defects_found = critical_defects_found + ?2, \
                 tokens_used = tokens_used + ?3, \
                 true_positive_defects = true_positive_defects + ?1 \
             WHERE agent_id = ?4 AND role = 'reviewer'",
            params![defects_found, critical_defects_found, tokens_used, agent_id],
        )
        .map_err(|e| CoreError::storage("accumulate reviewer counters", e))?;

        let (reviews, found, true_pos, false_pos, value_delivered, total_cost): (
            i64,
            i64,
            i64,
            i64,
            f64,
            f64,
        ) = tx
            .query_row(
                "SELECT total_reviews, defects_found, true_positive_defects, \
                     false_positive_defects, value_delivered, total_cost \
                 FROM agent_quality_scores WHERE agent_id = ?1 AND role = 'reviewer'",
                params![agent_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .map_err(|e| CoreError::storage("reload reviewer counters", e))?;

        let defect_find_rate = if reviews > 0 {
            found as f64 / reviews as f64
        } else {
            0.0
        };
        let disputed = true_pos + false_pos;
        let detection_accuracy = if disputed > 0 {
            true_pos as f64 / disputed as f64
        } else {
            1.0
        };
        let cost_efficiency = if total_cost > 0.0 {
            value_delivered / total_cost
        } else {
            0.0
        };
        let quality_score = clamp(
            detection_accuracy * 40.0 + defect_find_rate * 30.0 + cost_efficiency * 30.0,
        );

        tx.execute(
            "UPDATE agent_quality_scores SET defect_find_rate = ?1, detection_accuracy = ?2, \
                 cost_efficiency = ?3, quality_score = ?4 WHERE agent_id = ?5 AND role = 'reviewer'",
            params![
                defect_find_rate,
                detection_accuracy,
                cost_efficiency,
                quality_score,
                agent_id,
            ],
        )
        .map_err(|e| CoreError::storage("persist reviewer derived rates", e))?;
        Ok(())
    }

    pub fn get_quality_score(
        &self,
        agent_id: &str,
        role: QualityRole,
    ) -> CoreResult<Option<AgentQualityScore>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM agent_quality_scores WHERE agent_id = ?1 AND role = ?2",
                params![agent_id, role.as_str()],
                row_to_quality_score,
            )
            .optional()
            .map_err(|e| CoreError::storage("get quality score", e))
        })
    }

    fn render_final_report(consensus: &ConsensusResult, grouped: &[(String, Vec<Defect>)]) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Review Report — Board {}\n\n", consensus.board_id));
        out.push_str("## Consensus\n\n");
        out.push_str(&format!(
            "- Decision: **{}**\n- Votes: {} for / {} against\n- Critical defects: {}\n- High defects: {}\n- Other defects: {}\n\n",
            consensus.decision.as_str(),
            consensus.votes_for,
            consensus.votes_against,
            consensus.critical_count,
            consensus.high_count,
            consensus.other_count,
        ));

        out.push_str("## Defects\n\n");
        for severity in DefectSeverity::REPORT_ORDER {
            if let Some((_, defects)) = grouped.iter().find(|(s, _)| s == severity.as_str()) {
                if defects.is_empty() {
                    continue;
                }
                out.push_str(&format!("### {}\n\n", severity.as_str()));
                for d in defects {
                    out.push_str(&format!("- [{}] {} ({})\n", d.reviewer_id, d.title, d.category));
                }
                out.push('\n');
            }
        }

        out.push_str("## Timeline\n\n");
        out.push_str(&format!("- Finalized at {}\n", Utc::now().to_rfc3339()));
        out
    }
}

fn votes_grouped(
    tx: &rusqlite::Transaction<'_>,
    board_id: i64,
) -> CoreResult<Vec<(String, Vec<Defect>)>> {
    let mut stmt = tx
        .prepare("SELECT * FROM defects WHERE board_id = ?1 ORDER BY id")
        .map_err(|e| CoreError::storage("prepare grouped defects", e))?;
    let defects: Vec<Defect> = stmt
        .query_map(params![board_id], row_to_defect)
        .map_err(|e| CoreError::storage("query grouped defects", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| CoreError::storage("collect grouped defects", e))?;

    Ok(DefectSeverity::REPORT_ORDER
        .iter()
        .map(|severity| {
            let bucket = defects
                .iter()
                .filter(|d| d.severity == *severity)
                .cloned()
                .collect();
            (severity.as_str().to_string(), bucket)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::PoolConfig;
    use crate::tasks::TaskStore;
    use cliaimonitor_core::TaskUpsert;

    fn store() -> Store {
        Store::open_in_memory(PoolConfig::default()).unwrap()
    }

    fn seed_assignment(store: &Store) -> i64 {
        let tasks = TaskStore::new(store);
        tasks
            .upsert_batch(vec![TaskUpsert {
                id: "t1".into(),
                repo_id: "repo1".into(),
                source_file: None,
                title: "task".into(),
                description: None,
                priority: cliaimonitor_core::TaskPriority::Medium,
                parent_task: None,
                effort: None,
                tags: vec![],
            }])
            .unwrap();
        tasks
            .create_assignment("t1", "author-1", "captain", "review")
            .unwrap()
            .id
    }

    #[test]
    fn consensus_rejects_on_any_critical_defect_despite_majority_approval() {
        let store = store();
        let assignment_id = seed_assignment(&store);
        let review = ReviewStore::new(&store);
        let board = review.create_board(assignment_id, 3).unwrap();

        review
            .record_defect(
                board.id,
                "rev-1",
                "security",
                DefectSeverity::Critical,
                None,
                None,
                "SQL injection",
                None,
                None,
            )
            .unwrap();

        for reviewer in ["rev-1", "rev-2", "rev-3"] {
            review
                .record_vote(ReviewerVote {
                    board_id: board.id,
                    reviewer_id: reviewer.into(),
                    approved: true,
                    confidence: 90,
                    defects_found: if reviewer == "rev-1" { 1 } else { 0 },
                    review_time_seconds: 60,
                    tokens_used: 500,
                })
                .unwrap();
        }

        let consensus = review.finalize_board(board.id).unwrap();
        assert!(!consensus.approved);
        assert_eq!(consensus.decision, ConsensusDecision::RejectedCritical);
    }

    #[test]
    fn consensus_approves_on_clean_majority() {
        let store = store();
        let assignment_id = seed_assignment(&store);
        let review = ReviewStore::new(&store);
        let board = review.create_board(assignment_id, 2).unwrap();

        for reviewer in ["rev-1", "rev-2"] {
            review
                .record_vote(ReviewerVote {
                    board_id: board.id,
                    reviewer_id: reviewer.into(),
                    approved: true,
                    confidence: 95,
                    defects_found: 0,
                    review_time_seconds: 30,
                    tokens_used: 200,
                })
                .unwrap();
        }

        let consensus = review.finalize_board(board.id).unwrap();
        assert!(consensus.approved);
        assert_eq!(consensus.decision, ConsensusDecision::Approved);

        let author_score = review
            .get_quality_score("author-1", QualityRole::Author)
            .unwrap()
            .unwrap();
        assert_eq!(author_score.total_submissions, 1);
        assert_eq!(author_score.total_approvals, 1);
        assert_eq!(author_score.approved_first_try, 1);
        assert!(author_score.quality_score > 0.0);
    }

    #[test]
    fn first_vote_advances_board_from_pending_to_in_progress() {
        let store = store();
        let assignment_id = seed_assignment(&store);
        let review = ReviewStore::new(&store);
        let board = review.create_board(assignment_id, 1).unwrap();
        assert_eq!(board.status, ReviewBoardStatus::Pending);

        review
            .record_vote(ReviewerVote {
                board_id: board.id,
                reviewer_id: "rev-1".into(),
                approved: true,
                confidence: 80,
                defects_found: 0,
                review_time_seconds: 10,
                tokens_used: 50,
            })
            .unwrap();

        let reloaded = review.get_board(board.id).unwrap();
        assert_eq!(reloaded.status, ReviewBoardStatus::InProgress);
    }

    #[test]
    fn document_version_starts_at_one_and_strictly_increases_on_update() {
        let store = store();
        let documents = DocumentStore::new(&store);
        let doc = documents
            .create(NewDocument {
                doc_type: DocumentType::Plan,
                title: "initial plan".into(),
                content: "draft content".into(),
                format: "markdown".into(),
                author: "agent-1".into(),
                project: None,
                task_id: None,
                assignment_id: None,
                tags: vec!["v1".into()],
                parent_id: None,
            })
            .unwrap();
        assert_eq!(doc.version, 1);

        let updated_once = documents
            .update_document(
                doc.id,
                DocumentUpdate {
                    content: Some("revised content".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated_once.version, 2);
        assert_eq!(updated_once.content, "revised content");
        assert_eq!(updated_once.title, "initial plan");

        let updated_twice = documents
            .update_document(
                doc.id,
                DocumentUpdate {
                    status: Some(DocumentStatus::Active),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated_twice.version, 3);
        assert_eq!(updated_twice.status, DocumentStatus::Active);

        let reloaded = documents.get(doc.id).unwrap();
        assert_eq!(reloaded.version, 3);
    }
}
