//! SQLite-backed interaction log

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    AnnotationOutcome, AppliedCorrection, CorrectionOutcome, InteractionStats, ReviewScope,
};
use crate::error::{StoreError, StoreResult};
use crate::types::{HistoryTurn, Interaction, InteractionId, NewInteraction, OracleFlag};

const SELECT_COLUMNS: &str = "id, timestamp, user_id, message, response, predicted_intent, \
     confidence, corrected_intent, gemini_flag, gemini_feedback";

/// Long-lived handle to the interaction database
#[derive(Clone)]
pub struct InteractionStore {
    conn: Arc<Mutex<Connection>>,
}

impl InteractionStore {
    /// Open (or create) the interaction database at the given path
    pub async fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )?;
        Self::init_schema(&conn)?;

        debug!(path = %path.display(), "Opened interaction store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            -- gemini_flag: NULL = not evaluated, 0 = match, 1 = mismatch
            CREATE TABLE IF NOT EXISTS interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                user_id TEXT,
                message TEXT NOT NULL,
                response TEXT NOT NULL,
                predicted_intent TEXT,
                confidence REAL NOT NULL DEFAULT 0.0,
                corrected_intent TEXT,
                gemini_flag INTEGER DEFAULT NULL,
                gemini_feedback TEXT DEFAULT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_interactions_timestamp ON interactions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_interactions_flag ON interactions(gemini_flag);
            CREATE INDEX IF NOT EXISTS idx_interactions_corrected ON interactions(corrected_intent);
        "#,
        )?;
        Ok(())
    }

    /// Append a new interaction; review and oracle fields start unset
    pub async fn append(&self, new: &NewInteraction) -> StoreResult<InteractionId> {
        let conn = self.conn.lock().await;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        conn.execute(
            r#"INSERT INTO interactions
               (timestamp, user_id, message, response, predicted_intent, confidence)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                timestamp,
                new.user_id,
                new.message,
                new.response,
                new.predicted_intent,
                new.confidence,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Load a single interaction
    pub async fn get(&self, id: InteractionId) -> StoreResult<Option<Interaction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM interactions WHERE id = ?1",
            SELECT_COLUMNS
        ))?;
        let interaction = stmt.query_row(params![id], row_to_interaction).optional()?;
        Ok(interaction)
    }

    /// Record the oracle verdict; only an unset flag is ever written
    pub async fn set_gemini_evaluation(
        &self,
        id: InteractionId,
        flag: OracleFlag,
        feedback: &str,
    ) -> StoreResult<AnnotationOutcome> {
        if !flag.is_set() {
            return Err(StoreError::Other(format!(
                "refusing to reset oracle flag of interaction {}",
                id
            )));
        }

        let conn = self.conn.lock().await;
        let updated = conn.execute(
            r#"UPDATE interactions
               SET gemini_flag = ?1, gemini_feedback = ?2
               WHERE id = ?3 AND gemini_flag IS NULL"#,
            params![flag.to_db(), feedback, id],
        )?;

        if updated == 1 {
            return Ok(AnnotationOutcome::Written);
        }

        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM interactions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match exists {
            Some(_) => AnnotationOutcome::AlreadyAnnotated,
            None => AnnotationOutcome::NotFound,
        })
    }

    /// Set the human-reviewed tag of a single interaction
    ///
    /// Re-applying the same tag is a no-op; a different tag on an already
    /// corrected row is a conflict.
    pub async fn set_corrected_intent(&self, id: InteractionId, tag: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let mut tx = conn.transaction()?;
        let outcome = correct_one(&mut tx, id, tag)?;
        tx.commit()?;

        match outcome {
            CorrectionOutcome::Applied(_) | CorrectionOutcome::Unchanged { .. } => Ok(()),
            CorrectionOutcome::NotFound { id } => Err(StoreError::NotFound(id)),
            CorrectionOutcome::Conflict { id, existing } => {
                Err(StoreError::Conflict { id, existing })
            }
            CorrectionOutcome::Failed { reason, .. } => Err(StoreError::Other(reason)),
        }
    }

    /// Apply a batch of corrections inside one transaction
    ///
    /// Each id runs in its own savepoint, so a failing id is rolled back and
    /// skipped without touching the rest. `finalize` sees every applied
    /// correction before the transaction commits; if it fails, the whole batch
    /// is rolled back and its error returned.
    ///
    /// `finalize` runs synchronously while the store lock is held, so every
    /// other store call (including router appends) waits for it. Keep it to a
    /// single bounded write. Its side effects are not undone when the commit
    /// itself fails afterwards; callers that write elsewhere must compensate.
    pub async fn record_corrections<F, E>(
        &self,
        corrections: &[(InteractionId, String)],
        finalize: F,
    ) -> Result<Vec<CorrectionOutcome>, E>
    where
        F: FnOnce(&[AppliedCorrection]) -> Result<(), E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock().await;
        let mut tx = conn.transaction().map_err(StoreError::from)?;

        let mut outcomes = Vec::with_capacity(corrections.len());
        for (id, tag) in corrections {
            let outcome = match correct_one(&mut tx, *id, tag) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(interaction_id = id, error = %e, "Correction write failed, skipping");
                    CorrectionOutcome::Failed {
                        id: *id,
                        reason: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let applied: Vec<AppliedCorrection> = outcomes
            .iter()
            .filter_map(|o| match o {
                CorrectionOutcome::Applied(applied) => Some(applied.clone()),
                _ => None,
            })
            .collect();

        finalize(&applied)?;
        tx.commit().map_err(StoreError::from)?;

        Ok(outcomes)
    }

    /// Rows the oracle has not evaluated yet, oldest first
    pub async fn fetch_unevaluated(&self, limit: usize) -> StoreResult<Vec<Interaction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM interactions WHERE gemini_flag IS NULL ORDER BY id ASC LIMIT ?1",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![sql_limit(limit)], row_to_interaction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Oracle-flagged mismatches awaiting human review, newest first
    pub async fn fetch_flagged_uncorrected(&self) -> StoreResult<Vec<Interaction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM interactions
             WHERE gemini_flag = 1 AND corrected_intent IS NULL
             ORDER BY timestamp DESC, id DESC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], row_to_interaction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every row not yet reviewed by a human, oldest first
    pub async fn fetch_all_uncorrected(&self) -> StoreResult<Vec<Interaction>> {
        self.fetch_uncorrected(ReviewScope::AllUncorrected).await
    }

    /// Unreviewed rows matching the given queue criterion, oldest first
    pub async fn fetch_uncorrected(&self, scope: ReviewScope) -> StoreResult<Vec<Interaction>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM interactions WHERE corrected_intent IS NULL{} ORDER BY timestamp ASC, id ASC",
            SELECT_COLUMNS,
            scope.sql_filter()
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map([], row_to_interaction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent (message, response) pairs, newest first
    pub async fn fetch_recent_history(&self, limit: usize) -> StoreResult<Vec<HistoryTurn>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT message, response FROM interactions ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let turns = stmt
            .query_map(params![sql_limit(limit)], |row| {
                Ok(HistoryTurn {
                    message: row.get(0)?,
                    response: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(turns)
    }

    /// Counts by review and evaluation state
    pub async fn stats(&self) -> StoreResult<InteractionStats> {
        let conn = self.conn.lock().await;
        let stats = conn.query_row(
            r#"SELECT
                 COUNT(*),
                 COALESCE(SUM(CASE WHEN gemini_flag IS NULL THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN gemini_flag = 0 THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN gemini_flag = 1 THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN corrected_intent IS NOT NULL THEN 1 ELSE 0 END), 0)
               FROM interactions"#,
            [],
            |row| {
                Ok(InteractionStats {
                    total: row.get::<_, i64>(0)? as usize,
                    unevaluated: row.get::<_, i64>(1)? as usize,
                    matched: row.get::<_, i64>(2)? as usize,
                    mismatched: row.get::<_, i64>(3)? as usize,
                    corrected: row.get::<_, i64>(4)? as usize,
                })
            },
        )?;
        Ok(stats)
    }
}

/// Write one correction inside its own savepoint
fn correct_one(
    tx: &mut Transaction<'_>,
    id: InteractionId,
    tag: &str,
) -> StoreResult<CorrectionOutcome> {
    let sp = tx.savepoint()?;

    let row: Option<(String, Option<String>)> = sp
        .query_row(
            "SELECT message, corrected_intent FROM interactions WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((message, existing)) = row else {
        return Ok(CorrectionOutcome::NotFound { id });
    };

    match existing {
        Some(existing) if existing == tag => return Ok(CorrectionOutcome::Unchanged { id }),
        Some(existing) => return Ok(CorrectionOutcome::Conflict { id, existing }),
        None => {}
    }

    let updated = sp.execute(
        "UPDATE interactions SET corrected_intent = ?1 WHERE id = ?2 AND corrected_intent IS NULL",
        params![tag, id],
    )?;
    if updated != 1 {
        return Err(StoreError::Other(format!(
            "interaction {} changed during correction",
            id
        )));
    }
    sp.commit()?;

    Ok(CorrectionOutcome::Applied(AppliedCorrection {
        id,
        tag: tag.to_string(),
        message,
    }))
}

/// Parse a stored timestamp
///
/// Rows written here are RFC 3339. Older logs hold naive ISO-8601 UTC
/// (`2024-05-01T12:00:00.123456`) or SQLite's `YYYY-MM-DD HH:MM:SS`.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Clamp a row count to SQLite's signed LIMIT range
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_to_interaction(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    let timestamp_str: String = row.get(1)?;
    let timestamp = parse_timestamp(&timestamp_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("unrecognized timestamp '{}'", timestamp_str).into(),
        )
    })?;
    Ok(Interaction {
        id: row.get(0)?,
        timestamp,
        user_id: row.get(2)?,
        message: row.get(3)?,
        response: row.get(4)?,
        predicted_intent: row.get(5)?,
        confidence: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
        corrected_intent: row.get(7)?,
        gemini_flag: OracleFlag::from_db(row.get(8)?),
        gemini_feedback: row.get(9)?,
    })
}
