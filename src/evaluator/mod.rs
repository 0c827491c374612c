//! Quality Evaluator
//!
//! Batch job that asks the quality oracle whether each unevaluated response
//! answered its question. Verdicts are committed row by row, so an
//! interrupted run keeps its progress and the next run picks up the rest.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::QualityOracle;
use crate::error::StoreResult;
use crate::store::{AnnotationOutcome, InteractionStore};
use crate::types::OracleFlag;

/// Parsed oracle judgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub flag: OracleFlag,
    pub feedback: String,
    /// The output could not be parsed and `feedback` holds it verbatim
    pub malformed: bool,
}

#[derive(Debug, Deserialize)]
struct OracleReply {
    #[serde(rename = "match")]
    matched: serde_json::Value,
    #[serde(default)]
    explanation: String,
}

impl Verdict {
    /// Interpret raw oracle output
    ///
    /// Accepts a JSON object, optionally inside a Markdown code fence.
    /// Anything unparsable is a mismatch carrying the raw text.
    pub fn parse(raw: &str) -> Self {
        let body = strip_code_fence(raw);

        match serde_json::from_str::<OracleReply>(body) {
            Ok(reply) => {
                let matched = match &reply.matched {
                    serde_json::Value::String(s) => s.trim().eq_ignore_ascii_case("yes"),
                    serde_json::Value::Bool(b) => *b,
                    _ => false,
                };
                Self {
                    flag: if matched {
                        OracleFlag::Match
                    } else {
                        OracleFlag::Mismatch
                    },
                    feedback: reply.explanation,
                    malformed: false,
                }
            }
            Err(_) => Self {
                flag: OracleFlag::Mismatch,
                feedback: raw.to_string(),
                malformed: true,
            },
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

/// Summary of one or more evaluation batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationReport {
    pub selected: usize,
    pub matched: usize,
    pub mismatched: usize,
    /// Mismatches recorded because the output was unparsable
    pub malformed: usize,
    /// Mismatches recorded because the oracle call failed
    pub unreachable: usize,
}

impl EvaluationReport {
    fn absorb(&mut self, other: EvaluationReport) {
        self.selected += other.selected;
        self.matched += other.matched;
        self.mismatched += other.mismatched;
        self.malformed += other.malformed;
        self.unreachable += other.unreachable;
    }
}

#[derive(Clone)]
pub struct QualityEvaluator {
    store: InteractionStore,
    oracle: Arc<dyn QualityOracle>,
}

impl QualityEvaluator {
    pub fn new(store: InteractionStore, oracle: Arc<dyn QualityOracle>) -> Self {
        Self { store, oracle }
    }

    /// Evaluate up to `batch_size` rows with an unset flag
    pub async fn run_batch(&self, batch_size: usize) -> StoreResult<EvaluationReport> {
        let rows = self.store.fetch_unevaluated(batch_size).await?;
        let mut report = EvaluationReport {
            selected: rows.len(),
            ..Default::default()
        };

        for row in rows {
            let verdict = match self.oracle.judge(&row.message, &row.response).await {
                Ok(raw) => Verdict::parse(&raw),
                Err(e) => {
                    warn!(interaction_id = row.id, error = %e, "Oracle call failed");
                    report.unreachable += 1;
                    Verdict {
                        flag: OracleFlag::Mismatch,
                        feedback: format!("oracle error: {}", e),
                        malformed: false,
                    }
                }
            };

            if verdict.malformed {
                debug!(interaction_id = row.id, "Oracle output malformed");
                report.malformed += 1;
            }

            match self
                .store
                .set_gemini_evaluation(row.id, verdict.flag, &verdict.feedback)
                .await?
            {
                AnnotationOutcome::Written => match verdict.flag {
                    OracleFlag::Match => report.matched += 1,
                    _ => report.mismatched += 1,
                },
                AnnotationOutcome::AlreadyAnnotated => {
                    debug!(interaction_id = row.id, "Row annotated concurrently, keeping it");
                }
                AnnotationOutcome::NotFound => {
                    warn!(interaction_id = row.id, "Row vanished during evaluation");
                }
            }
        }

        info!(
            selected = report.selected,
            matched = report.matched,
            mismatched = report.mismatched,
            "Evaluation batch finished"
        );
        Ok(report)
    }

    /// Run batches until no unevaluated rows remain or `max_batches` is hit
    pub async fn run_until_drained(
        &self,
        batch_size: usize,
        max_batches: usize,
    ) -> StoreResult<EvaluationReport> {
        let mut total = EvaluationReport::default();
        if batch_size == 0 {
            return Ok(total);
        }

        for _ in 0..max_batches {
            let report = self.run_batch(batch_size).await?;
            total.absorb(report);
            if report.selected < batch_size {
                break;
            }
        }
        Ok(total)
    }

    /// Spawn a task that runs one batch every `interval`
    pub fn spawn_periodic(self, batch_size: usize, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_batch(batch_size).await {
                    error!(error = %e, "Periodic evaluation failed");
                }
            }
        })
    }
}
