//! Correction Service
//!
//! Human review of logged interactions. Reviewers pull a queue, pick the
//! right tag for each message, and the batch is written to the interaction
//! log and folded into the intent dataset in one step.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::dataset::{DatasetWriter, IntentDataset, IntentsDocument, MergeOutcome};
use crate::error::{DatasetError, DatasetResult, StoreResult};
use crate::store::{CorrectionOutcome, InteractionStore, ReviewScope};
use crate::types::{Interaction, InteractionId};

/// One reviewer decision
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub interaction_id: InteractionId,
    /// Existing or brand-new intent tag
    pub tag: String,
    pub new_response: Option<String>,
}

impl Correction {
    pub fn new(interaction_id: InteractionId, tag: impl Into<String>) -> Self {
        Self {
            interaction_id,
            tag: tag.into(),
            new_response: None,
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.new_response = Some(response.into());
        self
    }
}

/// Accept ids sent as JSON numbers or numeric strings
pub fn parse_interaction_id(value: &serde_json::Value) -> Option<InteractionId> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// What a correction batch did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrectionReport {
    pub applied: Vec<InteractionId>,
    /// Already corrected to the same tag
    pub unchanged: Vec<InteractionId>,
    pub skipped_unknown: Vec<InteractionId>,
    pub skipped_conflict: Vec<InteractionId>,
    pub failed: Vec<InteractionId>,
    /// Corrections dropped for an empty tag
    pub skipped_blank: usize,
    pub created_intents: Vec<String>,
    /// Dataset version after the batch; unchanged when nothing was applied
    pub dataset_version: u64,
}

pub struct CorrectionService {
    store: InteractionStore,
    dataset: Arc<IntentDataset>,
    general_scope: ReviewScope,
}

impl CorrectionService {
    pub fn new(
        store: InteractionStore,
        dataset: Arc<IntentDataset>,
        general_scope: ReviewScope,
    ) -> Self {
        Self {
            store,
            dataset,
            general_scope,
        }
    }

    pub fn general_scope(&self) -> ReviewScope {
        self.general_scope
    }

    /// Rows for the general review queue, oldest first
    pub async fn list_for_general_review(&self) -> StoreResult<Vec<Interaction>> {
        self.store.fetch_uncorrected(self.general_scope).await
    }

    /// Oracle-flagged rows awaiting review, newest first
    pub async fn list_for_flagged_review(&self) -> StoreResult<Vec<Interaction>> {
        self.store.fetch_flagged_uncorrected().await
    }

    /// Tags a reviewer can choose from
    pub fn known_tags(&self) -> Vec<String> {
        self.dataset.snapshot().tags()
    }

    /// Apply a batch of corrections
    ///
    /// Unknown, conflicting and blank entries are skipped. A dataset read or
    /// write failure aborts the batch and undoes its interaction-log writes.
    pub async fn apply_corrections(
        &self,
        corrections: Vec<Correction>,
    ) -> DatasetResult<CorrectionReport> {
        let mut report = CorrectionReport::default();

        let mut pairs = Vec::with_capacity(corrections.len());
        let mut responses: HashMap<InteractionId, String> = HashMap::new();
        for correction in corrections {
            let tag = correction.tag.trim();
            if tag.is_empty() {
                debug!(interaction_id = correction.interaction_id, "Skipping blank tag");
                report.skipped_blank += 1;
                continue;
            }
            if let Some(response) = correction.new_response {
                responses.entry(correction.interaction_id).or_insert(response);
            }
            pairs.push((correction.interaction_id, tag.to_string()));
        }

        let writer = self.dataset.writer().await;
        let mut document = writer.load()?;
        let previous = document.clone();
        report.dataset_version = document.version;

        let created = &mut report.created_intents;
        let version = &mut report.dataset_version;
        let result = self
            .store
            .record_corrections::<_, DatasetError>(&pairs, |applied| {
                if applied.is_empty() {
                    return Ok(());
                }
                for correction in applied {
                    let response = responses.get(&correction.id).map(String::as_str);
                    let merged =
                        document.merge_correction(&correction.tag, &correction.message, response);
                    if merged == MergeOutcome::Created {
                        created.push(correction.tag.clone());
                    }
                }
                *version = writer.replace(document)?.version;
                Ok(())
            })
            .await;

        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(e) => {
                if report.dataset_version != previous.version {
                    // The log commit failed after the dataset was replaced
                    restore_document(&writer, previous, report.dataset_version);
                }
                return Err(e);
            }
        };
        drop(writer);

        for outcome in outcomes {
            match outcome {
                CorrectionOutcome::Applied(applied) => report.applied.push(applied.id),
                CorrectionOutcome::Unchanged { id } => report.unchanged.push(id),
                CorrectionOutcome::NotFound { id } => {
                    debug!(interaction_id = id, "Skipping unknown interaction");
                    report.skipped_unknown.push(id);
                }
                CorrectionOutcome::Conflict { id, existing } => {
                    warn!(interaction_id = id, existing = %existing, "Interaction already corrected to another tag");
                    report.skipped_conflict.push(id);
                }
                CorrectionOutcome::Failed { id, reason } => {
                    warn!(interaction_id = id, reason = %reason, "Correction failed");
                    report.failed.push(id);
                }
            }
        }

        info!(
            applied = report.applied.len(),
            created = report.created_intents.len(),
            version = report.dataset_version,
            "Applied correction batch"
        );
        Ok(report)
    }
}

/// Write `previous` back over a merge whose log writes were rolled back
fn restore_document(writer: &DatasetWriter<'_>, mut previous: IntentsDocument, written: u64) {
    previous.version = written;
    match writer.replace(previous) {
        Ok(doc) => warn!(version = doc.version, "Restored intents document after failed commit"),
        Err(e) => error!(error = %e, "Failed to restore intents document after failed commit"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Intent, IntentsDocument};
    use crate::types::NewInteraction;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        intents_path: std::path::PathBuf,
        store: InteractionStore,
        service: CorrectionService,
    }

    async fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let intents_path = dir.path().join("intents.json");
        let document = IntentsDocument {
            version: 3,
            intents: vec![Intent {
                tag: "pen_color".to_string(),
                patterns: vec!["red pen".to_string()],
                responses: vec!["We have many colors.".to_string()],
                context_set: String::new(),
            }],
        };
        std::fs::write(&intents_path, serde_json::to_string(&document).unwrap()).unwrap();

        let store = InteractionStore::open(dir.path().join("logs.db")).await.unwrap();
        let dataset = Arc::new(IntentDataset::open(&intents_path).unwrap());
        let service = CorrectionService::new(store.clone(), dataset, ReviewScope::AllUncorrected);
        Fixture {
            _dir: dir,
            intents_path,
            store,
            service,
        }
    }

    async fn log(store: &InteractionStore, message: &str) -> InteractionId {
        store
            .append(&NewInteraction {
                user_id: None,
                message: message.to_string(),
                response: "?".to_string(),
                predicted_intent: None,
                confidence: 0.0,
            })
            .await
            .unwrap()
    }

    fn on_disk(path: &std::path::Path) -> IntentsDocument {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_existing_and_new_tags_merge() {
        let fx = fixture().await;
        let blue = log(&fx.store, "blue pen please").await;
        let warranty = log(&fx.store, "is this covered?").await;

        let report = fx
            .service
            .apply_corrections(vec![
                Correction::new(blue, "pen_color"),
                Correction::new(warranty, "warranty_question")
                    .with_response("All items carry a one-year warranty."),
            ])
            .await
            .unwrap();

        assert_eq!(report.applied, vec![blue, warranty]);
        assert_eq!(report.created_intents, vec!["warranty_question"]);
        assert_eq!(report.dataset_version, 4);

        let doc = on_disk(&fx.intents_path);
        assert_eq!(doc.version, 4);
        let pen = doc.find("pen_color").unwrap();
        assert_eq!(pen.patterns, vec!["red pen", "blue pen please"]);
        let created: Vec<_> = doc
            .intents
            .iter()
            .filter(|i| i.tag == "warranty_question")
            .collect();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].patterns, vec!["is this covered?"]);
        assert_eq!(created[0].responses, vec!["All items carry a one-year warranty."]);

        assert!(fx.service.list_for_general_review().await.unwrap().is_empty());
        assert!(fx.service.known_tags().contains(&"warranty_question".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_blank_and_conflicting_entries_are_skipped() {
        let fx = fixture().await;
        let id = log(&fx.store, "blue pen please").await;
        let other = log(&fx.store, "hello").await;
        fx.store.set_corrected_intent(other, "greeting").await.unwrap();

        let report = fx
            .service
            .apply_corrections(vec![
                Correction::new(9999, "pen_color"),
                Correction::new(id, "   "),
                Correction::new(other, "pen_color"),
                Correction::new(id, "pen_color"),
            ])
            .await
            .unwrap();

        assert_eq!(report.applied, vec![id]);
        assert_eq!(report.skipped_unknown, vec![9999]);
        assert_eq!(report.skipped_conflict, vec![other]);
        assert_eq!(report.skipped_blank, 1);

        let row = fx.store.get(other).await.unwrap().unwrap();
        assert_eq!(row.corrected_intent.as_deref(), Some("greeting"));
    }

    #[tokio::test]
    async fn test_resubmitting_same_tag_is_a_no_op() {
        let fx = fixture().await;
        let id = log(&fx.store, "blue pen please").await;

        fx.service
            .apply_corrections(vec![Correction::new(id, "pen_color")])
            .await
            .unwrap();
        let again = fx
            .service
            .apply_corrections(vec![Correction::new(id, "pen_color")])
            .await
            .unwrap();

        assert_eq!(again.unchanged, vec![id]);
        assert!(again.applied.is_empty());
        let doc = on_disk(&fx.intents_path);
        assert_eq!(doc.version, 4);
        assert_eq!(doc.find("pen_color").unwrap().patterns.len(), 2);
    }

    #[tokio::test]
    async fn test_dataset_write_failure_rolls_back_corrections() {
        let fx = fixture().await;
        let id = log(&fx.store, "blue pen please").await;

        // A directory squatting on the temp path makes the atomic write fail
        let tmp = fx.intents_path.with_file_name(format!(
            ".intents.json.{}.tmp",
            std::process::id()
        ));
        std::fs::create_dir(&tmp).unwrap();

        let err = fx
            .service
            .apply_corrections(vec![Correction::new(id, "pen_color")])
            .await
            .unwrap_err();
        assert!(matches!(err, DatasetError::Write { .. }));

        let row = fx.store.get(id).await.unwrap().unwrap();
        assert!(row.corrected_intent.is_none());
        assert_eq!(on_disk(&fx.intents_path).version, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_batches_lose_nothing_and_serialize_same_id() {
        let fx = fixture().await;
        let blue = log(&fx.store, "blue pen please").await;
        let warranty = log(&fx.store, "is this covered?").await;
        let contested = log(&fx.store, "do you sell ink").await;
        let service = Arc::new(fx.service);

        let first = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .apply_corrections(vec![
                        Correction::new(blue, "pen_color"),
                        Correction::new(contested, "ink_question"),
                    ])
                    .await
            })
        };
        let second = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .apply_corrections(vec![
                        Correction::new(warranty, "warranty_question"),
                        Correction::new(contested, "pen_color"),
                    ])
                    .await
            })
        };
        let (first, second) = tokio::join!(first, second);
        let first = first.unwrap().unwrap();
        let second = second.unwrap().unwrap();

        let doc = on_disk(&fx.intents_path);
        assert_eq!(doc.version, 5);
        assert!(doc
            .find("pen_color")
            .unwrap()
            .patterns
            .contains(&"blue pen please".to_string()));
        assert_eq!(
            doc.find("warranty_question").unwrap().patterns,
            vec!["is this covered?"]
        );

        // Exactly one tag won for the contested row
        let applied_contested = [&first, &second]
            .iter()
            .filter(|r| r.applied.contains(&contested))
            .count();
        let conflicted = [&first, &second]
            .iter()
            .filter(|r| r.skipped_conflict == vec![contested])
            .count();
        assert_eq!(applied_contested, 1);
        assert_eq!(conflicted, 1);

        let row = fx.store.get(contested).await.unwrap().unwrap();
        let winner = row.corrected_intent.unwrap();
        let contested_patterns: usize = doc
            .intents
            .iter()
            .map(|i| i.patterns.iter().filter(|p| *p == "do you sell ink").count())
            .sum();
        assert_eq!(contested_patterns, 1);
        assert!(doc
            .find(&winner)
            .unwrap()
            .patterns
            .contains(&"do you sell ink".to_string()));
    }

    #[tokio::test]
    async fn test_restore_document_undoes_merge() {
        let fx = fixture().await;
        let writer = fx.service.dataset.writer().await;
        let previous = writer.load().unwrap();

        let mut merged = previous.clone();
        merged.merge_correction("pen_color", "blue pen please", None);
        let written = writer.replace(merged).unwrap().version;
        assert_eq!(written, 4);

        restore_document(&writer, previous, written);
        drop(writer);

        let doc = on_disk(&fx.intents_path);
        assert_eq!(doc.version, 5);
        assert_eq!(doc.find("pen_color").unwrap().patterns, vec!["red pen"]);
        assert_eq!(
            fx.service.known_tags(),
            vec!["pen_color".to_string()]
        );
    }

    #[test]
    fn test_parse_interaction_id() {
        assert_eq!(parse_interaction_id(&serde_json::json!(12)), Some(12));
        assert_eq!(parse_interaction_id(&serde_json::json!(" 7 ")), Some(7));
        assert_eq!(parse_interaction_id(&serde_json::json!("abc")), None);
        assert_eq!(parse_interaction_id(&serde_json::json!(null)), None);
        assert_eq!(parse_interaction_id(&serde_json::json!(1.5)), None);
    }
}
