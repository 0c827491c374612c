//! End-to-end: route messages, evaluate them, correct the flagged ones and
//! watch the intent dataset grow.

use anyhow::Result;
use async_trait::async_trait;
use intent_desk::adapters::{AnswerGenerator, IntentClassifier, ProductCatalog, QualityOracle};
use intent_desk::types::{HistoryTurn, Prediction, Product};
use intent_desk::{
    Adapters, App, Config, Correction, InteractionStore, IntentDataset, OracleFlag, RoutePath,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const INTENTS: &str = r#"{
  "intents": [
    {"tag": "greeting", "patterns": ["hi", "hello"], "responses": ["Hello!"], "context_set": ""},
    {"tag": "pen_color", "patterns": ["red pen"], "responses": ["We stock many colors."], "context_set": ""},
    {"tag": "list_products", "patterns": ["what do you sell"], "responses": ["We sell:\n{product_list}"], "context_set": ""}
  ]
}"#;

/// Confident on exact keywords, silent otherwise
struct KeywordClassifier;

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn predict(&self, text: &str) -> Result<Vec<Prediction>> {
        let text = text.to_lowercase();
        if text.starts_with("hi") {
            Ok(vec![Prediction::new("greeting", 0.98)])
        } else if text.contains("sell") {
            Ok(vec![Prediction::new("list_products", 0.97)])
        } else if text.contains("pen") {
            // Below threshold
            Ok(vec![Prediction::new("pen_color", 0.7)])
        } else {
            Ok(vec![])
        }
    }
}

/// Records every call and the history it was given
#[derive(Default)]
struct RecordingGenerator {
    calls: AtomicUsize,
    histories: Mutex<Vec<Vec<HistoryTurn>>>,
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    async fn answer(&self, query: &str, history: &[HistoryTurn]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().unwrap().push(history.to_vec());
        Ok(format!("generated answer for: {}", query))
    }
}

struct OneProductCatalog;

#[async_trait]
impl ProductCatalog for OneProductCatalog {
    async fn list_products(&self) -> Result<Vec<Product>> {
        Ok(vec![Product {
            name: "Gel pen".to_string(),
            category: Some("Pens".to_string()),
            description: None,
            price: Some(2.5),
        }])
    }
}

/// Approves greetings, rejects pen answers, babbles about anything else
struct ScriptedOracle;

#[async_trait]
impl QualityOracle for ScriptedOracle {
    async fn judge(&self, question: &str, _answer: &str) -> Result<String> {
        if question.starts_with("hi") {
            Ok("```json\n{\"match\": \"yes\", \"explanation\": \"greeting answered\"}\n```".to_string())
        } else if question.contains("pen") {
            Ok(r#"{"match": "no", "explanation": "should have used pen_color"}"#.to_string())
        } else {
            Ok("not sure, maybe?".to_string())
        }
    }
}

struct Harness {
    _dir: TempDir,
    app: App,
    generator: Arc<RecordingGenerator>,
    intents_path: std::path::PathBuf,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let intents_path = dir.path().join("intents.json");
    std::fs::write(&intents_path, INTENTS).unwrap();

    let mut config = Config::default();
    config.storage.database_path = dir.path().join("logs.db");
    config.storage.intents_path = intents_path.clone();
    config.router.rng_seed = Some(1);

    let store = InteractionStore::open(&config.storage.database_path)
        .await
        .unwrap();
    let dataset = Arc::new(IntentDataset::open(&intents_path).unwrap());
    let generator = Arc::new(RecordingGenerator::default());

    let adapters = Adapters {
        classifier: Arc::new(KeywordClassifier),
        generator: generator.clone(),
        catalog: Arc::new(OneProductCatalog),
        oracle: Arc::new(ScriptedOracle),
    };

    Harness {
        _dir: dir,
        app: App::assemble(config, store, dataset, adapters),
        generator,
        intents_path,
    }
}

#[tokio::test]
async fn test_routing_paths_and_logging() {
    let h = harness().await;

    let greeting = h.app.router.route("hi there", Some("alice")).await;
    assert_eq!(greeting.path, RoutePath::Classifier);
    assert_eq!(greeting.response, "Hello!");
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);

    let listing = h.app.router.route("what do you sell?", None).await;
    assert_eq!(listing.response, "We sell:\n- Gel pen [Pens]");

    let mars = h.app.router.route("what's the weather on Mars", None).await;
    assert_eq!(mars.path, RoutePath::Retrieval);
    assert_eq!(mars.response, "generated answer for: what's the weather on Mars");
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);

    // The fallback saw the two previous exchanges, newest first
    let histories = h.generator.histories.lock().unwrap().clone();
    assert_eq!(histories[0].len(), 2);
    assert_eq!(histories[0][0].message, "what do you sell?");
    assert_eq!(histories[0][1].message, "hi there");

    let row = h
        .app
        .store
        .get(mars.interaction_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(row.predicted_intent.is_none());
    assert_eq!(row.confidence, 0.0);
    assert_eq!(row.gemini_flag, OracleFlag::Unset);

    let first = h
        .app
        .store
        .get(greeting.interaction_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.predicted_intent.as_deref(), Some("greeting"));
    assert_eq!(first.confidence, 0.98);
    assert_eq!(first.user_id.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_evaluate_review_and_retrain_loop() {
    let h = harness().await;

    h.app.router.handle("hi", None).await;
    let pen = h.app.router.route("blue pen please", None).await;
    let odd = h.app.router.route("is this covered by warranty", None).await;
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 2);

    let report = h.app.evaluator.run_until_drained(2, 10).await.unwrap();
    assert_eq!(report.selected, 3);
    assert_eq!(report.matched, 1);
    assert_eq!(report.mismatched, 2);
    assert_eq!(report.malformed, 1);

    // Nothing left: a second pass is a no-op
    let again = h.app.evaluator.run_batch(10).await.unwrap();
    assert_eq!(again.selected, 0);

    let odd_row = h
        .app
        .store
        .get(odd.interaction_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(odd_row.gemini_flag, OracleFlag::Mismatch);
    assert_eq!(odd_row.gemini_feedback.as_deref(), Some("not sure, maybe?"));

    let flagged = h.app.review.list_for_flagged_review().await.unwrap();
    let flagged_ids: Vec<_> = flagged.iter().map(|r| r.id).collect();
    assert_eq!(
        flagged_ids,
        vec![odd.interaction_id.unwrap(), pen.interaction_id.unwrap()]
    );

    let report = h
        .app
        .review
        .apply_corrections(vec![
            Correction::new(pen.interaction_id.unwrap(), "pen_color"),
            Correction::new(odd.interaction_id.unwrap(), "warranty_question")
                .with_response("Every item has a one-year warranty."),
            Correction::new(424242, "pen_color"),
        ])
        .await
        .unwrap();
    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.skipped_unknown, vec![424242]);
    assert_eq!(report.created_intents, vec!["warranty_question"]);

    assert!(h.app.review.list_for_flagged_review().await.unwrap().is_empty());
    assert_eq!(h.app.review.list_for_general_review().await.unwrap().len(), 1);

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&h.intents_path).unwrap()).unwrap();
    assert_eq!(on_disk["version"], 1);
    let intents = on_disk["intents"].as_array().unwrap();
    let pen_color = intents.iter().find(|i| i["tag"] == "pen_color").unwrap();
    assert_eq!(
        pen_color["patterns"],
        serde_json::json!(["red pen", "blue pen please"])
    );
    let warranty = intents
        .iter()
        .find(|i| i["tag"] == "warranty_question")
        .unwrap();
    assert_eq!(
        warranty["responses"],
        serde_json::json!(["Every item has a one-year warranty."])
    );

    // The router answers from the new intent as soon as the classifier knows it
    let snapshot = h.app.dataset.snapshot();
    assert!(snapshot.find("warranty_question").is_some());
}
