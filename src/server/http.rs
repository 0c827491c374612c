//! HTTP handlers

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::review::{parse_interaction_id, Correction, CorrectionReport};
use crate::server::ServerState;
use crate::store::InteractionStats;
use crate::types::Interaction;

/// Chat request
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Chat response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub response: String,
}

/// Review queue listing
#[derive(Debug, Serialize)]
pub struct ReviewQueueResponse {
    pub interactions: Vec<Interaction>,
    pub intents: Vec<String>,
}

/// One correction as submitted by the review UI
#[derive(Debug, Deserialize)]
pub struct CorrectionEntry {
    #[serde(default)]
    pub interaction_id: serde_json::Value,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub new_response: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CorrectionsRequest {
    #[serde(default)]
    pub corrections: Vec<CorrectionEntry>,
}

#[derive(Debug, Serialize)]
pub struct CorrectionsResponse {
    #[serde(flatten)]
    pub report: CorrectionReport,
    /// Entries whose id was not a number
    pub skipped_invalid: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct EvaluateRequest {
    #[serde(default)]
    pub batch_size: Option<usize>,
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub review_queue: String,
    pub dataset_version: u64,
    pub intents: usize,
    pub interactions: InteractionStats,
}

fn internal_error(message: &str, details: impl ToString) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details.to_string()
        })),
    )
        .into_response()
}

/// Route one chat message
pub async fn handle_message_handler(
    State(state): State<ServerState>,
    Json(req): Json<MessageRequest>,
) -> impl IntoResponse {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message is required" })),
        )
            .into_response();
    }

    let response = state
        .router
        .handle(&req.message, req.user_id.as_deref())
        .await;
    (StatusCode::OK, Json(MessageResponse { response })).into_response()
}

pub async fn general_review_handler(State(state): State<ServerState>) -> impl IntoResponse {
    match state.review.list_for_general_review().await {
        Ok(interactions) => (
            StatusCode::OK,
            Json(ReviewQueueResponse {
                interactions,
                intents: state.review.known_tags(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to load general review queue");
            internal_error("Failed to load review queue", e)
        }
    }
}

pub async fn flagged_review_handler(State(state): State<ServerState>) -> impl IntoResponse {
    match state.review.list_for_flagged_review().await {
        Ok(interactions) => (
            StatusCode::OK,
            Json(ReviewQueueResponse {
                interactions,
                intents: state.review.known_tags(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to load flagged review queue");
            internal_error("Failed to load review queue", e)
        }
    }
}

/// Apply a correction batch
pub async fn corrections_handler(
    State(state): State<ServerState>,
    Json(req): Json<CorrectionsRequest>,
) -> impl IntoResponse {
    let mut skipped_invalid = 0;
    let mut corrections = Vec::with_capacity(req.corrections.len());
    for entry in req.corrections {
        match parse_interaction_id(&entry.interaction_id) {
            Some(id) => corrections.push(Correction {
                interaction_id: id,
                tag: entry.tag,
                new_response: entry.new_response,
            }),
            None => {
                warn!(interaction_id = %entry.interaction_id, "Skipping correction with invalid id");
                skipped_invalid += 1;
            }
        }
    }

    match state.review.apply_corrections(corrections).await {
        Ok(report) => (
            StatusCode::OK,
            Json(CorrectionsResponse {
                report,
                skipped_invalid,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Correction batch failed");
            internal_error("Failed to apply corrections", e)
        }
    }
}

/// Run one evaluation batch
pub async fn evaluate_handler(
    State(state): State<ServerState>,
    body: Option<Json<EvaluateRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let batch_size = req
        .batch_size
        .unwrap_or(state.config.evaluator.batch_size);

    match state.evaluator.run_batch(batch_size).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!(error = %e, "Evaluation batch failed");
            internal_error("Evaluation failed", e)
        }
    }
}

pub async fn status_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = match state.store.stats().await {
        Ok(stats) => stats,
        Err(e) => return internal_error("Failed to read statistics", e),
    };
    let snapshot = state.dataset.snapshot();

    let response = StatusResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        review_queue: state.review.general_scope().to_string(),
        dataset_version: snapshot.version,
        intents: snapshot.intents.len(),
        interactions: stats,
    };

    (StatusCode::OK, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        MockAnswerGenerator, MockIntentClassifier, MockProductCatalog, MockQualityOracle,
    };
    use crate::app::{Adapters, App};
    use crate::config::Config;
    use crate::dataset::IntentDataset;
    use crate::store::InteractionStore;
    use crate::types::Prediction;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    async fn test_app() -> (TempDir, App) {
        let dir = tempdir().unwrap();
        let store = InteractionStore::open(dir.path().join("logs.db")).await.unwrap();
        let intents_path = dir.path().join("intents.json");
        std::fs::write(
            &intents_path,
            r#"{"intents":[{"tag":"greeting","patterns":["hi"],"responses":["Hello!"],"context_set":""}]}"#,
        )
        .unwrap();
        let dataset = Arc::new(IntentDataset::open(&intents_path).unwrap());

        let mut classifier = MockIntentClassifier::new();
        classifier.expect_predict().returning(|text| {
            if text.contains("hi") {
                Ok(vec![Prediction::new("greeting", 0.99)])
            } else {
                Ok(vec![])
            }
        });
        let mut generator = MockAnswerGenerator::new();
        generator
            .expect_answer()
            .returning(|_, _| Ok("From the docs.".to_string()));
        let mut oracle = MockQualityOracle::new();
        oracle
            .expect_judge()
            .returning(|_, _| Ok(r#"{"match":"no","explanation":"wrong"}"#.to_string()));

        let adapters = Adapters {
            classifier: Arc::new(classifier),
            generator: Arc::new(generator),
            catalog: Arc::new(MockProductCatalog::new()),
            oracle: Arc::new(oracle),
        };
        let app = App::assemble(Config::default(), store, dataset, adapters);
        (dir, app)
    }

    async fn call(
        app: &App,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = crate::server::routes(app.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_handle_message_returns_response() {
        let (_dir, app) = test_app().await;
        let (status, body) = call(
            &app,
            "POST",
            "/handle_message",
            Some(json!({"message": "hi there", "user_id": "u1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Hello!");

        let (status, _) = call(&app, "POST", "/handle_message", Some(json!({"message": " "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_review_flow_over_http() {
        let (_dir, app) = test_app().await;
        call(&app, "POST", "/handle_message", Some(json!({"message": "blue pen please"}))).await;

        let (_, general) = call(&app, "GET", "/api/review/general", None).await;
        assert_eq!(general["interactions"].as_array().unwrap().len(), 1);
        assert_eq!(general["intents"], json!(["greeting"]));

        let (status, report) = call(&app, "POST", "/api/evaluate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["mismatched"], 1);

        let (_, flagged) = call(&app, "GET", "/api/review/flagged", None).await;
        let id = flagged["interactions"][0]["id"].as_i64().unwrap();

        let (status, report) = call(
            &app,
            "POST",
            "/api/review/corrections",
            Some(json!({"corrections": [
                {"interaction_id": id.to_string(), "tag": "pen_color"},
                {"interaction_id": "not-a-number", "tag": "x"}
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["applied"], json!([id]));
        assert_eq!(report["created_intents"], json!(["pen_color"]));
        assert_eq!(report["skipped_invalid"], 1);

        let (_, status_body) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(status_body["version"], crate::VERSION);
        assert_eq!(status_body["dataset_version"], 1);
        assert_eq!(status_body["intents"], 2);
        assert_eq!(status_body["interactions"]["corrected"], 1);
    }
}
