//! Web server module
//!
//! Serves the chat endpoint and the review API over axum. An optional
//! background task runs evaluation batches on a fixed interval.

pub mod http;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::App;

/// Shared server state
pub type ServerState = App;

/// Build the route table
pub fn routes(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/handle_message", post(http::handle_message_handler))
        .route("/api/review/general", get(http::general_review_handler))
        .route("/api/review/flagged", get(http::flagged_review_handler))
        .route("/api/review/corrections", post(http::corrections_handler))
        .route("/api/evaluate", post(http::evaluate_handler))
        .route("/api/status", get(http::status_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server
pub async fn start(app: App, host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    app.index_catalog().await;

    let evaluator_task = app.config.evaluator.interval_secs.map(|secs| {
        info!(interval_secs = secs, "Periodic evaluation enabled");
        app.evaluator.clone().spawn_periodic(
            app.config.evaluator.batch_size,
            Duration::from_secs(secs.max(1)),
        )
    });

    let router = routes(app.clone());

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("     {}", crate::info());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("✓ Interaction log: {}", app.config.storage.database_path.display());
    println!("✓ Intents: {}", app.config.storage.intents_path.display());
    println!("✓ Review queue: {}", app.review.general_scope());
    match app.config.evaluator.interval_secs {
        Some(secs) => println!("✓ Evaluator: every {}s", secs),
        None => println!("⚠ Evaluator: manual only (POST /api/evaluate)"),
    }
    println!();
    println!("🚀 Listening on http://{}", addr);
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, router).await;

    if let Some(task) = evaluator_task {
        task.abort();
    }
    served?;
    Ok(())
}
