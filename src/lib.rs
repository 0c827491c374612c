//! Intent Desk - intent-routed chatbot with a review feedback loop
//!
//! - Router: confident classifier hits get a canned response, everything
//!   else goes to retrieval-augmented generation; every exchange is logged
//! - Quality evaluator: an LLM oracle flags answers that missed the question
//! - Correction service: reviewers relabel logged messages and the intent
//!   dataset grows from their decisions
//!
//! # Example
//!
//! ```ignore
//! use intent_desk::{App, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = App::open(Config::load()?).await?;
//!     let reply = app.router.handle("hi there", None).await;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod store;
pub mod dataset;
pub mod adapters;
pub mod router;
pub mod evaluator;
pub mod review;
pub mod app;
pub mod server;
pub mod cli;

pub use app::{Adapters, App};
pub use config::Config;
pub use dataset::{Intent, IntentDataset, IntentsDocument};
pub use error::{DatasetError, StoreError};
pub use evaluator::{EvaluationReport, QualityEvaluator, Verdict};
pub use review::{Correction, CorrectionReport, CorrectionService};
pub use router::{RoutePath, RoutedReply, Router};
pub use store::{InteractionStore, ReviewScope};
pub use types::{Interaction, InteractionId, OracleFlag};

pub use server::start as start_server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Name and version line shown at server startup
pub fn info() -> String {
    format!("{} v{} - Intent-routed chatbot backend", NAME, VERSION)
}
