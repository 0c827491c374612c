//! Component wiring
//!
//! Builds the store, dataset, adapters and services from a `Config`. The
//! server and the CLI share one `App`; tests assemble one from fakes.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::{
    AnswerGenerator, HttpCatalog, HttpClassifier, IntentClassifier, LlmClient, LlmOracle,
    ProductCatalog, QualityOracle, RagGenerator,
};
use crate::config::Config;
use crate::dataset::IntentDataset;
use crate::evaluator::QualityEvaluator;
use crate::review::CorrectionService;
use crate::router::Router;
use crate::store::InteractionStore;

/// Externally provided collaborators
pub struct Adapters {
    pub classifier: Arc<dyn IntentClassifier>,
    pub generator: Arc<dyn AnswerGenerator>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub oracle: Arc<dyn QualityOracle>,
}

#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub store: InteractionStore,
    pub dataset: Arc<IntentDataset>,
    pub router: Arc<Router>,
    pub evaluator: QualityEvaluator,
    pub review: Arc<CorrectionService>,
    retrieval: Option<Arc<RagGenerator>>,
    catalog: Arc<dyn ProductCatalog>,
}

impl App {
    /// Open storage and connect the HTTP-backed adapters
    pub async fn open(config: Config) -> Result<Self> {
        let store = open_store(&config).await?;
        let dataset = open_dataset(&config)?;

        let llm = LlmClient::from_config(&config.llm, &config.retrieval.embedding_model)?;
        let classifier = Arc::new(HttpClassifier::new(
            &config.classifier,
            config.router.acceptance_threshold,
        )?);
        let catalog: Arc<dyn ProductCatalog> = Arc::new(HttpCatalog::new(&config.catalog)?);
        let retrieval = Arc::new(RagGenerator::new(llm.clone(), config.retrieval.top_k));
        let oracle = Arc::new(LlmOracle::new(llm));

        let adapters = Adapters {
            classifier,
            generator: retrieval.clone(),
            catalog,
            oracle,
        };

        let mut app = Self::assemble(config, store, dataset, adapters);
        app.retrieval = Some(retrieval);
        Ok(app)
    }

    /// Wire already-constructed parts together
    pub fn assemble(
        config: Config,
        store: InteractionStore,
        dataset: Arc<IntentDataset>,
        adapters: Adapters,
    ) -> Self {
        let router = Arc::new(Router::new(
            adapters.classifier,
            adapters.generator,
            adapters.catalog.clone(),
            store.clone(),
            dataset.clone(),
            config.router.clone(),
        ));
        let evaluator = QualityEvaluator::new(store.clone(), adapters.oracle);
        let review = Arc::new(CorrectionService::new(
            store.clone(),
            dataset.clone(),
            config.review.general_queue,
        ));

        Self {
            config: Arc::new(config),
            store,
            dataset,
            router,
            evaluator,
            review,
            retrieval: None,
            catalog: adapters.catalog,
        }
    }

    /// Build the retrieval index from the live catalog
    ///
    /// A failure leaves the index empty; fallback answers then run without
    /// product context.
    pub async fn index_catalog(&self) {
        let Some(retrieval) = &self.retrieval else {
            return;
        };
        match retrieval.index_catalog(self.catalog.as_ref()).await {
            Ok(count) => info!(documents = count, "Retrieval index ready"),
            Err(e) => warn!(error = %e, "Could not index catalog, continuing without context"),
        }
    }
}

pub async fn open_store(config: &Config) -> Result<InteractionStore> {
    InteractionStore::open(&config.storage.database_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open interaction log at {}",
                config.storage.database_path.display()
            )
        })
}

pub fn open_dataset(config: &Config) -> Result<Arc<IntentDataset>> {
    let dataset = IntentDataset::open(&config.storage.intents_path).with_context(|| {
        format!(
            "Failed to open intents document at {}",
            config.storage.intents_path.display()
        )
    })?;
    Ok(Arc::new(dataset))
}
