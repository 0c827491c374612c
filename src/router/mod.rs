//! Message Router
//!
//! Sends each incoming message either to the intent classifier's canned
//! responses or to the retrieval fallback, then logs the exchange. Adapter
//! failures degrade to a fixed reply; they never reach the caller.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::adapters::classifier::qualifying;
use crate::adapters::{AnswerGenerator, IntentClassifier, ProductCatalog};
use crate::config::RouterConfig;
use crate::dataset::IntentDataset;
use crate::store::InteractionStore;
use crate::types::{InteractionId, NewInteraction, Product};

pub const NO_RESPONSE_REPLY: &str = "Sorry, I don't have an appropriate response at the moment.";
pub const NOT_UNDERSTOOD_REPLY: &str = "Sorry, I didn't understand that. Could you please rephrase?";
pub const FALLBACK_FAILURE_REPLY: &str =
    "Sorry, something went wrong while looking that up. Please try again in a moment.";
pub const NO_PRODUCTS_NOTICE: &str = "No products are available right now.";

/// Which path produced the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePath {
    Classifier,
    Retrieval,
    /// The classifier could not be reached
    Degraded,
}

/// Outcome of routing one message
#[derive(Debug, Clone, Serialize)]
pub struct RoutedReply {
    /// `None` when the interaction could not be logged
    pub interaction_id: Option<InteractionId>,
    pub response: String,
    pub predicted_intent: Option<String>,
    pub confidence: f64,
    pub path: RoutePath,
}

pub struct Router {
    classifier: Arc<dyn IntentClassifier>,
    generator: Arc<dyn AnswerGenerator>,
    catalog: Arc<dyn ProductCatalog>,
    store: InteractionStore,
    dataset: Arc<IntentDataset>,
    rng: Mutex<StdRng>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        generator: Arc<dyn AnswerGenerator>,
        catalog: Arc<dyn ProductCatalog>,
        store: InteractionStore,
        dataset: Arc<IntentDataset>,
        config: RouterConfig,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            classifier,
            generator,
            catalog,
            store,
            dataset,
            rng: Mutex::new(rng),
            config,
        }
    }

    /// Replace the response-selection randomness source
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Route a message and return only the reply text
    pub async fn handle(&self, message: &str, user_id: Option<&str>) -> String {
        self.route(message, user_id).await.response
    }

    /// Route a message, log the exchange and report how it was answered
    pub async fn route(&self, message: &str, user_id: Option<&str>) -> RoutedReply {
        let (response, predicted_intent, confidence, path) =
            match self.classifier.predict(message).await {
                Ok(predictions) => {
                    match qualifying(predictions, self.config.acceptance_threshold)
                        .into_iter()
                        .next()
                    {
                        Some(top) => {
                            let response = self.template_reply(&top.intent).await;
                            (response, Some(top.intent), top.probability, RoutePath::Classifier)
                        }
                        None => {
                            let response = self.fallback_reply(message).await;
                            (response, None, 0.0, RoutePath::Retrieval)
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Classifier unavailable, using default reply");
                    (NOT_UNDERSTOOD_REPLY.to_string(), None, 0.0, RoutePath::Degraded)
                }
            };

        let record = NewInteraction {
            user_id: user_id.map(str::to_string),
            message: message.to_string(),
            response: response.clone(),
            predicted_intent: predicted_intent.clone(),
            confidence,
        };

        let interaction_id = match self.store.append(&record).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, "Failed to log interaction");
                None
            }
        };

        info!(
            interaction_id = ?interaction_id,
            intent = predicted_intent.as_deref().unwrap_or("-"),
            confidence,
            path = ?path,
            "Routed message"
        );

        RoutedReply {
            interaction_id,
            response,
            predicted_intent,
            confidence,
            path,
        }
    }

    /// Pick one of the intent's canned responses
    async fn template_reply(&self, tag: &str) -> String {
        let snapshot = self.dataset.snapshot();
        let Some(intent) = snapshot.find(tag) else {
            warn!(tag, "Classifier returned a tag missing from the dataset");
            return NO_RESPONSE_REPLY.to_string();
        };

        let Some(template) = self.choose(&intent.responses) else {
            debug!(tag, "Intent has no responses");
            return NO_RESPONSE_REPLY.to_string();
        };

        if tag == self.config.catalog_tag {
            let listing = match self.catalog.list_products().await {
                Ok(products) => format_product_list(&products),
                Err(e) => {
                    warn!(error = %e, "Catalog unavailable");
                    NO_PRODUCTS_NOTICE.to_string()
                }
            };
            return template.replace(&self.config.catalog_placeholder, &listing);
        }

        template
    }

    async fn fallback_reply(&self, message: &str) -> String {
        let history = match self
            .store
            .fetch_recent_history(self.config.history_window)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "Failed to load history window");
                Vec::new()
            }
        };

        match self.generator.answer(message, &history).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "Retrieval fallback failed");
                FALLBACK_FAILURE_REPLY.to_string()
            }
        }
    }

    fn choose(&self, responses: &[String]) -> Option<String> {
        if responses.is_empty() {
            return None;
        }
        let idx = match self.rng.lock() {
            Ok(mut rng) => rng.random_range(0..responses.len()),
            Err(poisoned) => poisoned.into_inner().random_range(0..responses.len()),
        };
        responses.get(idx).cloned()
    }
}

/// Plain-text product listing substituted into the catalog template
pub fn format_product_list(products: &[Product]) -> String {
    if products.is_empty() {
        return NO_PRODUCTS_NOTICE.to_string();
    }

    products
        .iter()
        .map(|p| {
            let mut line = format!("- {}", p.name);
            if let Some(category) = &p.category {
                line.push_str(&format!(" [{}]", category));
            }
            if let Some(description) = &p.description {
                line.push_str(&format!(": {}", description));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
