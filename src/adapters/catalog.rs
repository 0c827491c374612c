//! HTTP client for the product catalog service
//!
//! The backend answers with `{"result": [...]}` where each element carries
//! `name`, `category.categoryName`, `description` and `minPrice` among
//! many fields we do not need.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::ProductCatalog;
use crate::config::CatalogConfig;
use crate::types::Product;

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    result: Vec<RawProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProduct {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<RawCategory>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    min_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCategory {
    #[serde(default)]
    category_name: Option<String>,
}

fn parse_products(body: &str) -> Result<Vec<Product>> {
    let parsed: CatalogResponse =
        serde_json::from_str(body).context("Failed to parse catalog response")?;

    Ok(parsed
        .result
        .into_iter()
        .filter_map(|raw| {
            let name = raw.name.filter(|n| !n.trim().is_empty())?;
            Some(Product {
                name,
                category: raw.category.and_then(|c| c.category_name),
                description: raw.description,
                price: raw.min_price,
            })
        })
        .collect())
}

pub struct HttpCatalog {
    client: Client,
    url: String,
}

impl HttpCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build catalog HTTP client")?;
        Ok(Self {
            client,
            url: config.products_url.clone(),
        })
    }
}

#[async_trait]
impl ProductCatalog for HttpCatalog {
    async fn list_products(&self) -> Result<Vec<Product>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to reach catalog service")?;

        if !response.status().is_success() {
            bail!("Catalog service returned {}", response.status());
        }

        let body = response
            .text()
            .await
            .context("Failed to read catalog response")?;
        parse_products(&body)
    }
}
