//! Item catalog access.
//!
//! The catalog is an external collaborator; the engine treats it as an
//! opaque store keyed by item id. Semantic search and embeddings live on the
//! catalog side and never enter this process. `Item` is engine-private so the
//! hidden floor price cannot cross the RPC boundary by construction.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A priced catalog entry.
///
/// `floor_price` is the negotiation floor and must never be serialized into
/// any edge-visible structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub base_price: f64,
    pub floor_price: f64,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Item {
    /// Active items must also satisfy `base ≥ floor`; anything else is
    /// treated as unavailable rather than negotiated at a broken price.
    pub fn is_sellable(&self) -> bool {
        self.active && self.base_price >= self.floor_price && self.floor_price >= 0.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unreachable: {0}")]
    Unreachable(String),
    #[error("catalog returned an unusable item: {0}")]
    BadPayload(String),
}

/// Read-only port onto the catalog store.
#[async_trait]
pub trait ItemCatalog: Send + Sync {
    async fn item(&self, id: &str) -> Result<Option<Item>, CatalogError>;
}

/// HTTP adapter: `GET {base}/items/{id}`.
pub struct HttpCatalog {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CatalogError::Unreachable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ItemCatalog for HttpCatalog {
    async fn item(&self, id: &str) -> Result<Option<Item>, CatalogError> {
        let url = format!("{}/items/{}", self.base_url, id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CatalogError::Unreachable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| CatalogError::Unreachable(e.to_string()))?;
        let item: Item = resp
            .json()
            .await
            .map_err(|e| CatalogError::BadPayload(e.to_string()))?;
        Ok(Some(item))
    }
}

/// In-process catalog for development and tests.
#[derive(Default)]
pub struct InMemoryCatalog {
    items: DashMap<String, Item>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let catalog = Self::new();
        for item in items {
            catalog.insert(item);
        }
        catalog
    }

    pub fn insert(&self, item: Item) {
        self.items.insert(item.id.clone(), item);
    }
}

#[async_trait]
impl ItemCatalog for InMemoryCatalog {
    async fn item(&self, id: &str) -> Result<Option<Item>, CatalogError> {
        Ok(self.items.get(id).map(|entry| entry.value().clone()))
    }
}
