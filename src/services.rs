//! Long-lived model and storage handles, built once at startup.

use anyhow::Result;
use std::sync::Arc;

use crate::config::{Config, Secrets};
use crate::embedding::{create_embedder, Embedder};
use crate::generate::{create_generator, AnswerGenerator};
use crate::rerank::{create_reranker, Reranker};
use crate::vector_store::{create_store, VectorStore};

/// Shared, read-only handles passed to every request.
#[derive(Clone)]
pub struct Services {
    pub embedder: Arc<dyn Embedder>,
    pub reranker: Arc<dyn Reranker>,
    pub store: Arc<dyn VectorStore>,
    pub generator: Arc<dyn AnswerGenerator>,
}

impl Services {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self {
            embedder,
            reranker,
            store,
            generator,
        }
    }

    /// Load the configured models and connect the vector store.
    ///
    /// Also makes sure the collection exists with the embedder's dimension.
    pub async fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let embedder = create_embedder(&config.embedding).await?;
        let reranker = create_reranker(&config.reranker).await?;
        let store = create_store(
            &config.vector_store,
            secrets.qdrant_url.as_deref(),
            secrets.qdrant_api_key.as_deref(),
        )?;
        let generator = create_generator(&config.llm, &secrets.gemini_api_key)?;

        store.ensure_collection(embedder.dims()).await?;

        tracing::info!(
            embedder = embedder.model_name(),
            dims = embedder.dims(),
            reranker = reranker.model_name(),
            store = store.name(),
            llm = generator.model_name(),
            "services ready"
        );

        Ok(Self::new(embedder, reranker, store, generator))
    }
}
