//! Cross-encoder reranking.
//!
//! [`rerank_chunks`] is the reranking policy used by retrieval: deduplicate
//! the candidates, score each `(query, chunk)` pair, sort by descending
//! score and keep the top `k`. If scoring fails the first `k` deduplicated
//! candidates are returned unranked instead of failing the request.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RerankerConfig;

/// Default cross-encoder for the `local` provider.
pub const DEFAULT_RERANK_MODEL: &str = "bge-reranker-base";

/// Scores `(query, passage)` pairs for relevance.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn model_name(&self) -> &str;
    /// Returns one score per passage, in input order. Higher is more relevant.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// Rerank `chunks` against `query` and return at most `k` of them.
///
/// Output never contains duplicates and its length is at most
/// `min(k, unique chunks)`.
pub async fn rerank_chunks(
    reranker: &dyn Reranker,
    query: &str,
    chunks: &[String],
    k: usize,
) -> Vec<String> {
    let unique = dedup_preserving_order(chunks);
    if unique.is_empty() || k == 0 {
        return Vec::new();
    }

    let scores = match reranker.score(query, &unique).await {
        Ok(scores) if scores.len() == unique.len() => scores,
        Ok(scores) => {
            tracing::warn!(
                expected = unique.len(),
                got = scores.len(),
                "reranker returned wrong number of scores, using retrieval order"
            );
            return unique.into_iter().take(k).collect();
        }
        Err(e) => {
            tracing::warn!("reranker failed, using retrieval order: {}", e);
            return unique.into_iter().take(k).collect();
        }
    };

    // NaN scores rank last.
    let mut ranked: Vec<(String, f32)> = unique
        .into_iter()
        .zip(scores.into_iter().map(|s| if s.is_nan() { f32::NEG_INFINITY } else { s }))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);

    tracing::debug!(
        input = chunks.len(),
        kept = ranked.len(),
        top_scores = ?ranked.iter().map(|(_, s)| *s).collect::<Vec<_>>(),
        "reranked chunks"
    );

    ranked.into_iter().map(|(chunk, _)| chunk).collect()
}

fn dedup_preserving_order(chunks: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .filter(|c| seen.insert(c.as_str()))
        .cloned()
        .collect()
}

// ============ Disabled ============

/// Assigns equal scores, so reranking keeps retrieval order.
pub struct DisabledReranker;

#[async_trait]
impl Reranker for DisabledReranker {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>> {
        Ok(vec![0.0; passages.len()])
    }
}

// ============ Local cross-encoder (fastembed) ============

/// Cross-encoder run in-process, loaded once at startup.
#[cfg(feature = "local-models")]
pub struct CrossEncoderReranker {
    model_name: String,
    model: Arc<std::sync::Mutex<fastembed::TextRerank>>,
}

#[cfg(feature = "local-models")]
impl CrossEncoderReranker {
    pub fn load(config: &RerankerConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_RERANK_MODEL.to_string());
        let fastembed_model = config_to_rerank_model(&model_name)?;

        let model = fastembed::TextRerank::try_new(
            fastembed::RerankInitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| anyhow!("Failed to initialize reranker model: {}", e))?;

        tracing::info!(model = %model_name, "reranker model loaded");

        Ok(Self {
            model_name,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-models")]
#[async_trait]
impl Reranker for CrossEncoderReranker {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let query = query.to_string();
        let passages = passages.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow!("reranker model lock poisoned"))?;
            let documents: Vec<&str> = passages.iter().map(String::as_str).collect();
            let results = model
                .rerank(query.as_str(), documents, false, None)
                .map_err(|e| anyhow!("Cross-encoder scoring failed: {}", e))?;

            // fastembed returns results sorted by score; put them back in input order.
            let mut scores = vec![f32::NEG_INFINITY; passages.len()];
            for r in results {
                if let Some(slot) = scores.get_mut(r.index) {
                    *slot = r.score;
                }
            }
            Ok(scores)
        })
        .await?
    }
}

#[cfg(feature = "local-models")]
fn config_to_rerank_model(name: &str) -> Result<fastembed::RerankerModel> {
    match name {
        "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" => Ok(fastembed::RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" => Ok(fastembed::RerankerModel::JINARerankerV1TurboEn),
        "jina-reranker-v2-base-multilingual" => {
            Ok(fastembed::RerankerModel::JINARerankerV2BaseMultiligual)
        }
        other => bail!(
            "Unknown reranker model: '{}'. Supported models: bge-reranker-base, \
             bge-reranker-v2-m3, jina-reranker-v1-turbo-en, jina-reranker-v2-base-multilingual",
            other
        ),
    }
}

/// Create the configured [`Reranker`]. Local models are loaded here, once.
pub async fn create_reranker(config: &RerankerConfig) -> Result<Arc<dyn Reranker>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledReranker)),
        #[cfg(feature = "local-models")]
        "local" => {
            let config = config.clone();
            let reranker =
                tokio::task::spawn_blocking(move || CrossEncoderReranker::load(&config)).await??;
            Ok(Arc::new(reranker))
        }
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local reranker requires --features local-models"),
        other => bail!("Unknown reranker provider: {}", other),
    }
}
