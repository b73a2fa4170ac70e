//! Question answering: embed, search, rerank, build context, generate.
//!
//! Embedding and search failures abort the request. A reranker failure
//! degrades to retrieval order inside [`rerank_chunks`]. When the search
//! finds nothing, the context is [`NO_CONTEXT_SENTINEL`] and the model is
//! still asked, so it can answer from general knowledge.

use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::embedding::embed_query;
use crate::error::PipelineError;
use crate::generate::{build_prompt, NO_CONTEXT_SENTINEL};
use crate::models::SourceTag;
use crate::rerank::rerank_chunks;
use crate::services::Services;
use crate::vector_store::PointFilter;

/// Context assembled for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedContext {
    /// Prompt-ready context block, or the no-context sentinel.
    pub text: String,
    /// Number of chunks in the context.
    pub chunks: usize,
}

impl RetrievedContext {
    fn empty() -> Self {
        Self {
            text: NO_CONTEXT_SENTINEL.to_string(),
            chunks: 0,
        }
    }
}

/// Render a chunk for the context block, optionally under a `[filename]` header.
fn render_chunk(text: &str, filename: &str, label: bool) -> String {
    if label {
        format!("[{}]\n{}", filename, text)
    } else {
        text.to_string()
    }
}

pub async fn retrieve_context(
    services: &Services,
    config: &RetrievalConfig,
    user_id: &str,
    source: SourceTag,
    question: &str,
) -> Result<RetrievedContext, PipelineError> {
    let vector = embed_query(services.embedder.as_ref(), question)
        .await
        .map_err(PipelineError::Embedding)?;

    let filter = PointFilter::for_user(user_id).with_source(source);
    let hits = services
        .store
        .search(&vector, &filter, config.candidate_k)
        .await
        .map_err(PipelineError::VectorStore)?;

    if hits.is_empty() {
        tracing::info!(user_id, %source, "no relevant chunks found");
        return Ok(RetrievedContext::empty());
    }

    // The cross-encoder sees bare chunk text. Identical text from several
    // files collapses to one chunk labeled with its highest-scoring hit.
    let mut filenames: HashMap<&str, &str> = HashMap::new();
    for hit in &hits {
        filenames
            .entry(hit.payload.text.as_str())
            .or_insert(hit.payload.filename.as_str());
    }
    let candidates: Vec<String> = hits.iter().map(|h| h.payload.text.clone()).collect();
    let top = rerank_chunks(
        services.reranker.as_ref(),
        question,
        &candidates,
        config.final_k,
    )
    .await;

    tracing::info!(
        user_id,
        %source,
        candidates = hits.len(),
        kept = top.len(),
        "built context"
    );

    let rendered: Vec<String> = top
        .iter()
        .map(|text| {
            let filename = filenames.get(text.as_str()).copied().unwrap_or_default();
            render_chunk(text, filename, config.label_sources)
        })
        .collect();

    Ok(RetrievedContext {
        chunks: rendered.len(),
        text: rendered.join("\n\n"),
    })
}

/// Full pipeline for one question. Rejects blank questions before any
/// model is called.
pub async fn answer_question(
    services: &Services,
    config: &RetrievalConfig,
    user_id: &str,
    source: SourceTag,
    question: &str,
) -> Result<String, PipelineError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(PipelineError::Validation(
            "Please provide a question.".to_string(),
        ));
    }

    let context = retrieve_context(services, config, user_id, source, question).await?;
    let prompt = build_prompt(question, &context.text);

    services
        .generator
        .generate(&prompt)
        .await
        .map_err(PipelineError::Generation)
}
