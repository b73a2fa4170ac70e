//! Upload pipeline.
//!
//! Each file goes through validate → extract → chunk → embed → upsert on
//! its own; a failure aborts only that file and is reported in the
//! [`UploadSummary`].
//!
//! `report` uploads supersede: before the first upsert of a request, all of
//! the user's existing report chunks are deleted. `document` uploads
//! accumulate, and re-uploading identical content overwrites the same
//! point ids.

use serde::Serialize;

use crate::chunk::{chunk_text, content_hash, point_id};
use crate::config::Config;
use crate::embedding::embed_in_batches;
use crate::error::PipelineError;
use crate::extract::{extract_pdf_text, validate_upload, ExtractError};
use crate::models::{ChunkPayload, ChunkPoint, SourceTag};
use crate::services::Services;
use crate::vector_store::PointFilter;

/// A file received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Indexed,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub filename: String,
    pub status: FileStatus,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub source: SourceTag,
    pub files: Vec<FileOutcome>,
    pub indexed_files: usize,
    pub total_chunks: usize,
    /// Report chunks deleted before indexing; absent for `document` uploads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_chunks: Option<usize>,
}

impl UploadSummary {
    pub fn any_indexed(&self) -> bool {
        self.indexed_files > 0
    }

    /// True when every file was refused for a client-side reason.
    pub fn all_rejected(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.status == FileStatus::Rejected)
    }
}

/// Per-request state for report supersession.
struct Supersede {
    pending: bool,
    deleted: Option<usize>,
}

pub async fn ingest_files(
    services: &Services,
    config: &Config,
    user_id: &str,
    source: SourceTag,
    files: Vec<UploadedFile>,
) -> UploadSummary {
    let mut supersede = Supersede {
        pending: source == SourceTag::Report,
        deleted: None,
    };
    let uploaded_at = chrono::Utc::now().to_rfc3339();
    let mut outcomes = Vec::with_capacity(files.len());

    for file in files {
        let filename = file.filename.clone();
        let result = ingest_one(
            services,
            config,
            user_id,
            source,
            &uploaded_at,
            file,
            &mut supersede,
        )
        .await;
        let outcome = match result {
            Ok(chunks) => {
                tracing::info!(user_id, %filename, chunks, %source, "indexed file");
                FileOutcome {
                    filename,
                    status: FileStatus::Indexed,
                    chunks,
                    error: None,
                }
            }
            Err(e) => {
                let status = if e.is_client_error() {
                    tracing::info!(user_id, %filename, "rejected upload: {}", e);
                    FileStatus::Rejected
                } else {
                    tracing::error!(user_id, %filename, "failed to index upload: {}", e);
                    FileStatus::Failed
                };
                FileOutcome {
                    filename,
                    status,
                    chunks: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }

    let indexed_files = outcomes
        .iter()
        .filter(|o| o.status == FileStatus::Indexed)
        .count();
    let total_chunks = outcomes.iter().map(|o| o.chunks).sum();

    UploadSummary {
        source,
        files: outcomes,
        indexed_files,
        total_chunks,
        superseded_chunks: supersede.deleted,
    }
}

async fn ingest_one(
    services: &Services,
    config: &Config,
    user_id: &str,
    source: SourceTag,
    uploaded_at: &str,
    file: UploadedFile,
    supersede: &mut Supersede,
) -> Result<usize, PipelineError> {
    validate_upload(&file.filename, &file.bytes, config.upload.max_file_bytes)?;

    // pdf-extract can panic on malformed input; a panicked task becomes a
    // per-file error.
    let bytes = file.bytes;
    let text = tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
        .await
        .map_err(|e| ExtractError::Pdf(format!("PDF parser crashed: {}", e)))??;

    let chunks = chunk_text(&text, &config.chunking);
    if chunks.is_empty() {
        return Err(PipelineError::Validation(format!(
            "No text chunks could be created from '{}'",
            file.filename
        )));
    }
    tracing::debug!(filename = %file.filename, chunks = chunks.len(), "chunked document");

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(
        services.embedder.as_ref(),
        &texts,
        config.embedding.batch_size,
    )
    .await
    .map_err(PipelineError::Embedding)?;

    let total_chunks = chunks.len();
    let points: Vec<ChunkPoint> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| ChunkPoint {
            id: point_id(user_id, &file.filename, chunk.chunk_index, &chunk.text),
            vector,
            payload: ChunkPayload {
                content_hash: content_hash(&chunk.text),
                text: chunk.text,
                source,
                filename: file.filename.clone(),
                user_id: user_id.to_string(),
                chunk_index: chunk.chunk_index,
                total_chunks,
                uploaded_at: uploaded_at.to_string(),
            },
        })
        .collect();

    if supersede.pending {
        supersede.pending = false;
        let filter = PointFilter::for_user(user_id).with_source(SourceTag::Report);
        match services.store.delete(&filter).await {
            Ok(deleted) => {
                tracing::info!(user_id, deleted, "superseded previous report chunks");
                supersede.deleted = Some(deleted);
            }
            Err(e) => tracing::warn!(user_id, "could not delete previous report chunks: {:#}", e),
        }
    }

    for batch in points.chunks(config.vector_store.upsert_batch_size.max(1)) {
        services
            .store
            .upsert(batch)
            .await
            .map_err(PipelineError::VectorStore)?;
    }

    Ok(total_chunks)
}
