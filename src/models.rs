//! Core data models shared by the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A user record, keyed by the identity provider's subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
}

/// Which upload stream a chunk belongs to.
///
/// `Report` uploads supersede the user's previous reports; `Document`
/// uploads accumulate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    #[default]
    Report,
    Document,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Report => "report",
            SourceTag::Document => "document",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "report" => Ok(SourceTag::Report),
            "document" => Ok(SourceTag::Document),
            other => Err(format!(
                "invalid source tag '{}': expected 'report' or 'document'",
                other
            )),
        }
    }
}

/// A chunk of extracted document text, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_index: usize,
    pub text: String,
}

/// Metadata stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub text: String,
    pub source: SourceTag,
    pub filename: String,
    pub user_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub content_hash: String,
    pub uploaded_at: String,
}

/// An indexed point: id, embedding, and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A similarity-search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Per-user, per-file chunk count for `GET /documents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub filename: String,
    pub source: SourceTag,
    pub chunks: usize,
}
