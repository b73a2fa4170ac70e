//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers the operations the pipeline needs:
//! collection setup, upsert, filtered similarity search, counting, deletion
//! and per-file listing. Two backends implement it:
//!
//! | Backend | Type | Use |
//! |---------|------|-----|
//! | `qdrant` | [`QdrantStore`] | Qdrant over its REST API |
//! | `memory` | [`InMemoryStore`] | Brute-force cosine search, for local runs and tests |
//!
//! # Isolation
//!
//! All users share one collection. Every read and delete takes a
//! [`PointFilter`], and a `PointFilter` cannot be built without a user id,
//! so each query carries a `user_id` match condition.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::VectorStoreConfig;
use crate::embedding::cosine_similarity;
use crate::models::{ChunkPayload, ChunkPoint, DocumentSummary, ScoredChunk, SourceTag};

/// Payload fields with a keyword index.
const INDEXED_FIELDS: [&str; 3] = ["user_id", "source", "filename"];

/// Page size when scrolling through a user's points.
const SCROLL_PAGE: usize = 256;

/// Metadata predicate applied to every read and delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointFilter {
    user_id: String,
    source: Option<SourceTag>,
    filename: Option<String>,
}

impl PointFilter {
    /// Match all of one user's points.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            source: None,
            filename: None,
        }
    }

    pub fn with_source(mut self, source: SourceTag) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        payload.user_id == self.user_id
            && self.source.map_or(true, |s| payload.source == s)
            && self
                .filename
                .as_deref()
                .map_or(true, |f| payload.filename == f)
    }

    /// Qdrant filter JSON (`{"must": [...]}`).
    pub fn to_qdrant(&self) -> Value {
        let mut must = vec![json!({ "key": "user_id", "match": { "value": self.user_id } })];
        if let Some(source) = self.source {
            must.push(json!({ "key": "source", "match": { "value": source.as_str() } }));
        }
        if let Some(filename) = &self.filename {
            must.push(json!({ "key": "filename", "match": { "value": filename } }));
        }
        json!({ "must": must })
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    /// Create the collection and payload indexes if they do not exist.
    async fn ensure_collection(&self, dims: usize) -> Result<()>;

    /// Insert or overwrite points, returning once the write is durable.
    async fn upsert(&self, points: &[ChunkPoint]) -> Result<()>;

    /// Similarity search restricted by `filter`, best match first.
    async fn search(
        &self,
        vector: &[f32],
        filter: &PointFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    async fn count(&self, filter: &PointFilter) -> Result<usize>;

    /// Delete matching points and return how many were removed.
    async fn delete(&self, filter: &PointFilter) -> Result<usize>;

    /// Chunk counts per (filename, source) for matching points.
    async fn list_documents(&self, filter: &PointFilter) -> Result<Vec<DocumentSummary>>;
}

fn aggregate_documents<I>(entries: I) -> Vec<DocumentSummary>
where
    I: IntoIterator<Item = (String, SourceTag)>,
{
    let mut counts: BTreeMap<(String, SourceTag), usize> = BTreeMap::new();
    for key in entries {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|((filename, source), chunks)| DocumentSummary {
            filename,
            source,
            chunks,
        })
        .collect()
}

/// Create the configured vector store backend.
pub fn create_store(
    config: &VectorStoreConfig,
    url: Option<&str>,
    api_key: Option<&str>,
) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "qdrant" => {
            let url = url.ok_or_else(|| anyhow!("QDRANT_URL is required for the qdrant backend"))?;
            Ok(Arc::new(QdrantStore::new(config, url, api_key)?))
        }
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        other => bail!("Unknown vector_store.backend: {}", other),
    }
}

// ============ Qdrant ============

/// Qdrant client over the REST API.
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct UpdateResult {
    status: String,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

#[derive(Deserialize)]
struct QdrantScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct ScrollResult {
    points: Vec<ScrollPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
struct ScrollPoint {
    #[serde(default)]
    payload: Option<ListingPayload>,
}

#[derive(Deserialize)]
struct ListingPayload {
    filename: String,
    source: SourceTag,
}

fn point_id_string(id: Value) -> String {
    match id {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig, url: &str, api_key: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: api_key.map(str::to_string),
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    async fn send<T>(&self, req: reqwest::RequestBuilder, what: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| anyhow!("Qdrant {} request failed: {}", what, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Qdrant {} failed ({}): {}", what, status, body);
        }

        let parsed: QdrantResponse<T> = response
            .json()
            .await
            .map_err(|e| anyhow!("Invalid Qdrant {} response: {}", what, e))?;
        Ok(parsed.result)
    }

    fn check_completed(result: UpdateResult, what: &str) -> Result<()> {
        if result.status != "completed" {
            bail!("Qdrant {} status not completed: {}", what, result.status);
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        let response = self
            .authorize(self.client.get(self.collection_url("")))
            .send()
            .await
            .map_err(|e| anyhow!("Qdrant collection lookup failed: {}", e))?;

        match response.status() {
            s if s.is_success() => {
                tracing::info!(collection = %self.collection, "Qdrant collection already exists");
            }
            reqwest::StatusCode::NOT_FOUND => {
                tracing::info!(collection = %self.collection, dims, "creating Qdrant collection");
                let body = json!({ "vectors": { "size": dims, "distance": "Cosine" } });
                let _: Value = self
                    .send(
                        self.client.put(self.collection_url("")).json(&body),
                        "collection create",
                    )
                    .await?;
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                bail!("Error checking Qdrant collection ({}): {}", s, body);
            }
        }

        for field in INDEXED_FIELDS {
            let body = json!({ "field_name": field, "field_schema": "keyword" });
            let response = self
                .authorize(
                    self.client
                        .put(self.collection_url("/index?wait=true"))
                        .json(&body),
                )
                .send()
                .await
                .map_err(|e| anyhow!("Qdrant payload index request failed: {}", e))?;

            let status = response.status();
            if status.is_success() || status == reqwest::StatusCode::CONFLICT {
                tracing::debug!(field, "payload index present");
            } else {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(field, %status, "could not create payload index: {}", body);
            }
        }

        Ok(())
    }

    async fn upsert(&self, points: &[ChunkPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": p.payload }))
                .collect::<Vec<_>>(),
        });

        let result: UpdateResult = self
            .send(
                self.client
                    .put(self.collection_url("/points?wait=true"))
                    .json(&body),
                "upsert",
            )
            .await?;
        Self::check_completed(result, "upsert")
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &PointFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "filter": filter.to_qdrant(),
        });

        let hits: Vec<QdrantScoredPoint> = self
            .send(
                self.client
                    .post(self.collection_url("/points/search"))
                    .json(&body),
                "search",
            )
            .await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(raw) = hit.payload else { continue };
            match serde_json::from_value::<ChunkPayload>(raw) {
                // The server already filtered; re-check so a filter bug
                // can never surface another user's chunk.
                Ok(payload) if filter.matches(&payload) => results.push(ScoredChunk {
                    id: point_id_string(hit.id),
                    score: hit.score,
                    payload,
                }),
                Ok(_) => tracing::error!("Qdrant returned a point outside the query filter"),
                Err(e) => tracing::debug!("skipping point with unexpected payload: {}", e),
            }
        }
        Ok(results)
    }

    async fn count(&self, filter: &PointFilter) -> Result<usize> {
        let body = json!({ "filter": filter.to_qdrant(), "exact": true });
        let result: CountResult = self
            .send(
                self.client
                    .post(self.collection_url("/points/count"))
                    .json(&body),
                "count",
            )
            .await?;
        Ok(result.count)
    }

    async fn delete(&self, filter: &PointFilter) -> Result<usize> {
        let matching = self.count(filter).await?;
        if matching == 0 {
            return Ok(0);
        }

        let body = json!({ "filter": filter.to_qdrant() });
        let result: UpdateResult = self
            .send(
                self.client
                    .post(self.collection_url("/points/delete?wait=true"))
                    .json(&body),
                "delete",
            )
            .await?;
        Self::check_completed(result, "delete")?;
        Ok(matching)
    }

    async fn list_documents(&self, filter: &PointFilter) -> Result<Vec<DocumentSummary>> {
        let mut entries = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "filter": filter.to_qdrant(),
                "limit": SCROLL_PAGE,
                "with_payload": ["filename", "source"],
                "with_vector": false,
            });
            if let Some(next) = offset.take() {
                body["offset"] = next;
            }

            let page: ScrollResult = self
                .send(
                    self.client
                        .post(self.collection_url("/points/scroll"))
                        .json(&body),
                    "scroll",
                )
                .await?;

            entries.extend(
                page.points
                    .into_iter()
                    .filter_map(|p| p.payload)
                    .map(|p| (p.filename, p.source)),
            );

            match page.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        Ok(aggregate_documents(entries))
    }
}

// ============ In-memory ============

/// In-memory store keyed by point id. Search is brute-force cosine
/// similarity over the points that pass the filter.
pub struct InMemoryStore {
    points: RwLock<HashMap<String, ChunkPoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.points.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored point, for inspection in tests and tooling.
    pub fn snapshot(&self) -> Vec<ChunkPoint> {
        self.points
            .read()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory vector store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_collection(&self, _dims: usize) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, points: &[ChunkPoint]) -> Result<()> {
        let mut stored = self.points.write().map_err(poisoned)?;
        for p in points {
            stored.insert(p.id.clone(), p.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &PointFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = self.points.read().map_err(poisoned)?;
        let mut hits: Vec<ScoredChunk> = stored
            .values()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| ScoredChunk {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, filter: &PointFilter) -> Result<usize> {
        let stored = self.points.read().map_err(poisoned)?;
        Ok(stored.values().filter(|p| filter.matches(&p.payload)).count())
    }

    async fn delete(&self, filter: &PointFilter) -> Result<usize> {
        let mut stored = self.points.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|_, p| !filter.matches(&p.payload));
        Ok(before - stored.len())
    }

    async fn list_documents(&self, filter: &PointFilter) -> Result<Vec<DocumentSummary>> {
        let stored = self.points.read().map_err(poisoned)?;
        Ok(aggregate_documents(
            stored
                .values()
                .filter(|p| filter.matches(&p.payload))
                .map(|p| (p.payload.filename.clone(), p.payload.source)),
        ))
    }
}
