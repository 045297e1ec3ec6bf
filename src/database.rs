use crate::chunking::Chunk;
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, ScoredPoint, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_INDEX_NAME: &str = "medical-bot";
pub const DEFAULT_INDEX_DIMENSION: usize = 384;
const UPSERT_BATCH_SIZE: usize = 100;

/// Similarity metric of a vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
    Dot,
    Euclidean,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
            Metric::Euclidean => "euclidean",
        };
        f.write_str(name)
    }
}

impl From<Metric> for Distance {
    fn from(metric: Metric) -> Self {
        match metric {
            Metric::Cosine => Distance::Cosine,
            Metric::Dot => Distance::Dot,
            Metric::Euclidean => Distance::Euclid,
        }
    }
}

impl FromStr for Metric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "dot" => Ok(Metric::Dot),
            "euclidean" | "euclid" => Ok(Metric::Euclidean),
            other => Err(RagError::Config(format!(
                "unknown index metric {}, expected cosine, dot or euclidean",
                other
            ))),
        }
    }
}

impl Metric {
    /// Whether a larger search score means a closer match. Euclidean scores
    /// are distances.
    pub fn higher_is_better(self) -> bool {
        !matches!(self, Metric::Euclidean)
    }

    /// Order hits best first
    pub fn sort_hits(self, hits: &mut [RetrievedChunk]) {
        if self.higher_is_better() {
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        } else {
            hits.sort_by(|a, b| a.score.total_cmp(&b.score));
        }
    }

    fn from_distance(distance: Distance) -> Option<Self> {
        match distance {
            Distance::Cosine => Some(Metric::Cosine),
            Distance::Dot => Some(Metric::Dot),
            Distance::Euclid => Some(Metric::Euclidean),
            _ => None,
        }
    }
}

/// Identity of the remote index. Ingestion and query must agree on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
}

impl Default for IndexSpec {
    fn default() -> Self {
        IndexSpec {
            name: DEFAULT_INDEX_NAME.to_string(),
            dimension: DEFAULT_INDEX_DIMENSION,
            metric: Metric::Cosine,
        }
    }
}

impl IndexSpec {
    /// Fail unless `other` has the same dimension and metric
    pub fn check_compatible(&self, other: &IndexSpec) -> Result<()> {
        if self.dimension != other.dimension || self.metric != other.metric {
            return Err(RagError::Config(format!(
                "index {} is {}-dimensional/{} but {}-dimensional/{} is required",
                other.name, other.dimension, other.metric, self.dimension, self.metric
            )));
        }
        Ok(())
    }
}

/// A chunk paired with its vector, ready to be written
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub vector: Embedding,
    pub chunk: Chunk,
}

/// A search hit
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f32,
    pub source: Option<String>,
    pub page: Option<u64>,
}

/// Remote vector store operations used by ingestion and retrieval
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Current identity of the named index, `None` if it does not exist
    async fn describe(&self, name: &str) -> Result<Option<IndexSpec>>;

    async fn create(&self, spec: &IndexSpec) -> Result<()>;

    async fn upsert(&self, name: &str, entries: Vec<IndexEntry>) -> Result<()>;

    /// Up to `limit` entries, closest first
    async fn search(
        &self,
        name: &str,
        vector: &Embedding,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>>;
}

/// Configuration for Qdrant
#[derive(Clone, PartialEq)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: String,
    pub index: IndexSpec,
}

impl fmt::Debug for QdrantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QdrantConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("index", &self.index)
            .finish()
    }
}

impl QdrantConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = crate::config::required(&lookup, "QDRANT_URL")?;
        let api_key = crate::config::required(&lookup, "QDRANT_API_KEY")?;
        let mut index = IndexSpec::default();
        if let Some(name) = crate::config::optional(&lookup, "INDEX_NAME") {
            index.name = name;
        }
        if let Some(metric) = crate::config::optional(&lookup, "INDEX_METRIC") {
            index.metric = metric.parse()?;
        }
        Ok(QdrantConfig {
            url,
            api_key,
            index,
        })
    }
}

/// Client for interacting with Qdrant
pub struct QdrantIndex {
    client: Qdrant,
}

impl QdrantIndex {
    /// Create a new Qdrant client
    pub fn connect(config: &QdrantConfig) -> Result<Self> {
        info!("Connecting to Qdrant at {}", config.url);
        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key.clone())
            .build()
            .map_err(map_err)?;
        Ok(QdrantIndex { client })
    }
}

fn map_err(e: qdrant_client::QdrantError) -> RagError {
    RagError::VectorStore(e.to_string())
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn describe(&self, name: &str) -> Result<Option<IndexSpec>> {
        let collections = self.client.list_collections().await.map_err(map_err)?;
        if !collections.collections.iter().any(|c| c.name == name) {
            return Ok(None);
        }

        let info = self.client.collection_info(name).await.map_err(map_err)?;
        let params = info
            .result
            .and_then(|info| info.config)
            .and_then(|config| config.params)
            .and_then(|params| params.vectors_config)
            .and_then(|vectors| vectors.config);

        match params {
            Some(VectorsConfigKind::Params(params)) => {
                let metric = Distance::try_from(params.distance)
                    .ok()
                    .and_then(Metric::from_distance)
                    .ok_or_else(|| {
                        RagError::Config(format!("index {} uses an unsupported metric", name))
                    })?;
                Ok(Some(IndexSpec {
                    name: name.to_string(),
                    dimension: params.size as usize,
                    metric,
                }))
            }
            _ => Err(RagError::Config(format!(
                "index {} does not have a single unnamed vector configuration",
                name
            ))),
        }
    }

    async fn create(&self, spec: &IndexSpec) -> Result<()> {
        let distance: Distance = spec.metric.into();
        self.client
            .create_collection(
                CreateCollectionBuilder::new(spec.name.clone())
                    .vectors_config(VectorParamsBuilder::new(spec.dimension as u64, distance)),
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn upsert(&self, name: &str, entries: Vec<IndexEntry>) -> Result<()> {
        let points = entries
            .into_iter()
            .map(|entry| {
                let chunk = entry.chunk;
                let payload = Payload::try_from(json!({
                    "text": chunk.text,
                    "source": chunk.source.display().to_string(),
                    "page": chunk.page,
                    "chunk_index": chunk.chunk_index,
                    "start": chunk.start,
                }))
                .map_err(|e| RagError::VectorStore(format!("invalid payload: {}", e)))?;
                Ok(PointStruct::new(
                    Uuid::new_v4().to_string(),
                    entry.vector.values,
                    payload,
                ))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &Embedding,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(name, vector.values.clone(), limit as u64)
                    .with_payload(true),
            )
            .await
            .map_err(map_err)?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| retrieved_chunk(point, name))
            .collect();

        Ok(hits)
    }
}

/// Read a search hit's payload back into a chunk. Hits without text are
/// skipped.
fn retrieved_chunk(point: ScoredPoint, index_name: &str) -> Option<RetrievedChunk> {
    let payload = point.payload;
    let Some(text) = payload.get("text").and_then(|v| v.as_str()) else {
        warn!(
            "Skipping search hit {:?} in {}: no text payload",
            point.id, index_name
        );
        return None;
    };
    let source = payload
        .get("source")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let page = payload
        .get("page")
        .and_then(|v| v.as_integer())
        .map(|p| p as u64);
    Some(RetrievedChunk {
        text: text.to_string(),
        score: point.score,
        source,
        page,
    })
}

/// Ingestion-side writer bound to one index identity
#[derive(Clone)]
pub struct IndexWriter {
    index: Arc<dyn VectorIndex>,
    spec: IndexSpec,
}

impl IndexWriter {
    pub fn new(index: Arc<dyn VectorIndex>, spec: IndexSpec) -> Self {
        IndexWriter { index, spec }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Create the index if it is missing. An existing index with the same
    /// dimension and metric is left alone; a different one is an error.
    pub async fn ensure_index(&self) -> Result<()> {
        match self.index.describe(&self.spec.name).await? {
            Some(existing) => {
                self.spec.check_compatible(&existing)?;
                info!("Index {} already exists", self.spec.name);
            }
            None => {
                info!(
                    "Index {} does not exist. Creating it ({} dimensions, {})",
                    self.spec.name, self.spec.dimension, self.spec.metric
                );
                self.index.create(&self.spec).await?;
                info!("Successfully created index: {}", self.spec.name);
            }
        }
        Ok(())
    }

    /// Write chunks with their vectors. Returns the number of entries written.
    pub async fn upsert(&self, chunks: Vec<Chunk>, vectors: Vec<Embedding>) -> Result<usize> {
        if chunks.len() != vectors.len() {
            return Err(RagError::InvalidInput(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.dimension() != self.spec.dimension) {
            return Err(RagError::DimensionMismatch {
                expected: self.spec.dimension,
                actual: bad.dimension(),
            });
        }

        let total = chunks.len();
        let mut entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { vector, chunk })
            .collect();

        while !entries.is_empty() {
            let rest = entries.split_off(entries.len().min(UPSERT_BATCH_SIZE));
            let batch = std::mem::replace(&mut entries, rest);
            debug!("Upserting batch of {} entries", batch.len());
            self.index.upsert(&self.spec.name, batch).await?;
        }

        Ok(total)
    }
}
