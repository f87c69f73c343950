//! Nearest-neighbor side store for the EMBEDDING mission.
//!
//! Embeddings are inserted batch by batch while the engine runs. Once every
//! batch is done, [`SimilarityPostProcessor`] looks each record's vector back
//! up and writes duplication metadata computed by [`neighbor_info`].
//!
//! Distances are whatever the index reports (squared Euclidean for both
//! built-in backends); callers must not assume a normalized scale.

mod flat;
mod milvus;
mod postprocess;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::IndexConfig;
use crate::error::{ConfigError, IndexError};

pub use flat::FlatIndex;
pub use milvus::MilvusIndex;
pub use postprocess::SimilarityPostProcessor;

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub meta: String,
    pub distance: f64,
}

/// An append-only vector store keyed by opaque metadata strings.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Vector size accepted by this index.
    fn dimension(&self) -> usize;

    /// Append `vectors[i]` tagged with `metas[i]`. Returns only once the
    /// entries are durable and visible to [`search`](Self::search).
    async fn insert(&self, vectors: &[Vec<f32>], metas: &[String]) -> Result<(), IndexError>;

    /// Up to `k` nearest entries, ascending by distance.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError>;

    /// Vector of the first entry whose metadata equals `meta`.
    async fn vector_for_meta(&self, meta: &str) -> Result<Option<Vec<f32>>, IndexError>;

    /// Number of stored entries.
    async fn len(&self) -> Result<usize, IndexError>;

    /// The form in which `meta` is stored, for indexes that bound its length.
    fn stored_meta<'a>(&self, meta: &'a str) -> &'a str {
        meta
    }
}

/// Which [`SimilarityIndex`] implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexBackend {
    /// Local exact index persisted next to the data.
    #[default]
    Flat,
    /// Remote Milvus collection.
    Milvus,
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBackend::Flat => f.write_str("flat"),
            IndexBackend::Milvus => f.write_str("milvus"),
        }
    }
}

impl FromStr for IndexBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" | "faiss" => Ok(IndexBackend::Flat),
            "milvus" => Ok(IndexBackend::Milvus),
            _ => Err(ConfigError::UnknownIndexBackend(s.to_string())),
        }
    }
}

/// Open the configured index for vectors of size `dimension`.
pub async fn open_index(
    config: &IndexConfig,
    dimension: usize,
) -> Result<Arc<dyn SimilarityIndex>, IndexError> {
    match config.backend {
        IndexBackend::Flat => {
            tracing::info!(
                index_file = %config.index_file.display(),
                meta_file = %config.meta_file.display(),
                dim = dimension,
                "Opening flat similarity index"
            );
            let index = FlatIndex::open(&config.index_file, &config.meta_file, dimension)?;
            Ok(Arc::new(index))
        }
        IndexBackend::Milvus => {
            tracing::info!(
                endpoint = %config.milvus_url,
                collection = %config.milvus_collection,
                dim = dimension,
                "Connecting to Milvus"
            );
            let index = MilvusIndex::connect(
                &config.milvus_url,
                config.milvus_token.clone(),
                &config.milvus_collection,
                dimension,
            )
            .await?;
            Ok(Arc::new(index))
        }
    }
}

/// Neighborhood summary for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborInfo {
    /// Distance to the nearest other entry, rounded to 4 decimals.
    pub min_distance: Option<f64>,
    /// Other entries strictly closer than the threshold.
    pub repeat_count: usize,
    /// Metadata of the nearest other entry.
    pub nearest_meta: Option<String>,
}

/// Default distance below which two entries count as repeats.
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 0.1;

/// Default neighbor count per query.
pub const DEFAULT_TOP_K: usize = 5;

/// Summarize the `top_k` neighbors of `vector`, ignoring entries tagged
/// `exclude_meta`.
///
/// One extra neighbor is requested so the query's own entry, which is
/// usually its own nearest hit, does not crowd out a real neighbor.
pub async fn neighbor_info(
    index: &dyn SimilarityIndex,
    vector: &[f32],
    exclude_meta: Option<&str>,
    threshold: f64,
    top_k: usize,
) -> Result<NeighborInfo, IndexError> {
    let hits = index.search(vector, top_k + 1).await?;

    let mut min_distance: Option<f64> = None;
    let mut nearest_meta = None;
    let mut repeat_count = 0;

    for hit in hits {
        if exclude_meta == Some(hit.meta.as_str()) {
            continue;
        }
        if min_distance.is_none_or(|d| hit.distance < d) {
            min_distance = Some(hit.distance);
            nearest_meta = Some(hit.meta.clone());
        }
        if hit.distance < threshold {
            repeat_count += 1;
        }
    }

    Ok(NeighborInfo {
        min_distance: min_distance.map(round4),
        repeat_count,
        nearest_meta,
    })
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
