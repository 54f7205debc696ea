//! Flat vector index over chunk embeddings, persisted with redb.
//!
//! Search is exhaustive: every query is scored against all stored vectors in
//! one matrix product. Scores are always "higher is better"; see
//! [`DistanceStrategy`] for how each strategy turns geometry into a score.

use std::{path::Path, sync::Arc};

use candle_core::{Device, Tensor};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    chunking::Chunk,
    embedding::{Embedder, embed_batched},
    error::{Error, Result},
    reranker::map_candle_err,
    timeout::CallTimeout,
};

const CHUNKS: TableDefinition<u64, &[u8]> = TableDefinition::new("chunks");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

const META_DISTANCE: &str = "distance";
const META_DIMENSION: &str = "dimension";
const META_COUNT: &str = "count";

/// File name of the database inside an index directory.
pub const INDEX_FILE: &str = "index.redb";

/// How similarity between a query and a stored vector is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceStrategy {
    /// Relevance from Euclidean distance `d`: `1 - d / sqrt(2)`.
    /// For unit vectors this is 1 for identical directions, 0 for
    /// orthogonal ones and `1 - sqrt(2)` for opposite ones.
    Euclidean,
    /// Raw inner product.
    MaxInnerProduct,
}

impl DistanceStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Euclidean => "euclidean",
            Self::MaxInnerProduct => "max_inner_product",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "euclidean" => Some(Self::Euclidean),
            "max_inner_product" => Some(Self::MaxInnerProduct),
            _ => None,
        }
    }
}

/// Relevance score for a Euclidean distance.
///
/// Unclamped: anti-correlated vectors keep distinct negative scores, so
/// calibration can still order them.
pub fn relevance_from_distance(distance: f32) -> f32 {
    1.0 - distance / std::f32::consts::SQRT_2
}

/// One search result: the position of a chunk in the index and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub position: usize,
    pub score: f32,
}

/// Ordered (chunk, vector) pairs with exhaustive nearest-neighbour search.
#[derive(Debug)]
pub struct VectorIndex {
    distance: DistanceStrategy,
    dimension: usize,
    chunks: Vec<Chunk>,
    /// Row-major `[len, dimension]`.
    vectors: Vec<f32>,
    squared_norms: Vec<f32>,
    matrix: Option<Tensor>,
}

impl VectorIndex {
    /// Assemble an index from chunks and their vectors.
    ///
    /// All vectors must share one dimension. An empty input gives a valid
    /// empty index.
    pub fn from_parts(
        distance: DistanceStrategy,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(Error::capability(
                "embedder",
                format!(
                    "{} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            ));
        }
        let dimension = vectors.first().map_or(0, Vec::len);
        if dimension == 0 && !chunks.is_empty() {
            return Err(Error::capability(
                "embedder",
                "zero-dimensional vectors",
            ));
        }
        let mut flat = Vec::with_capacity(vectors.len() * dimension);
        for vector in &vectors {
            if vector.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            flat.extend_from_slice(vector);
        }
        Self::from_flat(distance, dimension, chunks, flat)
    }

    fn from_flat(
        distance: DistanceStrategy,
        dimension: usize,
        chunks: Vec<Chunk>,
        vectors: Vec<f32>,
    ) -> Result<Self> {
        let squared_norms = if dimension == 0 {
            Vec::new()
        } else {
            vectors
                .chunks(dimension)
                .map(|row| row.iter().map(|x| x * x).sum())
                .collect()
        };
        let matrix = if chunks.is_empty() {
            None
        } else {
            let shape = (chunks.len(), dimension);
            Some(
                Tensor::from_slice(&vectors, shape, &Device::Cpu)
                    .map_err(map_candle_err)?,
            )
        };
        Ok(Self {
            distance,
            dimension,
            chunks,
            vectors,
            squared_norms,
            matrix,
        })
    }

    /// Embed `chunks` in batches and index them.
    pub fn build(
        chunks: Vec<Chunk>,
        distance: DistanceStrategy,
        embedder: &Arc<dyn Embedder>,
        timeout: &CallTimeout,
        batch_size: usize,
    ) -> Result<Self> {
        let texts: Vec<String> =
            chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embed_batched(embedder, timeout, &texts, batch_size)?;
        Self::from_parts(distance, chunks, vectors)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Vector dimension, 0 for an empty index.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn distance(&self) -> DistanceStrategy {
        self.distance
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// Top `k` hits for `query`, best first. Equal scores keep index order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let Some(matrix) = &self.matrix else {
            return Ok(Vec::new());
        };
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let column =
            Tensor::from_slice(query, (self.dimension, 1), &Device::Cpu)
                .map_err(map_candle_err)?;
        let dots = matrix
            .matmul(&column)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(map_candle_err)?;

        let query_norm: f32 = query.iter().map(|x| x * x).sum();
        let mut hits: Vec<SearchHit> = dots
            .into_iter()
            .enumerate()
            .map(|(position, dot)| {
                let score = match self.distance {
                    DistanceStrategy::MaxInnerProduct => dot,
                    DistanceStrategy::Euclidean => {
                        let norm = self.squared_norms[position];
                        let squared = (norm + query_norm - 2.0 * dot).max(0.0);
                        relevance_from_distance(squared.sqrt())
                    }
                };
                SearchHit { position, score }
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    /// Write the index to `<dir>/index.redb`, replacing any earlier index.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(INDEX_FILE);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let db = Database::create(&path)?;
        let txn = db.begin_write()?;
        {
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut vectors = txn.open_table(VECTORS)?;
            for (position, chunk) in self.chunks.iter().enumerate() {
                let key = position as u64;
                chunks.insert(key, serde_json::to_vec(chunk)?.as_slice())?;
                if let Some(vector) = self.vector(position) {
                    let bytes = bytemuck::cast_slice::<f32, u8>(vector);
                    vectors.insert(key, bytes)?;
                }
            }

            let mut meta = txn.open_table(META)?;
            meta.insert(META_DISTANCE, self.distance.as_str())?;
            meta.insert(META_DIMENSION, self.dimension.to_string().as_str())?;
            meta.insert(META_COUNT, self.len().to_string().as_str())?;
        }
        txn.commit()?;

        tracing::debug!(
            path = %path.display(),
            chunks = self.len(),
            dimension = self.dimension,
            "persisted vector index"
        );
        Ok(())
    }

    /// Load an index written by [`persist`](Self::persist).
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(INDEX_FILE);
        if !path.is_file() {
            return Err(Error::StoreNotInitialized {
                path: dir.to_path_buf(),
            });
        }

        let db = Database::open(&path)?;
        let txn = db.begin_read()?;

        let meta = txn.open_table(META)?;
        let distance = read_meta(&meta, &path, META_DISTANCE)?;
        let distance = DistanceStrategy::parse(&distance).ok_or_else(|| {
            corrupt(&path, format!("unknown distance {distance:?}"))
        })?;
        let dimension: usize = read_meta(&meta, &path, META_DIMENSION)?
            .parse()
            .map_err(|e| corrupt(&path, format!("bad dimension: {e}")))?;
        let count: usize = read_meta(&meta, &path, META_COUNT)?
            .parse()
            .map_err(|e| corrupt(&path, format!("bad count: {e}")))?;
        if dimension == 0 && count > 0 {
            let message = "zero dimension with stored vectors".to_string();
            return Err(corrupt(&path, message));
        }

        let chunk_table = txn.open_table(CHUNKS)?;
        let vector_table = txn.open_table(VECTORS)?;

        let mut chunks = Vec::with_capacity(count);
        let mut vectors = vec![0f32; count * dimension];
        for position in 0..count {
            let key = position as u64;
            let Some(raw) = chunk_table.get(key)? else {
                return Err(corrupt(&path, format!("missing chunk {position}")));
            };
            chunks.push(serde_json::from_slice::<Chunk>(raw.value())?);

            let Some(raw) = vector_table.get(key)? else {
                return Err(corrupt(
                    &path,
                    format!("missing vector {position}"),
                ));
            };
            let bytes = raw.value();
            if bytes.len() != dimension * std::mem::size_of::<f32>() {
                return Err(corrupt(
                    &path,
                    format!("vector {position} has wrong length"),
                ));
            }
            let start = position * dimension;
            let row = &mut vectors[start..start + dimension];
            // The stored bytes carry no alignment guarantee, so copy them
            // into the f32 buffer instead of casting in place.
            bytemuck::cast_slice_mut::<f32, u8>(row).copy_from_slice(bytes);
        }

        tracing::debug!(
            path = %path.display(),
            chunks = count,
            "loaded vector index"
        );
        Self::from_flat(distance, dimension, chunks, vectors)
    }
}

fn read_meta(
    table: &redb::ReadOnlyTable<&'static str, &'static str>,
    path: &Path,
    key: &str,
) -> Result<String> {
    table
        .get(key)?
        .map(|value| value.value().to_string())
        .ok_or_else(|| corrupt(path, format!("missing {key}")))
}

fn corrupt(path: &Path, message: String) -> Error {
    Error::Config(format!("corrupt index {}: {message}", path.display()))
}
