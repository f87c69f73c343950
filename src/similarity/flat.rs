//! Exact in-process index with on-disk persistence.
//!
//! Vectors live in a row-major `Array2<f32>`; search is a brute-force
//! squared-Euclidean scan. After every insert the full index is rewritten as
//! two files, each through a temporary file and rename:
//!
//! - vector file: `b"DTFLATIX"`, version `u32`, dimension `u32`, row count
//!   `u64`, then `rows * dim` little-endian `f32`s
//! - metadata file: a JSON array of strings, one per row
//!
//! The vector file is renamed into place before the metadata file. A crash
//! between the two leaves extra trailing vector rows, which [`FlatIndex::open`]
//! drops so the index reopens at its last complete insert.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use ndarray::{s, Array2, ArrayView1, Axis};

use super::{Neighbor, SimilarityIndex};
use crate::error::IndexError;
use crate::utils::write_atomic;

const MAGIC: &[u8; 8] = b"DTFLATIX";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 4 + 8;

struct FlatState {
    vectors: Array2<f32>,
    metas: Vec<String>,
}

/// Brute-force L2 index persisted to a vector file and a metadata file.
pub struct FlatIndex {
    index_path: PathBuf,
    meta_path: PathBuf,
    dimension: usize,
    state: Mutex<FlatState>,
}

impl FlatIndex {
    /// Open the index stored at the given paths, or start an empty one if
    /// neither file exists yet.
    pub fn open(index_path: &Path, meta_path: &Path, dimension: usize) -> Result<Self, IndexError> {
        let mut vectors = if index_path.exists() {
            read_vectors(index_path, dimension)?
        } else {
            Array2::zeros((0, dimension))
        };
        let metas: Vec<String> = if meta_path.exists() {
            serde_json::from_slice(&fs::read(meta_path)?)?
        } else {
            Vec::new()
        };

        if metas.len() > vectors.nrows() {
            return Err(IndexError::Corrupt {
                path: meta_path.display().to_string(),
                reason: format!(
                    "{} metadata entries for {} vectors",
                    metas.len(),
                    vectors.nrows()
                ),
            });
        }
        if vectors.nrows() > metas.len() {
            tracing::warn!(
                vectors = vectors.nrows(),
                metas = metas.len(),
                index_file = %index_path.display(),
                "Vector file is ahead of its metadata, dropping unlabeled rows"
            );
            vectors = vectors.slice(s![..metas.len(), ..]).to_owned();
        }

        tracing::debug!(rows = metas.len(), dim = dimension, "Flat index opened");
        Ok(Self {
            index_path: index_path.to_path_buf(),
            meta_path: meta_path.to_path_buf(),
            dimension,
            state: Mutex::new(FlatState { vectors, metas }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FlatState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_dimension(&self, len: usize) -> Result<(), IndexError> {
        if len != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    fn persist(&self, state: &FlatState) -> Result<(), IndexError> {
        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.meta_path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&self.index_path, &encode_vectors(&state.vectors, self.dimension))?;
        write_atomic(&self.meta_path, &serde_json::to_vec(&state.metas)?)?;
        Ok(())
    }
}

#[async_trait]
impl SimilarityIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn insert(&self, vectors: &[Vec<f32>], metas: &[String]) -> Result<(), IndexError> {
        if vectors.len() != metas.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                metas: metas.len(),
            });
        }
        for vector in vectors {
            self.check_dimension(vector.len())?;
        }

        let mut state = self.lock();
        for vector in vectors {
            state
                .vectors
                .push_row(ArrayView1::from(vector.as_slice()))
                .map_err(|_| IndexError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                })?;
        }
        state.metas.extend(metas.iter().cloned());
        self.persist(&state)
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.check_dimension(vector.len())?;
        let state = self.lock();
        if state.metas.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = ArrayView1::from(vector);
        let distances = (&state.vectors - &query)
            .mapv(|x| x * x)
            .sum_axis(Axis(1));

        let mut order: Vec<usize> = (0..distances.len()).collect();
        order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]));

        Ok(order
            .into_iter()
            .take(k)
            .map(|row| Neighbor {
                meta: state.metas[row].clone(),
                distance: f64::from(distances[row]),
            })
            .collect())
    }

    async fn vector_for_meta(&self, meta: &str) -> Result<Option<Vec<f32>>, IndexError> {
        let state = self.lock();
        Ok(state
            .metas
            .iter()
            .position(|m| m == meta)
            .map(|row| state.vectors.row(row).to_vec()))
    }

    async fn len(&self) -> Result<usize, IndexError> {
        Ok(self.lock().metas.len())
    }
}

fn encode_vectors(vectors: &Array2<f32>, dimension: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + vectors.len() * 4);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(dimension as u32).to_le_bytes());
    buf.extend_from_slice(&(vectors.nrows() as u64).to_le_bytes());
    for value in vectors.iter() {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

fn read_vectors(path: &Path, dimension: usize) -> Result<Array2<f32>, IndexError> {
    let bytes = fs::read(path)?;
    let corrupt = |reason: String| IndexError::Corrupt {
        path: path.display().to_string(),
        reason,
    };

    if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
        return Err(corrupt("invalid vector index header".to_string()));
    }
    let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let version = word(8);
    if version != VERSION {
        return Err(corrupt(format!("unsupported version {version}")));
    }
    let stored_dim = word(12) as usize;
    if stored_dim != dimension {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            actual: stored_dim,
        });
    }
    let mut rows_bytes = [0u8; 8];
    rows_bytes.copy_from_slice(&bytes[16..24]);
    let rows = u64::from_le_bytes(rows_bytes) as usize;

    let body = &bytes[HEADER_LEN..];
    if body.len() != rows * dimension * 4 {
        return Err(corrupt(format!(
            "expected {} vector bytes, found {}",
            rows * dimension * 4,
            body.len()
        )));
    }
    let values: Vec<f32> = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Array2::from_shape_vec((rows, dimension), values).map_err(|e| corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(dir: &Path) -> (PathBuf, PathBuf) {
        (dir.join("data/flat.index"), dir.join("data/flat_meta.json"))
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let (ix, meta) = paths(dir.path());
        let index = FlatIndex::open(&ix, &meta, 3).unwrap();

        index
            .insert(
                &[vec![1.0, 0.0, 0.0], vec![0.0, 2.0, 0.0], vec![0.9, 0.0, 0.0]],
                &["x".into(), "y".into(), "z".into()],
            )
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].meta, "x");
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[1].meta, "z");
        assert!(hits[1].distance > 0.0 && hits[1].distance < 0.011);
    }

    #[tokio::test]
    async fn test_reopen_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (ix, meta) = paths(dir.path());
        {
            let index = FlatIndex::open(&ix, &meta, 2).unwrap();
            index.insert(&[vec![1.0, 2.0]], &["first".into()]).await.unwrap();
            index.insert(&[vec![3.0, 4.0]], &["second".into()]).await.unwrap();
        }

        let index = FlatIndex::open(&ix, &meta, 2).unwrap();
        assert_eq!(index.len().await.unwrap(), 2);
        assert_eq!(
            index.vector_for_meta("second").await.unwrap(),
            Some(vec![3.0, 4.0])
        );
        assert_eq!(index.vector_for_meta("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_vector_for_meta_returns_first_match() {
        let dir = tempfile::tempdir().unwrap();
        let (ix, meta) = paths(dir.path());
        let index = FlatIndex::open(&ix, &meta, 1).unwrap();
        index
            .insert(&[vec![1.0], vec![2.0]], &["dup".into(), "dup".into()])
            .await
            .unwrap();
        assert_eq!(index.vector_for_meta("dup").await.unwrap(), Some(vec![1.0]));
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let (ix, meta) = paths(dir.path());
        let index = FlatIndex::open(&ix, &meta, 2).unwrap();

        assert!(matches!(
            index.insert(&[vec![1.0]], &["a".into()]).await,
            Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            index.insert(&[vec![1.0, 1.0]], &[]).await,
            Err(IndexError::LengthMismatch { vectors: 1, metas: 0 })
        ));
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reopen_with_other_dimension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (ix, meta) = paths(dir.path());
        FlatIndex::open(&ix, &meta, 2)
            .unwrap()
            .insert(&[vec![1.0, 1.0]], &["a".into()])
            .await
            .unwrap();

        assert!(matches!(
            FlatIndex::open(&ix, &meta, 4),
            Err(IndexError::DimensionMismatch { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_more_metas_than_vectors_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let (ix, meta) = paths(dir.path());
        fs::create_dir_all(ix.parent().unwrap()).unwrap();
        fs::write(&ix, encode_vectors(&Array2::zeros((1, 2)), 2)).unwrap();
        fs::write(&meta, r#"["one", "two"]"#).unwrap();

        assert!(matches!(
            FlatIndex::open(&ix, &meta, 2),
            Err(IndexError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_reopen_after_interrupted_insert_drops_unlabeled_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (ix, meta) = paths(dir.path());

        let index = FlatIndex::open(&ix, &meta, 2).unwrap();
        index.insert(&[vec![0.0, 0.0]], &["a".to_string()]).await.unwrap();
        let old_meta = fs::read(&meta).unwrap();
        index.insert(&[vec![1.0, 0.0]], &["b".to_string()]).await.unwrap();
        drop(index);
        // Crash after the vector rename but before the metadata rename.
        fs::write(&meta, old_meta).unwrap();

        let index = FlatIndex::open(&ix, &meta, 2).unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        let hits = index.search(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].meta, "a");

        index.insert(&[vec![2.0, 0.0]], &["c".to_string()]).await.unwrap();
        let reopened = FlatIndex::open(&ix, &meta, 2).unwrap();
        assert_eq!(reopened.len().await.unwrap(), 2);
        assert_eq!(
            reopened.vector_for_meta("c").await.unwrap(),
            Some(vec![2.0, 0.0])
        );
    }
}
