//! Vector index
//!
//! Identifier-keyed dense search behind a single interface. The portable
//! variant scans an in-memory list with exact inner products and persists a
//! versioned little-endian blob; the native variant (feature `faiss`) wraps
//! a FAISS inner-product index with arbitrary-id association. The two
//! formats are incompatible on disk: switching variants requires deleting
//! the index file and rebuilding.

use crate::error::RagError;
use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::RwLock;

/// On-disk format version for the portable variant.
pub const FORMAT_VERSION: u32 = 1;

/// Identifier used to pad search results shorter than `top_k`.
pub const SENTINEL_ID: i64 = -1;

/// Dense index over `(id, vector)` pairs with inner-product scoring.
pub trait VectorIndex: Send + Sync {
    /// Declared vector dimension.
    fn dimension(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors under caller-assigned identifiers.
    fn add_with_ids(&self, vectors: &[Vec<f32>], ids: &[i64]) -> Result<()>;

    /// Top-k inner-product search for each query.
    ///
    /// Result rows are exactly `top_k` wide; slots beyond the stored count
    /// carry score `0.0` and [`SENTINEL_ID`].
    fn search(&self, queries: &[Vec<f32>], top_k: usize) -> Result<(Vec<Vec<f32>>, Vec<Vec<i64>>)>;

    /// Persist the index, replacing any existing file.
    fn save(&self, path: &Path) -> Result<()>;
}

struct FlatStorage {
    ids: Vec<i64>,
    /// Dense row-major storage, `dimension` floats per id.
    vectors: Vec<f32>,
}

/// Portable exhaustive-scan index.
pub struct FlatVectorIndex {
    dimension: usize,
    inner: RwLock<FlatStorage>,
}

impl std::fmt::Debug for FlatVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatVectorIndex")
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FlatVectorIndex {
    /// Create an empty index with the given dimension.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Config("vector dimension must be > 0".into()).into());
        }
        Ok(Self {
            dimension,
            inner: RwLock::new(FlatStorage {
                ids: Vec::new(),
                vectors: Vec::new(),
            }),
        })
    }

    /// Load a previously saved index.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            RagError::Resource(format!("vector index {:?} unreadable: {}", path, e))
        })?;
        let mut reader = std::io::BufReader::new(file);

        let version = read_u32(&mut reader, path)?;
        if version != FORMAT_VERSION {
            return Err(RagError::DataIntegrity(format!(
                "vector index {:?} has unsupported format version {}",
                path, version
            ))
            .into());
        }
        let dimension = read_u32(&mut reader, path)? as usize;
        if dimension == 0 {
            return Err(
                RagError::DataIntegrity(format!("vector index {:?} declares dimension 0", path))
                    .into(),
            );
        }
        let count = read_u32(&mut reader, path)? as usize;

        let mut ids = Vec::with_capacity(count);
        let mut vectors = Vec::with_capacity(count * dimension);
        for _ in 0..count {
            ids.push(read_i64(&mut reader, path)?);
            for _ in 0..dimension {
                vectors.push(read_f32(&mut reader, path)?);
            }
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(RagError::DataIntegrity(format!(
                "vector index {:?} has trailing bytes past {} records",
                path, count
            ))
            .into());
        }

        tracing::debug!(
            "Loaded flat vector index: {} vectors, dimension {}",
            count,
            dimension
        );

        Ok(Self {
            dimension,
            inner: RwLock::new(FlatStorage { ids, vectors }),
        })
    }
}

impl VectorIndex for FlatVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.inner.read().expect("vector index lock poisoned").ids.len()
    }

    fn add_with_ids(&self, vectors: &[Vec<f32>], ids: &[i64]) -> Result<()> {
        if vectors.len() != ids.len() {
            return Err(RagError::DataIntegrity(format!(
                "vector count ({}) does not match id count ({})",
                vectors.len(),
                ids.len()
            ))
            .into());
        }
        for vector in vectors {
            if vector.len() != self.dimension {
                return Err(RagError::DataIntegrity(format!(
                    "vector length {} does not match index dimension {}",
                    vector.len(),
                    self.dimension
                ))
                .into());
            }
        }

        let mut inner = self.inner.write().expect("vector index lock poisoned");
        inner.ids.extend_from_slice(ids);
        for vector in vectors {
            inner.vectors.extend_from_slice(vector);
        }
        Ok(())
    }

    fn search(&self, queries: &[Vec<f32>], top_k: usize) -> Result<(Vec<Vec<f32>>, Vec<Vec<i64>>)> {
        for query in queries {
            if query.len() != self.dimension {
                return Err(RagError::DataIntegrity(format!(
                    "query length {} does not match index dimension {}",
                    query.len(),
                    self.dimension
                ))
                .into());
            }
        }

        let inner = self.inner.read().expect("vector index lock poisoned");
        let mut all_scores = Vec::with_capacity(queries.len());
        let mut all_ids = Vec::with_capacity(queries.len());

        for query in queries {
            let mut scored: Vec<(f32, i64)> = inner
                .ids
                .iter()
                .enumerate()
                .map(|(row, &id)| {
                    let offset = row * self.dimension;
                    let stored = &inner.vectors[offset..offset + self.dimension];
                    let score: f32 = stored.iter().zip(query).map(|(a, b)| a * b).sum();
                    (score, id)
                })
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(top_k);
            while scored.len() < top_k {
                scored.push((0.0, SENTINEL_ID));
            }

            all_scores.push(scored.iter().map(|(score, _)| *score).collect());
            all_ids.push(scored.iter().map(|(_, id)| *id).collect());
        }

        Ok((all_scores, all_ids))
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let inner = self.inner.write().expect("vector index lock poisoned");
        let file = std::fs::File::create(path)
            .context(format!("Failed to create vector index file: {:?}", path))?;
        let mut writer = std::io::BufWriter::new(file);

        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.dimension as u32).to_le_bytes())?;
        writer.write_all(&(inner.ids.len() as u32).to_le_bytes())?;
        for (row, &id) in inner.ids.iter().enumerate() {
            writer.write_all(&id.to_le_bytes())?;
            let offset = row * self.dimension;
            for &value in &inner.vectors[offset..offset + self.dimension] {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
        writer.flush()?;

        tracing::debug!("Saved {} vectors to {:?}", inner.ids.len(), path);
        Ok(())
    }
}

fn read_u32(reader: &mut impl Read, path: &Path) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| RagError::DataIntegrity(format!("vector index {:?} truncated: {}", path, e)))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i64(reader: &mut impl Read, path: &Path) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|e| RagError::DataIntegrity(format!("vector index {:?} truncated: {}", path, e)))?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f32(reader: &mut impl Read, path: &Path) -> Result<f32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| RagError::DataIntegrity(format!("vector index {:?} truncated: {}", path, e)))?;
    Ok(f32::from_le_bytes(buf))
}

/// Native FAISS-backed index (inner product, arbitrary ids).
#[cfg(feature = "faiss")]
pub mod native {
    use super::{VectorIndex, SENTINEL_ID};
    use crate::error::RagError;
    use anyhow::{Context, Result};
    use faiss::index::io::{read_index, write_index};
    use faiss::index::{IndexImpl, SearchResult};
    use faiss::{index_factory, Idx, Index, MetricType};
    use std::path::Path;
    use std::sync::Mutex;

    pub struct FaissVectorIndex {
        dimension: usize,
        index: Mutex<IndexImpl>,
    }

    impl FaissVectorIndex {
        pub fn new(dimension: usize) -> Result<Self> {
            let index = index_factory(dimension as u32, "IDMap,Flat", MetricType::InnerProduct)
                .context("Failed to create FAISS index")?;
            Ok(Self {
                dimension,
                index: Mutex::new(index),
            })
        }

        pub fn open(path: &Path) -> Result<Self> {
            let index = read_index(path.to_string_lossy().as_ref())
                .map_err(|e| RagError::DataIntegrity(format!("FAISS index {:?}: {}", path, e)))?;
            let dimension = index.d() as usize;
            Ok(Self {
                dimension,
                index: Mutex::new(index),
            })
        }
    }

    impl VectorIndex for FaissVectorIndex {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn len(&self) -> usize {
            self.index.lock().expect("faiss lock poisoned").ntotal() as usize
        }

        fn add_with_ids(&self, vectors: &[Vec<f32>], ids: &[i64]) -> Result<()> {
            if vectors.len() != ids.len() {
                return Err(RagError::DataIntegrity(format!(
                    "vector count ({}) does not match id count ({})",
                    vectors.len(),
                    ids.len()
                ))
                .into());
            }
            let mut flat = Vec::with_capacity(vectors.len() * self.dimension);
            for vector in vectors {
                if vector.len() != self.dimension {
                    return Err(RagError::DataIntegrity(format!(
                        "vector length {} does not match index dimension {}",
                        vector.len(),
                        self.dimension
                    ))
                    .into());
                }
                flat.extend_from_slice(vector);
            }
            let idx_ids: Vec<Idx> = ids.iter().map(|&id| Idx::new(id as u64)).collect();

            let mut index = self.index.lock().expect("faiss lock poisoned");
            index
                .add_with_ids(&flat, &idx_ids)
                .context("FAISS add_with_ids failed")?;
            Ok(())
        }

        fn search(
            &self,
            queries: &[Vec<f32>],
            top_k: usize,
        ) -> Result<(Vec<Vec<f32>>, Vec<Vec<i64>>)> {
            let mut flat = Vec::with_capacity(queries.len() * self.dimension);
            for query in queries {
                if query.len() != self.dimension {
                    return Err(RagError::DataIntegrity(format!(
                        "query length {} does not match index dimension {}",
                        query.len(),
                        self.dimension
                    ))
                    .into());
                }
                flat.extend_from_slice(query);
            }

            let mut index = self.index.lock().expect("faiss lock poisoned");
            let SearchResult { distances, labels } = index
                .search(&flat, top_k)
                .context("FAISS search failed")?;

            let mut all_scores = Vec::with_capacity(queries.len());
            let mut all_ids = Vec::with_capacity(queries.len());
            for row in 0..queries.len() {
                let offset = row * top_k;
                all_scores.push(distances[offset..offset + top_k].to_vec());
                all_ids.push(
                    labels[offset..offset + top_k]
                        .iter()
                        .map(|label| label.get().map(|v| v as i64).unwrap_or(SENTINEL_ID))
                        .collect(),
                );
            }
            Ok((all_scores, all_ids))
        }

        fn save(&self, path: &Path) -> Result<()> {
            let index = self.index.lock().expect("faiss lock poisoned");
            write_index(&*index, path.to_string_lossy().as_ref())
                .context(format!("Failed to write FAISS index to {:?}", path))?;
            Ok(())
        }
    }
}

/// Open the platform's vector index variant, creating it when the file is
/// absent.
pub fn open_vector_index(
    path: &Path,
    dimension: usize,
) -> Result<std::sync::Arc<dyn VectorIndex>> {
    #[cfg(feature = "faiss")]
    {
        let index = if path.exists() {
            native::FaissVectorIndex::open(path)?
        } else {
            native::FaissVectorIndex::new(dimension)?
        };
        if index.dimension() != dimension {
            return Err(RagError::DataIntegrity(format!(
                "vector index {:?} has dimension {}, configuration expects {}",
                path,
                index.dimension(),
                dimension
            ))
            .into());
        }
        tracing::info!("Using native FAISS vector index");
        Ok(std::sync::Arc::new(index))
    }

    #[cfg(not(feature = "faiss"))]
    {
        let index = if path.exists() {
            FlatVectorIndex::open(path)?
        } else {
            FlatVectorIndex::new(dimension)?
        };
        if index.dimension() != dimension {
            return Err(RagError::DataIntegrity(format!(
                "vector index {:?} has dimension {}, configuration expects {}",
                path,
                index.dimension(),
                dimension
            ))
            .into());
        }
        Ok(std::sync::Arc::new(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_add_and_search_by_inner_product() {
        let index = FlatVectorIndex::new(4).unwrap();
        index
            .add_with_ids(&[unit(4, 0), unit(4, 1), unit(4, 2)], &[10, 20, 30])
            .unwrap();

        let (scores, ids) = index.search(&[unit(4, 1)], 2).unwrap();
        assert_eq!(ids[0], vec![20, 10]);
        assert!((scores[0][0] - 1.0).abs() < 1e-6);
        assert!((scores[0][1] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_short_results_carry_sentinels() {
        let index = FlatVectorIndex::new(2).unwrap();
        index.add_with_ids(&[vec![1.0, 0.0]], &[7]).unwrap();

        let (scores, ids) = index.search(&[vec![1.0, 0.0]], 3).unwrap();
        assert_eq!(ids[0], vec![7, SENTINEL_ID, SENTINEL_ID]);
        assert_eq!(scores[0][1], 0.0);
        assert_eq!(scores[0][2], 0.0);
    }

    #[test]
    fn test_empty_index_search() {
        let index = FlatVectorIndex::new(3).unwrap();
        let (scores, ids) = index.search(&[vec![1.0, 0.0, 0.0]], 2).unwrap();
        assert_eq!(ids[0], vec![SENTINEL_ID, SENTINEL_ID]);
        assert_eq!(scores[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let index = FlatVectorIndex::new(4).unwrap();
        assert!(index.add_with_ids(&[vec![1.0, 2.0]], &[1]).is_err());
        assert!(index.search(&[vec![1.0, 2.0]], 1).is_err());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.idx");

        let index = FlatVectorIndex::new(3).unwrap();
        index
            .add_with_ids(
                &[vec![0.5, 0.25, 0.125], vec![-1.0, 0.0, 1.0]],
                &[1, 2],
            )
            .unwrap();
        index.save(&path).unwrap();

        let loaded = FlatVectorIndex::open(&path).unwrap();
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.len(), 2);

        let (scores, ids) = loaded.search(&[vec![0.5, 0.25, 0.125]], 2).unwrap();
        assert_eq!(ids[0][0], 1);
        let expected: f32 = 0.5 * 0.5 + 0.25 * 0.25 + 0.125 * 0.125;
        assert!((scores[0][0] - expected).abs() < 1e-6);

        // Identical bytes when re-saved.
        let copy = dir.path().join("vectors2.idx");
        loaded.save(&copy).unwrap();
        assert_eq!(
            std::fs::read(&path).unwrap(),
            std::fs::read(&copy).unwrap()
        );
    }

    #[test]
    fn test_file_layout_is_versioned_little_endian() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.idx");

        let index = FlatVectorIndex::new(2).unwrap();
        index.add_with_ids(&[vec![1.0, 2.0]], &[42]).unwrap();
        index.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // version=1, dimension=2, count=1, id=42, then two f32 components.
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
        assert_eq!(&bytes[12..20], &42i64.to_le_bytes());
        assert_eq!(&bytes[20..24], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[24..28], &2.0f32.to_le_bytes());
        assert_eq!(bytes.len(), 28);
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.idx");

        let index = FlatVectorIndex::new(2).unwrap();
        index.add_with_ids(&[vec![1.0, 2.0]], &[1]).unwrap();
        index.save(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 2);
        std::fs::write(&path, &bytes).unwrap();

        let err = FlatVectorIndex::open(&path).unwrap_err();
        let rag = err.downcast_ref::<RagError>().unwrap();
        assert!(matches!(rag, RagError::DataIntegrity(_)));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.idx");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        assert!(FlatVectorIndex::open(&path).is_err());
    }
}
