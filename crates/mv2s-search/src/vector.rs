//! The vector index engine: a single-writer actor wrapping a flat
//! (brute-force) approximate-nearest-neighbor structure over cosine, dot, or
//! L2 similarity.
//!
//! The flat scan is generalized from an in-memory-only primitive into a
//! serializable blob the store actor can stage and commit. Flat vectors+ids
//! is the interoperable archival format (over an HNSW index), so this is the
//! only backend implemented.

use mv2s_core::{ids::FrameId, limits::MAX_TOP_K, MvError, MvResult};
use mv2s_storage::codec::{Reader, Writer};
use std::collections::HashMap;

/// Distance/similarity function a vector index is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Similarity {
    /// Cosine similarity. Higher is more similar.
    Cosine = 0,
    /// Raw dot product. Higher is more similar.
    Dot = 1,
    /// Negative Euclidean distance, so "higher is more similar" still holds.
    L2 = 2,
}

impl Similarity {
    /// Decode a wire tag byte.
    pub fn from_tag(tag: u8) -> MvResult<Self> {
        match tag {
            0 => Ok(Self::Cosine),
            1 => Ok(Self::Dot),
            2 => Ok(Self::L2),
            other => Err(MvError::DecodingError {
                reason: format!("unknown similarity tag {other}"),
            }),
        }
    }

    /// Encode to the wire tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Similarity::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    0.0
                } else {
                    dot / (na * nb)
                }
            }
            Similarity::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Similarity::L2 => {
                let sq: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                -sq.sqrt()
            }
        }
    }
}

/// Wire format tag identifying the flat-vectors-plus-ids archival layout
///.
const FORMAT_TAG_FLAT: u8 = 1;

/// A single-writer, single-file-backed flat vector index.
pub struct VectorIndex {
    dimension: u32,
    similarity: Similarity,
    ids: Vec<FrameId>,
    vectors: Vec<Vec<f32>>,
    position_of: HashMap<FrameId, usize>,
}

impl VectorIndex {
    /// Construct an empty index with a fixed dimension and similarity.
    pub fn new(dimension: u32, similarity: Similarity) -> Self {
        VectorIndex {
            dimension,
            similarity,
            ids: Vec::new(),
            vectors: Vec::new(),
            position_of: HashMap::new(),
        }
    }

    /// Configured vector dimension.
    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// Configured similarity function.
    pub fn similarity(&self) -> Similarity {
        self.similarity
    }

    /// Number of vectors currently stored.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if no vectors are stored.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn validate_dimension(&self, vector: &[f32]) -> MvResult<()> {
        if vector.len() != self.dimension as usize {
            return Err(MvError::DimensionMismatch {
                expected: self.dimension as usize,
                got: vector.len(),
            });
        }
        Ok(())
    }

    /// Upsert a vector for `frame_id`, removing any prior vector for that id
    /// first (remove-then-add).
    pub fn add(&mut self, frame_id: FrameId, vector: Vec<f32>) -> MvResult<()> {
        self.validate_dimension(&vector)?;
        if let Some(&pos) = self.position_of.get(&frame_id) {
            self.vectors[pos] = vector;
        } else {
            let pos = self.ids.len();
            self.ids.push(frame_id);
            self.vectors.push(vector);
            self.position_of.insert(frame_id, pos);
        }
        Ok(())
    }

    /// Add a batch of vectors in a single critical section: reserves
    /// capacity up front and returns only once every vector is added.
    pub fn add_batch(&mut self, items: Vec<(FrameId, Vec<f32>)>) -> MvResult<()> {
        for (_, v) in &items {
            self.validate_dimension(v)?;
        }
        self.ids.reserve(items.len());
        self.vectors.reserve(items.len());
        for (frame_id, vector) in items {
            self.add(frame_id, vector)?;
        }
        Ok(())
    }

    /// Nearest neighbors to `query`, sorted by score descending (higher is
    /// more similar). `top_k` is clamped to `[1, 10_000]`.
    pub fn search(&self, query: &[f32], top_k: usize) -> MvResult<Vec<(FrameId, f32)>> {
        self.validate_dimension(query)?;
        let top_k = top_k.clamp(1, MAX_TOP_K);

        let mut scored: Vec<(FrameId, f32)> = self
            .ids
            .iter()
            .zip(self.vectors.iter())
            .map(|(id, v)| (*id, self.similarity.score(query, v)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.get().cmp(&b.0.get()))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Encode a self-describing blob: format tag, similarity, dimension,
    /// vector count, then `(frame_id, vector)` pairs.
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(FORMAT_TAG_FLAT);
        w.u8(self.similarity.tag());
        w.u32(self.dimension);
        w.u64(self.ids.len() as u64);
        for (id, vector) in self.ids.iter().zip(self.vectors.iter()) {
            w.u64(id.get());
            for component in vector {
                w.u32(component.to_bits());
            }
        }
        w.into_bytes()
    }

    /// Decode a blob produced by [`Self::serialize`], rejecting it if its
    /// dimension or similarity does not match `expected_dimension` /
    /// `expected_similarity`.
    pub fn deserialize(
        bytes: &[u8],
        expected_dimension: u32,
        expected_similarity: Similarity,
    ) -> MvResult<Self> {
        let mut r = Reader::new(bytes);
        let format_tag = r.u8()?;
        if format_tag != FORMAT_TAG_FLAT {
            return Err(MvError::DecodingError {
                reason: format!("unsupported vector blob format tag {format_tag}"),
            });
        }
        let similarity = Similarity::from_tag(r.u8()?)?;
        let dimension = r.u32()?;
        if dimension != expected_dimension {
            return Err(MvError::DimensionMismatch {
                expected: expected_dimension as usize,
                got: dimension as usize,
            });
        }
        if similarity != expected_similarity {
            return Err(MvError::DecodingError {
                reason: "vector blob similarity does not match configured similarity".to_string(),
            });
        }

        let count = r.u64()? as usize;
        let mut ids = Vec::with_capacity(count);
        let mut vectors = Vec::with_capacity(count);
        let mut position_of = HashMap::with_capacity(count);
        for i in 0..count {
            let id = FrameId(r.u64()?);
            let mut vector = Vec::with_capacity(dimension as usize);
            for _ in 0..dimension {
                vector.push(f32::from_bits(r.u32()?));
            }
            position_of.insert(id, i);
            ids.push(id);
            vectors.push(vector);
        }

        Ok(VectorIndex {
            dimension,
            similarity,
            ids,
            vectors,
            position_of,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_ranks_by_cosine_similarity_descending() {
        let mut idx = VectorIndex::new(2, Similarity::Cosine);
        idx.add(FrameId(0), vec![1.0, 0.0]).unwrap();
        idx.add(FrameId(1), vec![0.0, 1.0]).unwrap();
        idx.add(FrameId(2), vec![0.9, 0.1]).unwrap();

        let results = idx.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(results[0].0, FrameId(0));
        assert_eq!(results[1].0, FrameId(2));
        assert_eq!(results[2].0, FrameId(1));
    }

    #[test]
    fn add_upserts_by_frame_id() {
        let mut idx = VectorIndex::new(2, Similarity::Dot);
        idx.add(FrameId(0), vec![1.0, 1.0]).unwrap();
        idx.add(FrameId(0), vec![2.0, 2.0]).unwrap();
        assert_eq!(idx.len(), 1);
        let results = idx.search(&[1.0, 1.0], 1).unwrap();
        assert!((results[0].1 - 4.0).abs() < 1e-6);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut idx = VectorIndex::new(3, Similarity::Cosine);
        assert!(idx.add(FrameId(0), vec![1.0, 0.0]).is_err());
    }

    #[test]
    fn top_k_is_clamped() {
        let mut idx = VectorIndex::new(1, Similarity::Dot);
        for i in 0..5 {
            idx.add(FrameId(i), vec![i as f32]).unwrap();
        }
        let results = idx.search(&[0.0], 0).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn round_trips_through_serialize_deserialize() {
        let mut idx = VectorIndex::new(2, Similarity::Cosine);
        idx.add(FrameId(7), vec![0.5, 0.5]).unwrap();
        idx.add(FrameId(3), vec![1.0, 0.0]).unwrap();

        let bytes = idx.serialize();
        let restored = VectorIndex::deserialize(&bytes, 2, Similarity::Cosine).unwrap();
        assert_eq!(restored.len(), 2);
        let results = restored.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].0, FrameId(3));
    }

    #[test]
    fn deserialize_rejects_dimension_mismatch() {
        let mut idx = VectorIndex::new(2, Similarity::Cosine);
        idx.add(FrameId(0), vec![0.1, 0.2]).unwrap();
        let bytes = idx.serialize();
        assert!(VectorIndex::deserialize(&bytes, 3, Similarity::Cosine).is_err());
    }
}
