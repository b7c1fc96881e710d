//! Embedding generation
//!
//! The manager consumes embeddings through the [`Embedder`] trait; the actual
//! model (OpenAI, local ONNX, ...) lives with the host. A deterministic
//! feature-hashing embedder is provided so the crate works standalone and the
//! embedding paths are testable without network access.
//!
//! Embedding is best-effort everywhere: a failed `embed` call is logged by
//! the manager and the record persists without a vector.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::Result;
use crate::types::MAX_EMBEDDING_DIM;

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Native output dimension of the model
    fn dimensions(&self) -> usize;

    /// Model name
    fn model_name(&self) -> &str;
}

/// Pad or truncate a vector to exactly MAX_EMBEDDING_DIM elements.
///
/// Stored embeddings always have this fixed dimension regardless of the
/// producing model's native size.
pub fn pad_embedding(mut embedding: Vec<f32>) -> Vec<f32> {
    embedding.truncate(MAX_EMBEDDING_DIM);
    embedding.resize(MAX_EMBEDDING_DIM, 0.0);
    embedding
}

/// Deterministic local embedder using token feature hashing.
///
/// No corpus statistics and no network: each whitespace token is hashed into
/// a fixed-size bucket space and the resulting vector is L2-normalized.
/// Identical texts always produce identical vectors, which is all the tests
/// and standalone deployments need.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();
            let bucket = (hash % self.dimensions as u64) as usize;
            // Half the buckets accumulate negatively to reduce collisions
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hashing-embedder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_embedding_to_fixed_dim() {
        let padded = pad_embedding(vec![1.0, 2.0, 3.0]);
        assert_eq!(padded.len(), MAX_EMBEDDING_DIM);
        assert_eq!(&padded[..3], &[1.0, 2.0, 3.0]);
        assert_eq!(padded[3], 0.0);

        let truncated = pad_embedding(vec![0.5; MAX_EMBEDDING_DIM + 10]);
        assert_eq!(truncated.len(), MAX_EMBEDDING_DIM);
    }

    #[test]
    fn test_hashing_embedder_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Finish the quarterly report").unwrap();
        let b = embedder.embed("Finish the quarterly report").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), embedder.dimensions());
    }

    #[test]
    fn test_hashing_embedder_normalized() {
        let embedder = HashingEmbedder::default();
        let v = embedder.embed("some nonempty text here").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed("").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
