//! Embedding backend seam.
//!
//! The banks treat embeddings as opaque float vectors. The default backend
//! is a deterministic feature-hashing encoder: tokens are FNV-hashed into a
//! fixed-dimension signed vector which is then L2-normalized. Deterministic
//! local encoding keeps tests hermetic and snapshots stable across runs; a
//! remote model can be swapped in behind the same trait.

use std::sync::Arc;

/// Maps text to a fixed-dimension vector. Implementations must be
/// deterministic for a given input so persisted embeddings stay valid.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dimension(&self) -> usize;
}

pub type SharedEmbedder = Arc<dyn Embedder>;

/// Token feature-hashing encoder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let hash = fnv1a64(token.as_bytes());
            let index = (hash % self.dimension as u64) as usize;
            // High bit decides the sign so unrelated tokens cancel rather
            // than pile up in the same direction.
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        l2_normalize(&mut vector);
        vector
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.len() >= 2)
        .map(|token| token.to_lowercase())
}

/// FNV-1a, fixed here so hashes are stable across platforms and releases.
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn l2_normalize(vector: &mut [f32]) {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("I studied physics in college");
        let b = embedder.embed("I studied physics in college");
        assert_eq!(a, b);
    }

    #[test]
    fn identical_text_has_unit_similarity() {
        let embedder = HashEmbedder::default();
        let vec = embedder.embed("summer vacations at the lake");
        let sim = cosine_similarity(&vec, &vec);
        assert!((sim - 1.0).abs() < 1e-5, "self-similarity was {sim}");
    }

    #[test]
    fn overlapping_text_beats_unrelated_text() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed("where did you go to college");
        let near = embedder.embed("what did you study in college");
        let far = embedder.embed("favorite recipe for sourdough bread");

        assert!(cosine_similarity(&query, &near) > cosine_similarity(&query, &far));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::default();
        let vec = embedder.embed("");
        assert!(vec.iter().all(|v| *v == 0.0));
        assert_eq!(vec.len(), embedder.dimension());
    }

    #[test]
    fn cosine_handles_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
