use sha2::{Digest, Sha256};

/// Turns message text into a fixed-length feature vector.
pub trait Embedder: Send + Sync {
    /// Identifier stored with trained models; a model only loads against the same embedder.
    fn model_id(&self) -> &str;
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

pub const HASHED_EMBEDDER_ID: &str = "hashed-bow-v1";
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

/// Signed feature hashing over lowercase word unigrams and bigrams, L2-normalized.
///
/// Deterministic across processes, so a persisted model stays valid after restart.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(word);
        let index = (hash % self.dim as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        HASHED_EMBEDDER_ID
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let tokens = tokenize(text);

        for token in &tokens {
            let (index, sign) = self.bucket(token);
            vector[index] += sign;
        }
        for pair in tokens.windows(2) {
            let (index, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[index] += 0.5 * sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}
