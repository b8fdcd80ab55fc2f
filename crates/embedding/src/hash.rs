// Deterministic token-hash embeddings for offline setups and tests.
//
// Each token is hashed into a handful of bucket positions; the resulting
// vector is L2-normalized so cosine distances behave like a real model's.
// Quality is far below a learned model, but results are stable across runs
// and need no network.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{EmbeddingError, EmbeddingProvider};

#[derive(Debug, Clone)]
pub struct HashProvider {
  dimensions: usize,
}

impl HashProvider {
  pub fn new(dimensions: usize) -> Self {
    Self {
      dimensions: dimensions.max(8),
    }
  }

  fn embed_sync(&self, text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; self.dimensions];

    for token in tokenize(text) {
      let digest = Sha256::digest(token.as_bytes());
      // Four buckets per token, weighted by sign bits
      for pair in digest.chunks(8).take(4) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(pair);
        let value = u64::from_le_bytes(bytes);
        let bucket = (value % self.dimensions as u64) as usize;
        let sign = if value & (1 << 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
      }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
      for v in &mut vector {
        *v /= norm;
      }
    }

    vector
  }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
  text
    .split(|c: char| !c.is_alphanumeric() && c != '_')
    .filter(|t| !t.is_empty())
    .map(|t| t.to_lowercase())
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
  fn name(&self) -> &str {
    "hash"
  }

  fn model_id(&self) -> &str {
    "token-hash"
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    Ok(self.embed_sync(text))
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
  }

  async fn is_available(&self) -> bool {
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_embeddings_are_deterministic() {
    let provider = HashProvider::new(128);
    let a = provider.embed("authenticate user").await.unwrap();
    let b = provider.embed("authenticate user").await.unwrap();
    assert_eq!(a, b);
  }

  #[tokio::test]
  async fn test_embeddings_are_normalized() {
    let provider = HashProvider::new(128);
    let v = provider.embed("some text to embed").await.unwrap();
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
  }

  #[tokio::test]
  async fn test_similar_text_scores_higher_than_unrelated() {
    let provider = HashProvider::new(256);
    let query = provider.embed("database connection pool").await.unwrap();
    let close = provider.embed("connection pool for the database").await.unwrap();
    let far = provider.embed("yellow submarine chorus lyrics").await.unwrap();

    let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    assert!(dot(&query, &close) > dot(&query, &far));
  }

  #[tokio::test]
  async fn test_minimum_dimensions_enforced() {
    let provider = HashProvider::new(2);
    assert!(provider.dimensions() >= 8);
  }
}
