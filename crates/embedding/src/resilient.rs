// Retry wrapper for embedding providers.
//
// One combinator drives every provider call: run it under the call timeout,
// classify the failure, and either give up or sleep a jittered delay and go
// again. Batches retry as a unit; the per-call contract is one budget per
// provider invocation, not one per text.

use std::{
  future::Future,
  sync::atomic::{AtomicU64, Ordering},
  time::Duration,
};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::warn;

use crate::{EmbeddingError, EmbeddingProvider};

/// How a provider call is retried and bounded in time
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Total attempts, including the first call
  pub attempts: u32,
  /// Delay ceiling doubles from here per attempt
  pub base_delay: Duration,
  /// Hard cap on any single delay
  pub max_delay: Duration,
  /// Wall-clock budget per call
  pub call_timeout: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    // One retry on transient failures, 60s per call
    Self {
      attempts: 2,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(10),
      call_timeout: Duration::from_secs(60),
    }
  }
}

impl RetryPolicy {
  /// Services on localhost fail fast or not at all
  pub fn snappy() -> Self {
    Self {
      attempts: 2,
      base_delay: Duration::from_millis(250),
      max_delay: Duration::from_secs(2),
      call_timeout: Duration::from_secs(30),
    }
  }

  /// Rate-limited cloud APIs deserve more patience
  pub fn patient() -> Self {
    Self {
      attempts: 5,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(45),
      call_timeout: Duration::from_secs(120),
    }
  }

  /// Delay before retry number `attempt` (1-based), drawn uniformly from
  /// the upper half of a doubling window so concurrent callers spread out
  /// without collapsing to near-zero waits.
  fn delay_before(&self, attempt: u32, jitter: &Jitter) -> Duration {
    let ceiling = self
      .base_delay
      .saturating_mul(1u32 << attempt.min(16))
      .min(self.max_delay);

    let ceiling_ms = ceiling.as_millis() as u64;
    if ceiling_ms < 2 {
      return ceiling;
    }

    let half = ceiling_ms / 2;
    Duration::from_millis(half + jitter.draw() % (ceiling_ms - half + 1))
  }
}

/// Counter-based jitter source: a Weyl sequence pushed through the splitmix64
/// finalizer. Statistically plenty for spreading retries, with no RNG crate
/// and no shared mutable state beyond one atomic.
#[derive(Debug)]
struct Jitter(AtomicU64);

impl Jitter {
  fn new() -> Self {
    let seed = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .map(|d| d.as_nanos() as u64)
      .unwrap_or(0)
      ^ u64::from(std::process::id()).rotate_left(32);
    Self(AtomicU64::new(seed))
  }

  fn draw(&self) -> u64 {
    let mut z = self.0.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
  }
}

/// Wraps another provider with timeout and transient-failure retries
#[derive(Debug)]
pub struct ResilientProvider<P: EmbeddingProvider> {
  inner: P,
  policy: RetryPolicy,
  jitter: Jitter,
}

impl<P: EmbeddingProvider> ResilientProvider<P> {
  pub fn wrap(inner: P, policy: RetryPolicy) -> Self {
    Self {
      inner,
      policy,
      jitter: Jitter::new(),
    }
  }

  /// Run `call` under the policy: timeout each attempt, retry transient
  /// failures with a jittered delay, surface everything else immediately.
  async fn attempt<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T, EmbeddingError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EmbeddingError>>,
  {
    let mut attempt = 0u32;

    loop {
      attempt += 1;

      let outcome = match tokio::time::timeout(self.policy.call_timeout, call()).await {
        Ok(outcome) => outcome,
        Err(_) => Err(EmbeddingError::Timeout),
      };

      match outcome {
        Ok(value) => return Ok(value),
        Err(e) if e.is_transient() && attempt < self.policy.attempts => {
          let delay = self.policy.delay_before(attempt, &self.jitter);
          warn!(
            provider = self.inner.name(),
            call = label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Transient provider failure, retrying"
          );
          sleep(delay).await;
        }
        Err(e) => return Err(e),
      }
    }
  }
}

#[async_trait]
impl<P: EmbeddingProvider + Send + Sync> EmbeddingProvider for ResilientProvider<P> {
  fn name(&self) -> &str {
    self.inner.name()
  }

  fn model_id(&self) -> &str {
    self.inner.model_id()
  }

  fn dimensions(&self) -> usize {
    self.inner.dimensions()
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    self.attempt("embed", || self.inner.embed(text)).await
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.attempt("embed_batch", || self.inner.embed_batch(texts)).await
  }

  async fn is_available(&self) -> bool {
    self.inner.is_available().await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicU32;

  use super::*;

  #[test]
  fn test_delay_stays_within_window() {
    let policy = RetryPolicy {
      base_delay: Duration::from_millis(100),
      max_delay: Duration::from_secs(5),
      ..Default::default()
    };
    let jitter = Jitter::new();

    for attempt in 1..8 {
      let ceiling = policy.base_delay.saturating_mul(1 << attempt).min(policy.max_delay);
      for _ in 0..50 {
        let delay = policy.delay_before(attempt, &jitter);
        assert!(delay <= ceiling, "attempt {}: {:?} > {:?}", attempt, delay, ceiling);
        assert!(delay >= ceiling / 2 - Duration::from_millis(1));
      }
    }
  }

  #[test]
  fn test_delay_capped_by_max() {
    let policy = RetryPolicy {
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(3),
      ..Default::default()
    };
    let jitter = Jitter::new();

    // Far past the point where doubling would exceed the cap
    assert!(policy.delay_before(20, &jitter) <= Duration::from_secs(3));
  }

  #[test]
  fn test_jitter_values_vary() {
    let jitter = Jitter::new();
    let a = jitter.draw();
    let b = jitter.draw();
    let c = jitter.draw();
    assert!(a != b || b != c);
  }

  /// Fails with the given error until `failures` runs out, then succeeds
  #[derive(Debug)]
  struct Scripted {
    failures: AtomicU32,
    status: u16,
    batch_calls: AtomicU32,
  }

  impl Scripted {
    fn failing(times: u32, status: u16) -> Self {
      Self {
        failures: AtomicU32::new(times),
        status,
        batch_calls: AtomicU32::new(0),
      }
    }

    fn take_failure(&self) -> Option<EmbeddingError> {
      let left = self.failures.load(Ordering::SeqCst);
      if left == 0 {
        return None;
      }
      self.failures.store(left - 1, Ordering::SeqCst);
      Some(EmbeddingError::Http {
        status: self.status,
        detail: "scripted".into(),
      })
    }
  }

  #[async_trait]
  impl EmbeddingProvider for Scripted {
    fn name(&self) -> &str {
      "scripted"
    }
    fn model_id(&self) -> &str {
      "scripted"
    }
    fn dimensions(&self) -> usize {
      4
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
      match self.take_failure() {
        Some(e) => Err(e),
        None => Ok(vec![0.5; 4]),
      }
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
      self.batch_calls.fetch_add(1, Ordering::SeqCst);
      match self.take_failure() {
        Some(e) => Err(e),
        None => Ok(vec![vec![0.5; 4]; texts.len()]),
      }
    }

    async fn is_available(&self) -> bool {
      true
    }
  }

  fn test_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy {
      attempts,
      base_delay: Duration::from_millis(1),
      max_delay: Duration::from_millis(2),
      call_timeout: Duration::from_secs(1),
    }
  }

  #[tokio::test]
  async fn test_transient_failure_is_retried() {
    let provider = ResilientProvider::wrap(Scripted::failing(1, 503), test_policy(3));
    assert_eq!(provider.embed("x").await.unwrap().len(), 4);
  }

  #[tokio::test]
  async fn test_permanent_failure_is_not_retried() {
    let inner = Scripted::failing(5, 401);
    let provider = ResilientProvider::wrap(inner, test_policy(3));

    let err = provider.embed("x").await.unwrap_err();
    assert!(matches!(err, EmbeddingError::Http { status: 401, .. }));
    // 4 failures still scripted: only one attempt was made
    assert_eq!(provider.inner.failures.load(Ordering::SeqCst), 4);
  }

  #[tokio::test]
  async fn test_attempts_are_bounded() {
    let provider = ResilientProvider::wrap(Scripted::failing(10, 503), test_policy(2));
    assert!(provider.embed("x").await.is_err());
    // 2 attempts consumed 2 scripted failures
    assert_eq!(provider.inner.failures.load(Ordering::SeqCst), 8);
  }

  #[tokio::test]
  async fn test_batch_retries_as_one_call() {
    let provider = ResilientProvider::wrap(Scripted::failing(1, 429), test_policy(3));

    let result = provider.embed_batch(&["a", "b", "c"]).await.unwrap();
    assert_eq!(result.len(), 3);
    // One failed batch call plus one successful one, never per-text calls
    assert_eq!(provider.inner.batch_calls.load(Ordering::SeqCst), 2);
  }
}
