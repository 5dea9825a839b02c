//! Retry of store calls that fail transiently.

use std::future::Future;

use assay_core::store::StoreError;
use tracing::warn;

use crate::settings::RetryPolicy;

/// Run `op` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` is reached.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
  E: StoreError,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  let mut attempt = 1;
  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_transient() && attempt < policy.max_attempts => {
        let delay = policy.backoff(attempt);
        warn!(operation, attempt, ?delay, error = %e, "transient store error, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;

  #[derive(Debug, thiserror::Error)]
  #[error("fake failure (transient: {0})")]
  struct Fake(bool);

  impl StoreError for Fake {
    fn domain(&self) -> Option<&assay_core::Error> { None }

    fn is_transient(&self) -> bool { self.0 }
  }

  fn fast() -> RetryPolicy {
    RetryPolicy { initial_backoff_ms: 1, ..Default::default() }
  }

  #[tokio::test]
  async fn transient_errors_are_retried() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let result = with_retry(&fast(), "test", || async move {
      if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(Fake(true)) } else { Ok(7) }
    })
    .await;
    assert_eq!(result.unwrap(), 7);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn permanent_errors_are_not_retried() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let result: Result<(), _> = with_retry(&fast(), "test", || async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Err(Fake(false))
    })
    .await;
    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn attempts_are_bounded() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let policy = RetryPolicy { max_attempts: 3, ..fast() };
    let result: Result<(), _> = with_retry(&policy, "test", || async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Err(Fake(true))
    })
    .await;
    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }
}
