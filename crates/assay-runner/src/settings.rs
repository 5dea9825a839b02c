//! Runner configuration, deserialised from `assay.toml` and `ASSAY_*`
//! environment variables.

use std::{path::PathBuf, time::Duration};

use assay_core::{Error, Result, config::EngineConfig};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
  pub store_path:  PathBuf,
  /// Subjects scored at once during a cycle run.
  pub concurrency: usize,
  /// Series name drift snapshots are stored under.
  pub drift_key:   String,
  pub retry:       RetryPolicy,
  pub engine:      EngineConfig,
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      store_path:  PathBuf::from("assay.db"),
      concurrency: 8,
      drift_key:   "confidence".into(),
      retry:       RetryPolicy::default(),
      engine:      EngineConfig::default(),
    }
  }
}

impl RunnerConfig {
  pub fn validate(&self) -> Result<()> {
    if self.concurrency == 0 {
      return Err(Error::InvalidConfiguration(
        "concurrency must be at least 1".into(),
      ));
    }
    if self.drift_key.trim().is_empty() {
      return Err(Error::InvalidConfiguration("drift_key must not be empty".into()));
    }
    self.retry.validate()?;
    self.engine.validate()
  }
}

/// Exponential backoff for transient store failures.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts:       u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms:     u64,
  pub multiplier:         f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts:       5,
      initial_backoff_ms: 25,
      max_backoff_ms:     2_000,
      multiplier:         2.0,
    }
  }
}

impl RetryPolicy {
  pub fn validate(&self) -> Result<()> {
    if self.max_attempts == 0 {
      return Err(Error::InvalidConfiguration(
        "retry.max_attempts must be at least 1".into(),
      ));
    }
    if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
      return Err(Error::InvalidConfiguration(format!(
        "retry.multiplier must be >= 1, got {}",
        self.multiplier
      )));
    }
    Ok(())
  }

  /// Delay before retry number `attempt` (1-based).
  pub fn backoff(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(30) as i32;
    let millis = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
    Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backoff_grows_and_caps() {
    let policy = RetryPolicy {
      max_attempts:       10,
      initial_backoff_ms: 100,
      max_backoff_ms:     500,
      multiplier:         2.0,
    };
    assert_eq!(policy.backoff(1), Duration::from_millis(100));
    assert_eq!(policy.backoff(2), Duration::from_millis(200));
    assert_eq!(policy.backoff(3), Duration::from_millis(400));
    assert_eq!(policy.backoff(4), Duration::from_millis(500));
    assert_eq!(policy.backoff(40), Duration::from_millis(500));
  }

  #[test]
  fn zero_concurrency_is_invalid() {
    let cfg = RunnerConfig { concurrency: 0, ..Default::default() };
    assert!(cfg.validate().is_err());
    assert!(RunnerConfig::default().validate().is_ok());
  }

  #[test]
  fn engine_section_is_validated() {
    let mut cfg = RunnerConfig::default();
    cfg.engine.gaps.min_raters = 1;
    assert!(cfg.validate().is_err());
  }
}
