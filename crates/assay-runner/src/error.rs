//! Error type for the pipeline.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Core(#[from] assay_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// The current composite kept moving under us.
  #[error(
    "composite for subject {subject_id} cycle {cycle_id} still contended after \
     {attempts} attempts"
  )]
  Contended {
    subject_id: Uuid,
    cycle_id:   Uuid,
    attempts:   u32,
  },

  #[error("worker pool closed")]
  PoolClosed(#[from] tokio::sync::AcquireError),
}

impl PipelineError {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
