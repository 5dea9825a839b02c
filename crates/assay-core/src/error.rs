//! Error types for `assay-core`.
//!
//! [`Error`] covers failures that block an operation and must reach the
//! caller. [`Degradation`] covers computations that could not produce a value
//! for one output; it suppresses that output only and the rest of a batch
//! carries on.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The catalog entity kinds that can be named in a
/// [`Error::ReferencedEntityConflict`].
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
  Form,
  Category,
  Indicator,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid configuration: {0}")]
  InvalidConfiguration(String),

  #[error("{entity} {id} is referenced by {ratings} rating(s)")]
  ReferencedEntityConflict {
    entity:  EntityKind,
    id:      Uuid,
    ratings: u64,
  },

  #[error(
    "version conflict for subject {subject_id} cycle {cycle_id}: expected \
     {expected:?}, found {actual:?}"
  )]
  VersionConflict {
    subject_id: Uuid,
    cycle_id:   Uuid,
    expected:   Option<i64>,
    actual:     Option<i64>,
  },

  #[error("form not found: {0}")]
  FormNotFound(Uuid),

  #[error("category not found: {0}")]
  CategoryNotFound(Uuid),

  #[error("indicator not found: {0}")]
  IndicatorNotFound(Uuid),

  #[error("no current composite score for subject {subject_id} cycle {cycle_id}")]
  NoCurrentScore { subject_id: Uuid, cycle_id: Uuid },

  #[error("rating value {value} outside 1..={max} for indicator {indicator_id}")]
  RatingOutOfRange {
    indicator_id: Uuid,
    value:        f64,
    max:          u8,
  },

  #[error("indicator {indicator_id} is rated by {expected}, not {actual}")]
  AssessorMismatch {
    indicator_id: Uuid,
    expected:     crate::catalog::AssessorType,
    actual:       crate::catalog::AssessorType,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Configuration errors block the mutating operation and are never worth
  /// retrying: the same input fails the same way.
  pub fn is_configuration(&self) -> bool {
    matches!(
      self,
      Self::InvalidConfiguration(_)
        | Self::ReferencedEntityConflict { .. }
        | Self::RatingOutOfRange { .. }
        | Self::AssessorMismatch { .. }
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A non-fatal computation outcome that replaces one specific output.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
  /// Fewer distinct "other" raters than the anonymity floor allows.
  #[error("insufficient raters: {count} of {required} required")]
  InsufficientRaters { count: usize, required: usize },

  /// Nothing to compute from.
  #[error("no data available")]
  NoDataAvailable,

  /// The drift window holds too few observations to be meaningful.
  #[error("insufficient sample size: {observed} of {required} observations")]
  InsufficientSampleSize { observed: u64, required: u64 },
}
