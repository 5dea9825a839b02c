//! Evidence items: metadata about the observations backing a score.
//!
//! Supplied by collaborating modules (performance, appraisal, feedback,
//! learning). Only the metadata is used for confidence; `value` is carried
//! through opaquely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
  pub evidence_id:  Uuid,
  pub subject_id:   Uuid,
  /// Originating module table, e.g. `"appraisals"`.
  pub source_table: String,
  #[serde(rename = "type")]
  pub kind:         String,
  pub value:        serde_json::Value,
  pub timestamp:    DateTime<Utc>,
  pub rater_id:     Option<Uuid>,
  pub flagged_bias: bool,
}

/// Input to [`crate::store::AssessmentStore::record_evidence`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvidence {
  pub subject_id:   Uuid,
  pub source_table: String,
  #[serde(rename = "type")]
  pub kind:         String,
  #[serde(default)]
  pub value:        serde_json::Value,
  pub timestamp:    DateTime<Utc>,
  pub rater_id:     Option<Uuid>,
  #[serde(default)]
  pub flagged_bias: bool,
}

impl NewEvidence {
  pub fn new(
    subject_id: Uuid,
    source_table: impl Into<String>,
    kind: impl Into<String>,
    timestamp: DateTime<Utc>,
  ) -> Self {
    Self {
      subject_id,
      source_table: source_table.into(),
      kind: kind.into(),
      value: serde_json::Value::Null,
      timestamp,
      rater_id: None,
      flagged_bias: false,
    }
  }
}
