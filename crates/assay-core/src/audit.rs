//! Audit log entries for computed and human-overridden decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
  CatalogSeeded,
  CompositeScored,
  BandOverridden,
  GapsAnalyzed,
  ConfidenceAssessed,
  DriftEvaluated,
  DriftAlertRaised,
}

/// Who made the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Actor {
  /// The computation pipeline.
  System,
  /// A named human reviewer.
  User(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
  pub entry_id:    Uuid,
  pub action:      AuditAction,
  pub actor:       Actor,
  pub subject_id:  Option<Uuid>,
  pub cycle_id:    Option<Uuid>,
  /// The record this decision produced, if any.
  pub record_id:   Option<Uuid>,
  pub rationale:   String,
  pub recorded_at: DateTime<Utc>,
}

/// Input to [`crate::store::AssessmentStore::append_audit`]. `recorded_at`
/// is set by the store.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
  pub action:     AuditAction,
  pub actor:      Actor,
  pub subject_id: Option<Uuid>,
  pub cycle_id:   Option<Uuid>,
  pub record_id:  Option<Uuid>,
  pub rationale:  String,
}

impl NewAuditEntry {
  /// A system-authored entry with no subject context.
  pub fn system(action: AuditAction, rationale: impl Into<String>) -> Self {
    Self {
      action,
      actor: Actor::System,
      subject_id: None,
      cycle_id: None,
      record_id: None,
      rationale: rationale.into(),
    }
  }

  pub fn for_subject(mut self, subject_id: Uuid, cycle_id: Option<Uuid>) -> Self {
    self.subject_id = Some(subject_id);
    self.cycle_id = cycle_id;
    self
  }

  pub fn with_record(mut self, record_id: Uuid) -> Self {
    self.record_id = Some(record_id);
    self
  }
}
