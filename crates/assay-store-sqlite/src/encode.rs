//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings with nanosecond
//! precision, so lexical order equals chronological order. Enums are stored
//! by their snake_case names. Nested structures (scoring guides, sub-scores,
//! overrides, actors) are stored as compact JSON. UUIDs are stored as
//! hyphenated lowercase strings.

use std::{fmt::Display, str::FromStr};

use assay_core::{
  audit::AuditLogEntry,
  catalog::{Category, Form, Indicator},
  evidence::EvidenceItem,
  rating::Rating,
  record::{CompositeScore, ConfidenceRecord, DriftSnapshot, GapRecord},
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

/// Parse a stored enum name.
fn decode_enum<T>(what: &str, s: &str) -> Result<T>
where
  T: FromStr,
  T::Err: Display,
{
  s.parse()
    .map_err(|e| Error::Decode(format!("unknown {what} {s:?}: {e}")))
}

fn decode_count(what: &str, n: i64) -> Result<usize> {
  usize::try_from(n).map_err(|_| Error::Decode(format!("negative {what}: {n}")))
}

// ─── Forms ───────────────────────────────────────────────────────────────────

pub const FORM_COLUMNS: &str = "form_id, name, scope, created_at";

pub struct RawForm {
  pub form_id:    String,
  pub name:       String,
  pub scope:      String,
  pub created_at: String,
}

impl RawForm {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      form_id:    row.get(0)?,
      name:       row.get(1)?,
      scope:      row.get(2)?,
      created_at: row.get(3)?,
    })
  }

  pub fn into_form(self) -> Result<Form> {
    Ok(Form {
      form_id:    decode_uuid(&self.form_id)?,
      name:       self.name,
      scope:      self.scope,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

// ─── Categories ──────────────────────────────────────────────────────────────

pub const CATEGORY_COLUMNS: &str = "category_id, form_id, name, sort_order";

pub struct RawCategory {
  pub category_id: String,
  pub form_id:     String,
  pub name:        String,
  pub sort_order:  i32,
}

impl RawCategory {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      category_id: row.get(0)?,
      form_id:     row.get(1)?,
      name:        row.get(2)?,
      sort_order:  row.get(3)?,
    })
  }

  pub fn into_category(self) -> Result<Category> {
    Ok(Category {
      category_id: decode_uuid(&self.category_id)?,
      form_id:     decode_uuid(&self.form_id)?,
      name:        self.name,
      sort_order:  self.sort_order,
    })
  }
}

// ─── Indicators ──────────────────────────────────────────────────────────────

pub const INDICATOR_COLUMNS: &str = "indicator_id, form_id, category_id, text, \
  assessor_type, weight, rating_scale_max, guide, sort_order";

pub struct RawIndicator {
  pub indicator_id:     String,
  pub form_id:          String,
  pub category_id:      Option<String>,
  pub text:             String,
  pub assessor_type:    String,
  pub weight:           f64,
  pub rating_scale_max: u8,
  pub guide:            String,
  pub sort_order:       i32,
}

impl RawIndicator {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      indicator_id:     row.get(0)?,
      form_id:          row.get(1)?,
      category_id:      row.get(2)?,
      text:             row.get(3)?,
      assessor_type:    row.get(4)?,
      weight:           row.get(5)?,
      rating_scale_max: row.get(6)?,
      guide:            row.get(7)?,
      sort_order:       row.get(8)?,
    })
  }

  pub fn into_indicator(self) -> Result<Indicator> {
    Ok(Indicator {
      indicator_id:     decode_uuid(&self.indicator_id)?,
      form_id:          decode_uuid(&self.form_id)?,
      category_id:      decode_opt_uuid(self.category_id)?,
      text:             self.text,
      assessor_type:    decode_enum("assessor type", &self.assessor_type)?,
      weight:           self.weight,
      rating_scale_max: self.rating_scale_max,
      guide:            serde_json::from_str(&self.guide)?,
      sort_order:       self.sort_order,
    })
  }
}

// ─── Ratings ─────────────────────────────────────────────────────────────────

pub const RATING_COLUMNS: &str = "rating_id, indicator_id, assessor_type, \
  rater_id, subject_id, cycle_id, value, submitted_at";

pub struct RawRating {
  pub rating_id:     String,
  pub indicator_id:  String,
  pub assessor_type: String,
  pub rater_id:      String,
  pub subject_id:    String,
  pub cycle_id:      String,
  pub value:         f64,
  pub submitted_at:  String,
}

impl RawRating {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      rating_id:     row.get(0)?,
      indicator_id:  row.get(1)?,
      assessor_type: row.get(2)?,
      rater_id:      row.get(3)?,
      subject_id:    row.get(4)?,
      cycle_id:      row.get(5)?,
      value:         row.get(6)?,
      submitted_at:  row.get(7)?,
    })
  }

  pub fn into_rating(self) -> Result<Rating> {
    Ok(Rating {
      rating_id:     decode_uuid(&self.rating_id)?,
      indicator_id:  decode_uuid(&self.indicator_id)?,
      assessor_type: decode_enum("assessor type", &self.assessor_type)?,
      rater_id:      decode_uuid(&self.rater_id)?,
      subject_id:    decode_uuid(&self.subject_id)?,
      cycle_id:      decode_uuid(&self.cycle_id)?,
      value:         self.value,
      submitted_at:  decode_dt(&self.submitted_at)?,
    })
  }
}

// ─── Evidence ────────────────────────────────────────────────────────────────

pub const EVIDENCE_COLUMNS: &str = "evidence_id, subject_id, source_table, \
  kind, value_json, timestamp, rater_id, flagged_bias";

pub struct RawEvidence {
  pub evidence_id:  String,
  pub subject_id:   String,
  pub source_table: String,
  pub kind:         String,
  pub value_json:   String,
  pub timestamp:    String,
  pub rater_id:     Option<String>,
  pub flagged_bias: bool,
}

impl RawEvidence {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      evidence_id:  row.get(0)?,
      subject_id:   row.get(1)?,
      source_table: row.get(2)?,
      kind:         row.get(3)?,
      value_json:   row.get(4)?,
      timestamp:    row.get(5)?,
      rater_id:     row.get(6)?,
      flagged_bias: row.get(7)?,
    })
  }

  pub fn into_evidence(self) -> Result<EvidenceItem> {
    Ok(EvidenceItem {
      evidence_id:  decode_uuid(&self.evidence_id)?,
      subject_id:   decode_uuid(&self.subject_id)?,
      source_table: self.source_table,
      kind:         self.kind,
      value:        serde_json::from_str(&self.value_json)?,
      timestamp:    decode_dt(&self.timestamp)?,
      rater_id:     decode_opt_uuid(self.rater_id)?,
      flagged_bias: self.flagged_bias,
    })
  }
}

// ─── Composite scores ────────────────────────────────────────────────────────

pub const COMPOSITE_COLUMNS: &str = "score_id, subject_id, cycle_id, \
  overall_score, sub_scores, computed_band, band_override, is_current, \
  version, input_digest, computed_at";

pub struct RawComposite {
  pub score_id:      String,
  pub subject_id:    String,
  pub cycle_id:      String,
  pub overall_score: f64,
  pub sub_scores:    String,
  pub computed_band: String,
  pub band_override: Option<String>,
  pub is_current:    bool,
  pub version:       i64,
  pub input_digest:  String,
  pub computed_at:   String,
}

impl RawComposite {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      score_id:      row.get(0)?,
      subject_id:    row.get(1)?,
      cycle_id:      row.get(2)?,
      overall_score: row.get(3)?,
      sub_scores:    row.get(4)?,
      computed_band: row.get(5)?,
      band_override: row.get(6)?,
      is_current:    row.get(7)?,
      version:       row.get(8)?,
      input_digest:  row.get(9)?,
      computed_at:   row.get(10)?,
    })
  }

  pub fn into_composite(self) -> Result<CompositeScore> {
    Ok(CompositeScore {
      score_id:      decode_uuid(&self.score_id)?,
      subject_id:    decode_uuid(&self.subject_id)?,
      cycle_id:      decode_uuid(&self.cycle_id)?,
      overall_score: self.overall_score,
      sub_scores:    serde_json::from_str(&self.sub_scores)?,
      computed_band: decode_enum("readiness band", &self.computed_band)?,
      band_override: self
        .band_override
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?,
      is_current:    self.is_current,
      version:       self.version,
      input_digest:  self.input_digest,
      computed_at:   decode_dt(&self.computed_at)?,
    })
  }
}

// ─── Gap records ─────────────────────────────────────────────────────────────

pub const GAP_COLUMNS: &str = "gap_id, subject_id, cycle_id, competency, \
  self_score, others_average, others_rater_count, gap, classification, \
  input_digest, computed_at";

pub struct RawGap {
  pub gap_id:             String,
  pub subject_id:         String,
  pub cycle_id:           String,
  pub competency:         String,
  pub self_score:         f64,
  pub others_average:     f64,
  pub others_rater_count: i64,
  pub gap:                f64,
  pub classification:     String,
  pub input_digest:       String,
  pub computed_at:        String,
}

impl RawGap {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      gap_id:             row.get(0)?,
      subject_id:         row.get(1)?,
      cycle_id:           row.get(2)?,
      competency:         row.get(3)?,
      self_score:         row.get(4)?,
      others_average:     row.get(5)?,
      others_rater_count: row.get(6)?,
      gap:                row.get(7)?,
      classification:     row.get(8)?,
      input_digest:       row.get(9)?,
      computed_at:        row.get(10)?,
    })
  }

  pub fn into_gap(self) -> Result<GapRecord> {
    Ok(GapRecord {
      gap_id:             decode_uuid(&self.gap_id)?,
      subject_id:         decode_uuid(&self.subject_id)?,
      cycle_id:           decode_uuid(&self.cycle_id)?,
      competency:         self.competency,
      self_score:         self.self_score,
      others_average:     self.others_average,
      others_rater_count: decode_count("rater count", self.others_rater_count)?,
      gap:                self.gap,
      classification:     decode_enum("gap classification", &self.classification)?,
      input_digest:       self.input_digest,
      computed_at:        decode_dt(&self.computed_at)?,
    })
  }
}

// ─── Confidence records ──────────────────────────────────────────────────────

pub const CONFIDENCE_COLUMNS: &str = "confidence_id, subject_id, \
  confidence_score, bias_risk_level, source_count, signal_count, rater_count, \
  data_freshness_days, freshness, input_digest, computed_at";

pub struct RawConfidence {
  pub confidence_id:       String,
  pub subject_id:          String,
  pub confidence_score:    f64,
  pub bias_risk_level:     String,
  pub source_count:        i64,
  pub signal_count:        i64,
  pub rater_count:         i64,
  pub data_freshness_days: i64,
  pub freshness:           String,
  pub input_digest:        String,
  pub computed_at:         String,
}

impl RawConfidence {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      confidence_id:       row.get(0)?,
      subject_id:          row.get(1)?,
      confidence_score:    row.get(2)?,
      bias_risk_level:     row.get(3)?,
      source_count:        row.get(4)?,
      signal_count:        row.get(5)?,
      rater_count:         row.get(6)?,
      data_freshness_days: row.get(7)?,
      freshness:           row.get(8)?,
      input_digest:        row.get(9)?,
      computed_at:         row.get(10)?,
    })
  }

  pub fn into_confidence(self) -> Result<ConfidenceRecord> {
    Ok(ConfidenceRecord {
      confidence_id:       decode_uuid(&self.confidence_id)?,
      subject_id:          decode_uuid(&self.subject_id)?,
      confidence_score:    self.confidence_score,
      bias_risk_level:     decode_enum("bias risk level", &self.bias_risk_level)?,
      source_count:        decode_count("source count", self.source_count)?,
      signal_count:        decode_count("signal count", self.signal_count)?,
      rater_count:         decode_count("rater count", self.rater_count)?,
      data_freshness_days: self.data_freshness_days,
      freshness:           decode_enum("freshness", &self.freshness)?,
      input_digest:        self.input_digest,
      computed_at:         decode_dt(&self.computed_at)?,
    })
  }
}

// ─── Drift snapshots ─────────────────────────────────────────────────────────

pub const DRIFT_COLUMNS: &str = "snapshot_id, key, period_end, baseline_avg, \
  current_avg, drift_score, threshold_breached, alert_raised, observations, \
  computed_at";

pub struct RawDrift {
  pub snapshot_id:        String,
  pub key:                String,
  pub period_end:         String,
  pub baseline_avg:       f64,
  pub current_avg:        f64,
  pub drift_score:        f64,
  pub threshold_breached: bool,
  pub alert_raised:       bool,
  pub observations:       i64,
  pub computed_at:        String,
}

impl RawDrift {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      snapshot_id:        row.get(0)?,
      key:                row.get(1)?,
      period_end:         row.get(2)?,
      baseline_avg:       row.get(3)?,
      current_avg:        row.get(4)?,
      drift_score:        row.get(5)?,
      threshold_breached: row.get(6)?,
      alert_raised:       row.get(7)?,
      observations:       row.get(8)?,
      computed_at:        row.get(9)?,
    })
  }

  pub fn into_snapshot(self) -> Result<DriftSnapshot> {
    Ok(DriftSnapshot {
      snapshot_id:        decode_uuid(&self.snapshot_id)?,
      key:                self.key,
      period_end:         decode_dt(&self.period_end)?,
      baseline_avg:       self.baseline_avg,
      current_avg:        self.current_avg,
      drift_score:        self.drift_score,
      threshold_breached: self.threshold_breached,
      alert_raised:       self.alert_raised,
      observations:       u64::try_from(self.observations).map_err(|_| {
        Error::Decode(format!("negative observation count: {}", self.observations))
      })?,
      computed_at:        decode_dt(&self.computed_at)?,
    })
  }
}

// ─── Audit log ───────────────────────────────────────────────────────────────

pub const AUDIT_COLUMNS: &str = "entry_id, action, actor, subject_id, \
  cycle_id, record_id, rationale, recorded_at";

pub struct RawAudit {
  pub entry_id:    String,
  pub action:      String,
  pub actor:       String,
  pub subject_id:  Option<String>,
  pub cycle_id:    Option<String>,
  pub record_id:   Option<String>,
  pub rationale:   String,
  pub recorded_at: String,
}

impl RawAudit {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entry_id:    row.get(0)?,
      action:      row.get(1)?,
      actor:       row.get(2)?,
      subject_id:  row.get(3)?,
      cycle_id:    row.get(4)?,
      record_id:   row.get(5)?,
      rationale:   row.get(6)?,
      recorded_at: row.get(7)?,
    })
  }

  pub fn into_entry(self) -> Result<AuditLogEntry> {
    Ok(AuditLogEntry {
      entry_id:    decode_uuid(&self.entry_id)?,
      action:      decode_enum("audit action", &self.action)?,
      actor:       serde_json::from_str(&self.actor)?,
      subject_id:  decode_opt_uuid(self.subject_id)?,
      cycle_id:    decode_opt_uuid(self.cycle_id)?,
      record_id:   decode_opt_uuid(self.record_id)?,
      rationale:   self.rationale,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_lexically() {
    let a = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
    let b = a + chrono::Duration::milliseconds(5);
    let c = a + chrono::Duration::nanoseconds(123_456_789);
    let mut encoded = vec![encode_dt(c), encode_dt(a), encode_dt(b)];
    encoded.sort();
    assert_eq!(encoded, vec![encode_dt(a), encode_dt(b), encode_dt(c)]);
    assert_eq!(decode_dt(&encode_dt(c)).unwrap(), c);
  }

  #[test]
  fn unknown_enum_name_is_a_decode_error() {
    let err = decode_enum::<assay_core::catalog::AssessorType>("assessor type", "peer")
      .unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
  }
}
