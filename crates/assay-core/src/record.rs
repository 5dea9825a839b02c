//! Persisted computation outputs.
//!
//! Records are immutable once written. A correction produces a new record;
//! for composite scores the previous record stays in history with
//! `is_current = false`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  audit::Actor,
  band::ReadinessBand,
  confidence::{BiasRisk, ConfidenceAssessment, Freshness},
  drift::DriftReading,
  gap::{CompetencyGap, GapClassification},
  score::AssessorScore,
};

// ─── Composite scores ────────────────────────────────────────────────────────

/// A human decision replacing the computed band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandOverride {
  pub band:      ReadinessBand,
  pub actor:     Actor,
  pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
  pub score_id:      Uuid,
  pub subject_id:    Uuid,
  pub cycle_id:      Uuid,
  pub overall_score: f64,
  pub sub_scores:    Vec<AssessorScore>,
  pub computed_band: ReadinessBand,
  pub band_override: Option<BandOverride>,
  pub is_current:    bool,
  /// 1 for the first record of a subject+cycle, incremented per supersession.
  pub version:       i64,
  pub input_digest:  String,
  pub computed_at:   DateTime<Utc>,
}

impl CompositeScore {
  /// The band downstream consumers should act on.
  pub fn band(&self) -> ReadinessBand {
    self
      .band_override
      .as_ref()
      .map_or(self.computed_band, |o| o.band)
  }

  /// True when `draft` would store the same result as this record.
  pub fn matches(&self, draft: &NewCompositeScore) -> bool {
    self.subject_id == draft.subject_id
      && self.cycle_id == draft.cycle_id
      && self.input_digest == draft.input_digest
      && self.band_override == draft.band_override
  }
}

/// Input to [`crate::store::AssessmentStore::supersede_composite`]. The
/// store assigns `score_id`, `version` and `is_current`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCompositeScore {
  pub subject_id:    Uuid,
  pub cycle_id:      Uuid,
  pub overall_score: f64,
  pub sub_scores:    Vec<AssessorScore>,
  pub computed_band: ReadinessBand,
  pub band_override: Option<BandOverride>,
  pub input_digest:  String,
  pub computed_at:   DateTime<Utc>,
}

impl NewCompositeScore {
  /// A copy of `current` carrying a band override.
  pub fn overriding(current: &CompositeScore, band_override: BandOverride, at: DateTime<Utc>) -> Self {
    Self {
      subject_id:    current.subject_id,
      cycle_id:      current.cycle_id,
      overall_score: current.overall_score,
      sub_scores:    current.sub_scores.clone(),
      computed_band: current.computed_band,
      band_override: Some(band_override),
      input_digest:  current.input_digest.clone(),
      computed_at:   at,
    }
  }
}

// ─── Gap records ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapRecord {
  /// Derived from `input_digest`; identical inputs give identical ids.
  pub gap_id:             Uuid,
  pub subject_id:         Uuid,
  pub cycle_id:           Uuid,
  pub competency:         String,
  pub self_score:         f64,
  pub others_average:     f64,
  pub others_rater_count: usize,
  pub gap:                f64,
  pub classification:     GapClassification,
  pub input_digest:       String,
  pub computed_at:        DateTime<Utc>,
}

impl GapRecord {
  pub fn from_gap(
    gap: &CompetencyGap,
    subject_id: Uuid,
    cycle_id: Uuid,
    input_digest: String,
    computed_at: DateTime<Utc>,
  ) -> Self {
    Self {
      gap_id: crate::digest::record_id(
        &format!("gap:{subject_id}:{cycle_id}:{}", gap.competency),
        &input_digest,
      ),
      subject_id,
      cycle_id,
      competency: gap.competency.clone(),
      self_score: gap.self_score,
      others_average: gap.others_average,
      others_rater_count: gap.others_rater_count,
      gap: gap.gap,
      classification: gap.classification,
      input_digest,
      computed_at,
    }
  }
}

// ─── Confidence records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRecord {
  pub confidence_id:       Uuid,
  pub subject_id:          Uuid,
  pub confidence_score:    f64,
  pub bias_risk_level:     BiasRisk,
  pub source_count:        usize,
  pub signal_count:        usize,
  pub rater_count:         usize,
  pub data_freshness_days: i64,
  pub freshness:           Freshness,
  pub input_digest:        String,
  pub computed_at:         DateTime<Utc>,
}

impl ConfidenceRecord {
  pub fn from_assessment(
    a: &ConfidenceAssessment,
    subject_id: Uuid,
    input_digest: String,
    computed_at: DateTime<Utc>,
  ) -> Self {
    Self {
      confidence_id: crate::digest::record_id("confidence", &input_digest),
      subject_id,
      confidence_score: a.confidence_score,
      bias_risk_level: a.bias_risk_level,
      source_count: a.source_count,
      signal_count: a.signal_count,
      rater_count: a.rater_count,
      data_freshness_days: a.data_freshness_days,
      freshness: a.freshness,
      input_digest,
      computed_at,
    }
  }
}

// ─── Drift snapshots ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSnapshot {
  pub snapshot_id:        Uuid,
  pub key:                String,
  pub period_end:         DateTime<Utc>,
  pub baseline_avg:       f64,
  pub current_avg:        f64,
  pub drift_score:        f64,
  pub threshold_breached: bool,
  pub alert_raised:       bool,
  pub observations:       u64,
  pub computed_at:        DateTime<Utc>,
}

impl DriftSnapshot {
  /// One snapshot per key and period; re-evaluating the same period maps to
  /// the same id.
  pub fn from_reading(reading: &DriftReading, computed_at: DateTime<Utc>) -> Self {
    let period = reading.period_end.to_rfc3339();
    Self {
      snapshot_id: crate::digest::record_id(&format!("drift:{}", reading.key), &period),
      key: reading.key.clone(),
      period_end: reading.period_end,
      baseline_avg: reading.baseline_avg,
      current_avg: reading.current_avg,
      drift_score: reading.drift_score,
      threshold_breached: reading.threshold_breached,
      alert_raised: reading.alert,
      observations: reading.observations,
      computed_at,
    }
  }
}
