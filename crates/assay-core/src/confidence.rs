//! Evidence confidence: how trustworthy the evidence behind a score is.
//!
//! Computed from evidence metadata only, never from rating values. The
//! confidence score grows with the number of distinct sources and raters,
//! saturates at 1 once both reach their sufficiency targets, and decays with
//! the age of the newest evidence item.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Degradation, Error, Result, evidence::EvidenceItem};

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidencePolicy {
  /// Distinct sources at which the source component saturates.
  pub sufficient_sources:    u32,
  /// Distinct raters at which the diversity component saturates.
  pub sufficient_raters:     u32,
  pub source_weight:         f64,
  pub diversity_weight:      f64,
  /// Evidence up to this age carries full weight; also the Fresh/Recent
  /// boundary.
  pub fresh_days:            i64,
  /// The Recent/Stale boundary.
  pub recent_days:           i64,
  /// Past `fresh_days`, confidence halves every this many days.
  pub decay_half_life_days:  f64,
  /// Flagged fraction at which bias risk becomes medium.
  pub bias_medium_fraction:  f64,
  /// Flagged fraction above which bias risk becomes high.
  pub bias_high_fraction:    f64,
}

impl Default for ConfidencePolicy {
  fn default() -> Self {
    Self {
      sufficient_sources:   4,
      sufficient_raters:    5,
      source_weight:        0.6,
      diversity_weight:     0.4,
      fresh_days:           30,
      recent_days:          90,
      decay_half_life_days: 90.0,
      bias_medium_fraction: 0.10,
      bias_high_fraction:   0.30,
    }
  }
}

impl ConfidencePolicy {
  pub fn validate(&self) -> Result<()> {
    let invalid = |msg: &str| Err(Error::InvalidConfiguration(msg.to_owned()));
    if self.sufficient_sources == 0 || self.sufficient_raters == 0 {
      return invalid("sufficiency targets must be at least 1");
    }
    let weights = [self.source_weight, self.diversity_weight];
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
      return invalid("confidence weights must be non-negative with a positive sum");
    }
    if self.fresh_days < 0 || self.recent_days < self.fresh_days {
      return invalid("freshness boundaries must satisfy 0 <= fresh_days <= recent_days");
    }
    if !self.decay_half_life_days.is_finite() || self.decay_half_life_days <= 0.0 {
      return invalid("decay_half_life_days must be positive");
    }
    let (m, h) = (self.bias_medium_fraction, self.bias_high_fraction);
    if !(0.0..=1.0).contains(&m) || !(0.0..=1.0).contains(&h) || m > h {
      return invalid("bias fractions must satisfy 0 <= medium <= high <= 1");
    }
    Ok(())
  }

  pub fn bias_risk(&self, flagged_fraction: f64) -> BiasRisk {
    if flagged_fraction > self.bias_high_fraction {
      BiasRisk::High
    } else if flagged_fraction >= self.bias_medium_fraction {
      BiasRisk::Medium
    } else {
      BiasRisk::Low
    }
  }

  pub fn freshness(&self, age_days: i64) -> Freshness {
    if age_days < self.fresh_days {
      Freshness::Fresh
    } else if age_days <= self.recent_days {
      Freshness::Recent
    } else {
      Freshness::Stale
    }
  }

  /// Multiplier in (0, 1] for evidence whose newest item is `age_days` old.
  pub fn freshness_factor(&self, age_days: i64) -> f64 {
    let overdue = (age_days - self.fresh_days).max(0) as f64;
    0.5_f64.powf(overdue / self.decay_half_life_days)
  }
}

// ─── Buckets ─────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BiasRisk {
  Low,
  Medium,
  High,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Freshness {
  Fresh,
  Recent,
  Stale,
}

// ─── Assessment ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceAssessment {
  pub confidence_score:    f64,
  pub bias_risk_level:     BiasRisk,
  /// Distinct `source_table` values.
  pub source_count:        usize,
  /// Evidence items.
  pub signal_count:        usize,
  /// Distinct identified raters.
  pub rater_count:         usize,
  pub flagged_count:       usize,
  /// Whole days since the newest item; 0 for items dated after `as_of`.
  pub data_freshness_days: i64,
  pub freshness:           Freshness,
}

/// Assess `evidence` as of `as_of`.
pub fn assess(
  evidence: &[EvidenceItem],
  as_of: DateTime<Utc>,
  policy: &ConfidencePolicy,
) -> Result<ConfidenceAssessment, Degradation> {
  let newest = evidence
    .iter()
    .map(|e| e.timestamp)
    .max()
    .ok_or(Degradation::NoDataAvailable)?;

  let sources: BTreeSet<&str> =
    evidence.iter().map(|e| e.source_table.as_str()).collect();
  let raters: BTreeSet<_> = evidence.iter().filter_map(|e| e.rater_id).collect();
  let flagged_count = evidence.iter().filter(|e| e.flagged_bias).count();

  let age_days = (as_of - newest).num_days().max(0);

  let saturate =
    |count: usize, target: u32| (count as f64 / f64::from(target)).min(1.0);
  let weighted = policy.source_weight * saturate(sources.len(), policy.sufficient_sources)
    + policy.diversity_weight * saturate(raters.len(), policy.sufficient_raters);
  let coverage = weighted / (policy.source_weight + policy.diversity_weight);
  let confidence_score =
    (coverage * policy.freshness_factor(age_days)).clamp(0.0, 1.0);

  let flagged_fraction = flagged_count as f64 / evidence.len() as f64;

  Ok(ConfidenceAssessment {
    confidence_score,
    bias_risk_level: policy.bias_risk(flagged_fraction),
    source_count: sources.len(),
    signal_count: evidence.len(),
    rater_count: raters.len(),
    flagged_count,
    data_freshness_days: age_days,
    freshness: policy.freshness(age_days),
  })
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};
  use uuid::Uuid;

  use super::*;

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap() }

  fn item(source: &str, days_old: i64, rater: Option<Uuid>, flagged: bool) -> EvidenceItem {
    EvidenceItem {
      evidence_id:  Uuid::new_v4(),
      subject_id:   Uuid::nil(),
      source_table: source.into(),
      kind:         "observation".into(),
      value:        serde_json::Value::Null,
      timestamp:    now() - Duration::days(days_old),
      rater_id:     rater,
      flagged_bias: flagged,
    }
  }

  fn spread(n: usize, days_old: i64) -> Vec<EvidenceItem> {
    (0..n)
      .map(|i| item(&format!("source_{i}"), days_old, Some(Uuid::new_v4()), false))
      .collect()
  }

  #[test]
  fn no_evidence_is_no_data() {
    let err = assess(&[], now(), &ConfidencePolicy::default()).unwrap_err();
    assert_eq!(err, Degradation::NoDataAvailable);
  }

  #[test]
  fn saturates_at_one_when_sufficient_and_fresh() {
    let policy = ConfidencePolicy::default();
    let a = assess(&spread(5, 1), now(), &policy).unwrap();
    assert_eq!(a.confidence_score, 1.0);
    let b = assess(&spread(50, 1), now(), &policy).unwrap();
    assert_eq!(b.confidence_score, 1.0);
  }

  #[test]
  fn more_sources_never_decrease_confidence() {
    let policy = ConfidencePolicy::default();
    let mut previous = 0.0;
    for n in 1..10 {
      let c = assess(&spread(n, 10), now(), &policy).unwrap().confidence_score;
      assert!(c >= previous);
      assert!((0.0..=1.0).contains(&c));
      previous = c;
    }
  }

  #[test]
  fn older_evidence_never_increases_confidence() {
    let policy = ConfidencePolicy::default();
    let mut previous = f64::INFINITY;
    for days in [0, 15, 30, 31, 60, 120, 365, 1000] {
      let c = assess(&spread(3, days), now(), &policy).unwrap().confidence_score;
      assert!(c <= previous);
      previous = c;
    }
  }

  #[test]
  fn diversity_counts_distinct_raters() {
    let policy = ConfidencePolicy::default();
    let rater = Uuid::new_v4();
    let same: Vec<_> = (0..4).map(|_| item("appraisals", 1, Some(rater), false)).collect();
    let a = assess(&same, now(), &policy).unwrap();
    assert_eq!(a.rater_count, 1);
    assert_eq!(a.source_count, 1);
    assert_eq!(a.signal_count, 4);

    let varied: Vec<_> = (0..4)
      .map(|_| item("appraisals", 1, Some(Uuid::new_v4()), false))
      .collect();
    let b = assess(&varied, now(), &policy).unwrap();
    assert!(b.confidence_score > a.confidence_score);
  }

  #[test]
  fn bias_buckets() {
    let policy = ConfidencePolicy::default();
    let with_flags = |flagged: usize| {
      let items: Vec<_> = (0..10)
        .map(|i| item("feedback", 1, None, i < flagged))
        .collect();
      assess(&items, now(), &policy).unwrap().bias_risk_level
    };
    assert_eq!(with_flags(0), BiasRisk::Low);
    assert_eq!(with_flags(1), BiasRisk::Medium);
    assert_eq!(with_flags(3), BiasRisk::Medium);
    assert_eq!(with_flags(4), BiasRisk::High);
  }

  #[test]
  fn freshness_buckets() {
    let policy = ConfidencePolicy::default();
    assert_eq!(policy.freshness(0), Freshness::Fresh);
    assert_eq!(policy.freshness(29), Freshness::Fresh);
    assert_eq!(policy.freshness(30), Freshness::Recent);
    assert_eq!(policy.freshness(90), Freshness::Recent);
    assert_eq!(policy.freshness(91), Freshness::Stale);

    let a = assess(&spread(2, 45), now(), &policy).unwrap();
    assert_eq!(a.data_freshness_days, 45);
    assert_eq!(a.freshness, Freshness::Recent);
  }

  #[test]
  fn future_dated_evidence_counts_as_fresh() {
    let a = assess(&spread(1, -3), now(), &ConfidencePolicy::default()).unwrap();
    assert_eq!(a.data_freshness_days, 0);
    assert_eq!(a.freshness, Freshness::Fresh);
  }

  #[test]
  fn policy_validation() {
    assert!(ConfidencePolicy::default().validate().is_ok());
    let bad = ConfidencePolicy {
      bias_medium_fraction: 0.5,
      bias_high_fraction: 0.2,
      ..Default::default()
    };
    assert!(bad.validate().is_err());
    let zero = ConfidencePolicy { sufficient_sources: 0, ..Default::default() };
    assert!(zero.validate().is_err());
  }
}
