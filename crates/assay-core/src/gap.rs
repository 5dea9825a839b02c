//! Perception-gap analysis: self rating against the anonymized average of
//! other raters, per competency.
//!
//! An others-average is only disclosed once at least [`ANONYMITY_FLOOR`]
//! distinct raters contributed. Below that the gap is withheld and reported
//! as [`Degradation::InsufficientRaters`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Degradation, Error, Result,
  catalog::{Category, Indicator},
  rating::{Rating, rescale},
};

/// Minimum distinct raters before an "others" aggregate may be disclosed.
/// System-enforced: [`GapPolicy::min_raters`] may raise it, never lower it.
pub const ANONYMITY_FLOOR: usize = 3;

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapPolicy {
  /// Absolute gap (on the reference scale) beyond which self and others
  /// disagree. The boundary itself counts as aligned.
  pub threshold:  f64,
  pub min_raters: usize,
}

impl Default for GapPolicy {
  fn default() -> Self { Self { threshold: 0.5, min_raters: ANONYMITY_FLOOR } }
}

impl GapPolicy {
  pub fn validate(&self) -> Result<()> {
    if !self.threshold.is_finite() || self.threshold < 0.0 {
      return Err(Error::InvalidConfiguration(format!(
        "gap threshold must be a non-negative number, got {}",
        self.threshold
      )));
    }
    if self.min_raters < ANONYMITY_FLOOR {
      return Err(Error::InvalidConfiguration(format!(
        "min_raters may not be below the anonymity floor of {ANONYMITY_FLOOR}"
      )));
    }
    Ok(())
  }
}

// ─── Classification ──────────────────────────────────────────────────────────

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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GapClassification {
  /// Self rating exceeds others' average.
  BlindSpot,
  /// Self rating trails others' average.
  HiddenStrength,
  Aligned,
}

pub fn classify_gap(gap: f64, threshold: f64) -> GapClassification {
  if gap > threshold {
    GapClassification::BlindSpot
  } else if gap < -threshold {
    GapClassification::HiddenStrength
  } else {
    GapClassification::Aligned
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetencyGap {
  pub competency:         String,
  pub self_score:         f64,
  pub others_average:     f64,
  pub others_rater_count: usize,
  /// `self_score - others_average`.
  pub gap:                f64,
  pub classification:     GapClassification,
}

/// Classify one competency from pre-aggregated values.
pub fn analyze(
  competency: impl Into<String>,
  self_score: f64,
  others_average: f64,
  others_rater_count: usize,
  policy: &GapPolicy,
) -> Result<CompetencyGap, Degradation> {
  let required = policy.min_raters.max(ANONYMITY_FLOOR);
  if others_rater_count < required {
    return Err(Degradation::InsufficientRaters {
      count: others_rater_count,
      required,
    });
  }
  let gap = self_score - others_average;
  Ok(CompetencyGap {
    competency: competency.into(),
    self_score,
    others_average,
    others_rater_count,
    gap,
    classification: classify_gap(gap, policy.threshold),
  })
}

// ─── Inputs from raw ratings ─────────────────────────────────────────────────

/// One competency's ratings, already rescaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetencyRatings {
  pub competency: String,
  /// Mean of the subject's own ratings; `None` if they did not self-rate.
  pub self_score: Option<f64>,
  /// Mean per distinct other rater.
  pub others:     BTreeMap<Uuid, f64>,
}

fn mean(mut values: Vec<f64>) -> f64 {
  values.sort_by(f64::total_cmp);
  let n = values.len() as f64;
  values.into_iter().sum::<f64>() / n
}

/// Group a subject's ratings into competencies.
///
/// A competency is the indicator's category name, or the indicator text for
/// uncategorized indicators. Results are ordered by competency name.
pub fn competency_inputs(
  ratings: &[Rating],
  indicators: &[Indicator],
  categories: &[Category],
  reference_max: u8,
) -> Vec<CompetencyRatings> {
  let indicators: BTreeMap<Uuid, &Indicator> =
    indicators.iter().map(|i| (i.indicator_id, i)).collect();
  let categories: BTreeMap<Uuid, &str> = categories
    .iter()
    .map(|c| (c.category_id, c.name.as_str()))
    .collect();

  // competency → (self values, rater → values)
  let mut grouped: BTreeMap<String, (Vec<f64>, BTreeMap<Uuid, Vec<f64>>)> =
    BTreeMap::new();
  for rating in ratings {
    let Some(indicator) = indicators.get(&rating.indicator_id) else {
      continue;
    };
    let competency = indicator
      .category_id
      .and_then(|id| categories.get(&id).copied())
      .unwrap_or(indicator.text.as_str())
      .to_owned();
    let value = rescale(rating.value, indicator.rating_scale_max, reference_max);
    let entry = grouped.entry(competency).or_default();
    if rating.is_self_rating() {
      entry.0.push(value);
    } else {
      entry.1.entry(rating.rater_id).or_default().push(value);
    }
  }

  grouped
    .into_iter()
    .map(|(competency, (self_values, others))| CompetencyRatings {
      competency,
      self_score: (!self_values.is_empty()).then(|| mean(self_values)),
      others: others.into_iter().map(|(rater, v)| (rater, mean(v))).collect(),
    })
    .collect()
}

/// Classify one competency from raw per-rater values.
pub fn analyze_ratings(
  input: &CompetencyRatings,
  policy: &GapPolicy,
) -> Result<CompetencyGap, Degradation> {
  let self_score = input.self_score.ok_or(Degradation::NoDataAvailable)?;
  let count = input.others.len();
  let others_average = if count == 0 {
    0.0
  } else {
    mean(input.others.values().copied().collect())
  };
  analyze(&input.competency, self_score, others_average, count, policy)
}

// ─── Batch ───────────────────────────────────────────────────────────────────

/// A competency whose gap was withheld.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressedGap {
  pub competency: String,
  pub reason:     Degradation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
  /// Ranked by absolute gap, largest first; ties by competency name.
  pub gaps:       Vec<CompetencyGap>,
  pub suppressed: Vec<SuppressedGap>,
}

impl GapReport {
  /// The `n` largest blind spots.
  pub fn top_blind_spots(&self, n: usize) -> Vec<&CompetencyGap> {
    self
      .gaps
      .iter()
      .filter(|g| g.classification == GapClassification::BlindSpot)
      .take(n)
      .collect()
  }

  /// The `n` largest hidden strengths.
  pub fn top_hidden_strengths(&self, n: usize) -> Vec<&CompetencyGap> {
    self
      .gaps
      .iter()
      .filter(|g| g.classification == GapClassification::HiddenStrength)
      .take(n)
      .collect()
  }
}

pub fn analyze_batch(inputs: &[CompetencyRatings], policy: &GapPolicy) -> GapReport {
  let mut report = GapReport::default();
  for input in inputs {
    match analyze_ratings(input, policy) {
      Ok(gap) => report.gaps.push(gap),
      Err(reason) => report.suppressed.push(SuppressedGap {
        competency: input.competency.clone(),
        reason,
      }),
    }
  }
  report.gaps.sort_by(|a, b| {
    b.gap
      .abs()
      .total_cmp(&a.gap.abs())
      .then_with(|| a.competency.cmp(&b.competency))
  });
  report
}
