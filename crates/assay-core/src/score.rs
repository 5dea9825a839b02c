//! Score aggregation: ratings and catalog weights into a composite score.
//!
//! Each rating is rescaled onto the reference scale. Ratings of the same
//! indicator by the same assessor type are averaged, then each assessor
//! type gets the weight-weighted mean of the indicators it rated. The
//! overall score is a second weighted mean across assessor types.
//!
//! Every step is a convex combination, so the overall score always lies
//! between the smallest and largest rescaled input. Values are sorted before
//! summation so the result is bit-identical regardless of input order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Degradation, Error, Result,
  catalog::{AssessorType, Indicator, MAX_SCALE_MAX, MIN_SCALE_MAX},
  rating::{REFERENCE_SCALE_MAX, Rating, rescale},
};

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Tunables for [`aggregate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
  /// The common scale ratings are rescaled onto.
  pub reference_scale_max: u8,
  /// Relative weight of each assessor type in the overall score. A missing
  /// entry counts as 1, so the default is equal weighting across the
  /// assessor types that submitted at least one rating.
  pub assessor_weights:    BTreeMap<AssessorType, f64>,
}

impl Default for ScoringPolicy {
  fn default() -> Self {
    Self {
      reference_scale_max: REFERENCE_SCALE_MAX,
      assessor_weights:    BTreeMap::new(),
    }
  }
}

impl ScoringPolicy {
  pub fn validate(&self) -> Result<()> {
    if !(MIN_SCALE_MAX..=MAX_SCALE_MAX).contains(&self.reference_scale_max) {
      return Err(Error::InvalidConfiguration(format!(
        "reference_scale_max must be within {MIN_SCALE_MAX}..={MAX_SCALE_MAX}"
      )));
    }
    for (assessor, w) in &self.assessor_weights {
      if !w.is_finite() || *w < 0.0 {
        return Err(Error::InvalidConfiguration(format!(
          "assessor weight for {assessor} must be a non-negative number, got {w}"
        )));
      }
    }
    Ok(())
  }

  pub fn assessor_weight(&self, assessor: AssessorType) -> f64 {
    self.assessor_weights.get(&assessor).copied().unwrap_or(1.0)
  }
}

// ─── Output ──────────────────────────────────────────────────────────────────

/// The contribution of one assessor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessorScore {
  pub assessor_type:   AssessorType,
  pub score:           f64,
  /// Distinct indicators that received at least one rating.
  pub indicator_count: usize,
  pub rating_count:    usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
  pub overall_score: f64,
  /// Ordered by assessor type.
  pub by_assessor:   Vec<AssessorScore>,
}

// ─── Aggregation ─────────────────────────────────────────────────────────────

/// Sum in ascending order so the result does not depend on input order.
fn ordered_sum(mut values: Vec<f64>) -> f64 {
  values.sort_by(f64::total_cmp);
  values.into_iter().sum()
}

/// Aggregate one subject's ratings for one cycle.
///
/// Self ratings and ratings whose indicator is not in `indicators` are
/// ignored. Returns [`Degradation::NoDataAvailable`] when nothing remains to
/// score or when every present assessor type is configured with weight 0.
pub fn aggregate(
  ratings: &[Rating],
  indicators: &[Indicator],
  policy: &ScoringPolicy,
) -> Result<ScoreBreakdown, Degradation> {
  let catalog: BTreeMap<Uuid, &Indicator> =
    indicators.iter().map(|i| (i.indicator_id, i)).collect();

  // assessor → indicator → rescaled values
  let mut grouped: BTreeMap<AssessorType, BTreeMap<Uuid, Vec<f64>>> =
    BTreeMap::new();
  for rating in ratings.iter().filter(|r| !r.is_self_rating()) {
    let Some(indicator) = catalog.get(&rating.indicator_id) else {
      continue;
    };
    let value = rescale(
      rating.value,
      indicator.rating_scale_max,
      policy.reference_scale_max,
    );
    grouped
      .entry(rating.assessor_type)
      .or_default()
      .entry(rating.indicator_id)
      .or_default()
      .push(value);
  }

  let mut by_assessor = Vec::with_capacity(grouped.len());
  for (assessor_type, per_indicator) in grouped {
    let mut numerator = Vec::with_capacity(per_indicator.len());
    let mut denominator = Vec::with_capacity(per_indicator.len());
    let mut rating_count = 0;

    for (indicator_id, values) in &per_indicator {
      let weight = catalog[indicator_id].weight;
      rating_count += values.len();
      let mean = ordered_sum(values.clone()) / values.len() as f64;
      numerator.push(weight * mean);
      denominator.push(weight);
    }

    let total_weight = ordered_sum(denominator);
    if total_weight <= 0.0 {
      continue;
    }
    by_assessor.push(AssessorScore {
      assessor_type,
      score: ordered_sum(numerator) / total_weight,
      indicator_count: per_indicator.len(),
      rating_count,
    });
  }

  let mut numerator = Vec::with_capacity(by_assessor.len());
  let mut denominator = Vec::with_capacity(by_assessor.len());
  for sub in &by_assessor {
    let w = policy.assessor_weight(sub.assessor_type);
    numerator.push(w * sub.score);
    denominator.push(w);
  }
  let total_weight = ordered_sum(denominator);
  if total_weight <= 0.0 {
    return Err(Degradation::NoDataAvailable);
  }

  Ok(ScoreBreakdown {
    overall_score: ordered_sum(numerator) / total_weight,
    by_assessor,
  })
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;
  use crate::catalog::ScoringGuide;

  fn indicator(assessor_type: AssessorType, weight: f64, scale: u8) -> Indicator {
    Indicator {
      indicator_id: Uuid::new_v4(),
      form_id: Uuid::nil(),
      category_id: None,
      text: "Indicator".into(),
      assessor_type,
      weight,
      rating_scale_max: scale,
      guide: ScoringGuide::default(),
      sort_order: 0,
    }
  }

  fn rating(ind: &Indicator, subject: Uuid, value: f64) -> Rating {
    Rating {
      rating_id:     Uuid::new_v4(),
      indicator_id:  ind.indicator_id,
      assessor_type: ind.assessor_type,
      rater_id:      Uuid::new_v4(),
      subject_id:    subject,
      cycle_id:      Uuid::nil(),
      value,
      submitted_at:  Utc.timestamp_opt(0, 0).unwrap(),
    }
  }

  #[test]
  fn no_ratings_is_no_data() {
    let ind = indicator(AssessorType::Manager, 1.0, 5);
    let err = aggregate(&[], &[ind], &ScoringPolicy::default()).unwrap_err();
    assert_eq!(err, Degradation::NoDataAvailable);
  }

  #[test]
  fn only_self_ratings_is_no_data() {
    let subject = Uuid::new_v4();
    let ind = indicator(AssessorType::Manager, 1.0, 5);
    let mut r = rating(&ind, subject, 4.0);
    r.rater_id = subject;
    let err = aggregate(&[r], &[ind], &ScoringPolicy::default()).unwrap_err();
    assert_eq!(err, Degradation::NoDataAvailable);
  }

  #[test]
  fn weighted_mean_within_assessor() {
    let subject = Uuid::new_v4();
    let heavy = indicator(AssessorType::Manager, 3.0, 5);
    let light = indicator(AssessorType::Manager, 1.0, 5);
    let unrated = indicator(AssessorType::Manager, 100.0, 5);
    let ratings = [rating(&heavy, subject, 5.0), rating(&light, subject, 1.0)];

    let out = aggregate(
      &ratings,
      &[heavy, light, unrated],
      &ScoringPolicy::default(),
    )
    .unwrap();
    // (3*5 + 1*1) / 4; the unrated indicator contributes nothing.
    assert_eq!(out.overall_score, 4.0);
    assert_eq!(out.by_assessor.len(), 1);
    assert_eq!(out.by_assessor[0].indicator_count, 2);
  }

  #[test]
  fn equal_weight_across_assessor_types_by_default() {
    let subject = Uuid::new_v4();
    let m = indicator(AssessorType::Manager, 5.0, 5);
    let h = indicator(AssessorType::Hr, 1.0, 10);
    let ratings = [rating(&m, subject, 5.0), rating(&h, subject, 1.0)];

    let out = aggregate(&ratings, &[m, h], &ScoringPolicy::default()).unwrap();
    assert_eq!(out.overall_score, 3.0);
  }

  #[test]
  fn configured_assessor_weights_apply() {
    let subject = Uuid::new_v4();
    let m = indicator(AssessorType::Manager, 1.0, 5);
    let e = indicator(AssessorType::Executive, 1.0, 5);
    let ratings = [rating(&m, subject, 5.0), rating(&e, subject, 1.0)];
    let policy = ScoringPolicy {
      assessor_weights: BTreeMap::from([
        (AssessorType::Manager, 3.0),
        (AssessorType::Executive, 1.0),
      ]),
      ..Default::default()
    };

    let out = aggregate(&ratings, &[m, e], &policy).unwrap();
    assert_eq!(out.overall_score, 4.0);
  }

  #[test]
  fn zero_weighted_assessors_yield_no_data() {
    let subject = Uuid::new_v4();
    let h = indicator(AssessorType::Hr, 1.0, 5);
    let policy = ScoringPolicy {
      assessor_weights: BTreeMap::from([(AssessorType::Hr, 0.0)]),
      ..Default::default()
    };
    let err = aggregate(&[rating(&h, subject, 3.0)], &[h], &policy).unwrap_err();
    assert_eq!(err, Degradation::NoDataAvailable);
  }

  #[test]
  fn repeated_ratings_of_one_indicator_are_averaged() {
    let subject = Uuid::new_v4();
    let a = indicator(AssessorType::Manager, 1.0, 5);
    let b = indicator(AssessorType::Manager, 1.0, 5);
    let ratings = [
      rating(&a, subject, 5.0),
      rating(&a, subject, 3.0),
      rating(&a, subject, 1.0),
      rating(&b, subject, 5.0),
    ];
    let out = aggregate(&ratings, &[a, b], &ScoringPolicy::default()).unwrap();
    assert_eq!(out.overall_score, 4.0);
    assert_eq!(out.by_assessor[0].rating_count, 4);
  }

  #[test]
  fn result_is_within_input_range_and_order_independent() {
    let subject = Uuid::new_v4();
    let inds: Vec<_> = (0..6)
      .map(|i| {
        indicator(
          [AssessorType::Manager, AssessorType::Hr, AssessorType::Executive][i % 3],
          0.3 + i as f64 * 0.7,
          3 + i as u8,
        )
      })
      .collect();
    let mut ratings: Vec<_> = inds
      .iter()
      .enumerate()
      .map(|(i, ind)| {
        rating(ind, subject, 1.0 + (i as f64 * 1.37) % f64::from(ind.rating_scale_max - 1))
      })
      .collect();

    let rescaled: Vec<f64> = ratings
      .iter()
      .zip(&inds)
      .map(|(r, ind)| rescale(r.value, ind.rating_scale_max, 5))
      .collect();
    let lo = rescaled.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = rescaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let policy = ScoringPolicy::default();
    let first = aggregate(&ratings, &inds, &policy).unwrap();
    assert!(first.overall_score >= lo && first.overall_score <= hi);

    ratings.reverse();
    let second = aggregate(&ratings, &inds, &policy).unwrap();
    assert_eq!(
      first.overall_score.to_bits(),
      second.overall_score.to_bits()
    );
    assert_eq!(first, second);
  }

  #[test]
  fn raising_a_rating_never_lowers_the_score() {
    let subject = Uuid::new_v4();
    let a = indicator(AssessorType::Manager, 2.0, 5);
    let b = indicator(AssessorType::Hr, 1.0, 7);
    let policy = ScoringPolicy::default();

    let mut previous = f64::NEG_INFINITY;
    for step in 0..=12 {
      let value = 1.0 + f64::from(step) * 0.5;
      let ratings = [rating(&a, subject, 3.0), rating(&b, subject, value)];
      let out = aggregate(&ratings, &[a.clone(), b.clone()], &policy).unwrap();
      assert!(out.overall_score >= previous);
      previous = out.overall_score;
    }
  }

  #[test]
  fn policy_validation() {
    assert!(ScoringPolicy::default().validate().is_ok());
    let bad = ScoringPolicy {
      assessor_weights: BTreeMap::from([(AssessorType::Hr, -1.0)]),
      ..Default::default()
    };
    assert!(bad.validate().is_err());
    let bad_scale = ScoringPolicy { reference_scale_max: 2, ..Default::default() };
    assert!(bad_scale.validate().is_err());
  }
}
