//! Ratings: single submitted values against an indicator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  catalog::{AssessorType, Category, Indicator},
};

/// Default common scale every rating is rescaled onto before aggregation.
pub const REFERENCE_SCALE_MAX: u8 = 5;

/// One submitted value. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
  pub rating_id:     Uuid,
  pub indicator_id:  Uuid,
  pub assessor_type: AssessorType,
  pub rater_id:      Uuid,
  pub subject_id:    Uuid,
  pub cycle_id:      Uuid,
  pub value:         f64,
  pub submitted_at:  DateTime<Utc>,
}

impl Rating {
  /// A subject rating themself. Self ratings feed gap analysis only.
  pub fn is_self_rating(&self) -> bool { self.rater_id == self.subject_id }
}

/// Input to [`crate::store::AssessmentStore::record_rating`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewRating {
  pub indicator_id:  Uuid,
  pub assessor_type: AssessorType,
  pub rater_id:      Uuid,
  pub subject_id:    Uuid,
  pub cycle_id:      Uuid,
  pub value:         f64,
}

impl NewRating {
  /// Check the value against the indicator's declared scale and assessor.
  pub fn validate_against(&self, indicator: &Indicator) -> Result<()> {
    if indicator.assessor_type != self.assessor_type {
      return Err(Error::AssessorMismatch {
        indicator_id: indicator.indicator_id,
        expected:     indicator.assessor_type,
        actual:       self.assessor_type,
      });
    }
    let max = f64::from(indicator.rating_scale_max);
    if !self.value.is_finite() || self.value < 1.0 || self.value > max {
      return Err(Error::RatingOutOfRange {
        indicator_id: indicator.indicator_id,
        value:        self.value,
        max:          indicator.rating_scale_max,
      });
    }
    Ok(())
  }
}

/// Map `value` from `1..=scale_max` linearly onto `1..=reference_max`.
pub fn rescale(value: f64, scale_max: u8, reference_max: u8) -> f64 {
  let from = f64::from(scale_max) - 1.0;
  let to = f64::from(reference_max) - 1.0;
  1.0 + (value - 1.0) * to / from
}

/// Everything needed to score one subject in one cycle: the ratings plus
/// the catalog rows they reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatingContext {
  pub ratings:    Vec<Rating>,
  pub indicators: Vec<Indicator>,
  pub categories: Vec<Category>,
}
