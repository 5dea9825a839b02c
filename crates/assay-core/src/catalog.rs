//! Indicator catalog: forms, categories and the indicators raters score.
//!
//! A form is one assessment instrument. Categories group its indicators
//! (and name the competencies used by gap analysis). Each indicator declares
//! which assessor type rates it, its relative weight and its rating scale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Smallest allowed `rating_scale_max`.
pub const MIN_SCALE_MAX: u8 = 3;
/// Largest allowed `rating_scale_max`.
pub const MAX_SCALE_MAX: u8 = 10;

// ─── Assessor type ───────────────────────────────────────────────────────────

/// The role submitting a rating; segments and weights aggregation.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AssessorType {
  Manager,
  Hr,
  Executive,
}

// ─── Entities ────────────────────────────────────────────────────────────────

/// A scoped container for one assessment instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
  pub form_id:    Uuid,
  pub name:       String,
  /// Owning scope, e.g. an organisation unit or programme.
  pub scope:      String,
  pub created_at: DateTime<Utc>,
}

/// A named, ordered grouping of indicators within a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub category_id: Uuid,
  pub form_id:     Uuid,
  pub name:        String,
  pub sort_order:  i32,
}

/// Optional anchor text describing what low, mid and high ratings mean.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringGuide {
  pub low:  Option<String>,
  pub mid:  Option<String>,
  pub high: Option<String>,
}

/// A single rateable statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
  pub indicator_id:     Uuid,
  pub form_id:          Uuid,
  pub category_id:      Option<Uuid>,
  pub text:             String,
  pub assessor_type:    AssessorType,
  /// Relative contribution; positive, not required to sum to anything.
  pub weight:           f64,
  pub rating_scale_max: u8,
  pub guide:            ScoringGuide,
  pub sort_order:       i32,
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct NewForm {
  pub name:  String,
  pub scope: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormUpdate {
  pub name:  Option<String>,
  pub scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCategory {
  pub form_id:    Uuid,
  pub name:       String,
  #[serde(default)]
  pub sort_order: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryUpdate {
  pub name:       Option<String>,
  pub sort_order: Option<i32>,
}

/// Input to [`crate::store::AssessmentStore::create_indicator`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewIndicator {
  pub form_id:          Uuid,
  pub category_id:      Option<Uuid>,
  pub text:             String,
  pub assessor_type:    AssessorType,
  pub weight:           f64,
  pub rating_scale_max: u8,
  #[serde(default)]
  pub guide:            ScoringGuide,
  #[serde(default)]
  pub sort_order:       i32,
}

impl NewIndicator {
  /// Convenience constructor: weight 1, five-point scale, no category.
  pub fn new(form_id: Uuid, text: impl Into<String>, assessor_type: AssessorType) -> Self {
    Self {
      form_id,
      category_id: None,
      text: text.into(),
      assessor_type,
      weight: 1.0,
      rating_scale_max: 5,
      guide: ScoringGuide::default(),
      sort_order: 0,
    }
  }

  /// Assign a fresh id and produce the indicator, validating it first.
  pub fn into_indicator(self) -> Result<Indicator> {
    let indicator = Indicator {
      indicator_id:     Uuid::new_v4(),
      form_id:          self.form_id,
      category_id:      self.category_id,
      text:             self.text.trim().to_owned(),
      assessor_type:    self.assessor_type,
      weight:           self.weight,
      rating_scale_max: self.rating_scale_max,
      guide:            self.guide,
      sort_order:       self.sort_order,
    };
    indicator.validate()?;
    Ok(indicator)
  }
}

/// Partial update; `None` leaves a field unchanged. `category_id:
/// Some(None)` detaches the indicator from its category.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndicatorUpdate {
  pub category_id:      Option<Option<Uuid>>,
  pub text:             Option<String>,
  pub assessor_type:    Option<AssessorType>,
  pub weight:           Option<f64>,
  pub rating_scale_max: Option<u8>,
  pub guide:            Option<ScoringGuide>,
  pub sort_order:       Option<i32>,
}

impl IndicatorUpdate {
  /// Apply to `current`, returning the validated result.
  pub fn apply(self, current: &Indicator) -> Result<Indicator> {
    let updated = Indicator {
      indicator_id:     current.indicator_id,
      form_id:          current.form_id,
      category_id:      self.category_id.unwrap_or(current.category_id),
      text:             self
        .text
        .map(|t| t.trim().to_owned())
        .unwrap_or_else(|| current.text.clone()),
      assessor_type:    self.assessor_type.unwrap_or(current.assessor_type),
      weight:           self.weight.unwrap_or(current.weight),
      rating_scale_max: self.rating_scale_max.unwrap_or(current.rating_scale_max),
      guide:            self.guide.unwrap_or_else(|| current.guide.clone()),
      sort_order:       self.sort_order.unwrap_or(current.sort_order),
    };
    updated.validate()?;
    Ok(updated)
  }
}

// ─── Validation ──────────────────────────────────────────────────────────────

pub fn validate_weight(weight: f64) -> Result<()> {
  if weight.is_finite() && weight > 0.0 {
    Ok(())
  } else {
    Err(Error::InvalidConfiguration(format!(
      "indicator weight must be a positive number, got {weight}"
    )))
  }
}

pub fn validate_scale_max(max: u8) -> Result<()> {
  if (MIN_SCALE_MAX..=MAX_SCALE_MAX).contains(&max) {
    Ok(())
  } else {
    Err(Error::InvalidConfiguration(format!(
      "rating_scale_max must be within {MIN_SCALE_MAX}..={MAX_SCALE_MAX}, got {max}"
    )))
  }
}

/// Trim `name` and reject it when empty. `what` names the field in the error.
pub fn normalize_name(what: &str, name: &str) -> Result<String> {
  let trimmed = name.trim();
  if trimmed.is_empty() {
    return Err(Error::InvalidConfiguration(format!("{what} must not be empty")));
  }
  Ok(trimmed.to_owned())
}

/// Fail when `name` is already used by another category of the same form.
/// `except` excludes the category being renamed.
pub fn ensure_unique_category_name(
  existing: &[Category],
  name: &str,
  except: Option<Uuid>,
) -> Result<()> {
  let clash = existing
    .iter()
    .any(|c| c.name == name && Some(c.category_id) != except);
  if clash {
    return Err(Error::InvalidConfiguration(format!(
      "category name {name:?} already exists in this form"
    )));
  }
  Ok(())
}

impl Indicator {
  pub fn validate(&self) -> Result<()> {
    normalize_name("indicator text", &self.text)?;
    validate_weight(self.weight)?;
    validate_scale_max(self.rating_scale_max)
  }
}

// ─── Seeding ─────────────────────────────────────────────────────────────────

/// One indicator of the canonical starter set.
#[derive(Debug, Clone)]
pub struct SeedIndicator {
  pub text:          &'static str,
  pub assessor_type: AssessorType,
  pub weight:        f64,
  pub guide:         [&'static str; 3],
}

/// One category of the canonical starter set.
#[derive(Debug, Clone)]
pub struct SeedCategory {
  pub name:       &'static str,
  pub indicators: Vec<SeedIndicator>,
}

fn seed(
  text: &'static str,
  assessor_type: AssessorType,
  weight: f64,
  guide: [&'static str; 3],
) -> SeedIndicator {
  SeedIndicator { text, assessor_type, weight, guide }
}

/// The canonical readiness-assessment starter set inserted by
/// `seed_defaults`. All seeded indicators use a five-point scale.
pub fn default_seed() -> Vec<SeedCategory> {
  use AssessorType::{Executive, Hr, Manager};

  vec![
    SeedCategory {
      name:       "Leadership",
      indicators: vec![
        seed(
          "Sets clear direction and priorities for the team",
          Manager,
          2.0,
          [
            "Direction is unclear or changes without explanation",
            "Direction is clear for routine work",
            "Direction is clear, shared and revisited as conditions change",
          ],
        ),
        seed(
          "Develops and coaches direct reports",
          Manager,
          1.5,
          [
            "Rarely invests in others' growth",
            "Coaches when asked",
            "Proactively grows successors",
          ],
        ),
        seed(
          "Leads at enterprise scope beyond the current role",
          Executive,
          2.0,
          [
            "Operates only within own unit",
            "Contributes to cross-unit initiatives",
            "Shapes enterprise-level outcomes",
          ],
        ),
      ],
    },
    SeedCategory {
      name:       "Strategic Thinking",
      indicators: vec![
        seed(
          "Anticipates trends and translates them into plans",
          Executive,
          1.5,
          [
            "Focused on immediate tasks",
            "Plans a few quarters ahead",
            "Builds multi-year strategy others adopt",
          ],
        ),
        seed(
          "Makes sound decisions with incomplete information",
          Manager,
          1.0,
          [
            "Defers or stalls decisions",
            "Decides with adequate information",
            "Decides well under ambiguity and owns outcomes",
          ],
        ),
      ],
    },
    SeedCategory {
      name:       "Results Delivery",
      indicators: vec![
        seed(
          "Consistently meets or exceeds performance objectives",
          Manager,
          2.0,
          [
            "Misses objectives regularly",
            "Meets most objectives",
            "Exceeds objectives and raises the bar",
          ],
        ),
        seed(
          "Holds self and others accountable for commitments",
          Hr,
          1.0,
          [
            "Commitments slip without follow-up",
            "Follows up on most commitments",
            "Creates a culture of ownership",
          ],
        ),
      ],
    },
    SeedCategory {
      name:       "Culture and Collaboration",
      indicators: vec![
        seed(
          "Demonstrates organisational values in daily conduct",
          Hr,
          1.5,
          [
            "Conduct conflicts with stated values",
            "Conduct is generally consistent with values",
            "Role-models values and addresses lapses",
          ],
        ),
        seed(
          "Builds effective relationships across functions",
          Hr,
          1.0,
          [
            "Works in isolation",
            "Collaborates when required",
            "Is sought out as a cross-functional partner",
          ],
        ),
      ],
    },
  ]
}

/// Counts returned by `seed_defaults`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
  pub categories_created: usize,
  pub categories_reused:  usize,
  pub indicators_created: usize,
  pub indicators_skipped: usize,
}

/// The rows a seeding run must insert, computed against the form's current
/// catalog.
#[derive(Debug, Clone, Default)]
pub struct SeedPlan {
  pub new_categories: Vec<Category>,
  pub new_indicators: Vec<Indicator>,
  pub report:         SeedReport,
}

/// Plan the insertion of `seed` into `form_id`.
///
/// Categories are matched by name and reused. Indicators are matched by
/// (category, text) and skipped when already present, so applying a plan
/// for the same seed twice inserts nothing the second time.
pub fn plan_seed(
  form_id: Uuid,
  existing_categories: &[Category],
  existing_indicators: &[Indicator],
  seed: &[SeedCategory],
) -> SeedPlan {
  let mut plan = SeedPlan::default();
  let next_order = existing_categories
    .iter()
    .map(|c| c.sort_order)
    .max()
    .map_or(0, |m| m + 1);

  for (offset, seed_category) in seed.iter().enumerate() {
    let existing = existing_categories
      .iter()
      .find(|c| c.name == seed_category.name);

    let category_id = match existing {
      Some(c) => {
        plan.report.categories_reused += 1;
        c.category_id
      }
      None => {
        let category = Category {
          category_id: Uuid::new_v4(),
          form_id,
          name: seed_category.name.to_owned(),
          sort_order: next_order + offset as i32,
        };
        let id = category.category_id;
        plan.new_categories.push(category);
        plan.report.categories_created += 1;
        id
      }
    };

    for (order, s) in seed_category.indicators.iter().enumerate() {
      let present = existing_indicators
        .iter()
        .any(|i| i.category_id == Some(category_id) && i.text == s.text);
      if present {
        plan.report.indicators_skipped += 1;
        continue;
      }
      plan.new_indicators.push(Indicator {
        indicator_id:     Uuid::new_v4(),
        form_id,
        category_id:      Some(category_id),
        text:             s.text.to_owned(),
        assessor_type:    s.assessor_type,
        weight:           s.weight,
        rating_scale_max: 5,
        guide:            ScoringGuide {
          low:  Some(s.guide[0].to_owned()),
          mid:  Some(s.guide[1].to_owned()),
          high: Some(s.guide[2].to_owned()),
        },
        sort_order:       order as i32,
      });
      plan.report.indicators_created += 1;
    }
  }

  plan
}

#[cfg(test)]
mod tests {
  use super::*;

  fn indicator(weight: f64, scale: u8) -> Indicator {
    Indicator {
      indicator_id:     Uuid::new_v4(),
      form_id:          Uuid::nil(),
      category_id:      None,
      text:             "Delivers".into(),
      assessor_type:    AssessorType::Manager,
      weight,
      rating_scale_max: scale,
      guide:            ScoringGuide::default(),
      sort_order:       0,
    }
  }

  #[test]
  fn assessor_types_use_their_stored_names() {
    for (kind, name) in [
      (AssessorType::Manager, "manager"),
      (AssessorType::Hr, "hr"),
      (AssessorType::Executive, "executive"),
    ] {
      assert_eq!(kind.as_ref(), name);
      assert_eq!(name.parse::<AssessorType>().unwrap(), kind);
    }
    assert!("peer".parse::<AssessorType>().is_err());
  }

  #[test]
  fn weight_must_be_positive_and_finite() {
    assert!(indicator(0.5, 5).validate().is_ok());
    for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
      assert!(matches!(
        indicator(bad, 5).validate(),
        Err(Error::InvalidConfiguration(_))
      ));
    }
  }

  #[test]
  fn scale_bounds_are_inclusive() {
    assert!(indicator(1.0, 3).validate().is_ok());
    assert!(indicator(1.0, 10).validate().is_ok());
    assert!(indicator(1.0, 2).validate().is_err());
    assert!(indicator(1.0, 11).validate().is_err());
  }

  #[test]
  fn blank_text_rejected() {
    let mut i = indicator(1.0, 5);
    i.text = "   ".into();
    assert!(i.validate().is_err());
  }

  #[test]
  fn update_revalidates() {
    let current = indicator(1.0, 5);
    let err = IndicatorUpdate { weight: Some(-2.0), ..Default::default() }
      .apply(&current)
      .unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));

    let detached = IndicatorUpdate {
      category_id: Some(None),
      text: Some("  Coaches others ".into()),
      ..Default::default()
    }
    .apply(&current)
    .unwrap();
    assert_eq!(detached.text, "Coaches others");
    assert_eq!(detached.indicator_id, current.indicator_id);
  }

  #[test]
  fn duplicate_category_name_rejected_except_self() {
    let form_id = Uuid::new_v4();
    let existing = vec![Category {
      category_id: Uuid::new_v4(),
      form_id,
      name: "Leadership".into(),
      sort_order: 0,
    }];
    assert!(ensure_unique_category_name(&existing, "Leadership", None).is_err());
    assert!(ensure_unique_category_name(&existing, "Delivery", None).is_ok());
    assert!(
      ensure_unique_category_name(
        &existing,
        "Leadership",
        Some(existing[0].category_id)
      )
      .is_ok()
    );
  }

  #[test]
  fn seed_set_is_valid() {
    let plan = plan_seed(Uuid::new_v4(), &[], &[], &default_seed());
    assert!(!plan.new_categories.is_empty());
    assert!(plan.new_indicators.iter().all(|i| i.validate().is_ok()));
    assert_eq!(plan.report.categories_reused, 0);
    assert_eq!(plan.report.indicators_skipped, 0);
  }

  #[test]
  fn replanning_after_apply_is_empty() {
    let form_id = Uuid::new_v4();
    let seed = default_seed();
    let first = plan_seed(form_id, &[], &[], &seed);
    let second =
      plan_seed(form_id, &first.new_categories, &first.new_indicators, &seed);

    assert!(second.new_categories.is_empty());
    assert!(second.new_indicators.is_empty());
    assert_eq!(second.report.categories_reused, seed.len());
    assert_eq!(
      second.report.indicators_skipped,
      first.report.indicators_created
    );
  }

  #[test]
  fn existing_category_is_reused_by_name() {
    let form_id = Uuid::new_v4();
    let leadership = Category {
      category_id: Uuid::new_v4(),
      form_id,
      name: "Leadership".into(),
      sort_order: 7,
    };
    let plan = plan_seed(form_id, &[leadership.clone()], &[], &default_seed());

    assert!(plan.new_categories.iter().all(|c| c.name != "Leadership"));
    assert!(
      plan
        .new_indicators
        .iter()
        .any(|i| i.category_id == Some(leadership.category_id))
    );
    assert!(plan.new_categories.iter().all(|c| c.sort_order > 7));
  }
}
