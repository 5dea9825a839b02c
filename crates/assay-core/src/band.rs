//! Readiness bands derived from a composite score.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

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
pub enum ReadinessBand {
  #[serde(rename = "ready_now")]
  #[strum(serialize = "ready_now")]
  ReadyNow,
  #[serde(rename = "ready_in_1_year")]
  #[strum(serialize = "ready_in_1_year")]
  ReadyIn1Year,
  #[serde(rename = "ready_in_2_years")]
  #[strum(serialize = "ready_in_2_years")]
  ReadyIn2Years,
  #[serde(rename = "developing")]
  #[strum(serialize = "developing")]
  Developing,
}

impl ReadinessBand {
  /// Human-readable label.
  pub fn label(self) -> &'static str {
    match self {
      Self::ReadyNow => "Ready Now",
      Self::ReadyIn1Year => "Ready in 1 Year",
      Self::ReadyIn2Years => "Ready in 2 Years",
      Self::Developing => "Developing",
    }
  }
}

/// Inclusive lower bounds for each band above `Developing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandCutoffs {
  pub ready_now:        f64,
  pub ready_in_1_year:  f64,
  pub ready_in_2_years: f64,
}

impl Default for BandCutoffs {
  fn default() -> Self {
    Self {
      ready_now:        4.5,
      ready_in_1_year:  3.5,
      ready_in_2_years: 2.5,
    }
  }
}

impl BandCutoffs {
  pub fn validate(&self) -> Result<()> {
    let ordered = [self.ready_now, self.ready_in_1_year, self.ready_in_2_years];
    if ordered.iter().any(|c| !c.is_finite()) || !ordered.is_sorted_by(|a, b| a > b) {
      return Err(Error::InvalidConfiguration(format!(
        "band cutoffs must be finite and strictly descending, got {ordered:?}"
      )));
    }
    Ok(())
  }

  /// Map `score` to its band.
  pub fn classify(&self, score: f64) -> ReadinessBand {
    if score >= self.ready_now {
      ReadinessBand::ReadyNow
    } else if score >= self.ready_in_1_year {
      ReadinessBand::ReadyIn1Year
    } else if score >= self.ready_in_2_years {
      ReadinessBand::ReadyIn2Years
    } else {
      ReadinessBand::Developing
    }
  }
}
