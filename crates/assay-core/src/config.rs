//! Engine configuration: every tunable of the scoring components in one
//! deserializable structure.

use serde::{Deserialize, Serialize};

use crate::{
  Result,
  band::BandCutoffs,
  confidence::ConfidencePolicy,
  drift::DriftPolicy,
  gap::GapPolicy,
  score::ScoringPolicy,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub scoring:    ScoringPolicy,
  pub bands:      BandCutoffs,
  pub gaps:       GapPolicy,
  pub confidence: ConfidencePolicy,
  pub drift:      DriftPolicy,
}

impl EngineConfig {
  pub fn validate(&self) -> Result<()> {
    self.scoring.validate()?;
    self.bands.validate()?;
    self.gaps.validate()?;
    self.confidence.validate()?;
    self.drift.validate()
  }
}
