//! Drift monitoring of a rolling confidence metric.
//!
//! For each tracked key the monitor keeps a series of per-period
//! observations. The current window is the most recent `current_periods`
//! periods and the baseline is the `baseline_periods` periods before it.
//! Drift is the relative decline of the current average against the
//! baseline. Alerts are edge-triggered: one alert per transition into the
//! breached state.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Degradation, Error, Result};

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftPolicy {
  pub baseline_periods: usize,
  pub current_periods:  usize,
  /// Drift strictly above this value breaches.
  pub breach_cutoff:    f64,
  /// Observations required across both windows before a drift score is
  /// reported.
  pub min_observations: u64,
}

impl Default for DriftPolicy {
  fn default() -> Self {
    Self {
      baseline_periods: 30,
      current_periods:  7,
      breach_cutoff:    0.15,
      min_observations: 100,
    }
  }
}

impl DriftPolicy {
  pub fn validate(&self) -> Result<()> {
    if self.baseline_periods == 0 || self.current_periods == 0 {
      return Err(Error::InvalidConfiguration(
        "drift windows must span at least one period".into(),
      ));
    }
    if !(0.0..=1.0).contains(&self.breach_cutoff) {
      return Err(Error::InvalidConfiguration(format!(
        "breach_cutoff must be within 0..=1, got {}",
        self.breach_cutoff
      )));
    }
    Ok(())
  }
}

/// `max(0, (baseline - current) / baseline)` clipped to `[0, 1]`; zero when
/// the baseline is not positive.
pub fn drift_score(baseline_avg: f64, current_avg: f64) -> f64 {
  if baseline_avg <= 0.0 {
    return 0.0;
  }
  ((baseline_avg - current_avg) / baseline_avg).clamp(0.0, 1.0)
}

// ─── Observations ────────────────────────────────────────────────────────────

/// The average metric over one period and how many observations it covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodObservation {
  pub period_end: DateTime<Utc>,
  pub mean:       f64,
  pub count:      u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReading {
  pub key:                String,
  pub period_end:         DateTime<Utc>,
  pub baseline_avg:       f64,
  pub current_avg:        f64,
  pub drift_score:        f64,
  pub threshold_breached: bool,
  /// True only on the not-breached → breached transition.
  pub alert:              bool,
  pub observations:       u64,
}

#[derive(Debug, Default)]
struct Series {
  periods:  VecDeque<PeriodObservation>,
  breached: bool,
}

fn weighted_mean(periods: &[PeriodObservation]) -> (f64, u64) {
  let count: u64 = periods.iter().map(|p| p.count).sum();
  if count == 0 {
    return (0.0, 0);
  }
  let total: f64 = periods.iter().map(|p| p.mean * p.count as f64).sum();
  (total / count as f64, count)
}

// ─── Monitor ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct DriftMonitor {
  policy: DriftPolicy,
  series: HashMap<String, Series>,
}

impl DriftMonitor {
  pub fn new(policy: DriftPolicy) -> Self { Self { policy, series: HashMap::new() } }

  pub fn policy(&self) -> &DriftPolicy { &self.policy }

  /// Resume a key's breach state, e.g. from the last persisted snapshot, so
  /// a restart does not re-fire an alert for an ongoing breach.
  pub fn resume(&mut self, key: &str, breached: bool) {
    self.series.entry(key.to_owned()).or_default().breached = breached;
  }

  pub fn is_breached(&self, key: &str) -> bool {
    self.series.get(key).is_some_and(|s| s.breached)
  }

  /// Append one period. Only the newest `baseline + current` periods are
  /// retained.
  pub fn record(&mut self, key: &str, observation: PeriodObservation) {
    let capacity = self.policy.baseline_periods + self.policy.current_periods;
    let series = self.series.entry(key.to_owned()).or_default();
    series.periods.push_back(observation);
    while series.periods.len() > capacity {
      series.periods.pop_front();
    }
  }

  /// Evaluate the key's windows and advance its breach state.
  ///
  /// Too few observations, or no baseline periods yet, yields
  /// [`Degradation::InsufficientSampleSize`] and leaves the breach state
  /// unchanged.
  pub fn evaluate(&mut self, key: &str) -> Result<DriftReading, Degradation> {
    let required = self.policy.min_observations;
    let current_periods = self.policy.current_periods;
    let breach_cutoff = self.policy.breach_cutoff;

    let insufficient = |observed| Degradation::InsufficientSampleSize { observed, required };

    let series = self.series.get_mut(key).ok_or(insufficient(0))?;
    let periods = series.periods.make_contiguous();
    let Some(last) = periods.last().copied() else {
      return Err(insufficient(0));
    };

    let split = periods.len().saturating_sub(current_periods);
    let (baseline, current) = periods.split_at(split);
    let (baseline_avg, baseline_n) = weighted_mean(baseline);
    let (current_avg, current_n) = weighted_mean(current);
    let observed = baseline_n + current_n;
    if baseline_n == 0 || current_n == 0 || observed < required {
      return Err(insufficient(observed));
    }

    let drift = drift_score(baseline_avg, current_avg);
    let breached = drift > breach_cutoff;
    let alert = breached && !series.breached;
    series.breached = breached;

    Ok(DriftReading {
      key: key.to_owned(),
      period_end: last.period_end,
      baseline_avg,
      current_avg,
      drift_score: drift,
      threshold_breached: breached,
      alert,
      observations: observed,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
  }

  fn feed(monitor: &mut DriftMonitor, key: &str, start: i64, means: &[f64], count: u64) {
    for (i, mean) in means.iter().enumerate() {
      monitor.record(
        key,
        PeriodObservation { period_end: day(start + i as i64), mean: *mean, count },
      );
    }
  }

  #[test]
  fn worked_example_breaches() {
    let d = drift_score(0.80, 0.65);
    assert!((d - 0.1875).abs() < 1e-12);
    assert!(d > DriftPolicy::default().breach_cutoff);
  }

  #[test]
  fn drift_is_clipped() {
    assert_eq!(drift_score(0.5, 0.9), 0.0);
    assert_eq!(drift_score(0.5, -1.0), 1.0);
    assert_eq!(drift_score(0.0, 0.3), 0.0);
  }

  #[test]
  fn windows_split_baseline_and_current() {
    let mut m = DriftMonitor::new(DriftPolicy::default());
    feed(&mut m, "conf", 0, &[0.80; 30], 10);
    feed(&mut m, "conf", 30, &[0.65; 7], 10);

    let r = m.evaluate("conf").unwrap();
    assert!((r.baseline_avg - 0.80).abs() < 1e-12);
    assert!((r.current_avg - 0.65).abs() < 1e-12);
    assert!((r.drift_score - 0.1875).abs() < 1e-9);
    assert!(r.threshold_breached);
    assert!(r.alert);
    assert_eq!(r.observations, 370);
    assert_eq!(r.period_end, day(36));
  }

  #[test]
  fn too_few_observations_is_insufficient() {
    let mut m = DriftMonitor::new(DriftPolicy::default());
    feed(&mut m, "conf", 0, &[0.8; 30], 2);
    feed(&mut m, "conf", 30, &[0.1; 7], 2);
    assert_eq!(
      m.evaluate("conf").unwrap_err(),
      Degradation::InsufficientSampleSize { observed: 74, required: 100 }
    );
    assert!(!m.is_breached("conf"));
  }

  #[test]
  fn unknown_key_or_missing_baseline_is_insufficient() {
    let mut m = DriftMonitor::new(DriftPolicy::default());
    assert!(m.evaluate("nope").is_err());
    feed(&mut m, "conf", 0, &[0.8; 5], 1000);
    assert!(matches!(
      m.evaluate("conf"),
      Err(Degradation::InsufficientSampleSize { .. })
    ));
  }

  #[test]
  fn alerts_fire_only_on_transition() {
    let mut m = DriftMonitor::new(DriftPolicy::default());
    feed(&mut m, "conf", 0, &[0.8; 30], 10);

    feed(&mut m, "conf", 30, &[0.6; 7], 10);
    assert!(m.evaluate("conf").unwrap().alert);

    // Still breached next period: no second alert.
    feed(&mut m, "conf", 37, &[0.6], 10);
    let r = m.evaluate("conf").unwrap();
    assert!(r.threshold_breached);
    assert!(!r.alert);

    // Recover, then breach again: a fresh alert.
    feed(&mut m, "conf", 38, &[0.9; 7], 10);
    let r = m.evaluate("conf").unwrap();
    assert!(!r.threshold_breached);
    feed(&mut m, "conf", 45, &[0.3; 7], 10);
    assert!(m.evaluate("conf").unwrap().alert);
  }

  #[test]
  fn resumed_breach_does_not_realert() {
    let mut m = DriftMonitor::new(DriftPolicy::default());
    m.resume("conf", true);
    feed(&mut m, "conf", 0, &[0.8; 30], 10);
    feed(&mut m, "conf", 30, &[0.5; 7], 10);
    let r = m.evaluate("conf").unwrap();
    assert!(r.threshold_breached);
    assert!(!r.alert);
  }

  #[test]
  fn retains_only_window_capacity() {
    let policy = DriftPolicy {
      baseline_periods: 3,
      current_periods:  2,
      min_observations: 1,
      ..Default::default()
    };
    let mut m = DriftMonitor::new(policy);
    // Early low values fall out of the window entirely.
    feed(&mut m, "k", 0, &[0.1, 0.1, 0.1], 1);
    feed(&mut m, "k", 3, &[0.9, 0.9, 0.9, 0.9, 0.9], 1);
    let r = m.evaluate("k").unwrap();
    assert_eq!(r.observations, 5);
    assert!(r.drift_score < 1e-9);
  }
}
