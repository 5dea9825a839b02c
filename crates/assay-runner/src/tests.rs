//! Pipeline tests against an in-memory `SqliteStore`.

use std::sync::Arc;

use assay_core::{
  Degradation,
  audit::{Actor, AuditAction},
  band::ReadinessBand,
  catalog::Indicator,
  confidence::{BiasRisk, Freshness},
  evidence::NewEvidence,
  gap::GapClassification,
  rating::NewRating,
  record::ConfidenceRecord,
  store::AssessmentStore,
};
use assay_store_sqlite::SqliteStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::{DriftOutcome, Pipeline, PipelineError, RunnerConfig};

struct Fixture {
  pipeline:   Pipeline<SqliteStore>,
  cycle_id:   Uuid,
  indicators: Vec<Indicator>,
}

async fn fixture() -> Fixture {
  let store = SqliteStore::open_in_memory()
    .await
    .expect("in-memory store");
  let pipeline = Pipeline::new(Arc::new(store), &RunnerConfig::default()).unwrap();
  let (form, seeded) = pipeline
    .create_form("Succession 2025", "executive", true)
    .await
    .unwrap();
  assert!(seeded.unwrap().indicators_created > 0);
  let indicators = pipeline.store().list_indicators(form.form_id).await.unwrap();
  Fixture { pipeline, cycle_id: Uuid::new_v4(), indicators }
}

impl Fixture {
  fn store(&self) -> &SqliteStore { self.pipeline.store() }

  /// `rater_id` rates every indicator of the form with `value`.
  async fn rate(&self, subject_id: Uuid, rater_id: Uuid, value: f64) {
    self.rate_in(self.cycle_id, subject_id, rater_id, value).await;
  }

  async fn rate_in(&self, cycle_id: Uuid, subject_id: Uuid, rater_id: Uuid, value: f64) {
    for indicator in &self.indicators {
      self
        .store()
        .record_rating(NewRating {
          indicator_id: indicator.indicator_id,
          assessor_type: indicator.assessor_type,
          rater_id,
          subject_id,
          cycle_id,
          value,
        })
        .await
        .unwrap();
    }
  }

  /// Self rating of 5 and three other raters at 4.
  async fn rated_subject(&self) -> Uuid {
    let subject = Uuid::new_v4();
    self.rate(subject, subject, 5.0).await;
    for _ in 0..3 {
      self.rate(subject, Uuid::new_v4(), 4.0).await;
    }
    subject
  }
}

// ─── Subject runs ────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_scores_classifies_and_finds_gaps() {
  let f = fixture().await;
  let subject = f.rated_subject().await;
  let as_of = Utc::now();

  let outcome = f.pipeline.run_subject(subject, f.cycle_id, as_of).await.unwrap();

  let composite = outcome.composite.unwrap();
  assert!(outcome.composite_written);
  assert_eq!(composite.version, 1);
  // Self ratings do not count towards the composite.
  assert!((composite.overall_score - 4.0).abs() < 1e-9);
  assert_eq!(composite.band(), ReadinessBand::ReadyIn1Year);

  assert_eq!(outcome.gaps.gaps.len(), 4);
  assert!(outcome.gaps.suppressed.is_empty());
  for gap in &outcome.gaps.gaps {
    assert_eq!(gap.classification, GapClassification::BlindSpot);
    assert!((gap.gap - 1.0).abs() < 1e-9);
    assert_eq!(gap.others_rater_count, 3);
  }
  assert_eq!(outcome.gaps_recorded, 4);
  assert_eq!(f.store().list_gaps(subject, f.cycle_id).await.unwrap().len(), 4);

  // No evidence recorded for this subject.
  assert!(outcome.confidence.is_none());
  assert_eq!(outcome.degradations.len(), 1);
  assert_eq!(outcome.degradations[0].reason, Degradation::NoDataAvailable);
}

#[tokio::test]
async fn rerun_with_same_as_of_writes_nothing() {
  let f = fixture().await;
  let subject = f.rated_subject().await;
  let as_of = Utc::now();

  f.pipeline.run_subject(subject, f.cycle_id, as_of).await.unwrap();
  let audit_before = f.store().list_audit(None).await.unwrap().len();

  let again = f.pipeline.run_subject(subject, f.cycle_id, as_of).await.unwrap();
  assert!(!again.composite_written);
  assert_eq!(again.gaps_recorded, 0);
  assert_eq!(again.composite.unwrap().version, 1);

  assert_eq!(f.store().composite_history(subject, f.cycle_id).await.unwrap().len(), 1);
  assert_eq!(f.store().list_audit(None).await.unwrap().len(), audit_before);
}

#[tokio::test]
async fn later_ratings_are_ignored_until_as_of_moves() {
  let f = fixture().await;
  let subject = f.rated_subject().await;
  let first_as_of = Utc::now();
  f.pipeline.run_subject(subject, f.cycle_id, first_as_of).await.unwrap();

  f.rate(subject, Uuid::new_v4(), 1.0).await;

  let same = f.pipeline.run_subject(subject, f.cycle_id, first_as_of).await.unwrap();
  assert!(!same.composite_written);

  let moved = f.pipeline.run_subject(subject, f.cycle_id, Utc::now()).await.unwrap();
  assert!(moved.composite_written);
  let current = moved.composite.unwrap();
  assert_eq!(current.version, 2);
  assert!((current.overall_score - 3.25).abs() < 1e-9);

  let history = f.pipeline.history(subject, f.cycle_id).await.unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history.iter().filter(|c| c.is_current).count(), 1);
}

#[tokio::test]
async fn gap_records_are_kept_per_subject_and_cycle() {
  let f = fixture().await;
  let raters: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
  let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
  let next_cycle = Uuid::new_v4();
  let runs = [(a, f.cycle_id), (b, f.cycle_id), (a, next_cycle)];

  // Identical raters and values everywhere.
  for (subject, cycle) in runs {
    f.rate_in(cycle, subject, subject, 5.0).await;
    for rater in &raters {
      f.rate_in(cycle, subject, *rater, 4.0).await;
    }
  }

  let as_of = Utc::now();
  for (subject, cycle) in runs {
    let outcome = f.pipeline.run_subject(subject, cycle, as_of).await.unwrap();
    assert_eq!(outcome.gaps.gaps.len(), 4);
    assert_eq!(outcome.gaps_recorded, 4);

    let stored = f.store().list_gaps(subject, cycle).await.unwrap();
    assert_eq!(stored.len(), 4);
    assert!(stored.iter().all(|g| g.subject_id == subject && g.cycle_id == cycle));
  }
}

#[tokio::test]
async fn too_few_raters_suppresses_gaps_but_not_the_score() {
  let f = fixture().await;
  let subject = Uuid::new_v4();
  f.rate(subject, subject, 3.0).await;
  f.rate(subject, Uuid::new_v4(), 4.0).await;
  f.rate(subject, Uuid::new_v4(), 4.0).await;

  let outcome = f.pipeline.run_subject(subject, f.cycle_id, Utc::now()).await.unwrap();
  assert!(outcome.composite.is_some());
  assert!(outcome.gaps.gaps.is_empty());
  assert_eq!(outcome.gaps.suppressed.len(), 4);
  assert!(outcome.gaps.suppressed.iter().all(|s| {
    s.reason == Degradation::InsufficientRaters { count: 2, required: 3 }
  }));
  assert_eq!(outcome.gaps_recorded, 0);
}

#[tokio::test]
async fn unrated_subject_gets_no_composite() {
  let f = fixture().await;
  let outcome = f
    .pipeline
    .run_subject(Uuid::new_v4(), f.cycle_id, Utc::now())
    .await
    .unwrap();
  assert!(outcome.composite.is_none());
  assert!(!outcome.composite_written);
  assert!(outcome.degradations.iter().any(|d| d.output == "composite"));
}

// ─── Confidence ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn confidence_is_assessed_once_per_input() {
  let f = fixture().await;
  let subject = f.rated_subject().await;
  let as_of = Utc::now();

  for (i, source) in ["reviews", "projects", "peers", "kpis", "kpis"].iter().enumerate() {
    let mut e = NewEvidence::new(subject, *source, "signal", as_of - Duration::days(2));
    e.rater_id = Some(Uuid::new_v4());
    e.flagged_bias = i == 0;
    f.store().record_evidence(e).await.unwrap();
  }

  let outcome = f.pipeline.run_subject(subject, f.cycle_id, as_of).await.unwrap();
  let record = outcome.confidence.unwrap();
  assert!(outcome.confidence_recorded);
  assert!((record.confidence_score - 1.0).abs() < 1e-9);
  assert_eq!(record.source_count, 4);
  assert_eq!(record.rater_count, 5);
  assert_eq!(record.bias_risk_level, BiasRisk::Medium);
  assert_eq!(record.freshness, Freshness::Fresh);

  let again = f.pipeline.run_subject(subject, f.cycle_id, as_of).await.unwrap();
  assert!(!again.confidence_recorded);
  assert_eq!(again.confidence.unwrap().confidence_id, record.confidence_id);
  assert_eq!(f.store().latest_confidence(subject).await.unwrap(), Some(record));
}

// ─── Cycle runs ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn cycle_run_covers_every_rated_subject() {
  let f = fixture().await;
  let mut subjects = Vec::new();
  for _ in 0..5 {
    subjects.push(f.rated_subject().await);
  }
  subjects.sort();

  let report = f.pipeline.run_cycle(f.cycle_id, Utc::now()).await.unwrap();
  assert!(report.failures.is_empty());
  let scored: Vec<_> = report.outcomes.iter().map(|o| o.subject_id).collect();
  assert_eq!(scored, subjects);
  assert!(report.outcomes.iter().all(|o| o.composite_written));

  let again = f.pipeline.run_cycle(f.cycle_id, report.as_of).await.unwrap();
  assert!(again.outcomes.iter().all(|o| !o.composite_written));
}

// ─── Overrides ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn override_replaces_the_effective_band_and_is_audited() {
  let f = fixture().await;
  let subject = f.rated_subject().await;
  let as_of = Utc::now();
  f.pipeline.run_subject(subject, f.cycle_id, as_of).await.unwrap();

  let overridden = f
    .pipeline
    .override_band(
      subject,
      f.cycle_id,
      ReadinessBand::ReadyNow,
      "chair",
      "Board succession decision",
      Utc::now(),
    )
    .await
    .unwrap();
  assert_eq!(overridden.version, 2);
  assert_eq!(overridden.band(), ReadinessBand::ReadyNow);
  assert_eq!(overridden.computed_band, ReadinessBand::ReadyIn1Year);

  let audit = f.store().list_audit(Some(subject)).await.unwrap();
  let entry = audit
    .iter()
    .find(|e| e.action == AuditAction::BandOverridden)
    .unwrap();
  assert_eq!(entry.actor, Actor::User("chair".into()));
  assert_eq!(entry.record_id, Some(overridden.score_id));

  // Unchanged inputs keep the override in place.
  let rerun = f.pipeline.run_subject(subject, f.cycle_id, as_of).await.unwrap();
  assert!(!rerun.composite_written);
  assert_eq!(rerun.composite.unwrap().band(), ReadinessBand::ReadyNow);
}

// ─── Concurrent writers ──────────────────────────────────────────────────────

async fn audited(store: &SqliteStore, subject_id: Uuid, action: AuditAction) -> usize {
  let entries = store.list_audit(Some(subject_id)).await.unwrap();
  entries.iter().filter(|e| e.action == action).count()
}

#[tokio::test]
async fn concurrent_runs_leave_one_current_composite() {
  let f = fixture().await;
  let subject = f.rated_subject().await;
  let as_of = Utc::now();

  let (first, second) = tokio::join!(
    f.pipeline.run_subject(subject, f.cycle_id, as_of),
    f.pipeline.run_subject(subject, f.cycle_id, as_of),
  );
  let (first, second) = (first.unwrap(), second.unwrap());

  assert!(first.composite_written ^ second.composite_written);
  assert_eq!(
    first.composite.unwrap().score_id,
    second.composite.unwrap().score_id
  );
  assert_eq!(first.gaps_recorded + second.gaps_recorded, 4);

  let history = f.pipeline.history(subject, f.cycle_id).await.unwrap();
  assert_eq!(history.len(), 1);
  assert!(history[0].is_current);
  assert_eq!(audited(f.store(), subject, AuditAction::CompositeScored).await, 1);
  assert_eq!(audited(f.store(), subject, AuditAction::GapsAnalyzed).await, 1);
}

#[tokio::test]
async fn override_racing_a_rescore_keeps_history_consistent() {
  let f = fixture().await;
  let subject = f.rated_subject().await;
  f.pipeline.run_subject(subject, f.cycle_id, Utc::now()).await.unwrap();

  f.rate(subject, Uuid::new_v4(), 2.0).await;
  let later = Utc::now();

  let (overridden, rescored) = tokio::join!(
    f.pipeline.override_band(
      subject,
      f.cycle_id,
      ReadinessBand::ReadyNow,
      "chair",
      "Interim appointment",
      later,
    ),
    f.pipeline.run_subject(subject, f.cycle_id, later),
  );
  overridden.unwrap();
  assert!(rescored.unwrap().composite_written);

  let history = f.pipeline.history(subject, f.cycle_id).await.unwrap();
  let versions: Vec<_> = history.iter().map(|c| c.version).collect();
  assert_eq!(versions, vec![1, 2, 3]);
  let current: Vec<_> = history.iter().filter(|c| c.is_current).collect();
  assert_eq!(current.len(), 1);
  assert_eq!(current[0].version, 3);
  assert_eq!(
    f.store().current_composite(subject, f.cycle_id).await.unwrap().as_ref(),
    Some(current[0])
  );

  assert_eq!(audited(f.store(), subject, AuditAction::CompositeScored).await, 2);
  assert_eq!(audited(f.store(), subject, AuditAction::BandOverridden).await, 1);
}

#[tokio::test]
async fn override_without_a_score_fails() {
  let f = fixture().await;
  let err = f
    .pipeline
    .override_band(Uuid::new_v4(), f.cycle_id, ReadinessBand::Developing, "hr", "why", Utc::now())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    PipelineError::Core(assay_core::Error::NoCurrentScore { .. })
  ));
}

#[tokio::test]
async fn override_needs_a_rationale() {
  let f = fixture().await;
  let subject = f.rated_subject().await;
  f.pipeline.run_subject(subject, f.cycle_id, Utc::now()).await.unwrap();
  let err = f
    .pipeline
    .override_band(subject, f.cycle_id, ReadinessBand::ReadyNow, "chair", "  ", Utc::now())
    .await
    .unwrap_err();
  assert!(matches!(err, PipelineError::Core(assay_core::Error::InvalidConfiguration(_))));
}

// ─── Drift ───────────────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap() }

/// Four confidence records per day for the 37 days before `t0`: 0.8 for
/// the first 30 days, 0.5 for the last 7.
async fn seed_confidence_series(store: &SqliteStore) {
  let since = t0() - Duration::days(37);
  for day in 1..=37_i64 {
    let score = if day <= 30 { 0.8 } else { 0.5 };
    for n in 0..4 {
      let digest = format!("series-{day}-{n}");
      store
        .record_confidence(ConfidenceRecord {
          confidence_id:       assay_core::digest::record_id("confidence", &digest),
          subject_id:          Uuid::new_v4(),
          confidence_score:    score,
          bias_risk_level:     BiasRisk::Low,
          source_count:        4,
          signal_count:        10,
          rater_count:         5,
          data_freshness_days: 1,
          freshness:           Freshness::Fresh,
          input_digest:        digest,
          computed_at:         since + Duration::days(day) - Duration::hours(1),
        })
        .await
        .unwrap();
    }
  }
}

async fn drift_alerts(store: &SqliteStore) -> usize {
  let entries = store.list_audit(None).await.unwrap();
  entries
    .iter()
    .filter(|e| e.action == AuditAction::DriftAlertRaised)
    .count()
}

#[tokio::test]
async fn drift_alert_fires_once_per_breach() {
  let f = fixture().await;
  seed_confidence_series(f.store()).await;

  let DriftOutcome::Evaluated { snapshot, recorded } =
    f.pipeline.evaluate_drift(t0()).await.unwrap()
  else {
    panic!("expected an evaluation");
  };
  assert!(recorded);
  assert!(snapshot.threshold_breached);
  assert!(snapshot.alert_raised);
  assert_eq!(snapshot.observations, 148);
  assert!((snapshot.baseline_avg - 0.8).abs() < 1e-9);
  assert!((snapshot.current_avg - 0.5).abs() < 1e-9);
  assert!((snapshot.drift_score - 0.375).abs() < 1e-9);

  assert_eq!(drift_alerts(f.store()).await, 1);

  // Same period again: nothing new.
  let repeat = f.pipeline.evaluate_drift(t0()).await.unwrap();
  assert_eq!(repeat, DriftOutcome::Evaluated { snapshot: snapshot.clone(), recorded: false });

  // Next period: still breached, no second alert.
  let DriftOutcome::Evaluated { snapshot: next, recorded } =
    f.pipeline.evaluate_drift(t0() + Duration::days(1)).await.unwrap()
  else {
    panic!("expected an evaluation");
  };
  assert!(recorded);
  assert!(next.threshold_breached);
  assert!(!next.alert_raised);
  assert_eq!(drift_alerts(f.store()).await, 1);

  // An earlier period is answered from its stored snapshot.
  let earlier = f.pipeline.evaluate_drift(t0()).await.unwrap();
  assert_eq!(earlier, DriftOutcome::Evaluated { snapshot, recorded: false });
}

#[tokio::test]
async fn drift_without_enough_history_is_withheld() {
  let f = fixture().await;
  let outcome = f.pipeline.evaluate_drift(t0()).await.unwrap();
  assert!(matches!(
    outcome,
    DriftOutcome::Degraded { reason: Degradation::InsufficientSampleSize { observed: 0, .. } }
  ));
  assert!(f.store().latest_drift_snapshot("confidence", t0()).await.unwrap().is_none());
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_configuration_is_rejected_up_front() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let mut config = RunnerConfig::default();
  config.engine.bands.ready_now = 2.0;
  let err = Pipeline::new(Arc::new(store), &config).err().unwrap();
  assert!(matches!(err, PipelineError::Core(assay_core::Error::InvalidConfiguration(_))));
}
