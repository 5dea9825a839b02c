//! The scoring pipeline: gather a subject's inputs, run the scoring
//! components over them, and persist the results with audit entries.
//!
//! Every run takes an explicit `as_of` instant. Ratings submitted and
//! evidence dated after it are ignored, and records derived from identical
//! inputs carry identical ids, so re-running a cycle for the same `as_of`
//! writes nothing new.

use std::{future::Future, sync::Arc};

use assay_core::{
  Degradation,
  audit::{Actor, AuditAction, NewAuditEntry},
  band::ReadinessBand,
  catalog::{Form, NewForm, SeedReport},
  confidence,
  config::EngineConfig,
  digest::digest,
  drift::{DriftMonitor, PeriodObservation},
  gap::{self, GapReport},
  rating::Rating,
  record::{
    BandOverride, CompositeScore, ConfidenceRecord, DriftSnapshot, GapRecord,
    NewCompositeScore,
  },
  score,
  store::{AssessmentStore, StoreError},
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
  error::{PipelineError, Result},
  retry::with_retry,
  settings::{RetryPolicy, RunnerConfig},
};

const DAY_MILLIS: i64 = 86_400_000;

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// An output that was withheld, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Degraded {
  /// `composite`, `gap:<competency>` or `confidence`.
  pub output: String,
  pub reason: Degradation,
}

/// What one subject's run produced.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectOutcome {
  pub subject_id:          Uuid,
  /// The current composite after the run.
  pub composite:           Option<CompositeScore>,
  /// False when the current record already reflected these inputs.
  pub composite_written:   bool,
  pub gaps:                GapReport,
  pub gaps_recorded:       usize,
  pub confidence:          Option<ConfidenceRecord>,
  pub confidence_recorded: bool,
  pub degradations:        Vec<Degraded>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectFailure {
  /// `None` when the subject's task panicked.
  pub subject_id: Option<Uuid>,
  pub error:      String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
  pub cycle_id: Uuid,
  pub as_of:    DateTime<Utc>,
  /// Ordered by subject id.
  pub outcomes: Vec<SubjectOutcome>,
  pub failures: Vec<SubjectFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriftOutcome {
  Evaluated {
    snapshot: DriftSnapshot,
    /// False when this period had already been evaluated.
    recorded: bool,
  },
  Degraded { reason: Degradation },
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Runs the scoring components against an [`AssessmentStore`].
pub struct Pipeline<S> {
  store:       Arc<S>,
  engine:      Arc<EngineConfig>,
  retry:       RetryPolicy,
  concurrency: usize,
  drift_key:   Arc<str>,
}

impl<S> Clone for Pipeline<S> {
  fn clone(&self) -> Self {
    Self {
      store:       Arc::clone(&self.store),
      engine:      Arc::clone(&self.engine),
      retry:       self.retry.clone(),
      concurrency: self.concurrency,
      drift_key:   Arc::clone(&self.drift_key),
    }
  }
}

impl<S> Pipeline<S>
where
  S: AssessmentStore + 'static,
{
  /// Validates `config` before anything touches the store.
  pub fn new(store: Arc<S>, config: &RunnerConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self {
      store,
      engine: Arc::new(config.engine.clone()),
      retry: config.retry.clone(),
      concurrency: config.concurrency,
      drift_key: Arc::from(config.drift_key.as_str()),
    })
  }

  pub fn store(&self) -> &S { &self.store }

  /// Run a store call under the retry policy.
  async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, S::Error>>,
  {
    with_retry(&self.retry, operation, op)
      .await
      .map_err(PipelineError::store)
  }

  async fn audit(&self, entry: NewAuditEntry) -> Result<()> {
    let store = &*self.store;
    let entry = self
      .call("append_audit", move || store.append_audit(entry.clone()))
      .await?;
    debug!(action = %entry.action, entry_id = %entry.entry_id, "audited");
    Ok(())
  }

  // ── Catalog ───────────────────────────────────────────────────────────────

  pub async fn create_form(&self, name: &str, scope: &str, seed: bool) -> Result<(Form, Option<SeedReport>)> {
    let store = &*self.store;
    let input = NewForm { name: name.to_owned(), scope: scope.to_owned() };
    let form = self
      .call("create_form", move || store.create_form(input.clone()))
      .await?;
    info!(form_id = %form.form_id, name = %form.name, "form created");

    let report = if seed { Some(self.seed_form(form.form_id).await?) } else { None };
    Ok((form, report))
  }

  /// Seed the canonical starter set; audited only when something was added.
  pub async fn seed_form(&self, form_id: Uuid) -> Result<SeedReport> {
    let store = &*self.store;
    let report = self
      .call("seed_defaults", move || store.seed_defaults(form_id))
      .await?;

    if report.categories_created + report.indicators_created > 0 {
      self
        .audit(NewAuditEntry::system(
          AuditAction::CatalogSeeded,
          format!(
            "form {form_id}: {} categories and {} indicators added, {} indicators already present",
            report.categories_created, report.indicators_created, report.indicators_skipped
          ),
        ))
        .await?;
    }
    Ok(report)
  }

  // ── Cycle runs ────────────────────────────────────────────────────────────

  /// Score every subject rated in `cycle_id`, up to `concurrency` at a time.
  ///
  /// A failing subject is reported in [`CycleReport::failures`] and does not
  /// stop the others.
  pub async fn run_cycle(&self, cycle_id: Uuid, as_of: DateTime<Utc>) -> Result<CycleReport> {
    let store = &*self.store;
    let subjects = self
      .call("cycle_subjects", move || store.cycle_subjects(cycle_id))
      .await?;
    info!(%cycle_id, %as_of, subjects = subjects.len(), "cycle run started");

    let permits = Arc::new(Semaphore::new(self.concurrency));
    let mut tasks = JoinSet::new();
    for subject_id in subjects {
      let permit = Arc::clone(&permits).acquire_owned().await?;
      let pipeline = self.clone();
      tasks.spawn(async move {
        let result = pipeline.run_subject(subject_id, cycle_id, as_of).await;
        drop(permit);
        (subject_id, result)
      });
    }

    let mut outcomes = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((_, Ok(outcome))) => outcomes.push(outcome),
        Ok((subject_id, Err(e))) => {
          error!(%subject_id, error = %e, "subject run failed");
          failures.push(SubjectFailure { subject_id: Some(subject_id), error: e.to_string() });
        }
        Err(e) => {
          error!(error = %e, "subject task aborted");
          failures.push(SubjectFailure { subject_id: None, error: e.to_string() });
        }
      }
    }
    outcomes.sort_by_key(|o| o.subject_id);

    info!(
      %cycle_id,
      scored = outcomes.len(),
      failed = failures.len(),
      written = outcomes.iter().filter(|o| o.composite_written).count(),
      "cycle run finished"
    );
    Ok(CycleReport { cycle_id, as_of, outcomes, failures })
  }

  /// Gather, aggregate, classify, analyse gaps, assess confidence: in that
  /// order, for one subject.
  pub async fn run_subject(
    &self,
    subject_id: Uuid,
    cycle_id: Uuid,
    as_of: DateTime<Utc>,
  ) -> Result<SubjectOutcome> {
    let store = &*self.store;
    let context = self
      .call("rating_context", move || store.rating_context(subject_id, cycle_id))
      .await?;

    let mut ratings: Vec<Rating> = context
      .ratings
      .into_iter()
      .filter(|r| r.submitted_at <= as_of)
      .collect();
    ratings.sort_by_key(|r| r.rating_id);
    let mut indicators = context.indicators;
    indicators.sort_by_key(|i| i.indicator_id);

    let mut degradations = Vec::new();

    // Composite.
    let (composite, composite_written) =
      match score::aggregate(&ratings, &indicators, &self.engine.scoring) {
        Ok(breakdown) => {
          let draft = NewCompositeScore {
            subject_id,
            cycle_id,
            overall_score: breakdown.overall_score,
            computed_band: self.engine.bands.classify(breakdown.overall_score),
            sub_scores: breakdown.by_assessor,
            band_override: None,
            input_digest: digest(&(
              &ratings,
              &indicators,
              &self.engine.scoring,
              &self.engine.bands,
            ))?,
            computed_at: as_of,
          };
          let (score, written) = self.persist_composite(draft).await?;
          (Some(score), written)
        }
        Err(reason) => {
          warn!(%subject_id, %cycle_id, %reason, "composite score withheld");
          degradations.push(Degraded { output: "composite".into(), reason });
          let current = self
            .call("current_composite", move || store.current_composite(subject_id, cycle_id))
            .await?;
          (current, false)
        }
      };

    // Gaps.
    let inputs = gap::competency_inputs(
      &ratings,
      &indicators,
      &context.categories,
      self.engine.scoring.reference_scale_max,
    );
    let gaps = gap::analyze_batch(&inputs, &self.engine.gaps);
    for suppressed in &gaps.suppressed {
      warn!(
        %subject_id,
        competency = %suppressed.competency,
        reason = %suppressed.reason,
        "gap withheld"
      );
      degradations.push(Degraded {
        output: format!("gap:{}", suppressed.competency),
        reason: suppressed.reason.clone(),
      });
    }
    let gaps_recorded = self
      .persist_gaps(subject_id, cycle_id, as_of, &inputs, &gaps)
      .await?;

    // Confidence.
    let evidence = self
      .call("list_evidence", move || store.list_evidence(subject_id, as_of))
      .await?;
    let (confidence, confidence_recorded) =
      match confidence::assess(&evidence, as_of, &self.engine.confidence) {
        Ok(assessment) => {
          let mut ordered: Vec<_> = evidence.iter().collect();
          ordered.sort_by_key(|e| e.evidence_id);
          let record = ConfidenceRecord::from_assessment(
            &assessment,
            subject_id,
            digest(&(subject_id, as_of, &ordered, &self.engine.confidence))?,
            as_of,
          );
          let recorded = self.persist_confidence(&record, cycle_id).await?;
          (Some(record), recorded)
        }
        Err(reason) => {
          warn!(%subject_id, %reason, "confidence withheld");
          degradations.push(Degraded { output: "confidence".into(), reason });
          (None, false)
        }
      };

    Ok(SubjectOutcome {
      subject_id,
      composite,
      composite_written,
      gaps,
      gaps_recorded,
      confidence,
      confidence_recorded,
      degradations,
    })
  }

  /// Make `draft` the current composite unless the current record already
  /// holds the same result. Re-reads and retries on a version conflict.
  async fn persist_composite(&self, draft: NewCompositeScore) -> Result<(CompositeScore, bool)> {
    let store = &*self.store;
    let (subject_id, cycle_id) = (draft.subject_id, draft.cycle_id);

    for attempt in 1..=self.retry.max_attempts {
      let current = self
        .call("current_composite", move || store.current_composite(subject_id, cycle_id))
        .await?;

      let mut draft = draft.clone();
      if let Some(current) = &current {
        // A human override stands while the inputs it was made on stand.
        if current.input_digest == draft.input_digest {
          draft.band_override = current.band_override.clone();
        }
        if current.matches(&draft) {
          debug!(%subject_id, %cycle_id, version = current.version, "composite unchanged");
          return Ok((current.clone(), false));
        }
      }

      let expected = current.as_ref().map(|c| c.version);
      let written = with_retry(&self.retry, "supersede_composite", || {
        store.supersede_composite(draft.clone(), expected)
      })
      .await;

      match written {
        Ok(score) => {
          self
            .audit(
              NewAuditEntry::system(
                AuditAction::CompositeScored,
                format!(
                  "score {:.3} classified {} (version {})",
                  score.overall_score,
                  score.computed_band.label(),
                  score.version
                ),
              )
              .for_subject(subject_id, Some(cycle_id))
              .with_record(score.score_id),
            )
            .await?;
          return Ok((score, true));
        }
        Err(e) if e.is_version_conflict() => {
          warn!(%subject_id, %cycle_id, attempt, "composite changed concurrently, re-reading");
        }
        Err(e) => return Err(PipelineError::store(e)),
      }
    }

    Err(PipelineError::Contended {
      subject_id,
      cycle_id,
      attempts: self.retry.max_attempts,
    })
  }

  async fn persist_gaps(
    &self,
    subject_id: Uuid,
    cycle_id: Uuid,
    as_of: DateTime<Utc>,
    inputs: &[gap::CompetencyRatings],
    report: &GapReport,
  ) -> Result<usize> {
    if report.gaps.is_empty() {
      return Ok(0);
    }
    let input_digest = digest(&(subject_id, cycle_id, inputs, &self.engine.gaps))?;
    let records: Vec<GapRecord> = report
      .gaps
      .iter()
      .map(|g| GapRecord::from_gap(g, subject_id, cycle_id, input_digest.clone(), as_of))
      .collect();

    let store = &*self.store;
    let inserted = self
      .call("record_gaps", move || store.record_gaps(records.clone()))
      .await?;

    if inserted > 0 {
      let blind = report.top_blind_spots(usize::MAX).len();
      let hidden = report.top_hidden_strengths(usize::MAX).len();
      self
        .audit(
          NewAuditEntry::system(
            AuditAction::GapsAnalyzed,
            format!(
              "{} competencies analysed: {blind} blind spot(s), {hidden} hidden strength(s)",
              report.gaps.len()
            ),
          )
          .for_subject(subject_id, Some(cycle_id)),
        )
        .await?;
    }
    Ok(inserted)
  }

  async fn persist_confidence(&self, record: &ConfidenceRecord, cycle_id: Uuid) -> Result<bool> {
    let store = &*self.store;
    let inserted = self
      .call("record_confidence", || store.record_confidence(record.clone()))
      .await?;

    if inserted {
      self
        .audit(
          NewAuditEntry::system(
            AuditAction::ConfidenceAssessed,
            format!(
              "confidence {:.3} from {} source(s), {} rater(s); bias risk {}, data {}",
              record.confidence_score,
              record.source_count,
              record.rater_count,
              record.bias_risk_level,
              record.freshness
            ),
          )
          .for_subject(record.subject_id, Some(cycle_id))
          .with_record(record.confidence_id),
        )
        .await?;
    }
    Ok(inserted)
  }

  // ── Overrides and history ─────────────────────────────────────────────────

  /// Replace the effective band of the current composite with a human
  /// decision. The computed band and score are kept.
  pub async fn override_band(
    &self,
    subject_id: Uuid,
    cycle_id: Uuid,
    band: ReadinessBand,
    actor: &str,
    rationale: &str,
    at: DateTime<Utc>,
  ) -> Result<CompositeScore> {
    let actor = assay_core::catalog::normalize_name("override actor", actor)?;
    let rationale = assay_core::catalog::normalize_name("override rationale", rationale)?;
    let store = &*self.store;

    for attempt in 1..=self.retry.max_attempts {
      let current = self
        .call("current_composite", move || store.current_composite(subject_id, cycle_id))
        .await?
        .ok_or(assay_core::Error::NoCurrentScore { subject_id, cycle_id })?;

      let draft = NewCompositeScore::overriding(
        &current,
        BandOverride {
          band,
          actor: Actor::User(actor.clone()),
          rationale: rationale.clone(),
        },
        at,
      );
      let written = with_retry(&self.retry, "supersede_composite", || {
        store.supersede_composite(draft.clone(), Some(current.version))
      })
      .await;

      match written {
        Ok(score) => {
          info!(%subject_id, %cycle_id, %band, actor = %actor, "band overridden");
          self
            .audit(
              NewAuditEntry {
                actor: Actor::User(actor.clone()),
                ..NewAuditEntry::system(
                  AuditAction::BandOverridden,
                  format!("{} -> {}: {rationale}", current.band().label(), band.label()),
                )
              }
              .for_subject(subject_id, Some(cycle_id))
              .with_record(score.score_id),
            )
            .await?;
          return Ok(score);
        }
        Err(e) if e.is_version_conflict() => {
          warn!(%subject_id, %cycle_id, attempt, "composite changed during override, re-reading");
        }
        Err(e) => return Err(PipelineError::store(e)),
      }
    }

    Err(PipelineError::Contended {
      subject_id,
      cycle_id,
      attempts: self.retry.max_attempts,
    })
  }

  pub async fn history(&self, subject_id: Uuid, cycle_id: Uuid) -> Result<Vec<CompositeScore>> {
    let store = &*self.store;
    self
      .call("composite_history", move || store.composite_history(subject_id, cycle_id))
      .await
  }

  // ── Drift ─────────────────────────────────────────────────────────────────

  /// Evaluate drift of the mean confidence score over daily periods ending
  /// at `as_of`.
  ///
  /// Breach state resumes from the last stored snapshot at or before
  /// `as_of`. Evaluating a period that already has a snapshot returns the
  /// stored one unchanged.
  pub async fn evaluate_drift(&self, as_of: DateTime<Utc>) -> Result<DriftOutcome> {
    let store = &*self.store;
    let key = Arc::clone(&self.drift_key);
    let policy = self.engine.drift.clone();

    let prior = self
      .call("latest_drift_snapshot", || store.latest_drift_snapshot(&key, as_of))
      .await?;
    let mut monitor = DriftMonitor::new(policy.clone());
    if let Some(prior) = prior {
      if prior.period_end == as_of {
        debug!(key = %key, %as_of, "drift period already evaluated");
        return Ok(DriftOutcome::Evaluated { snapshot: prior, recorded: false });
      }
      monitor.resume(&key, prior.threshold_breached);
    }

    let periods = policy.baseline_periods + policy.current_periods;
    let since = as_of - Duration::days(periods as i64);
    let history = self
      .call("confidence_history", move || store.confidence_history(since, as_of))
      .await?;

    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); periods];
    for record in history.iter().filter(|r| r.computed_at > since) {
      let offset = (record.computed_at - since).num_milliseconds();
      let index = (((offset - 1) / DAY_MILLIS) as usize).min(periods - 1);
      buckets[index].push(record.confidence_score);
    }
    for (index, mut values) in buckets.into_iter().enumerate() {
      values.sort_by(f64::total_cmp);
      let count = values.len() as u64;
      let mean = if count == 0 { 0.0 } else { values.iter().sum::<f64>() / count as f64 };
      monitor.record(&key, PeriodObservation {
        period_end: since + Duration::days(index as i64 + 1),
        mean,
        count,
      });
    }

    let reading = match monitor.evaluate(&key) {
      Ok(reading) => reading,
      Err(reason) => {
        warn!(key = %key, %as_of, %reason, "drift evaluation withheld");
        return Ok(DriftOutcome::Degraded { reason });
      }
    };

    let snapshot = DriftSnapshot::from_reading(&reading, as_of);
    let recorded = self
      .call("record_drift_snapshot", || store.record_drift_snapshot(snapshot.clone()))
      .await?;

    if recorded {
      info!(
        key = %key,
        drift = reading.drift_score,
        breached = reading.threshold_breached,
        "drift evaluated"
      );
      self
        .audit(
          NewAuditEntry::system(
            AuditAction::DriftEvaluated,
            format!(
              "{key}: drift {:.3} (baseline {:.3}, current {:.3}, {} observations)",
              reading.drift_score, reading.baseline_avg, reading.current_avg, reading.observations
            ),
          )
          .with_record(snapshot.snapshot_id),
        )
        .await?;

      if reading.alert {
        warn!(key = %key, drift = reading.drift_score, "drift threshold breached");
        self
          .audit(
            NewAuditEntry::system(
              AuditAction::DriftAlertRaised,
              format!(
                "{key}: drift {:.3} exceeds {:.3}",
                reading.drift_score, policy.breach_cutoff
              ),
            )
            .with_record(snapshot.snapshot_id),
          )
          .await?;
      }
    }

    Ok(DriftOutcome::Evaluated { snapshot, recorded })
  }
}
