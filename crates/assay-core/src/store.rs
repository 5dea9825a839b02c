//! The `AssessmentStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `assay-store-sqlite`).
//! The runner depends on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  audit::{AuditLogEntry, NewAuditEntry},
  catalog::{
    Category, CategoryUpdate, Form, FormUpdate, Indicator, IndicatorUpdate,
    NewCategory, NewForm, NewIndicator, SeedReport,
  },
  evidence::{EvidenceItem, NewEvidence},
  rating::{NewRating, Rating, RatingContext},
  record::{
    CompositeScore, ConfidenceRecord, DriftSnapshot, GapRecord,
    NewCompositeScore,
  },
};

// ─── Error classification ────────────────────────────────────────────────────

/// What callers need to know about a backend error to decide between
/// retrying, re-reading and surfacing it.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// The domain error, when the failure is one `assay-core` defines.
  fn domain(&self) -> Option<&crate::Error>;

  /// A failure that may succeed if the same call is repeated, e.g. a busy
  /// database.
  fn is_transient(&self) -> bool;

  fn is_version_conflict(&self) -> bool {
    matches!(self.domain(), Some(crate::Error::VersionConflict { .. }))
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over an Assay store backend.
///
/// Catalog entities are mutable until rated. Ratings, evidence and computed
/// records are append-only; the single exception is the `is_current` flag,
/// which only [`supersede_composite`](Self::supersede_composite) changes.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait AssessmentStore: Send + Sync {
  type Error: StoreError;

  // ── Forms ─────────────────────────────────────────────────────────────

  fn create_form(
    &self,
    input: NewForm,
  ) -> impl Future<Output = Result<Form, Self::Error>> + Send + '_;

  fn get_form(
    &self,
    form_id: Uuid,
  ) -> impl Future<Output = Result<Option<Form>, Self::Error>> + Send + '_;

  fn list_forms(
    &self,
  ) -> impl Future<Output = Result<Vec<Form>, Self::Error>> + Send + '_;

  fn update_form(
    &self,
    form_id: Uuid,
    update: FormUpdate,
  ) -> impl Future<Output = Result<Form, Self::Error>> + Send + '_;

  /// Remove a form with its categories and indicators. Fails with
  /// `ReferencedEntityConflict` when any of its indicators is rated.
  fn delete_form(
    &self,
    form_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Categories ────────────────────────────────────────────────────────

  /// Fails with `InvalidConfiguration` if the name is taken in the form.
  fn create_category(
    &self,
    input: NewCategory,
  ) -> impl Future<Output = Result<Category, Self::Error>> + Send + '_;

  /// Categories of a form ordered by `sort_order`.
  fn list_categories(
    &self,
    form_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Category>, Self::Error>> + Send + '_;

  fn update_category(
    &self,
    category_id: Uuid,
    update: CategoryUpdate,
  ) -> impl Future<Output = Result<Category, Self::Error>> + Send + '_;

  /// Remove a category, detaching its indicators. Fails with
  /// `ReferencedEntityConflict` when any of its indicators is rated.
  fn delete_category(
    &self,
    category_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Indicators ────────────────────────────────────────────────────────

  fn create_indicator(
    &self,
    input: NewIndicator,
  ) -> impl Future<Output = Result<Indicator, Self::Error>> + Send + '_;

  fn get_indicator(
    &self,
    indicator_id: Uuid,
  ) -> impl Future<Output = Result<Option<Indicator>, Self::Error>> + Send + '_;

  /// Indicators of a form ordered by category then `sort_order`.
  fn list_indicators(
    &self,
    form_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Indicator>, Self::Error>> + Send + '_;

  fn update_indicator(
    &self,
    indicator_id: Uuid,
    update: IndicatorUpdate,
  ) -> impl Future<Output = Result<Indicator, Self::Error>> + Send + '_;

  /// Fails with `ReferencedEntityConflict` if any rating references it.
  fn delete_indicator(
    &self,
    indicator_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Insert the canonical starter set. Safe to call repeatedly.
  fn seed_defaults(
    &self,
    form_id: Uuid,
  ) -> impl Future<Output = Result<SeedReport, Self::Error>> + Send + '_;

  // ── Ratings and evidence ──────────────────────────────────────────────

  /// Validate against the indicator's scale and assessor type, then record.
  fn record_rating(
    &self,
    input: NewRating,
  ) -> impl Future<Output = Result<Rating, Self::Error>> + Send + '_;

  /// A subject's ratings for a cycle together with the catalog rows they
  /// reference.
  fn rating_context(
    &self,
    subject_id: Uuid,
    cycle_id: Uuid,
  ) -> impl Future<Output = Result<RatingContext, Self::Error>> + Send + '_;

  /// Every subject with at least one rating in the cycle, ordered by id.
  fn cycle_subjects(
    &self,
    cycle_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  fn record_evidence(
    &self,
    input: NewEvidence,
  ) -> impl Future<Output = Result<EvidenceItem, Self::Error>> + Send + '_;

  /// A subject's evidence with `timestamp <= as_of`.
  fn list_evidence(
    &self,
    subject_id: Uuid,
    as_of: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<EvidenceItem>, Self::Error>> + Send + '_;

  // ── Composite scores ──────────────────────────────────────────────────

  fn current_composite(
    &self,
    subject_id: Uuid,
    cycle_id: Uuid,
  ) -> impl Future<Output = Result<Option<CompositeScore>, Self::Error>> + Send + '_;

  /// All records for the key, oldest version first.
  fn composite_history(
    &self,
    subject_id: Uuid,
    cycle_id: Uuid,
  ) -> impl Future<Output = Result<Vec<CompositeScore>, Self::Error>> + Send + '_;

  /// Atomically mark the current record (if any) superseded and insert
  /// `input` as the new current record.
  ///
  /// `expected_version` is the version of the current record the caller
  /// read (`None` if there was none). A mismatch fails with
  /// `VersionConflict` and writes nothing.
  fn supersede_composite(
    &self,
    input: NewCompositeScore,
    expected_version: Option<i64>,
  ) -> impl Future<Output = Result<CompositeScore, Self::Error>> + Send + '_;

  // ── Other computed records ────────────────────────────────────────────

  /// Insert gap records; records whose id already exists are left as is.
  /// Returns how many were inserted.
  fn record_gaps(
    &self,
    records: Vec<GapRecord>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Gap records of the most recent analysis for a subject and cycle,
  /// ranked by absolute gap.
  fn list_gaps(
    &self,
    subject_id: Uuid,
    cycle_id: Uuid,
  ) -> impl Future<Output = Result<Vec<GapRecord>, Self::Error>> + Send + '_;

  /// Insert unless a record with the same id exists. Returns whether a row
  /// was inserted.
  fn record_confidence(
    &self,
    record: ConfidenceRecord,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn latest_confidence(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Option<ConfidenceRecord>, Self::Error>> + Send + '_;

  /// Confidence records with `computed_at` in `since..=until`, oldest first.
  fn confidence_history(
    &self,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<ConfidenceRecord>, Self::Error>> + Send + '_;

  /// Insert unless a snapshot with the same id exists. Returns whether a
  /// row was inserted.
  fn record_drift_snapshot(
    &self,
    snapshot: DriftSnapshot,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// The most recent snapshot for `key` whose period ends at or before
  /// `as_of`.
  fn latest_drift_snapshot<'a>(
    &'a self,
    key: &'a str,
    as_of: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<DriftSnapshot>, Self::Error>> + Send + 'a;

  // ── Audit ─────────────────────────────────────────────────────────────

  fn append_audit(
    &self,
    input: NewAuditEntry,
  ) -> impl Future<Output = Result<AuditLogEntry, Self::Error>> + Send + '_;

  /// Entries oldest first, optionally restricted to one subject.
  fn list_audit(
    &self,
    subject_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<AuditLogEntry>, Self::Error>> + Send + '_;
}
