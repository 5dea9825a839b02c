//! [`SqliteStore`]: the SQLite implementation of [`AssessmentStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _};
use tracing::{debug, info};
use uuid::Uuid;

use assay_core::{
  audit::{AuditLogEntry, NewAuditEntry},
  catalog::{
    Category, CategoryUpdate, Form, FormUpdate, Indicator, IndicatorUpdate,
    NewCategory, NewForm, NewIndicator, SeedReport, default_seed,
    ensure_unique_category_name, normalize_name, plan_seed,
  },
  error::EntityKind,
  evidence::{EvidenceItem, NewEvidence},
  rating::{NewRating, Rating, RatingContext},
  record::{
    CompositeScore, ConfidenceRecord, DriftSnapshot, GapRecord,
    NewCompositeScore,
  },
  store::AssessmentStore,
};

use crate::{
  Error, Result,
  encode::{
    AUDIT_COLUMNS, CATEGORY_COLUMNS, COMPOSITE_COLUMNS, CONFIDENCE_COLUMNS,
    DRIFT_COLUMNS, EVIDENCE_COLUMNS, FORM_COLUMNS, GAP_COLUMNS,
    INDICATOR_COLUMNS, RATING_COLUMNS, RawAudit, RawCategory, RawComposite,
    RawConfidence, RawDrift, RawEvidence, RawForm, RawGap, RawIndicator,
    RawRating, decode_uuid, encode_dt, encode_uuid,
  },
  error::abort,
  schema::SCHEMA,
};

type CallResult<T> = Result<T, tokio_rusqlite::Error>;

// ─── Store ───────────────────────────────────────────────────────────────────

/// An Assay store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Row helpers ─────────────────────────────────────────────────────────────
//
// These run inside `Connection::call` closures, so they take a plain
// connection (a transaction derefs to one) and report decode failures
// through `abort`.

fn form_exists(conn: &Connection, form_id: &str) -> rusqlite::Result<bool> {
  conn.query_row(
    "SELECT EXISTS(SELECT 1 FROM forms WHERE form_id = ?1)",
    [form_id],
    |r| r.get(0),
  )
}

fn load_category(conn: &Connection, category_id: &str) -> CallResult<Option<Category>> {
  conn
    .query_row(
      &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE category_id = ?1"),
      [category_id],
      RawCategory::from_row,
    )
    .optional()?
    .map(|raw| raw.into_category().map_err(abort))
    .transpose()
}

fn load_categories(conn: &Connection, form_id: &str) -> CallResult<Vec<Category>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {CATEGORY_COLUMNS} FROM categories WHERE form_id = ?1
     ORDER BY sort_order, name"
  ))?;
  let raws = stmt
    .query_map([form_id], RawCategory::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws
    .into_iter()
    .map(|raw| raw.into_category().map_err(abort))
    .collect()
}

fn load_indicator(conn: &Connection, indicator_id: &str) -> CallResult<Option<Indicator>> {
  conn
    .query_row(
      &format!("SELECT {INDICATOR_COLUMNS} FROM indicators WHERE indicator_id = ?1"),
      [indicator_id],
      RawIndicator::from_row,
    )
    .optional()?
    .map(|raw| raw.into_indicator().map_err(abort))
    .transpose()
}

fn load_indicators(conn: &Connection, form_id: &str) -> CallResult<Vec<Indicator>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {INDICATOR_COLUMNS} FROM indicators WHERE form_id = ?1"
  ))?;
  let raws = stmt
    .query_map([form_id], RawIndicator::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws
    .into_iter()
    .map(|raw| raw.into_indicator().map_err(abort))
    .collect()
}

/// Fail unless `category_id` names a category of `form_id`.
fn check_category_in_form(
  conn: &Connection,
  category_id: Uuid,
  form_id: Uuid,
) -> CallResult<()> {
  match load_category(conn, &encode_uuid(category_id))? {
    None => Err(abort(assay_core::Error::CategoryNotFound(category_id))),
    Some(c) if c.form_id != form_id => {
      Err(abort(assay_core::Error::InvalidConfiguration(format!(
        "category {category_id} does not belong to form {form_id}"
      ))))
    }
    Some(_) => Ok(()),
  }
}

fn insert_category(conn: &Connection, c: &Category) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO categories (category_id, form_id, name, sort_order)
     VALUES (?1, ?2, ?3, ?4)",
    rusqlite::params![
      encode_uuid(c.category_id),
      encode_uuid(c.form_id),
      c.name,
      c.sort_order,
    ],
  )?;
  Ok(())
}

fn insert_indicator(conn: &Connection, i: &Indicator) -> CallResult<()> {
  let guide = serde_json::to_string(&i.guide).map_err(abort)?;
  conn.execute(
    "INSERT INTO indicators (
       indicator_id, form_id, category_id, text, assessor_type,
       weight, rating_scale_max, guide, sort_order
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    rusqlite::params![
      encode_uuid(i.indicator_id),
      encode_uuid(i.form_id),
      i.category_id.map(encode_uuid),
      i.text,
      i.assessor_type.as_ref(),
      i.weight,
      i.rating_scale_max,
      guide,
      i.sort_order,
    ],
  )?;
  Ok(())
}

/// Ratings referencing indicators selected by `filter` (`?1` is bound to
/// `id`).
fn count_ratings(conn: &Connection, filter: &str, id: &str) -> rusqlite::Result<u64> {
  let n: i64 = conn.query_row(
    &format!(
      "SELECT COUNT(*) FROM ratings r
       JOIN indicators i ON i.indicator_id = r.indicator_id
       WHERE {filter}"
    ),
    [id],
    |r| r.get(0),
  )?;
  Ok(n.max(0) as u64)
}

fn referenced(entity: EntityKind, id: Uuid, ratings: u64) -> tokio_rusqlite::Error {
  abort(assay_core::Error::ReferencedEntityConflict { entity, id, ratings })
}

// ─── AssessmentStore impl ────────────────────────────────────────────────────

impl AssessmentStore for SqliteStore {
  type Error = Error;

  // ── Forms ─────────────────────────────────────────────────────────────────

  async fn create_form(&self, input: NewForm) -> Result<Form> {
    let form = Form {
      form_id:    Uuid::new_v4(),
      name:       normalize_name("form name", &input.name)?,
      scope:      input.scope.trim().to_owned(),
      created_at: Utc::now(),
    };

    let id_str = encode_uuid(form.form_id);
    let name = form.name.clone();
    let scope = form.scope.clone();
    let at_str = encode_dt(form.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO forms (form_id, name, scope, created_at) VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, name, scope, at_str],
        )?;
        Ok(())
      })
      .await?;

    debug!(form_id = %form.form_id, name = %form.name, "form created");
    Ok(form)
  }

  async fn get_form(&self, form_id: Uuid) -> Result<Option<Form>> {
    let id_str = encode_uuid(form_id);

    let raw: Option<RawForm> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {FORM_COLUMNS} FROM forms WHERE form_id = ?1"),
              [id_str],
              RawForm::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawForm::into_form).transpose()
  }

  async fn list_forms(&self) -> Result<Vec<Form>> {
    let raws: Vec<RawForm> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {FORM_COLUMNS} FROM forms ORDER BY created_at, form_id"
        ))?;
        let rows = stmt
          .query_map([], RawForm::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawForm::into_form).collect()
  }

  async fn update_form(&self, form_id: Uuid, update: FormUpdate) -> Result<Form> {
    let current = self
      .get_form(form_id)
      .await?
      .ok_or(assay_core::Error::FormNotFound(form_id))?;

    let mut form = current;
    if let Some(name) = update.name {
      form.name = normalize_name("form name", &name)?;
    }
    if let Some(scope) = update.scope {
      form.scope = scope.trim().to_owned();
    }

    let id_str = encode_uuid(form_id);
    let name = form.name.clone();
    let scope = form.scope.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE forms SET name = ?2, scope = ?3 WHERE form_id = ?1",
          rusqlite::params![id_str, name, scope],
        )?;
        Ok(())
      })
      .await?;

    Ok(form)
  }

  async fn delete_form(&self, form_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(form_id);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !form_exists(&tx, &id_str)? {
          return Err(abort(assay_core::Error::FormNotFound(form_id)));
        }
        let ratings = count_ratings(&tx, "i.form_id = ?1", &id_str)?;
        if ratings > 0 {
          return Err(referenced(EntityKind::Form, form_id, ratings));
        }
        tx.execute("DELETE FROM indicators WHERE form_id = ?1", [&id_str])?;
        tx.execute("DELETE FROM categories WHERE form_id = ?1", [&id_str])?;
        tx.execute("DELETE FROM forms WHERE form_id = ?1", [&id_str])?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    info!(%form_id, "form deleted");
    Ok(())
  }

  // ── Categories ────────────────────────────────────────────────────────────

  async fn create_category(&self, input: NewCategory) -> Result<Category> {
    let category = Category {
      category_id: Uuid::new_v4(),
      form_id:     input.form_id,
      name:        normalize_name("category name", &input.name)?,
      sort_order:  input.sort_order,
    };

    let created = category.clone();
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let form_str = encode_uuid(category.form_id);
        if !form_exists(&tx, &form_str)? {
          return Err(abort(assay_core::Error::FormNotFound(category.form_id)));
        }
        let existing = load_categories(&tx, &form_str)?;
        ensure_unique_category_name(&existing, &category.name, None).map_err(abort)?;
        insert_category(&tx, &category)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(created)
  }

  async fn list_categories(&self, form_id: Uuid) -> Result<Vec<Category>> {
    let id_str = encode_uuid(form_id);
    let categories = self
      .conn
      .call(move |conn| load_categories(conn, &id_str))
      .await?;
    Ok(categories)
  }

  async fn update_category(
    &self,
    category_id: Uuid,
    update: CategoryUpdate,
  ) -> Result<Category> {
    let name = update
      .name
      .as_deref()
      .map(|n| normalize_name("category name", n))
      .transpose()?;

    let updated = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current = load_category(&tx, &encode_uuid(category_id))?
          .ok_or_else(|| abort(assay_core::Error::CategoryNotFound(category_id)))?;

        let category = Category {
          name: name.unwrap_or_else(|| current.name.clone()),
          sort_order: update.sort_order.unwrap_or(current.sort_order),
          ..current
        };
        let siblings = load_categories(&tx, &encode_uuid(category.form_id))?;
        ensure_unique_category_name(&siblings, &category.name, Some(category_id))
          .map_err(abort)?;

        tx.execute(
          "UPDATE categories SET name = ?2, sort_order = ?3 WHERE category_id = ?1",
          rusqlite::params![encode_uuid(category_id), category.name, category.sort_order],
        )?;
        tx.commit()?;
        Ok(category)
      })
      .await?;

    Ok(updated)
  }

  async fn delete_category(&self, category_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(category_id);

    let detached = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if load_category(&tx, &id_str)?.is_none() {
          return Err(abort(assay_core::Error::CategoryNotFound(category_id)));
        }
        let ratings = count_ratings(&tx, "i.category_id = ?1", &id_str)?;
        if ratings > 0 {
          return Err(referenced(EntityKind::Category, category_id, ratings));
        }
        let detached = tx.execute(
          "UPDATE indicators SET category_id = NULL WHERE category_id = ?1",
          [&id_str],
        )?;
        tx.execute("DELETE FROM categories WHERE category_id = ?1", [&id_str])?;
        tx.commit()?;
        Ok(detached)
      })
      .await?;

    info!(%category_id, detached, "category deleted");
    Ok(())
  }

  // ── Indicators ────────────────────────────────────────────────────────────

  async fn create_indicator(&self, input: NewIndicator) -> Result<Indicator> {
    let indicator = input.into_indicator()?;

    let created = indicator.clone();
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !form_exists(&tx, &encode_uuid(indicator.form_id))? {
          return Err(abort(assay_core::Error::FormNotFound(indicator.form_id)));
        }
        if let Some(category_id) = indicator.category_id {
          check_category_in_form(&tx, category_id, indicator.form_id)?;
        }
        insert_indicator(&tx, &indicator)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(created)
  }

  async fn get_indicator(&self, indicator_id: Uuid) -> Result<Option<Indicator>> {
    let id_str = encode_uuid(indicator_id);
    let indicator = self
      .conn
      .call(move |conn| load_indicator(conn, &id_str))
      .await?;
    Ok(indicator)
  }

  async fn list_indicators(&self, form_id: Uuid) -> Result<Vec<Indicator>> {
    let id_str = encode_uuid(form_id);

    let (categories, mut indicators) = self
      .conn
      .call(move |conn| {
        Ok((load_categories(conn, &id_str)?, load_indicators(conn, &id_str)?))
      })
      .await?;

    // Category order first, uncategorized last.
    let rank = |i: &Indicator| {
      i.category_id
        .and_then(|id| categories.iter().position(|c| c.category_id == id))
        .unwrap_or(usize::MAX)
    };
    indicators.sort_by(|a, b| {
      rank(a)
        .cmp(&rank(b))
        .then(a.sort_order.cmp(&b.sort_order))
        .then_with(|| a.text.cmp(&b.text))
    });
    Ok(indicators)
  }

  async fn update_indicator(
    &self,
    indicator_id: Uuid,
    update: IndicatorUpdate,
  ) -> Result<Indicator> {
    let updated = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let id_str = encode_uuid(indicator_id);
        let current = load_indicator(&tx, &id_str)?
          .ok_or_else(|| abort(assay_core::Error::IndicatorNotFound(indicator_id)))?;
        let indicator = update.apply(&current).map_err(abort)?;

        if indicator.category_id != current.category_id {
          if let Some(category_id) = indicator.category_id {
            check_category_in_form(&tx, category_id, indicator.form_id)?;
          }
        }

        let (rated, highest): (i64, Option<f64>) = tx.query_row(
          "SELECT COUNT(*), MAX(value) FROM ratings WHERE indicator_id = ?1",
          [&id_str],
          |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        if rated > 0 && indicator.assessor_type != current.assessor_type {
          return Err(abort(assay_core::Error::InvalidConfiguration(format!(
            "indicator {indicator_id} is rated; its assessor type cannot change"
          ))));
        }
        match highest {
          Some(highest) if highest > f64::from(indicator.rating_scale_max) => {
            return Err(abort(assay_core::Error::InvalidConfiguration(format!(
              "rating_scale_max {} is below the recorded rating {highest} of \
               indicator {indicator_id}",
              indicator.rating_scale_max
            ))));
          }
          _ => {}
        }

        let guide = serde_json::to_string(&indicator.guide).map_err(abort)?;
        tx.execute(
          "UPDATE indicators SET
             category_id = ?2, text = ?3, assessor_type = ?4, weight = ?5,
             rating_scale_max = ?6, guide = ?7, sort_order = ?8
           WHERE indicator_id = ?1",
          rusqlite::params![
            id_str,
            indicator.category_id.map(encode_uuid),
            indicator.text,
            indicator.assessor_type.as_ref(),
            indicator.weight,
            indicator.rating_scale_max,
            guide,
            indicator.sort_order,
          ],
        )?;
        tx.commit()?;
        Ok(indicator)
      })
      .await?;

    Ok(updated)
  }

  async fn delete_indicator(&self, indicator_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(indicator_id);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if load_indicator(&tx, &id_str)?.is_none() {
          return Err(abort(assay_core::Error::IndicatorNotFound(indicator_id)));
        }
        let ratings = count_ratings(&tx, "i.indicator_id = ?1", &id_str)?;
        if ratings > 0 {
          return Err(referenced(EntityKind::Indicator, indicator_id, ratings));
        }
        tx.execute("DELETE FROM indicators WHERE indicator_id = ?1", [&id_str])?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn seed_defaults(&self, form_id: Uuid) -> Result<SeedReport> {
    let report = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let form_str = encode_uuid(form_id);
        if !form_exists(&tx, &form_str)? {
          return Err(abort(assay_core::Error::FormNotFound(form_id)));
        }
        let categories = load_categories(&tx, &form_str)?;
        let indicators = load_indicators(&tx, &form_str)?;

        let plan = plan_seed(form_id, &categories, &indicators, &default_seed());
        for category in &plan.new_categories {
          insert_category(&tx, category)?;
        }
        for indicator in &plan.new_indicators {
          insert_indicator(&tx, indicator)?;
        }
        tx.commit()?;
        Ok(plan.report)
      })
      .await?;

    info!(
      %form_id,
      categories_created = report.categories_created,
      indicators_created = report.indicators_created,
      indicators_skipped = report.indicators_skipped,
      "catalog seeded"
    );
    Ok(report)
  }

  // ── Ratings and evidence ──────────────────────────────────────────────────

  async fn record_rating(&self, input: NewRating) -> Result<Rating> {
    let rating = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let indicator = load_indicator(&tx, &encode_uuid(input.indicator_id))?
          .ok_or_else(|| abort(assay_core::Error::IndicatorNotFound(input.indicator_id)))?;
        input.validate_against(&indicator).map_err(abort)?;

        let rating = Rating {
          rating_id:     Uuid::new_v4(),
          indicator_id:  input.indicator_id,
          assessor_type: input.assessor_type,
          rater_id:      input.rater_id,
          subject_id:    input.subject_id,
          cycle_id:      input.cycle_id,
          value:         input.value,
          submitted_at:  Utc::now(),
        };
        tx.execute(
          "INSERT INTO ratings (
             rating_id, indicator_id, assessor_type, rater_id,
             subject_id, cycle_id, value, submitted_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            encode_uuid(rating.rating_id),
            encode_uuid(rating.indicator_id),
            rating.assessor_type.as_ref(),
            encode_uuid(rating.rater_id),
            encode_uuid(rating.subject_id),
            encode_uuid(rating.cycle_id),
            rating.value,
            encode_dt(rating.submitted_at),
          ],
        )?;
        tx.commit()?;
        Ok(rating)
      })
      .await?;

    debug!(rating_id = %rating.rating_id, subject_id = %rating.subject_id, "rating recorded");
    Ok(rating)
  }

  async fn rating_context(&self, subject_id: Uuid, cycle_id: Uuid) -> Result<RatingContext> {
    let subject_str = encode_uuid(subject_id);
    let cycle_str = encode_uuid(cycle_id);

    let (ratings, indicators, categories) = self
      .conn
      .call(move |conn| {
        let params = rusqlite::params![subject_str, cycle_str];

        let mut stmt = conn.prepare(&format!(
          "SELECT {RATING_COLUMNS} FROM ratings
           WHERE subject_id = ?1 AND cycle_id = ?2
           ORDER BY submitted_at, rating_id"
        ))?;
        let ratings = stmt
          .query_map(params, RawRating::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!(
          "SELECT {INDICATOR_COLUMNS} FROM indicators
           WHERE indicator_id IN (
             SELECT indicator_id FROM ratings WHERE subject_id = ?1 AND cycle_id = ?2
           )
           ORDER BY indicator_id"
        ))?;
        let indicators = stmt
          .query_map(params, RawIndicator::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!(
          "SELECT {CATEGORY_COLUMNS} FROM categories
           WHERE category_id IN (
             SELECT i.category_id FROM indicators i
             JOIN ratings r ON r.indicator_id = i.indicator_id
             WHERE r.subject_id = ?1 AND r.cycle_id = ?2
           )
           ORDER BY sort_order, name"
        ))?;
        let categories = stmt
          .query_map(params, RawCategory::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((ratings, indicators, categories))
      })
      .await?;

    Ok(RatingContext {
      ratings:    ratings.into_iter().map(RawRating::into_rating).collect::<Result<_>>()?,
      indicators: indicators
        .into_iter()
        .map(RawIndicator::into_indicator)
        .collect::<Result<_>>()?,
      categories: categories
        .into_iter()
        .map(RawCategory::into_category)
        .collect::<Result<_>>()?,
    })
  }

  async fn cycle_subjects(&self, cycle_id: Uuid) -> Result<Vec<Uuid>> {
    let cycle_str = encode_uuid(cycle_id);

    let ids: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT subject_id FROM ratings WHERE cycle_id = ?1 ORDER BY subject_id",
        )?;
        let rows = stmt
          .query_map([cycle_str], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    ids.iter().map(|s| decode_uuid(s)).collect()
  }

  async fn record_evidence(&self, input: NewEvidence) -> Result<EvidenceItem> {
    let item = EvidenceItem {
      evidence_id:  Uuid::new_v4(),
      subject_id:   input.subject_id,
      source_table: input.source_table,
      kind:         input.kind,
      value:        input.value,
      timestamp:    input.timestamp,
      rater_id:     input.rater_id,
      flagged_bias: input.flagged_bias,
    };

    let row = (
      encode_uuid(item.evidence_id),
      encode_uuid(item.subject_id),
      item.source_table.clone(),
      item.kind.clone(),
      serde_json::to_string(&item.value)?,
      encode_dt(item.timestamp),
      item.rater_id.map(encode_uuid),
      item.flagged_bias,
    );

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO evidence (
             evidence_id, subject_id, source_table, kind,
             value_json, timestamp, rater_id, flagged_bias
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7],
        )?;
        Ok(())
      })
      .await?;

    Ok(item)
  }

  async fn list_evidence(
    &self,
    subject_id: Uuid,
    as_of: DateTime<Utc>,
  ) -> Result<Vec<EvidenceItem>> {
    let subject_str = encode_uuid(subject_id);
    let as_of_str = encode_dt(as_of);

    let raws: Vec<RawEvidence> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVIDENCE_COLUMNS} FROM evidence
           WHERE subject_id = ?1 AND timestamp <= ?2
           ORDER BY timestamp, evidence_id"
        ))?;
        let rows = stmt
          .query_map([subject_str, as_of_str], RawEvidence::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEvidence::into_evidence).collect()
  }

  // ── Composite scores ──────────────────────────────────────────────────────

  async fn current_composite(
    &self,
    subject_id: Uuid,
    cycle_id: Uuid,
  ) -> Result<Option<CompositeScore>> {
    let subject_str = encode_uuid(subject_id);
    let cycle_str = encode_uuid(cycle_id);

    let raw: Option<RawComposite> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {COMPOSITE_COLUMNS} FROM composite_scores
                 WHERE subject_id = ?1 AND cycle_id = ?2 AND is_current = 1"
              ),
              [subject_str, cycle_str],
              RawComposite::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawComposite::into_composite).transpose()
  }

  async fn composite_history(
    &self,
    subject_id: Uuid,
    cycle_id: Uuid,
  ) -> Result<Vec<CompositeScore>> {
    let subject_str = encode_uuid(subject_id);
    let cycle_str = encode_uuid(cycle_id);

    let raws: Vec<RawComposite> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {COMPOSITE_COLUMNS} FROM composite_scores
           WHERE subject_id = ?1 AND cycle_id = ?2
           ORDER BY version"
        ))?;
        let rows = stmt
          .query_map([subject_str, cycle_str], RawComposite::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawComposite::into_composite).collect()
  }

  async fn supersede_composite(
    &self,
    input: NewCompositeScore,
    expected_version: Option<i64>,
  ) -> Result<CompositeScore> {
    let sub_scores = serde_json::to_string(&input.sub_scores)?;
    let band_override = input
      .band_override
      .as_ref()
      .map(serde_json::to_string)
      .transpose()?;

    let score = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let subject_str = encode_uuid(input.subject_id);
        let cycle_str = encode_uuid(input.cycle_id);

        let actual: Option<i64> = tx
          .query_row(
            "SELECT version FROM composite_scores
             WHERE subject_id = ?1 AND cycle_id = ?2 AND is_current = 1",
            [&subject_str, &cycle_str],
            |r| r.get(0),
          )
          .optional()?;
        if actual != expected_version {
          return Err(abort(assay_core::Error::VersionConflict {
            subject_id: input.subject_id,
            cycle_id: input.cycle_id,
            expected: expected_version,
            actual,
          }));
        }

        let version: i64 = tx.query_row(
          "SELECT COALESCE(MAX(version), 0) + 1 FROM composite_scores
           WHERE subject_id = ?1 AND cycle_id = ?2",
          [&subject_str, &cycle_str],
          |r| r.get(0),
        )?;
        tx.execute(
          "UPDATE composite_scores SET is_current = 0
           WHERE subject_id = ?1 AND cycle_id = ?2 AND is_current = 1",
          [&subject_str, &cycle_str],
        )?;

        let score = CompositeScore {
          score_id: Uuid::new_v4(),
          subject_id: input.subject_id,
          cycle_id: input.cycle_id,
          overall_score: input.overall_score,
          sub_scores: input.sub_scores,
          computed_band: input.computed_band,
          band_override: input.band_override,
          is_current: true,
          version,
          input_digest: input.input_digest,
          computed_at: input.computed_at,
        };
        tx.execute(
          "INSERT INTO composite_scores (
             score_id, subject_id, cycle_id, overall_score, sub_scores,
             computed_band, band_override, is_current, version,
             input_digest, computed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10)",
          rusqlite::params![
            encode_uuid(score.score_id),
            subject_str,
            cycle_str,
            score.overall_score,
            sub_scores,
            score.computed_band.as_ref(),
            band_override,
            score.version,
            score.input_digest,
            encode_dt(score.computed_at),
          ],
        )?;
        tx.commit()?;
        Ok(score)
      })
      .await?;

    info!(
      subject_id = %score.subject_id,
      cycle_id = %score.cycle_id,
      version = score.version,
      band = %score.band(),
      "composite score superseded"
    );
    Ok(score)
  }

  // ── Other computed records ────────────────────────────────────────────────

  async fn record_gaps(&self, records: Vec<GapRecord>) -> Result<usize> {
    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for g in &records {
          inserted += tx.execute(
            "INSERT OR IGNORE INTO gap_records (
               gap_id, subject_id, cycle_id, competency, self_score,
               others_average, others_rater_count, gap, classification,
               input_digest, computed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
              encode_uuid(g.gap_id),
              encode_uuid(g.subject_id),
              encode_uuid(g.cycle_id),
              g.competency,
              g.self_score,
              g.others_average,
              g.others_rater_count as i64,
              g.gap,
              g.classification.as_ref(),
              g.input_digest,
              encode_dt(g.computed_at),
            ],
          )?;
        }
        tx.commit()?;
        Ok(inserted)
      })
      .await?;

    Ok(inserted)
  }

  async fn list_gaps(&self, subject_id: Uuid, cycle_id: Uuid) -> Result<Vec<GapRecord>> {
    let subject_str = encode_uuid(subject_id);
    let cycle_str = encode_uuid(cycle_id);

    let raws: Vec<RawGap> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {GAP_COLUMNS} FROM gap_records
           WHERE subject_id = ?1 AND cycle_id = ?2
             AND input_digest = (
               SELECT input_digest FROM gap_records
               WHERE subject_id = ?1 AND cycle_id = ?2
               ORDER BY computed_at DESC, rowid DESC
               LIMIT 1
             )
           ORDER BY ABS(gap) DESC, competency"
        ))?;
        let rows = stmt
          .query_map([subject_str, cycle_str], RawGap::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawGap::into_gap).collect()
  }

  async fn record_confidence(&self, record: ConfidenceRecord) -> Result<bool> {
    let inserted = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "INSERT OR IGNORE INTO confidence_records (
             confidence_id, subject_id, confidence_score, bias_risk_level,
             source_count, signal_count, rater_count, data_freshness_days,
             freshness, input_digest, computed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
          rusqlite::params![
            encode_uuid(record.confidence_id),
            encode_uuid(record.subject_id),
            record.confidence_score,
            record.bias_risk_level.as_ref(),
            record.source_count as i64,
            record.signal_count as i64,
            record.rater_count as i64,
            record.data_freshness_days,
            record.freshness.as_ref(),
            record.input_digest,
            encode_dt(record.computed_at),
          ],
        )?;
        Ok(n == 1)
      })
      .await?;

    Ok(inserted)
  }

  async fn latest_confidence(&self, subject_id: Uuid) -> Result<Option<ConfidenceRecord>> {
    let subject_str = encode_uuid(subject_id);

    let raw: Option<RawConfidence> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {CONFIDENCE_COLUMNS} FROM confidence_records
                 WHERE subject_id = ?1
                 ORDER BY computed_at DESC, rowid DESC
                 LIMIT 1"
              ),
              [subject_str],
              RawConfidence::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawConfidence::into_confidence).transpose()
  }

  async fn confidence_history(
    &self,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
  ) -> Result<Vec<ConfidenceRecord>> {
    let since_str = encode_dt(since);
    let until_str = encode_dt(until);

    let raws: Vec<RawConfidence> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CONFIDENCE_COLUMNS} FROM confidence_records
           WHERE computed_at >= ?1 AND computed_at <= ?2
           ORDER BY computed_at, confidence_id"
        ))?;
        let rows = stmt
          .query_map([since_str, until_str], RawConfidence::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawConfidence::into_confidence).collect()
  }

  async fn record_drift_snapshot(&self, snapshot: DriftSnapshot) -> Result<bool> {
    let inserted = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "INSERT OR IGNORE INTO drift_snapshots (
             snapshot_id, key, period_end, baseline_avg, current_avg,
             drift_score, threshold_breached, alert_raised, observations,
             computed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            encode_uuid(snapshot.snapshot_id),
            snapshot.key,
            encode_dt(snapshot.period_end),
            snapshot.baseline_avg,
            snapshot.current_avg,
            snapshot.drift_score,
            snapshot.threshold_breached,
            snapshot.alert_raised,
            i64::try_from(snapshot.observations).unwrap_or(i64::MAX),
            encode_dt(snapshot.computed_at),
          ],
        )?;
        Ok(n == 1)
      })
      .await?;

    Ok(inserted)
  }

  async fn latest_drift_snapshot<'a>(
    &'a self,
    key: &'a str,
    as_of: DateTime<Utc>,
  ) -> Result<Option<DriftSnapshot>> {
    let key = key.to_owned();
    let as_of = encode_dt(as_of);

    let raw: Option<RawDrift> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {DRIFT_COLUMNS} FROM drift_snapshots
                 WHERE key = ?1 AND period_end <= ?2
                 ORDER BY period_end DESC, rowid DESC
                 LIMIT 1"
              ),
              [key, as_of],
              RawDrift::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawDrift::into_snapshot).transpose()
  }

  // ── Audit ─────────────────────────────────────────────────────────────────

  async fn append_audit(&self, input: NewAuditEntry) -> Result<AuditLogEntry> {
    let entry = AuditLogEntry {
      entry_id:    Uuid::new_v4(),
      action:      input.action,
      actor:       input.actor,
      subject_id:  input.subject_id,
      cycle_id:    input.cycle_id,
      record_id:   input.record_id,
      rationale:   input.rationale,
      recorded_at: Utc::now(),
    };

    let row = (
      encode_uuid(entry.entry_id),
      entry.action.as_ref().to_owned(),
      serde_json::to_string(&entry.actor)?,
      entry.subject_id.map(encode_uuid),
      entry.cycle_id.map(encode_uuid),
      entry.record_id.map(encode_uuid),
      entry.rationale.clone(),
      encode_dt(entry.recorded_at),
    );

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO audit_log (
             entry_id, action, actor, subject_id, cycle_id,
             record_id, rationale, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7],
        )?;
        Ok(())
      })
      .await?;

    debug!(action = %entry.action, entry_id = %entry.entry_id, "audit entry appended");
    Ok(entry)
  }

  async fn list_audit(&self, subject_id: Option<Uuid>) -> Result<Vec<AuditLogEntry>> {
    let subject_str = subject_id.map(encode_uuid);

    let raws: Vec<RawAudit> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {AUDIT_COLUMNS} FROM audit_log
           WHERE ?1 IS NULL OR subject_id = ?1
           ORDER BY recorded_at, rowid"
        ))?;
        let rows = stmt
          .query_map([subject_str], RawAudit::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAudit::into_entry).collect()
  }
}
